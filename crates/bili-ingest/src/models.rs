//! Typed payloads for the endpoints the core consumes.
//!
//! `Raw*` types mirror the wire shape and are kept crate-private; the public
//! types are what domain operations hand to callers.

use chrono::{FixedOffset, NaiveDateTime, TimeZone};
use serde::de::{DeserializeOwned, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

/// Public profile of a creator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatorProfile {
    pub mid: u64,
    pub name: String,
    /// Avatar URL.
    pub face: String,
    /// Bio.
    pub sign: String,
    pub level: u32,
    pub follower: u64,
}

/// Aggregate counters for a creator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatorStat {
    pub mid: u64,
    pub video_count: u64,
    pub views: u64,
    pub likes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoStats {
    pub views: u64,
    pub comments: u64,
    pub favorites: u64,
}

/// One catalog entry, normalised across endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoItem {
    /// `BV...` identifier.
    pub video_id: String,
    pub aid: u64,
    pub title: String,
    pub description: String,
    pub cover_url: String,
    /// Human duration such as `"12:34"` or `"1:02:03"`.
    pub duration: String,
    /// Unix seconds.
    pub published_at: i64,
    pub stats: VideoStats,
    pub creator_id: u64,
}

/// One page of a creator's catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoPage {
    pub page: u32,
    pub page_size: u32,
    pub items: Vec<VideoItem>,
    /// Catalog size reported by the platform, when the response carries one.
    pub total: Option<u64>,
    /// Entries on this page that could not be decoded.
    pub skipped: usize,
}

/// Result of a multi-page catalog walk.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CatalogFetch {
    pub items: Vec<VideoItem>,
    /// Undecodable entries plus entries on skipped pages.
    pub skipped: usize,
    /// Pages successfully fetched.
    pub pages: u32,
    /// The walk stopped early on an error and kept what it had.
    pub partial: bool,
}

/// Full metadata for one video.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoDetail {
    #[serde(flatten)]
    pub video: VideoItem,
    pub owner_name: String,
    pub category: String,
    pub likes: u64,
    pub coins: u64,
    pub shares: u64,
    pub danmaku: u64,
}

/// One page of keyword search results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchPage {
    pub keyword: String,
    pub page: u32,
    pub total: u64,
    pub num_pages: u32,
    pub items: Vec<VideoItem>,
    pub skipped: usize,
}

/// Accepts numbers, numeric strings, placeholders like `"--"` and null.
pub(crate) fn lenient_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    struct CountVisitor;

    impl<'de> Visitor<'de> for CountVisitor {
        type Value = u64;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a count as number or string")
        }

        fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<u64, E> {
            Ok(v)
        }

        fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<u64, E> {
            Ok(v.max(0) as u64)
        }

        fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<u64, E> {
            Ok(if v.is_finite() && v > 0.0 { v as u64 } else { 0 })
        }

        fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<u64, E> {
            Ok(v.trim().parse().unwrap_or(0))
        }

        fn visit_unit<E: serde::de::Error>(self) -> Result<u64, E> {
            Ok(0)
        }

        fn visit_none<E: serde::de::Error>(self) -> Result<u64, E> {
            Ok(0)
        }

        fn visit_some<D2: Deserializer<'de>>(self, d: D2) -> Result<u64, D2::Error> {
            d.deserialize_any(self)
        }
    }

    deserializer.deserialize_any(CountVisitor)
}

/// Signed variant of [`lenient_count`] for timestamps.
fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n.as_i64().unwrap_or(0),
        serde_json::Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

/// Protocol-relative and plain-http cover links become https.
pub fn normalize_cover_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("//") {
        format!("https://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("https://{rest}")
    } else {
        url.to_string()
    }
}

/// Remove search highlight markup and the common HTML entities.
pub fn strip_highlight(text: &str) -> String {
    text.replace("<em class=\"keyword\">", "")
        .replace("</em>", "")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// `754` → `"12:34"`, `3723` → `"1:02:03"`.
pub fn format_duration(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}

/// Parse `"2024-03-01 18:30:00"` (platform local time, UTC+8) to unix seconds.
fn parse_local_datetime(text: &str) -> Option<i64> {
    let offset = FixedOffset::east_opt(8 * 3600)?;
    let naive = NaiveDateTime::parse_from_str(text.trim(), "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(text.trim(), "%Y-%m-%d %H:%M"))
        .ok()?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.timestamp())
}

/// Decode a loosely typed list, skipping entries that do not fit `R`.
///
/// Returns the converted items and how many entries were skipped.
pub(crate) fn decode_list<R, F>(values: Vec<serde_json::Value>, convert: F) -> (Vec<VideoItem>, usize)
where
    R: DeserializeOwned,
    F: Fn(R) -> Option<VideoItem>,
{
    let mut items = Vec::with_capacity(values.len());
    let mut skipped = 0;
    for value in values {
        match serde_json::from_value::<R>(value) {
            Ok(raw) => match convert(raw) {
                Some(item) => items.push(item),
                None => skipped += 1,
            },
            Err(e) => {
                debug!(error = %e, "Skipping undecodable list entry");
                skipped += 1;
            }
        }
    }
    (items, skipped)
}

// Wire shapes.

#[derive(Debug, Deserialize)]
pub(crate) struct RawAccInfo {
    pub mid: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub face: String,
    #[serde(default)]
    pub sign: String,
    #[serde(default)]
    pub level: u32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawRelationStat {
    #[serde(default, deserialize_with = "lenient_count")]
    pub follower: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawNavNum {
    #[serde(default, deserialize_with = "lenient_count")]
    pub video: u64,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawArchiveStat {
    #[serde(default, deserialize_with = "lenient_count")]
    pub view: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawUpStat {
    #[serde(default)]
    pub archive: RawArchiveStat,
    #[serde(default, deserialize_with = "lenient_count")]
    pub likes: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawArcSearch {
    pub list: Option<RawArcList>,
    pub page: Option<RawPageInfo>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawArcList {
    pub vlist: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawPageInfo {
    #[serde(default, deserialize_with = "lenient_count")]
    pub count: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawArcVideo {
    #[serde(default)]
    pub aid: u64,
    #[serde(default)]
    pub bvid: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub pic: String,
    #[serde(default)]
    pub length: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub created: i64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub play: u64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub comment: u64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub favorites: u64,
    #[serde(default)]
    pub mid: u64,
}

impl RawArcVideo {
    pub fn into_item(self) -> Option<VideoItem> {
        if self.bvid.is_empty() {
            return None;
        }
        Some(VideoItem {
            video_id: self.bvid,
            aid: self.aid,
            title: self.title,
            description: self.description,
            cover_url: normalize_cover_url(&self.pic),
            duration: self.length,
            published_at: self.created,
            stats: VideoStats {
                views: self.play,
                comments: self.comment,
                favorites: self.favorites,
            },
            creator_id: self.mid,
        })
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawOwner {
    #[serde(default)]
    pub mid: u64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawViewStat {
    #[serde(default, deserialize_with = "lenient_count")]
    pub view: u64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub danmaku: u64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub reply: u64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub favorite: u64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub coin: u64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub share: u64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub like: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawView {
    pub bvid: String,
    #[serde(default)]
    pub aid: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub pic: String,
    #[serde(default, deserialize_with = "lenient_count")]
    pub duration: u64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub pubdate: i64,
    pub owner: RawOwner,
    #[serde(default)]
    pub stat: RawViewStat,
    #[serde(default)]
    pub tname: String,
}

impl From<RawView> for VideoDetail {
    fn from(raw: RawView) -> Self {
        VideoDetail {
            video: VideoItem {
                video_id: raw.bvid,
                aid: raw.aid,
                title: raw.title,
                description: raw.desc,
                cover_url: normalize_cover_url(&raw.pic),
                duration: format_duration(raw.duration),
                published_at: raw.pubdate,
                stats: VideoStats {
                    views: raw.stat.view,
                    comments: raw.stat.reply,
                    favorites: raw.stat.favorite,
                },
                creator_id: raw.owner.mid,
            },
            owner_name: raw.owner.name,
            category: raw.tname,
            likes: raw.stat.like,
            coins: raw.stat.coin,
            shares: raw.stat.share,
            danmaku: raw.stat.danmaku,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawSearch {
    #[serde(default, rename = "numResults", deserialize_with = "lenient_count")]
    pub num_results: u64,
    #[serde(default, rename = "numPages", deserialize_with = "lenient_count")]
    pub num_pages: u64,
    #[serde(default)]
    pub result: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawSearchVideo {
    #[serde(default)]
    pub aid: u64,
    #[serde(default)]
    pub bvid: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub pic: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub pubdate: i64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub play: u64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub review: u64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub favorites: u64,
    #[serde(default)]
    pub mid: u64,
}

impl RawSearchVideo {
    pub fn into_item(self) -> Option<VideoItem> {
        if self.bvid.is_empty() {
            return None;
        }
        Some(VideoItem {
            video_id: self.bvid,
            aid: self.aid,
            title: strip_highlight(&self.title),
            description: self.description,
            cover_url: normalize_cover_url(&self.pic),
            duration: self.duration,
            published_at: self.pubdate,
            stats: VideoStats {
                views: self.play,
                comments: self.review,
                favorites: self.favorites,
            },
            creator_id: self.mid,
        })
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawRankingVideo {
    #[serde(default, deserialize_with = "lenient_count")]
    pub aid: u64,
    #[serde(default)]
    pub bvid: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub pic: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub create: String,
    #[serde(default, deserialize_with = "lenient_count")]
    pub play: u64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub video_review: u64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub favorites: u64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub mid: u64,
}

impl RawRankingVideo {
    pub fn into_item(self) -> Option<VideoItem> {
        if self.bvid.is_empty() {
            return None;
        }
        Some(VideoItem {
            video_id: self.bvid,
            aid: self.aid,
            title: self.title,
            description: self.description,
            cover_url: normalize_cover_url(&self.pic),
            duration: self.duration,
            published_at: parse_local_datetime(&self.create).unwrap_or(0),
            stats: VideoStats {
                views: self.play,
                comments: self.video_review,
                favorites: self.favorites,
            },
            creator_id: self.mid,
        })
    }
}
