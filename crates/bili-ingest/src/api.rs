//! Typed domain operations on top of [`BiliClient`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::client::{BiliClient, RequestOptions};
use crate::error::ApiError;
use crate::models::{
    CatalogFetch, CreatorProfile, CreatorStat, RawAccInfo, RawArcSearch, RawArcVideo, RawNavNum,
    RawRankingVideo, RawRelationStat, RawSearch, RawSearchVideo, RawUpStat, RawView, SearchPage,
    VideoDetail, VideoItem, VideoPage, decode_list,
};
use crate::sync::{CatalogSource, RosterEntry, SyncMode};
use crate::wbi::Params;

const ACC_INFO: &str = "/x/space/wbi/acc/info";
const RELATION_STAT: &str = "/x/relation/stat";
const NAV_NUM: &str = "/x/space/navnum";
const UP_STAT: &str = "/x/space/upstat";
const ARC_SEARCH: &str = "/x/space/wbi/arc/search";
const VIEW: &str = "/x/web-interface/view";
const SEARCH_TYPE: &str = "/x/web-interface/wbi/search/type";
const RANKING_REGION: &str = "/x/web-interface/ranking/region";

/// Paging behaviour of the catalog walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// How often a rate-limited page is retried before the walk gives up.
    #[serde(default = "default_page_retries")]
    pub page_retries: u32,
    /// Pause after a rate-limited page.
    #[serde(default = "default_rate_limit_pause_ms")]
    pub rate_limit_pause_ms: u64,
}

fn default_page_size() -> u32 {
    30
}

fn default_page_retries() -> u32 {
    3
}

fn default_rate_limit_pause_ms() -> u64 {
    10_000
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            page_retries: default_page_retries(),
            rate_limit_pause_ms: default_rate_limit_pause_ms(),
        }
    }
}

fn params<const N: usize>(pairs: [(&str, String); N]) -> Params {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

fn parse_mid(id: &str) -> Result<u64, ApiError> {
    id.trim().parse().map_err(|_| ApiError::Api {
        code: -400,
        message: format!("invalid creator id {id:?}"),
    })
}

pub struct BiliApi {
    client: Arc<BiliClient>,
    config: ApiConfig,
}

impl BiliApi {
    pub fn new(client: Arc<BiliClient>, config: ApiConfig) -> Self {
        Self { client, config }
    }

    pub fn client(&self) -> &Arc<BiliClient> {
        &self.client
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub async fn creator_profile(&self, mid: u64) -> Result<CreatorProfile, ApiError> {
        let info: RawAccInfo = self
            .client
            .get(ACC_INFO, params([("mid", mid.to_string())]), RequestOptions::SIGNED)
            .await?;
        let relation: RawRelationStat = self
            .client
            .get(
                RELATION_STAT,
                params([("vmid", mid.to_string())]),
                RequestOptions::UNSIGNED,
            )
            .await?;

        Ok(CreatorProfile {
            mid: info.mid,
            name: info.name,
            face: info.face,
            sign: info.sign,
            level: info.level,
            follower: relation.follower,
        })
    }

    pub async fn creator_stat(&self, mid: u64) -> Result<CreatorStat, ApiError> {
        let nav: RawNavNum = self
            .client
            .get(NAV_NUM, params([("mid", mid.to_string())]), RequestOptions::UNSIGNED)
            .await?;
        let up: RawUpStat = self
            .client
            .get(UP_STAT, params([("mid", mid.to_string())]), RequestOptions::UNSIGNED)
            .await?;

        Ok(CreatorStat {
            mid,
            video_count: nav.video,
            views: up.archive.view,
            likes: up.likes,
        })
    }

    /// One page of a creator's catalog, newest first.
    pub async fn creator_videos_page(
        &self,
        mid: u64,
        page: u32,
        page_size: u32,
    ) -> Result<VideoPage, ApiError> {
        let raw: RawArcSearch = self
            .client
            .get(
                ARC_SEARCH,
                params([
                    ("mid", mid.to_string()),
                    ("pn", page.to_string()),
                    ("ps", page_size.to_string()),
                    ("order", "pubdate".to_string()),
                ]),
                RequestOptions::SIGNED,
            )
            .await?;

        let vlist = raw
            .list
            .and_then(|l| l.vlist)
            .ok_or_else(|| ApiError::Malformed(format!("catalog page {page} has no list")))?;
        let (items, skipped) = decode_list(vlist, RawArcVideo::into_item);
        if skipped > 0 {
            warn!(mid, page, skipped, "Skipped undecodable catalog entries");
        }

        Ok(VideoPage {
            page,
            page_size,
            items,
            total: raw.page.map(|p| p.count),
            skipped,
        })
    }

    /// Fetch a page, pausing and retrying it while the platform rate limits us.
    async fn page_with_retry(&self, mid: u64, page: u32, page_size: u32) -> Result<VideoPage, ApiError> {
        let pause = Duration::from_millis(self.config.rate_limit_pause_ms);
        let mut retries = 0;
        loop {
            match self.creator_videos_page(mid, page, page_size).await {
                Err(e) if e.is_rate_limited() && retries < self.config.page_retries => {
                    retries += 1;
                    warn!(mid, page, retries, pause_ms = pause.as_millis() as u64, "Catalog page rate limited; pausing");
                    tokio::time::sleep(pause).await;
                }
                other => return other,
            }
        }
    }

    /// Walk a creator's catalog page by page until `max_items` are collected
    /// or the catalog ends.
    ///
    /// Pages that fail after items were collected end the walk with a
    /// partial result instead of an error. A malformed first page is an
    /// error; later malformed pages are skipped.
    pub async fn creator_videos_all(
        &self,
        mid: u64,
        max_items: usize,
        page_size: u32,
    ) -> Result<CatalogFetch, ApiError> {
        let page_size = page_size.max(1);
        let mut fetch = CatalogFetch::default();
        let mut total: Option<u64> = None;
        let mut page = 1u32;

        while fetch.items.len() < max_items {
            match self.page_with_retry(mid, page, page_size).await {
                Ok(vp) => {
                    fetch.pages += 1;
                    fetch.skipped += vp.skipped;
                    let received = vp.items.len() + vp.skipped;
                    if total.is_none() {
                        total = vp.total.filter(|&t| t > 0);
                    }

                    let remaining = max_items - fetch.items.len();
                    fetch.items.extend(vp.items.into_iter().take(remaining));
                    debug!(mid, page, received, collected = fetch.items.len(), "Catalog page fetched");

                    if received < page_size as usize {
                        break;
                    }
                }
                Err(e) if e.is_malformed() && page > 1 => {
                    warn!(mid, page, error = %e, "Skipping malformed catalog page");
                    fetch.skipped += page_size as usize;
                }
                Err(e) if fetch.items.is_empty() => return Err(e),
                Err(e) => {
                    warn!(mid, page, collected = fetch.items.len(), error = %e, "Catalog walk stopped early; keeping fetched pages");
                    self.release_failed_credential(&e);
                    fetch.partial = true;
                    break;
                }
            }

            if total.is_some_and(|t| u64::from(page) * u64::from(page_size) >= t) {
                break;
            }
            page += 1;
        }

        info!(mid, items = fetch.items.len(), pages = fetch.pages, skipped = fetch.skipped, "Catalog walk finished");
        Ok(fetch)
    }

    /// A partial result swallows the auth error, so the pool is told here.
    fn release_failed_credential(&self, err: &ApiError) {
        if let ApiError::Auth {
            credential_id: Some(id),
            message,
            ..
        } = err
        {
            let pool = self.client.pool();
            pool.report_error(id, message);
            // Moves on only once the failing entry is no longer usable.
            pool.get_active_credential();
        }
    }

    pub async fn video_detail(&self, bvid: &str) -> Result<VideoDetail, ApiError> {
        let raw: RawView = self
            .client
            .get(VIEW, params([("bvid", bvid.to_string())]), RequestOptions::UNSIGNED)
            .await?;
        Ok(raw.into())
    }

    pub async fn search_videos(
        &self,
        keyword: &str,
        page: u32,
        page_size: u32,
    ) -> Result<SearchPage, ApiError> {
        let raw: RawSearch = self
            .client
            .get(
                SEARCH_TYPE,
                params([
                    ("search_type", "video".to_string()),
                    ("keyword", keyword.to_string()),
                    ("page", page.to_string()),
                    ("page_size", page_size.to_string()),
                ]),
                RequestOptions::SIGNED,
            )
            .await?;

        let (items, skipped) = decode_list(raw.result.unwrap_or_default(), RawSearchVideo::into_item);
        Ok(SearchPage {
            keyword: keyword.to_string(),
            page,
            total: raw.num_results,
            num_pages: u32::try_from(raw.num_pages).unwrap_or(u32::MAX),
            items,
            skipped,
        })
    }

    /// Top videos of a region over the last `window_days` days.
    pub async fn region_ranking(
        &self,
        region_id: u32,
        window_days: u32,
    ) -> Result<Vec<VideoItem>, ApiError> {
        let list: Vec<serde_json::Value> = self
            .client
            .get(
                RANKING_REGION,
                params([
                    ("rid", region_id.to_string()),
                    ("day", window_days.to_string()),
                    ("original", "0".to_string()),
                ]),
                RequestOptions::UNSIGNED,
            )
            .await?;
        let (items, skipped) = decode_list(list, RawRankingVideo::into_item);
        if skipped > 0 {
            debug!(region_id, skipped, "Skipped undecodable ranking entries");
        }
        Ok(items)
    }
}

#[async_trait]
impl CatalogSource for BiliApi {
    async fn fetch_catalog(
        &self,
        creator: &RosterEntry,
        max_items: usize,
        mode: SyncMode,
    ) -> Result<CatalogFetch, ApiError> {
        let mid = parse_mid(&creator.id)?;
        match mode {
            SyncMode::Full => {
                self.creator_videos_all(mid, max_items, self.config.page_size)
                    .await
            }
            SyncMode::Latest => {
                let page_size = self
                    .config
                    .page_size
                    .min(u32::try_from(max_items).unwrap_or(u32::MAX))
                    .max(1);
                let mut vp = self.page_with_retry(mid, 1, page_size).await?;
                vp.items.truncate(max_items);
                Ok(CatalogFetch {
                    items: vp.items,
                    skipped: vp.skipped,
                    pages: 1,
                    partial: false,
                })
            }
        }
    }
}
