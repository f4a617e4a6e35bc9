//! WBI request signing.
//!
//! Signed endpoints expect two extra query parameters: `wts` (unix seconds)
//! and `w_rid`, an MD5 digest of the sorted query string salted with a
//! "mixin key" derived from two short-lived keys published by the nav API.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use md5::{Digest, Md5};
use parking_lot::RwLock;
use reqwest::header::{REFERER, USER_AGENT};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::client::{BASE_URL, DEFAULT_UA};
use crate::error::ApiError;

/// How long fetched keys stay valid.
pub const KEY_TTL: Duration = Duration::from_secs(30 * 60);

/// Query parameters as owned key/value pairs.
pub type Params = Vec<(String, String)>;

const MIXIN_KEY_ENC_TAB: [usize; 64] = [
    46, 47, 18, 2, 53, 8, 23, 32, 15, 50, 10, 31, 58, 3, 45, 35, 27, 43, 5, 49, 33, 9, 42, 19, 29,
    28, 14, 39, 12, 38, 41, 13, 37, 48, 7, 16, 24, 55, 40, 61, 26, 17, 0, 1, 60, 51, 30, 4, 22, 25,
    54, 21, 56, 59, 6, 63, 57, 62, 11, 36, 20, 34, 44, 52,
];

/// Signing keys with their expiry on the tokio clock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WbiKeys {
    pub img_key: String,
    pub sub_key: String,
    pub expires_at: Instant,
}

impl WbiKeys {
    pub fn new(img_key: impl Into<String>, sub_key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            img_key: img_key.into(),
            sub_key: sub_key.into(),
            expires_at: Instant::now() + ttl,
        }
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Where fresh `(img_key, sub_key)` pairs come from.
#[async_trait]
pub trait WbiKeySource: Send + Sync {
    async fn fetch_keys(&self) -> Result<(String, String), ApiError>;
}

#[derive(Deserialize)]
struct WbiImg {
    img_url: String,
    sub_url: String,
}

#[derive(Deserialize)]
struct NavData {
    wbi_img: WbiImg,
}

#[derive(Deserialize)]
struct NavResponse {
    data: Option<NavData>,
}

/// Reads the keys from `GET /x/web-interface/nav`.
///
/// The endpoint answers `-101` for anonymous sessions but still includes
/// `wbi_img`, so the envelope code is deliberately not checked.
pub struct NavKeySource {
    http: reqwest::Client,
    nav_url: String,
}

impl NavKeySource {
    pub fn new(http: reqwest::Client, api_base: &str) -> Self {
        Self {
            http,
            nav_url: format!("{}/x/web-interface/nav", api_base.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl WbiKeySource for NavKeySource {
    async fn fetch_keys(&self) -> Result<(String, String), ApiError> {
        let response = self
            .http
            .get(&self.nav_url)
            .header(USER_AGENT, DEFAULT_UA)
            .header(REFERER, BASE_URL)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Http {
                status: status.as_u16(),
            });
        }

        let nav: NavResponse = serde_json::from_str(&response.text().await?)?;
        let wbi_img = nav
            .data
            .ok_or_else(|| ApiError::Malformed("nav response has no data".to_string()))?
            .wbi_img;

        let img_key = take_filename(&wbi_img.img_url)
            .ok_or_else(|| ApiError::Malformed(format!("bad img_url: {}", wbi_img.img_url)))?;
        let sub_key = take_filename(&wbi_img.sub_url)
            .ok_or_else(|| ApiError::Malformed(format!("bad sub_url: {}", wbi_img.sub_url)))?;
        Ok((img_key, sub_key))
    }
}

/// Signs query parameters, caching keys for [`KEY_TTL`].
///
/// Concurrent callers that find the cache stale wait on a single refresh
/// instead of each fetching their own keys.
pub struct WbiSigner {
    source: Arc<dyn WbiKeySource>,
    cache: RwLock<Option<WbiKeys>>,
    refresh: Mutex<()>,
    ttl: Duration,
}

impl WbiSigner {
    pub fn new(source: Arc<dyn WbiKeySource>) -> Self {
        Self::with_ttl(source, KEY_TTL)
    }

    pub fn with_ttl(source: Arc<dyn WbiKeySource>, ttl: Duration) -> Self {
        Self {
            source,
            cache: RwLock::new(None),
            refresh: Mutex::new(()),
            ttl,
        }
    }

    fn cached(&self) -> Option<WbiKeys> {
        self.cache.read().as_ref().filter(|k| !k.is_expired()).cloned()
    }

    /// Cached keys, or fresh ones if the cache is empty or expired.
    pub async fn keys(&self) -> Result<WbiKeys, ApiError> {
        if let Some(keys) = self.cached() {
            return Ok(keys);
        }

        let _guard = self.refresh.lock().await;

        // Another caller may have refreshed while we waited.
        if let Some(keys) = self.cached() {
            return Ok(keys);
        }

        let (img_key, sub_key) = self.source.fetch_keys().await?;
        let keys = WbiKeys::new(img_key, sub_key, self.ttl);
        debug!(img_key = %keys.img_key, sub_key = %keys.sub_key, "Fetched new WBI keys");
        *self.cache.write() = Some(keys.clone());
        Ok(keys)
    }

    /// Drop the cached keys so the next signature refetches them.
    pub fn invalidate(&self) {
        self.cache.write().take();
    }

    /// Sign `params`. If no keys can be obtained, the params are returned
    /// unsigned and the platform decides whether to accept them.
    pub async fn sign(&self, params: Params) -> Params {
        let keys = match self.keys().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Failed to obtain WBI keys; sending request unsigned");
                return params;
            }
        };
        sign_with_keys(params, (&keys.img_key, &keys.sub_key), unix_now())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Shuffle `img_key + sub_key` through the mixin table and keep 32 chars.
fn get_mixin_key(orig: &[u8]) -> String {
    MIXIN_KEY_ENC_TAB
        .iter()
        .take(32)
        .filter_map(|&i| orig.get(i).map(|&b| b as char))
        .collect()
}

/// Characters the platform strips from values before verifying a signature.
#[inline]
fn is_filtered(c: char) -> bool {
    matches!(c, '!' | '\'' | '(' | ')' | '*')
}

fn get_url_encoded(s: &str) -> String {
    let mut encoded = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | '~' => encoded.push(c),
            c if is_filtered(c) => {}
            _ => {
                let mut buf = [0; 4];
                for b in c.encode_utf8(&mut buf).bytes() {
                    encoded.push_str(&format!("%{b:02X}"));
                }
            }
        }
    }
    encoded
}

/// Pure signing step: returns the sorted params plus `wts` and `w_rid`.
///
/// Values are returned with the filtered characters removed so that any
/// standard query encoder reproduces what was signed.
pub(crate) fn sign_with_keys(params: Params, (img_key, sub_key): (&str, &str), timestamp: u64) -> Params {
    let mixin_key = get_mixin_key(format!("{img_key}{sub_key}").as_bytes());

    let mut params: Params = params
        .into_iter()
        .filter(|(k, _)| k != "wts" && k != "w_rid")
        .map(|(k, v)| (k, v.chars().filter(|&c| !is_filtered(c)).collect()))
        .collect();
    params.push(("wts".to_string(), timestamp.to_string()));
    params.sort_by(|a, b| a.0.cmp(&b.0));

    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", get_url_encoded(k), get_url_encoded(v)))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Md5::new();
    hasher.update(format!("{query}{mixin_key}").as_bytes());
    params.push(("w_rid".to_string(), format!("{:x}", hasher.finalize())));
    params
}

fn take_filename(url: &str) -> Option<String> {
    url.rsplit_once('/')
        .and_then(|(_, s)| s.rsplit_once('.'))
        .map(|(s, _)| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    const IMG: &str = "7cd084941338484aae1ad9425b84077c";
    const SUB: &str = "4932caff0ff746eab6f01bf08b70ac45";

    struct CountingSource {
        calls: AtomicU32,
        fail: bool,
    }

    impl CountingSource {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl WbiKeySource for CountingSource {
        async fn fetch_keys(&self) -> Result<(String, String), ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            if self.fail {
                return Err(ApiError::Http { status: 503 });
            }
            Ok((IMG.to_string(), SUB.to_string()))
        }
    }

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_get_filename() {
        assert_eq!(
            take_filename("https://i0.hdslb.com/bfs/wbi/7cd084941338484aae1ad9425b84077c.png"),
            Some(IMG.to_string())
        );
        assert_eq!(take_filename("no-slash"), None);
    }

    #[test]
    fn test_get_mixin_key() {
        let concat_key = format!("{IMG}{SUB}");
        assert_eq!(
            get_mixin_key(concat_key.as_bytes()),
            "ea1db124af3c7062474693fa704f4ff8"
        );
    }

    #[test]
    fn test_sign_known_vector() {
        let signed = sign_with_keys(
            params(&[("foo", "114"), ("bar", "514"), ("zab", "1919810")]),
            (IMG, SUB),
            1702204169,
        );
        assert_eq!(
            signed,
            params(&[
                ("bar", "514"),
                ("foo", "114"),
                ("wts", "1702204169"),
                ("zab", "1919810"),
                ("w_rid", "8f6f2b5b3d485fe1886cec6a0be8c5d4"),
            ])
        );
    }

    #[test]
    fn test_sign_strips_filtered_characters_and_stale_signature() {
        let signed = sign_with_keys(
            params(&[("keyword", "hi!(x)"), ("w_rid", "old"), ("wts", "1")]),
            (IMG, SUB),
            10,
        );
        assert_eq!(signed[0], ("keyword".to_string(), "hix".to_string()));
        assert_eq!(signed.iter().filter(|(k, _)| k == "w_rid").count(), 1);
        assert_eq!(signed[1], ("wts".to_string(), "10".to_string()));
    }

    #[test]
    fn test_url_encoding_rules() {
        assert_eq!(get_url_encoded("a b/c"), "a%20b%2Fc");
        assert_eq!(get_url_encoded("x*y'"), "xy");
        assert_eq!(get_url_encoded("中"), "%E4%B8%AD");
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_reused_within_ttl_and_refetched_once_after() {
        let source = CountingSource::new(false);
        let signer = WbiSigner::new(source.clone());

        signer.sign(params(&[("mid", "1")])).await;
        tokio::time::advance(Duration::from_secs(29 * 60)).await;
        signer.sign(params(&[("mid", "2")])).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(2 * 60)).await;
        signer.sign(params(&[("mid", "3")])).await;
        signer.sign(params(&[("mid", "4")])).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_refresh_is_single_flight() {
        let source = CountingSource::new(false);
        let signer = Arc::new(WbiSigner::new(source.clone()));

        let tasks = (0..8).map(|i| {
            let signer = signer.clone();
            tokio::spawn(async move { signer.sign(params(&[("mid", &i.to_string())])).await })
        });
        let results = futures::future::join_all(tasks).await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        for signed in results {
            let signed = signed.unwrap();
            assert!(signed.iter().any(|(k, _)| k == "w_rid"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sign_falls_back_to_unsigned_params() {
        let signer = WbiSigner::new(CountingSource::new(true));
        let original = params(&[("mid", "42")]);
        assert_eq!(signer.sign(original.clone()).await, original);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_forces_refetch() {
        let source = CountingSource::new(false);
        let signer = WbiSigner::new(source.clone());
        signer.keys().await.unwrap();
        signer.invalidate();
        signer.keys().await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }
}
