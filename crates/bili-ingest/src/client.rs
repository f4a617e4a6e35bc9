//! Rate-limited, signing, retrying HTTP client for the platform API.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, COOKIE, HeaderMap, HeaderValue, ORIGIN, REFERER, USER_AGENT,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::credential::{Credential, CredentialPool};
use crate::envelope::{CodeClass, Envelope};
use crate::error::ApiError;
use crate::rate_limiter::AdaptiveRateLimiter;
use crate::retry::RetryPolicy;
use crate::wbi::{NavKeySource, Params, WbiSigner};

/// Site origin sent as `Referer`/`Origin`.
pub const BASE_URL: &str = "https://www.bilibili.com";

/// Default API host.
pub const API_BASE_URL: &str = "https://api.bilibili.com";

pub(crate) const DEFAULT_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// HTTP-level client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// API host, without trailing slash.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// In-place retries for HTTP 412, 5xx and embedded rate-limit codes.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Overrides the browser user agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Optional proxy URL applied to every request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

fn default_api_base() -> String {
    API_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            timeout_secs: default_timeout_secs(),
            retry: RetryPolicy::default(),
            user_agent: None,
            proxy: None,
        }
    }
}

/// Per-call options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Attach a WBI signature to the query.
    pub signed: bool,
}

impl RequestOptions {
    pub const SIGNED: Self = Self { signed: true };
    pub const UNSIGNED: Self = Self { signed: false };
}

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate installed one first; that is fine.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Build the underlying `reqwest::Client` for `config`.
pub fn build_http_client(config: &ClientConfig) -> Result<reqwest::Client, ApiError> {
    install_rustls_provider();

    let mut builder = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs.max(1)))
        .gzip(true)
        .deflate(true);

    if let Some(proxy) = config.proxy.as_deref() {
        match reqwest::Proxy::all(proxy) {
            Ok(proxy) => builder = builder.proxy(proxy),
            Err(error) => {
                warn!(proxy_url = %proxy, error = %error, "Invalid proxy URL; disabling proxy");
                builder = builder.no_proxy();
            }
        }
    }

    Ok(builder.build()?)
}

fn default_headers(user_agent: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let ua = user_agent
        .and_then(|ua| HeaderValue::from_str(ua).ok())
        .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_UA));
    headers.insert(USER_AGENT, ua);
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/json, text/plain, */*"),
    );
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("zh-CN,zh;q=0.9,en-US;q=0.8,en;q=0.7"),
    );
    headers.insert(REFERER, HeaderValue::from_static("https://www.bilibili.com/"));
    headers.insert(ORIGIN, HeaderValue::from_static(BASE_URL));
    headers
}

/// Request client shared by all domain operations.
///
/// Owns handles to the three process-wide resources: the rate limiter, the
/// WBI signer and the credential pool.
pub struct BiliClient {
    http: reqwest::Client,
    config: ClientConfig,
    headers: HeaderMap,
    rate_limiter: Arc<AdaptiveRateLimiter>,
    signer: Arc<WbiSigner>,
    pool: Arc<CredentialPool>,
    fallback: Option<Credential>,
    anonymous: Credential,
}

/// Builder for [`BiliClient`]. Unset parts get their defaults.
pub struct BiliClientBuilder {
    config: ClientConfig,
    http: Option<reqwest::Client>,
    rate_limiter: Option<Arc<AdaptiveRateLimiter>>,
    signer: Option<Arc<WbiSigner>>,
    pool: Option<Arc<CredentialPool>>,
    fallback: Option<Credential>,
}

impl BiliClientBuilder {
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    pub fn rate_limiter(mut self, rate_limiter: Arc<AdaptiveRateLimiter>) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    pub fn signer(mut self, signer: Arc<WbiSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn pool(mut self, pool: Arc<CredentialPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Credential used when the pool is empty.
    pub fn fallback_credential(mut self, credential: Option<Credential>) -> Self {
        self.fallback = credential;
        self
    }

    pub fn build(self) -> Result<BiliClient, ApiError> {
        let http = match self.http {
            Some(http) => http,
            None => build_http_client(&self.config)?,
        };
        let signer = self.signer.unwrap_or_else(|| {
            Arc::new(WbiSigner::new(Arc::new(NavKeySource::new(
                http.clone(),
                &self.config.api_base,
            ))))
        });
        let headers = default_headers(self.config.user_agent.as_deref());

        Ok(BiliClient {
            http,
            headers,
            rate_limiter: self.rate_limiter.unwrap_or_default(),
            signer,
            pool: self.pool.unwrap_or_default(),
            fallback: self.fallback,
            anonymous: Credential::anonymous(),
            config: self.config,
        })
    }
}

impl BiliClient {
    pub fn builder(config: ClientConfig) -> BiliClientBuilder {
        BiliClientBuilder {
            config,
            http: None,
            rate_limiter: None,
            signer: None,
            pool: None,
            fallback: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn rate_limiter(&self) -> &Arc<AdaptiveRateLimiter> {
        &self.rate_limiter
    }

    pub fn signer(&self) -> &Arc<WbiSigner> {
        &self.signer
    }

    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    fn endpoint_url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }
        format!(
            "{}/{}",
            self.config.api_base.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    /// Pick the cookie to send: pool first, then the static fallback, then
    /// an anonymous device cookie. A non-empty pool with nothing active is fatal.
    fn resolve_credential(&self) -> Result<(Option<String>, String), ApiError> {
        if let Some(pooled) = self.pool.get_active_credential() {
            return Ok((Some(pooled.id), pooled.credential.to_header_value()));
        }
        if !self.pool.is_empty() {
            return Err(ApiError::CredentialsExhausted);
        }
        let credential = self.fallback.as_ref().unwrap_or(&self.anonymous);
        Ok((None, credential.to_header_value()))
    }

    /// GET `endpoint` and return the unwrapped `data` payload.
    ///
    /// HTTP 412, 5xx and embedded rate-limit codes are retried in place
    /// according to [`ClientConfig::retry`]. Everything else propagates.
    pub async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: Params,
        options: RequestOptions,
    ) -> Result<T, ApiError> {
        let url = self.endpoint_url(endpoint);
        let policy = &self.config.retry;
        let mut retry = 0u32;

        loop {
            let err = match self.attempt::<T>(&url, &params, options).await {
                Ok(data) => return Ok(data),
                Err(ApiError::CredentialsExhausted) => return Err(ApiError::CredentialsExhausted),
                Err(err) => err,
            };

            let transient = matches!(err, ApiError::RateLimited { .. } | ApiError::Server { .. });
            if transient && policy.should_retry(retry + 1) {
                retry += 1;
                let delay = policy.delay_for_retry(retry);
                warn!(
                    endpoint,
                    attempt = retry,
                    max = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying request after transient error"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            self.rate_limiter.record_failure(Some(&err.to_string()));
            return Err(err);
        }
    }

    async fn attempt<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &Params,
        options: RequestOptions,
    ) -> Result<T, ApiError> {
        let (credential_id, cookie) = self.resolve_credential()?;

        self.rate_limiter.wait_with_jitter().await;

        let params = if options.signed {
            self.signer.sign(params.clone()).await
        } else {
            params.clone()
        };

        debug!(url, signed = options.signed, credential = ?credential_id, "GET");

        let mut request = self
            .http
            .get(url)
            .headers(self.headers.clone())
            .query(&params);
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            request = request.header(COOKIE, value);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::PRECONDITION_FAILED {
            self.rate_limiter.record_rate_limit_hit();
            return Err(ApiError::RateLimited {
                code: -412,
                message: "HTTP 412 Precondition Failed".to_string(),
            });
        }
        if status.is_server_error() {
            return Err(ApiError::Server {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(ApiError::Http {
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        let envelope = Envelope::from_body(&body)?;

        match envelope.class() {
            CodeClass::Success => {
                let data = envelope.decode_data::<T>()?;
                self.rate_limiter.record_success();
                if let Some(id) = credential_id.as_deref() {
                    self.pool.report_success(id);
                }
                Ok(data)
            }
            CodeClass::RateLimited => {
                self.rate_limiter.record_rate_limit_hit();
                Err(envelope.into_error(credential_id))
            }
            CodeClass::Auth | CodeClass::Other => Err(envelope.into_error(credential_id)),
        }
    }
}
