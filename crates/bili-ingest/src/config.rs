//! Aggregated configuration of the ingestion core.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::api::{ApiConfig, BiliApi};
use crate::client::{BiliClient, ClientConfig};
use crate::credential::{Credential, CredentialPool, PoolConfig};
use crate::error::ApiError;
use crate::rate_limiter::{AdaptiveRateLimiter, RateLimiterConfig};
use crate::sync::SyncConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub rate_limiter: RateLimiterConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

impl IngestConfig {
    /// Reject values that would make the core misbehave at runtime.
    pub fn validate(&self) -> Result<(), String> {
        self.rate_limiter.validate()
    }

    /// Wire the shared resources into a ready-to-use [`BiliApi`].
    pub fn build_api(
        &self,
        pool: Arc<CredentialPool>,
        fallback: Option<Credential>,
    ) -> Result<BiliApi, ApiError> {
        let client = BiliClient::builder(self.client.clone())
            .rate_limiter(Arc::new(AdaptiveRateLimiter::new(self.rate_limiter.clone())))
            .pool(pool)
            .fallback_credential(fallback)
            .build()?;
        Ok(BiliApi::new(Arc::new(client), self.api.clone()))
    }
}
