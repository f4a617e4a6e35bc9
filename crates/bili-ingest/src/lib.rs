//! Ingestion core for the Bilibili web API.
//!
//! The pieces, leaves first:
//!
//! - [`credential`]: cookie credentials and the rotating [`CredentialPool`].
//! - [`wbi`]: WBI request signing with a cached, single-flight key fetch.
//! - [`rate_limiter`]: the adaptive inter-request delay.
//! - [`client`]: the rate-limited, signing, retrying [`BiliClient`].
//! - [`api`]: typed domain operations ([`BiliApi`]).
//! - [`sync`]: the sequential [`SyncOrchestrator`].
//!
//! The pool, the limiter and the signer are process-wide resources. They are
//! constructed once and shared through `Arc`.

pub mod api;
pub mod client;
pub mod config;
pub mod credential;
pub mod envelope;
pub mod error;
pub mod models;
pub mod rate_limiter;
pub mod retry;
pub mod sync;
pub mod wbi;

pub use api::{ApiConfig, BiliApi};
pub use client::{BiliClient, ClientConfig, RequestOptions};
pub use config::IngestConfig;
pub use credential::{Credential, CredentialEntry, CredentialPool, PoolConfig};
pub use error::{ApiError, CredentialError, Result, SyncError};
pub use models::{CatalogFetch, CreatorProfile, CreatorStat, VideoDetail, VideoItem, VideoPage};
pub use rate_limiter::{AdaptiveRateLimiter, RateLimiterConfig};
pub use retry::RetryPolicy;
pub use sync::{
    CatalogSource, DiscardSink, RosterEntry, RunState, SinkReport, SyncConfig, SyncMode,
    SyncOrchestrator, SyncRun, SyncSink, SyncTask, TaskStatus,
};
pub use wbi::WbiSigner;
