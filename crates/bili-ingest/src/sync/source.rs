//! Boundaries of the orchestrator: where items come from and where they go.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::ApiError;
use crate::models::{CatalogFetch, VideoItem};
use crate::sync::task::{RosterEntry, SyncMode};

/// Fetches a creator's catalog.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch_catalog(
        &self,
        creator: &RosterEntry,
        max_items: usize,
        mode: SyncMode,
    ) -> Result<CatalogFetch, ApiError>;
}

/// Outcome of handing a batch to a sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkReport {
    pub accepted: usize,
    pub rejected: usize,
}

/// Persistence boundary. Implementations are expected to upsert.
#[async_trait]
pub trait SyncSink: Send + Sync {
    async fn store(&self, creator: &RosterEntry, items: &[VideoItem]) -> SinkReport;
}

/// Accepts and drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardSink;

#[async_trait]
impl SyncSink for DiscardSink {
    async fn store(&self, _creator: &RosterEntry, items: &[VideoItem]) -> SinkReport {
        SinkReport {
            accepted: items.len(),
            rejected: 0,
        }
    }
}
