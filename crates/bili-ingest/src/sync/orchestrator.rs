//! Sequential sync runs over a roster of creators.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::credential::CredentialPool;
use crate::error::{ApiError, SyncError};
use crate::models::CatalogFetch;
use crate::sync::schedule::inter_creator_delay;
use crate::sync::source::{CatalogSource, SyncSink};
use crate::sync::task::{RosterEntry, RunState, SyncMode, SyncRun};

const EXHAUSTED_REASON: &str = "credential pool exhausted";
const CANCELLED_REASON: &str = "cancelled";
const ABORTED_REASON: &str = "run aborted";

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Creator-level attempts, independent of the client's HTTP retries.
    #[serde(default = "default_creator_retries")]
    pub creator_retries: u32,
    /// Attempt `n` is followed by a pause of `n * creator_retry_delay_ms`.
    #[serde(default = "default_creator_retry_delay_ms")]
    pub creator_retry_delay_ms: u64,
    /// Wall-clock cap on retrying a single creator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator_time_budget_ms: Option<u64>,
    /// Base pause between creators, scaled by run progress.
    #[serde(default = "default_inter_creator_delay_ms")]
    pub inter_creator_delay_ms: u64,
    /// Item cap used when the caller does not give one.
    #[serde(default = "default_max_items_per_creator")]
    pub max_items_per_creator: usize,
}

fn default_creator_retries() -> u32 {
    3
}

fn default_creator_retry_delay_ms() -> u64 {
    3000
}

fn default_inter_creator_delay_ms() -> u64 {
    5000
}

fn default_max_items_per_creator() -> usize {
    100
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            creator_retries: default_creator_retries(),
            creator_retry_delay_ms: default_creator_retry_delay_ms(),
            creator_time_budget_ms: None,
            inter_creator_delay_ms: default_inter_creator_delay_ms(),
            max_items_per_creator: default_max_items_per_creator(),
        }
    }
}

/// How one creator ended.
enum CreatorOutcome {
    Fetched(CatalogFetch),
    Failed(String),
    /// No usable credential is left; the run cannot continue.
    Halt,
}

struct Inner {
    source: Arc<dyn CatalogSource>,
    sink: Arc<dyn SyncSink>,
    pool: Arc<CredentialPool>,
    config: SyncConfig,
    run: Mutex<SyncRun>,
    cancel: Mutex<CancellationToken>,
}

/// Closes out the run if its task ends without finishing it (panic or abort).
struct RunGuard {
    inner: Arc<Inner>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut run = self.inner.run.lock();
        if run.is_running {
            error!(run_id = ?run.run_id, "Sync run task ended early");
            run.fail_remaining(ABORTED_REASON);
            run.halt_reason = Some(ABORTED_REASON.to_string());
            run.finish(RunState::Cancelled);
        }
    }
}

/// Drives one sync run at a time, creator by creator.
///
/// Cheap to clone; clones share the same run state.
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl SyncOrchestrator {
    pub fn new(
        source: Arc<dyn CatalogSource>,
        sink: Arc<dyn SyncSink>,
        pool: Arc<CredentialPool>,
        config: SyncConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                sink,
                pool,
                config,
                run: Mutex::new(SyncRun::default()),
                cancel: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Snapshot of the current or last run.
    pub fn run_status(&self) -> SyncRun {
        self.inner.run.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.inner.run.lock().is_running
    }

    /// Start a run in the background.
    ///
    /// Fails without touching the existing run if one is in progress. The
    /// returned handle resolves to the final run status.
    pub fn start_run(
        &self,
        roster: Vec<RosterEntry>,
        max_items_per_creator: usize,
        mode: SyncMode,
    ) -> Result<JoinHandle<SyncRun>, SyncError> {
        if roster.is_empty() {
            return Err(SyncError::EmptyRoster);
        }

        let token = {
            let mut run = self.inner.run.lock();
            if run.is_running {
                return Err(SyncError::AlreadyRunning);
            }
            *run = SyncRun::begin(&roster, max_items_per_creator, mode);

            let token = CancellationToken::new();
            *self.inner.cancel.lock() = token.clone();
            token
        };

        info!(
            creators = roster.len(),
            max_items = max_items_per_creator,
            mode = ?mode,
            "Sync run started"
        );

        let inner = Arc::clone(&self.inner);
        // Built outside the future so an abort before the first poll still drops it.
        let guard = RunGuard {
            inner: Arc::clone(&inner),
        };
        Ok(tokio::spawn(async move {
            let _guard = guard;
            inner.execute(roster, max_items_per_creator, mode, token).await
        }))
    }

    /// Request cancellation. Takes effect between creators.
    pub fn cancel_run(&self) -> Result<(), SyncError> {
        if !self.is_running() {
            return Err(SyncError::NotRunning);
        }
        info!("Sync run cancellation requested");
        self.inner.cancel.lock().cancel();
        Ok(())
    }
}

impl Inner {
    async fn execute(
        &self,
        roster: Vec<RosterEntry>,
        max_items: usize,
        mode: SyncMode,
        token: CancellationToken,
    ) -> SyncRun {
        let total = roster.len();
        let base_delay = Duration::from_millis(self.config.inter_creator_delay_ms);
        let mut halted = false;

        for (index, creator) in roster.iter().enumerate() {
            if token.is_cancelled() {
                break;
            }

            {
                let mut run = self.run.lock();
                run.current_index = index;
                run.tasks[index].start();
            }
            info!(creator_id = %creator.id, name = %creator.name, index, total, "Syncing creator");

            match self.sync_creator(index, creator, max_items, mode).await {
                CreatorOutcome::Fetched(fetch) => {
                    let report = self.sink.store(creator, &fetch.items).await;
                    let errors = fetch.skipped + report.rejected;
                    let mut run = self.run.lock();
                    run.tasks[index].complete(report.accepted, errors);
                    run.total_synced += report.accepted;
                    run.total_errors += errors;
                    info!(
                        creator_id = %creator.id,
                        synced = report.accepted,
                        errors,
                        pages = fetch.pages,
                        partial = fetch.partial,
                        "Creator synced"
                    );
                }
                CreatorOutcome::Failed(reason) => {
                    warn!(creator_id = %creator.id, error = %reason, "Creator sync failed");
                    self.run.lock().tasks[index].fail(reason);
                }
                CreatorOutcome::Halt => {
                    error!(creator_id = %creator.id, "No usable credential left; halting run");
                    let mut run = self.run.lock();
                    run.fail_remaining(EXHAUSTED_REASON);
                    run.halt_reason = Some(EXHAUSTED_REASON.to_string());
                    halted = true;
                    break;
                }
            }

            if index + 1 < total {
                let delay = inter_creator_delay(base_delay, index + 1, total);
                debug!(delay_ms = delay.as_millis() as u64, "Pausing before next creator");
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        let mut run = self.run.lock();
        if token.is_cancelled() && !halted {
            run.fail_remaining(CANCELLED_REASON);
            run.halt_reason = Some(CANCELLED_REASON.to_string());
            run.finish(RunState::Cancelled);
        } else {
            run.finish(RunState::Completed);
        }
        info!(
            state = ?run.state,
            completed = run.completed_count(),
            failed = run.failed_count(),
            total_synced = run.total_synced,
            total_errors = run.total_errors,
            "Sync run finished"
        );
        run.clone()
    }

    /// Fetch one creator with creator-level retries.
    async fn sync_creator(
        &self,
        index: usize,
        creator: &RosterEntry,
        max_items: usize,
        mode: SyncMode,
    ) -> CreatorOutcome {
        let max_attempts = self.config.creator_retries.max(1);
        let deadline = self
            .config
            .creator_time_budget_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.run.lock().tasks[index].attempts = attempt;

            let err = match self.source.fetch_catalog(creator, max_items, mode).await {
                Ok(fetch) => return CreatorOutcome::Fetched(fetch),
                Err(ApiError::CredentialsExhausted) => return CreatorOutcome::Halt,
                Err(err) => err,
            };

            if let ApiError::Auth {
                credential_id: Some(id),
                message,
                ..
            } = &err
            {
                // Errors accumulate on the failing entry; the pool only moves
                // on once it has been deactivated.
                self.pool.report_error(id, message);
                if self.pool.get_active_credential().is_none() && !self.pool.is_empty() {
                    return CreatorOutcome::Halt;
                }
            }

            if !err.is_retryable() || attempt >= max_attempts {
                return CreatorOutcome::Failed(err.to_string());
            }

            let delay = Duration::from_millis(
                self.config
                    .creator_retry_delay_ms
                    .saturating_mul(u64::from(attempt)),
            );
            if deadline.is_some_and(|d| Instant::now() + delay > d) {
                return CreatorOutcome::Failed(format!("{err} (creator time budget exhausted)"));
            }

            warn!(
                creator_id = %creator.id,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying creator"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
