//! Rotating pool of session credentials with error-driven deactivation.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::Credential;
use crate::error::CredentialError;

/// Pool policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Consecutive errors after which a credential is deactivated.
    #[serde(default = "default_max_error_count")]
    pub max_error_count: u32,
    /// Rotate to the next credential after this many successes (0 disables).
    #[serde(default = "default_rotate_every")]
    pub rotate_every: u32,
}

fn default_max_error_count() -> u32 {
    3
}

fn default_rotate_every() -> u32 {
    5
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_error_count: default_max_error_count(),
            rotate_every: default_rotate_every(),
        }
    }
}

/// A credential owned by the pool, with its health bookkeeping.
#[derive(Debug, Clone)]
pub struct CredentialEntry {
    pub id: String,
    pub display_name: String,
    pub credential: Credential,
    pub is_active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CredentialEntry {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, credential: Credential) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            credential,
            is_active: true,
            last_used_at: None,
            error_count: 0,
            last_error: None,
            created_at: Utc::now(),
        }
    }

    #[inline]
    fn is_usable(&self, max_error_count: u32) -> bool {
        self.is_active && self.error_count < max_error_count
    }
}

/// Credential handed out by the pool: the id to report back, plus the cookies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PooledCredential {
    pub id: String,
    pub credential: Credential,
}

/// Read-only view of one entry, safe to expose to an admin layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialStatus {
    pub id: String,
    pub display_name: String,
    pub is_active: bool,
    pub is_current: bool,
    pub logged_in: bool,
    pub error_count: u32,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct PoolInner {
    entries: Vec<CredentialEntry>,
    cursor: usize,
    successes_since_rotation: u32,
}

impl PoolInner {
    fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    fn handout(&mut self, idx: usize) -> PooledCredential {
        let entry = &mut self.entries[idx];
        entry.last_used_at = Some(Utc::now());
        PooledCredential {
            id: entry.id.clone(),
            credential: entry.credential.clone(),
        }
    }

    /// Advance the cursor to the next active entry, wrapping around.
    fn rotate(&mut self) -> Option<PooledCredential> {
        let len = self.entries.len();
        if len == 0 {
            return None;
        }
        let start = self.cursor.min(len - 1);
        let next = (1..=len)
            .map(|step| (start + step) % len)
            .find(|&idx| self.entries[idx].is_active)?;

        self.cursor = next;
        self.successes_since_rotation = 0;
        self.entries[next].error_count = 0;
        debug!(credential_id = %self.entries[next].id, "Rotated credential");
        Some(self.handout(next))
    }
}

/// Ordered, rotatable list of credentials.
///
/// Shared behind an `Arc`; every method takes `&self` and holds the internal
/// lock only for the synchronous bookkeeping.
#[derive(Debug)]
pub struct CredentialPool {
    inner: RwLock<PoolInner>,
    config: PoolConfig,
}

impl CredentialPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            inner: RwLock::new(PoolInner::default()),
            config,
        }
    }

    pub fn with_entries(config: PoolConfig, entries: impl IntoIterator<Item = CredentialEntry>) -> Self {
        let pool = Self::new(config);
        for entry in entries {
            pool.add_credential(entry);
        }
        pool
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Append an entry. It is active regardless of the flag it was built with.
    pub fn add_credential(&self, mut entry: CredentialEntry) {
        entry.is_active = true;
        info!(credential_id = %entry.id, name = %entry.display_name, "Credential added to pool");
        self.inner.write().entries.push(entry);
    }

    /// Remove by id. Returns whether an entry was removed.
    pub fn remove_credential(&self, id: &str) -> bool {
        let mut inner = self.inner.write();
        let Some(idx) = inner.position(id) else {
            return false;
        };
        inner.entries.remove(idx);
        if idx < inner.cursor {
            inner.cursor -= 1;
        }
        if inner.cursor >= inner.entries.len() {
            inner.cursor = 0;
        }
        info!(credential_id = %id, "Credential removed from pool");
        true
    }

    /// Current credential, rotating once if the current one is unusable.
    ///
    /// `None` means no active credential remains and ingestion cannot proceed.
    pub fn get_active_credential(&self) -> Option<PooledCredential> {
        let mut inner = self.inner.write();
        let cursor = inner.cursor;
        if inner
            .entries
            .get(cursor)
            .is_some_and(|e| e.is_usable(self.config.max_error_count))
        {
            return Some(inner.handout(cursor));
        }
        inner.rotate()
    }

    /// Advance to the next active credential.
    pub fn rotate(&self) -> Option<PooledCredential> {
        self.inner.write().rotate()
    }

    /// Record a failure for `id`, deactivating it once it reaches the limit.
    ///
    /// Returns the new error count, or `None` if the id is unknown.
    pub fn report_error(&self, id: &str, message: &str) -> Option<u32> {
        let mut inner = self.inner.write();
        let Some(idx) = inner.position(id) else {
            warn!(credential_id = %id, "Error reported for unknown credential");
            return None;
        };
        let entry = &mut inner.entries[idx];
        entry.error_count += 1;
        entry.last_error = Some(message.to_string());

        if entry.is_active && entry.error_count >= self.config.max_error_count {
            entry.is_active = false;
            warn!(
                credential_id = %id,
                error_count = entry.error_count,
                error = %message,
                "Credential deactivated after repeated errors"
            );
        } else {
            debug!(credential_id = %id, error_count = entry.error_count, error = %message, "Credential error recorded");
        }
        Some(entry.error_count)
    }

    /// Record a success for `id`: clears its error state and, every
    /// `rotate_every` successes, moves the cursor on to spread load.
    pub fn report_success(&self, id: &str) {
        let mut inner = self.inner.write();
        let Some(idx) = inner.position(id) else {
            return;
        };
        let entry = &mut inner.entries[idx];
        entry.error_count = 0;
        entry.last_error = None;

        inner.successes_since_rotation += 1;
        if self.config.rotate_every > 0 && inner.successes_since_rotation >= self.config.rotate_every {
            inner.successes_since_rotation = 0;
            let active = inner.entries.iter().filter(|e| e.is_active).count();
            if active > 1 {
                inner.rotate();
            }
        }
    }

    /// Operator toggle. Re-enabling an entry also clears its error count.
    pub fn set_active(&self, id: &str, active: bool) -> Result<(), CredentialError> {
        let mut inner = self.inner.write();
        let idx = inner
            .position(id)
            .ok_or_else(|| CredentialError::UnknownCredential(id.to_string()))?;
        let entry = &mut inner.entries[idx];
        entry.is_active = active;
        if active {
            entry.error_count = 0;
            entry.last_error = None;
        }
        info!(credential_id = %id, active, "Credential toggled");
        Ok(())
    }

    pub fn reset_errors(&self, id: &str) -> Result<(), CredentialError> {
        let mut inner = self.inner.write();
        let idx = inner
            .position(id)
            .ok_or_else(|| CredentialError::UnknownCredential(id.to_string()))?;
        let entry = &mut inner.entries[idx];
        entry.error_count = 0;
        entry.last_error = None;
        Ok(())
    }

    pub fn list_status(&self) -> Vec<CredentialStatus> {
        let inner = self.inner.read();
        inner
            .entries
            .iter()
            .enumerate()
            .map(|(idx, e)| CredentialStatus {
                id: e.id.clone(),
                display_name: e.display_name.clone(),
                is_active: e.is_active,
                is_current: idx == inner.cursor,
                logged_in: e.credential.is_logged_in(),
                error_count: e.error_count,
                last_used_at: e.last_used_at,
                last_error: e.last_error.clone(),
                created_at: e.created_at,
            })
            .collect()
    }

    /// Snapshot of a single entry.
    pub fn entry(&self, id: &str) -> Option<CredentialEntry> {
        let inner = self.inner.read();
        inner.position(id).map(|idx| inner.entries[idx].clone())
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.inner.read().entries.iter().filter(|e| e.is_active).count()
    }

    /// The pool has entries but none of them is active.
    pub fn is_exhausted(&self) -> bool {
        let inner = self.inner.read();
        !inner.entries.is_empty() && inner.entries.iter().all(|e| !e.is_active)
    }
}

impl Default for CredentialPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}
