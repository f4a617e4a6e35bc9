//! Run and per-creator task state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One creator to sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    /// Creator id (`mid`).
    pub id: String,
    #[serde(default)]
    pub name: String,
}

impl RosterEntry {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// How much of each catalog to fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Walk every page up to the item cap.
    #[default]
    Full,
    /// Only the newest page.
    Latest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncTask {
    pub creator_id: String,
    pub display_name: String,
    pub status: TaskStatus,
    pub items_synced: usize,
    pub errors: usize,
    /// Creator-level attempts made.
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SyncTask {
    pub fn pending(entry: &RosterEntry) -> Self {
        Self {
            creator_id: entry.id.clone(),
            display_name: entry.name.clone(),
            status: TaskStatus::Pending,
            items_synced: 0,
            errors: 0,
            attempts: 0,
            started_at: None,
            finished_at: None,
            last_error: None,
        }
    }

    pub(crate) fn start(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub(crate) fn complete(&mut self, items_synced: usize, errors: usize) {
        self.status = TaskStatus::Completed;
        self.items_synced = items_synced;
        self.errors = errors;
        self.finish();
    }

    pub(crate) fn fail(&mut self, reason: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.last_error = Some(reason.into());
        self.finish();
    }

    fn finish(&mut self) {
        let now = Utc::now();
        // Tasks failed before they started still get a coherent interval.
        let started = *self.started_at.get_or_insert(now);
        self.finished_at = Some(now.max(started));
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Completed,
    Cancelled,
}

/// Aggregate status of one sync invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncRun {
    pub run_id: Option<String>,
    pub state: RunState,
    pub is_running: bool,
    pub mode: SyncMode,
    pub max_items_per_creator: usize,
    pub current_index: usize,
    pub tasks: Vec<SyncTask>,
    pub total_synced: usize,
    pub total_errors: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Set when the run stopped before reaching the end of the roster.
    pub halt_reason: Option<String>,
}

impl SyncRun {
    pub(crate) fn begin(roster: &[RosterEntry], max_items: usize, mode: SyncMode) -> Self {
        Self {
            run_id: Some(uuid::Uuid::new_v4().to_string()),
            state: RunState::Running,
            is_running: true,
            mode,
            max_items_per_creator: max_items,
            current_index: 0,
            tasks: roster.iter().map(SyncTask::pending).collect(),
            total_synced: 0,
            total_errors: 0,
            started_at: Some(Utc::now()),
            finished_at: None,
            halt_reason: None,
        }
    }

    pub fn completed_count(&self) -> usize {
        self.count(TaskStatus::Completed)
    }

    pub fn failed_count(&self) -> usize {
        self.count(TaskStatus::Failed)
    }

    pub fn pending_count(&self) -> usize {
        self.count(TaskStatus::Pending)
    }

    fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    pub fn task(&self, creator_id: &str) -> Option<&SyncTask> {
        self.tasks.iter().find(|t| t.creator_id == creator_id)
    }

    /// Fail every non-terminal task with `reason`.
    pub(crate) fn fail_remaining(&mut self, reason: &str) {
        for task in self.tasks.iter_mut().filter(|t| !t.status.is_terminal()) {
            task.fail(reason);
        }
    }

    pub(crate) fn finish(&mut self, state: RunState) {
        self.state = state;
        self.is_running = false;
        self.finished_at = Some(Utc::now());
    }
}
