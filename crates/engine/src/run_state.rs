use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

/// The engine instance's self-reported condition, served by the control
/// API. This is process state, not ledger state: it resets on restart.
#[derive(Debug, Clone, Serialize)]
pub struct RunState {
    pub started_at: DateTime<Utc>,
    /// When the scheduler last finished a cycle or a reconcile pass.
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub executor_running: bool,
    /// Sequence number of the most recently sealed cycle.
    pub completed_cycle: Option<i64>,
    pub last_error: Option<String>,
}

impl RunState {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            last_refreshed_at: None,
            executor_running: false,
            completed_cycle: None,
            last_error: None,
        }
    }

    /// Healthy means the scheduler is up and its last cycle did not error.
    pub fn is_healthy(&self) -> bool {
        self.executor_running && self.last_error.is_none()
    }
}

pub type SharedRunState = Arc<RwLock<RunState>>;

pub fn shared_run_state() -> SharedRunState {
    Arc::new(RwLock::new(RunState::new(Utc::now())))
}
