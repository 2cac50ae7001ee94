use std::sync::Arc;

use chrono::{DateTime, Local};
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};

use crate::models::SessionStatus;

/// Endpoint and time of the last successful login. Kept as one value so both
/// change together.
#[derive(Debug, Clone)]
struct LastLogin {
    endpoint: String,
    at: DateTime<Local>,
    instant: Instant,
}

#[derive(Debug, Default)]
struct SessionState {
    status: SessionStatus,
    last_login: Option<LastLogin>,
}

/// Point-in-time copy of the session for display.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub last_endpoint: Option<String>,
    pub last_success_at: Option<DateTime<Local>>,
}

/// Shared handle to the process-wide session record.
///
/// Writers only hold the lock for a field update, so `status()` never waits
/// on a login attempt that is talking to the network or the browser.
#[derive(Debug, Clone, Default)]
pub struct SessionHandle {
    inner: Arc<RwLock<SessionState>>,
}

impl SessionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn status(&self) -> SessionStatus {
        self.inner.read().await.status
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.inner.read().await;
        SessionSnapshot {
            status: state.status,
            last_endpoint: state.last_login.as_ref().map(|l| l.endpoint.clone()),
            last_success_at: state.last_login.as_ref().map(|l| l.at),
        }
    }

    /// True when `endpoint` is the one last logged into, the session is still
    /// `Success`, and that login is younger than `window`.
    pub async fn is_fresh(&self, endpoint: &str, window: Duration) -> bool {
        let state = self.inner.read().await;
        if state.status != SessionStatus::Success {
            return false;
        }
        match &state.last_login {
            Some(last) => last.endpoint == endpoint && last.instant.elapsed() <= window,
            None => false,
        }
    }

    /// Returns false if the session was already waiting, so callers notify
    /// the user once per change rather than once per tick.
    pub async fn mark_waiting_for_network(&self) -> bool {
        let mut state = self.inner.write().await;
        if state.status == SessionStatus::WaitingForNetwork {
            return false;
        }
        state.status = SessionStatus::WaitingForNetwork;
        true
    }

    pub async fn mark_pending(&self) {
        self.inner.write().await.status = SessionStatus::Pending;
    }

    pub async fn record_success(&self, endpoint: &str) {
        let mut state = self.inner.write().await;
        state.status = SessionStatus::Success;
        state.last_login = Some(LastLogin {
            endpoint: endpoint.to_string(),
            at: Local::now(),
            instant: Instant::now(),
        });
    }

    /// The last login survives a failure; freshness still needs `Success`.
    pub async fn mark_failed(&self) {
        self.inner.write().await.status = SessionStatus::Failed;
    }

    pub async fn mark_logged_out(&self) {
        let mut state = self.inner.write().await;
        state.status = SessionStatus::NotLoggedIn;
        state.last_login = None;
    }
}
