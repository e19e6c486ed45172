//! Session registry: admission, lookup, close requests and release.

use crate::error::TransteekError;
use crate::services::ServiceClients;
use crate::session::runner::SessionRunner;
use crate::session::{SessionId, SessionReport, SessionSettings, SessionState};
use crate::transport::{Connection, Notice, NoticeKind};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Process-wide counters, shown on the health endpoint.
#[derive(Debug, Default)]
pub struct SessionStats {
    started: AtomicU64,
    closed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    released: AtomicU64,
    utterances_dispatched: AtomicU64,
    utterances_skipped: AtomicU64,
    utterances_failed: AtomicU64,
    overload_warnings: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub active: usize,
    pub started: u64,
    pub closed: u64,
    pub failed: u64,
    pub rejected: u64,
    pub released: u64,
    pub utterances_dispatched: u64,
    pub utterances_skipped: u64,
    pub utterances_failed: u64,
    pub overload_warnings: u64,
}

impl SessionStats {
    pub(crate) fn record_dispatched(&self) {
        self.utterances_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped(&self) {
        self.utterances_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed_utterance(&self) {
        self.utterances_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_overload(&self) {
        self.overload_warnings.fetch_add(1, Ordering::Relaxed);
    }
}

struct SessionHandle {
    close: CancellationToken,
    state: watch::Receiver<SessionState>,
}

/// Slot held by an admitted session. Releasing it removes the session from
/// the registry; release happens once no matter how often it is requested.
struct Admission {
    manager: Arc<SessionManager>,
    id: SessionId,
    released: AtomicBool,
}

impl Admission {
    fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.manager.sessions.remove(&self.id);
        if self.manager.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.manager.idle.notify_waiters();
        }
        self.manager.stats.released.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(session = %self.id, "session resources released");
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        self.release();
    }
}

/// Owns every live session of the process.
pub struct SessionManager {
    services: ServiceClients,
    settings: SessionSettings,
    max_sessions: usize,
    active: AtomicUsize,
    /// Signalled when the last active session is released.
    idle: Notify,
    sessions: DashMap<SessionId, SessionHandle>,
    stats: Arc<SessionStats>,
}

impl SessionManager {
    pub fn new(services: ServiceClients, settings: SessionSettings, max_sessions: usize) -> Self {
        Self {
            services,
            settings,
            max_sessions: max_sessions.max(1),
            active: AtomicUsize::new(0),
            idle: Notify::new(),
            sessions: DashMap::new(),
            stats: Arc::new(SessionStats::default()),
        }
    }

    /// Start a session on its own task.
    pub fn spawn_connection(
        self: &Arc<Self>,
        connection: Connection,
    ) -> (SessionId, JoinHandle<SessionReport>) {
        let id = SessionId::new();
        let admitted = self.admit(id);
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move { manager.drive(id, admitted, connection).await });
        (id, handle)
    }

    /// Run a session on the current task until it ends.
    pub async fn run_connection(self: &Arc<Self>, connection: Connection) -> SessionReport {
        let id = SessionId::new();
        let admitted = self.admit(id);
        Arc::clone(self).drive(id, admitted, connection).await
    }

    /// Ask a session to finish. Unknown or already released sessions are
    /// ignored; returns whether the session was live.
    pub fn close(&self, id: SessionId) -> bool {
        match self.sessions.get(&id) {
            Some(handle) => {
                handle.close.cancel();
                true
            }
            None => false,
        }
    }

    /// Ask every live session to finish.
    pub fn close_all(&self) {
        for entry in self.sessions.iter() {
            entry.close.cancel();
        }
    }

    pub fn state_of(&self, id: SessionId) -> Option<SessionState> {
        self.sessions.get(&id).map(|handle| *handle.state.borrow())
    }

    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            active: self.active_sessions(),
            started: load(&self.stats.started),
            closed: load(&self.stats.closed),
            failed: load(&self.stats.failed),
            rejected: load(&self.stats.rejected),
            released: load(&self.stats.released),
            utterances_dispatched: load(&self.stats.utterances_dispatched),
            utterances_skipped: load(&self.stats.utterances_skipped),
            utterances_failed: load(&self.stats.utterances_failed),
            overload_warnings: load(&self.stats.overload_warnings),
        }
    }

    /// Wait until no session is active. Returns false on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let idle = async {
            loop {
                let notified = self.idle.notified();
                tokio::pin!(notified);
                // Register before checking so a release in between is not missed.
                notified.as_mut().enable();
                if self.active_sessions() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, idle).await.is_ok()
    }

    /// Reserve a slot and register the session. `None` when full.
    fn admit(self: &Arc<Self>, id: SessionId) -> Option<(Admission, SessionStarted)> {
        let max = self.max_sessions;
        self.active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .ok()?;

        let close = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(SessionState::Created);
        self.sessions.insert(
            id,
            SessionHandle {
                close: close.clone(),
                state: state_rx,
            },
        );
        self.stats.started.fetch_add(1, Ordering::Relaxed);

        let admission = Admission {
            manager: Arc::clone(self),
            id,
            released: AtomicBool::new(false),
        };
        Some((admission, SessionStarted { close, state_tx }))
    }

    async fn drive(
        self: Arc<Self>,
        id: SessionId,
        admitted: Option<(Admission, SessionStarted)>,
        mut connection: Connection,
    ) -> SessionReport {
        let Some((admission, started)) = admitted else {
            return self.turn_away(id, &mut connection).await;
        };

        let span = tracing::info_span!(
            "session",
            id = %id,
            peer = %connection.peer,
            languages = tracing::field::Empty,
        );
        let peer = connection.peer.clone();
        let runner = SessionRunner::new(
            id,
            &peer,
            self.settings.clone(),
            self.services.clone(),
            self.stats.clone(),
            started.state_tx,
            started.close,
        );

        let report = runner.run(connection).instrument(span).await;
        match report.final_state {
            SessionState::Failed => self.stats.failed.fetch_add(1, Ordering::Relaxed),
            _ => self.stats.closed.fetch_add(1, Ordering::Relaxed),
        };
        admission.release();
        report
    }

    async fn turn_away(&self, id: SessionId, connection: &mut Connection) -> SessionReport {
        let error = TransteekError::CapacityExceeded {
            max: self.max_sessions,
        };
        tracing::warn!(peer = %connection.peer, error = %error, "session rejected");
        self.stats.rejected.fetch_add(1, Ordering::Relaxed);

        let notice = Notice::new(NoticeKind::Unavailable, error.to_string());
        let grace = self.settings.output_write_timeout;
        if !matches!(
            tokio::time::timeout(grace, connection.outbound.send_notice(&notice)).await,
            Ok(Ok(()))
        ) {
            tracing::debug!(peer = %connection.peer, "could not tell rejected client why");
        }
        if !matches!(
            tokio::time::timeout(grace, connection.outbound.close()).await,
            Ok(Ok(()))
        ) {
            tracing::debug!(peer = %connection.peer, "rejected connection did not close cleanly");
        }

        let mut report = SessionReport::new(id, &connection.peer);
        report.final_state = SessionState::Failed;
        report.record_error(error.to_string());
        report
    }
}

/// Handles the runner needs from registration.
struct SessionStarted {
    close: CancellationToken,
    state_tx: watch::Sender<SessionState>,
}
