//! Runtime for executing conversation threads
//!
//! Every session owns one `ThreadRuntime` task, the only place its thread and
//! controller state are mutated. Callers reach it through a `ThreadHandle`;
//! presentation code follows along on the broadcast and watch channels.

mod executor;

#[cfg(test)]
pub mod testing;

pub use executor::ThreadRuntime;

use crate::gateway::{GatewayErrorKind, InferenceGateway};
use crate::state_machine::{ChatState, Event, TransitionError};
use crate::thread::{Turn, TurnId};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const DEFAULT_COMPLETION_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const MAX_SWEEP_PERIOD: Duration = Duration::from_secs(60);

/// Runtime tuning read once at startup
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// Upper bound on a single gateway call
    pub completion_timeout: Duration,
    /// Sessions with no requests and no stream for this long are reclaimed
    pub session_idle_timeout: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            completion_timeout: DEFAULT_COMPLETION_TIMEOUT,
            session_idle_timeout: DEFAULT_SESSION_IDLE_TIMEOUT,
        }
    }
}

impl RuntimeSettings {
    pub fn from_env() -> Self {
        Self {
            completion_timeout: secs_from_env(
                "PEPLIKE_COMPLETION_TIMEOUT_SECS",
                DEFAULT_COMPLETION_TIMEOUT,
            ),
            session_idle_timeout: secs_from_env(
                "PEPLIKE_SESSION_IDLE_SECS",
                DEFAULT_SESSION_IDLE_TIMEOUT,
            ),
        }
    }

    /// How often the idle sweep runs
    fn sweep_period(&self) -> Duration {
        (self.session_idle_timeout / 2).clamp(Duration::from_millis(10), MAX_SWEEP_PERIOD)
    }
}

fn secs_from_env(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map_or(default, Duration::from_secs)
}

/// An event for the runtime, with an optional channel for the verdict
#[derive(Debug)]
pub struct Command {
    pub event: Event,
    pub reply: Option<oneshot::Sender<Result<(), TransitionError>>>,
}

impl Command {
    /// Fire-and-forget command, used for completion results
    pub fn notify(event: Event) -> Self {
        Self { event, reply: None }
    }
}

/// Most recent gateway failure, kept until the next request starts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorNotice {
    pub message: String,
    pub kind: GatewayErrorKind,
}

/// What the presentation layer renders
#[derive(Debug, Clone, Default, Serialize)]
pub struct ThreadSnapshot {
    pub turns: Vec<Turn>,
    pub pending: bool,
    pub last_error: Option<ErrorNotice>,
}

/// Events sent to SSE clients
#[derive(Debug, Clone)]
pub enum SseEvent {
    /// First event on every stream, built by the API from a snapshot
    Init { snapshot: ThreadSnapshot },
    Thread { turns: Vec<Turn> },
    StateChange { state: ChatState },
    Error { message: String, kind: GatewayErrorKind },
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Rejected(#[from] TransitionError),
    #[error("Conversation runtime has stopped")]
    RuntimeStopped,
}

/// Handle to interact with a running thread
#[derive(Clone)]
pub struct ThreadHandle {
    command_tx: mpsc::Sender<Command>,
    broadcast_tx: broadcast::Sender<SseEvent>,
    snapshot_rx: watch::Receiver<ThreadSnapshot>,
    shutdown: CancellationToken,
    last_active: Arc<Mutex<Instant>>,
}

impl ThreadHandle {
    /// Start a runtime for an empty thread
    pub fn spawn<G>(
        session_id: impl Into<String>,
        gateway: Arc<G>,
        settings: &RuntimeSettings,
    ) -> Self
    where
        G: InferenceGateway + ?Sized + 'static,
    {
        let session_id = session_id.into();
        let (command_tx, command_rx) = mpsc::channel(32);
        let (broadcast_tx, _) = broadcast::channel(128);
        let (snapshot_tx, snapshot_rx) = watch::channel(ThreadSnapshot::default());
        let shutdown = CancellationToken::new();

        let runtime = ThreadRuntime::new(
            session_id.clone(),
            gateway,
            settings.completion_timeout,
            command_rx,
            command_tx.clone(),
            broadcast_tx.clone(),
            snapshot_tx,
            shutdown.clone(),
        );

        tokio::spawn(async move {
            runtime.run().await;
            tracing::info!(session_id = %session_id, "Thread runtime finished");
        });

        Self {
            command_tx,
            broadcast_tx,
            snapshot_rx,
            shutdown,
            last_active: Arc::new(Mutex::new(Instant::now())),
        }
    }

    async fn dispatch(&self, event: Event) -> Result<(), DispatchError> {
        let (reply, verdict) = oneshot::channel();
        self.command_tx
            .send(Command {
                event,
                reply: Some(reply),
            })
            .await
            .map_err(|_| DispatchError::RuntimeStopped)?;
        verdict.await.map_err(|_| DispatchError::RuntimeStopped)??;
        Ok(())
    }

    /// Append a user turn and start a completion for it
    pub async fn send(&self, text: impl Into<String>) -> Result<TurnId, DispatchError> {
        let turn_id = TurnId::generate();
        self.dispatch(Event::UserMessage {
            text: text.into(),
            turn_id: turn_id.clone(),
        })
        .await?;
        Ok(turn_id)
    }

    /// Cascading delete; returns the thread as it is afterwards
    pub async fn delete_turn(&self, turn_id: TurnId) -> Result<ThreadSnapshot, DispatchError> {
        self.dispatch(Event::DeleteTurn { turn_id }).await?;
        Ok(self.snapshot())
    }

    /// Ask the gateway for a fresh version of an assistant turn
    pub async fn rewrite(&self, turn_id: TurnId) -> Result<(), DispatchError> {
        self.dispatch(Event::RewriteTurn { turn_id }).await
    }

    pub fn snapshot(&self) -> ThreadSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SseEvent> {
        self.broadcast_tx.subscribe()
    }

    /// Receiver that always holds the latest snapshot
    #[cfg(test)]
    pub fn watch(&self) -> watch::Receiver<ThreadSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Stop the runtime; an in-flight completion is abandoned
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Record client activity on this session
    fn touch(&self) {
        *self
            .last_active
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// True when nobody has used, watched or awaited this thread for `limit`
    fn is_idle(&self, limit: Duration) -> bool {
        if self.broadcast_tx.receiver_count() > 0 || self.snapshot_rx.borrow().pending {
            return false;
        }
        let last_active = *self
            .last_active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        last_active.elapsed() >= limit
    }
}

/// Manager for all session threads
pub struct SessionManager {
    gateway: Arc<dyn InferenceGateway>,
    settings: RuntimeSettings,
    sessions: RwLock<HashMap<String, ThreadHandle>>,
    reaper: CancellationToken,
}

impl SessionManager {
    pub fn new(gateway: Arc<dyn InferenceGateway>, settings: RuntimeSettings) -> Self {
        Self {
            gateway,
            settings,
            sessions: RwLock::new(HashMap::new()),
            reaper: CancellationToken::new(),
        }
    }

    /// Start the background sweep that ends idle sessions
    pub fn spawn_reaper(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.run_reaper().await });
    }

    async fn run_reaper(&self) {
        let period = self.settings.sweep_period();
        loop {
            tokio::select! {
                () = self.reaper.cancelled() => break,
                () = tokio::time::sleep(period) => {}
            }
            self.reap_idle().await;
        }
        tracing::debug!("Session reaper stopped");
    }

    /// End every idle session; returns how many were reclaimed
    pub async fn reap_idle(&self) -> usize {
        let limit = self.settings.session_idle_timeout;
        let mut sessions = self.sessions.write().await;
        let idle: Vec<String> = sessions
            .iter()
            .filter(|(_, handle)| handle.is_idle(limit))
            .map(|(id, _)| id.clone())
            .collect();

        for id in &idle {
            if let Some(handle) = sessions.remove(id) {
                handle.shutdown();
            }
        }

        if !idle.is_empty() {
            tracing::info!(
                reclaimed = idle.len(),
                remaining = sessions.len(),
                "Idle sessions ended"
            );
        }
        idle.len()
    }

    /// Open a session with an empty thread
    pub async fn create(&self) -> (String, ThreadHandle) {
        let session_id = uuid::Uuid::new_v4().to_string();
        let handle = ThreadHandle::spawn(&session_id, self.gateway.clone(), &self.settings);

        self.sessions
            .write()
            .await
            .insert(session_id.clone(), handle.clone());

        tracing::info!(session_id = %session_id, "Session created");
        (session_id, handle)
    }

    /// Look up a session and mark it as in use
    pub async fn get(&self, session_id: &str) -> Option<ThreadHandle> {
        let handle = self.sessions.read().await.get(session_id).cloned()?;
        handle.touch();
        Some(handle)
    }

    #[cfg(test)]
    async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Discard a session and its thread. Returns false for unknown ids.
    pub async fn end(&self, session_id: &str) -> bool {
        let Some(handle) = self.sessions.write().await.remove(session_id) else {
            return false;
        };
        handle.shutdown();
        tracing::info!(session_id = %session_id, "Session ended");
        true
    }

    pub async fn shutdown_all(&self) {
        self.reaper.cancel();
        let sessions: Vec<_> = self.sessions.write().await.drain().collect();
        for (_, handle) in &sessions {
            handle.shutdown();
        }
        tracing::info!(count = sessions.len(), "All sessions stopped");
    }
}
