//! Thread runtime executor

use super::{Command, ErrorNotice, SseEvent, ThreadSnapshot};

use crate::gateway::{GatewayError, InferenceGateway};
use crate::state_machine::{transition, ChatState, Effect, Event, TransitionError};
use crate::thread::{HistoryEntry, StoreError, ThreadStore, TurnId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Single owner of one thread and its controller state.
///
/// Commands are processed one at a time; the gateway call is the only work
/// that happens off this task, and its result comes back as a command.
pub struct ThreadRuntime<G>
where
    G: InferenceGateway + ?Sized + 'static,
{
    session_id: String,
    state: ChatState,
    thread: ThreadStore,
    last_error: Option<ErrorNotice>,
    gateway: Arc<G>,
    completion_timeout: Duration,
    command_rx: mpsc::Receiver<Command>,
    command_tx: mpsc::Sender<Command>,
    broadcast_tx: broadcast::Sender<SseEvent>,
    snapshot_tx: watch::Sender<ThreadSnapshot>,
    /// Cancelled when the session ends
    shutdown: CancellationToken,
}

impl<G> ThreadRuntime<G>
where
    G: InferenceGateway + ?Sized + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: String,
        gateway: Arc<G>,
        completion_timeout: Duration,
        command_rx: mpsc::Receiver<Command>,
        command_tx: mpsc::Sender<Command>,
        broadcast_tx: broadcast::Sender<SseEvent>,
        snapshot_tx: watch::Sender<ThreadSnapshot>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            session_id,
            state: ChatState::Idle,
            thread: ThreadStore::new(),
            last_error: None,
            gateway,
            completion_timeout,
            command_rx,
            command_tx,
            broadcast_tx,
            snapshot_tx,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(session_id = %self.session_id, "Starting thread runtime");

        loop {
            tokio::select! {
                biased;

                () = self.shutdown.cancelled() => break,

                Some(command) = self.command_rx.recv() => {
                    self.process_command(command);
                }

                else => break,
            }
        }

        tracing::info!(session_id = %self.session_id, "Thread runtime stopped");
    }

    fn process_command(&mut self, command: Command) {
        let Command { event, reply } = command;
        let event_name = event.name();

        let verdict = match transition(&self.state, &self.thread, event) {
            Ok(result) => {
                self.state = result.new_state;
                for effect in result.effects {
                    if let Err(e) = self.execute_effect(effect) {
                        tracing::error!(
                            session_id = %self.session_id,
                            error = %e,
                            "Failed to apply effect"
                        );
                    }
                }
                // Publish before replying so callers see their own change
                self.publish_snapshot();
                Ok(())
            }
            Err(e) => {
                match &e {
                    TransitionError::InvalidTransition(_) => tracing::warn!(
                        session_id = %self.session_id,
                        event = event_name,
                        error = %e,
                        "Unexpected event"
                    ),
                    _ => tracing::debug!(
                        session_id = %self.session_id,
                        event = event_name,
                        reason = %e,
                        "Event rejected"
                    ),
                }
                Err(e)
            }
        };

        if let Some(reply) = reply {
            let _ = reply.send(verdict);
        }
    }

    fn execute_effect(&mut self, effect: Effect) -> Result<(), StoreError> {
        match effect {
            Effect::AppendTurn { turn } => {
                self.thread.append(turn)?;
            }

            Effect::RemoveExchange { turn_id } => {
                let removed = self.thread.cascading_delete(&turn_id);
                tracing::debug!(
                    session_id = %self.session_id,
                    turn_id = %turn_id,
                    removed = ?removed.iter().map(|t| t.role.as_str()).collect::<Vec<_>>(),
                    remaining = self.thread.len(),
                    "Deleted exchange"
                );
            }

            Effect::RegenerateTurn { turn_id, content } => {
                self.thread.regenerate(&turn_id, content)?;
            }

            Effect::RequestCompletion { history } => {
                self.last_error = None;
                self.spawn_completion(history);
            }

            Effect::DiscardCompletion { request } => {
                tracing::info!(
                    session_id = %self.session_id,
                    turn_id = %request.origin(),
                    "Discarding completion, its turn was deleted while in flight"
                );
            }

            Effect::NotifyThread => {
                let _ = self.broadcast_tx.send(SseEvent::Thread {
                    turns: self.thread.turns().to_vec(),
                });
            }

            Effect::NotifyStateChange => {
                let _ = self.broadcast_tx.send(SseEvent::StateChange {
                    state: self.state.clone(),
                });
            }

            Effect::NotifyError { message, kind } => {
                tracing::warn!(
                    session_id = %self.session_id,
                    kind = ?kind,
                    error = %message,
                    "Completion failed"
                );
                self.last_error = Some(ErrorNotice {
                    message: message.clone(),
                    kind,
                });
                let _ = self.broadcast_tx.send(SseEvent::Error { message, kind });
            }
        }
        Ok(())
    }

    /// Run the gateway call as a background task; the outcome comes back as a command
    fn spawn_completion(&self, history: Vec<HistoryEntry>) {
        let gateway = self.gateway.clone();
        let command_tx = self.command_tx.clone();
        let shutdown = self.shutdown.clone();
        let completion_timeout = self.completion_timeout;
        let session_id = self.session_id.clone();

        tokio::spawn(async move {
            tracing::debug!(
                session_id = %session_id,
                history_len = history.len(),
                "Requesting completion (background)"
            );

            let outcome = tokio::select! {
                biased;

                () = shutdown.cancelled() => {
                    tracing::info!(session_id = %session_id, "Completion abandoned, session ended");
                    return;
                }

                outcome = tokio::time::timeout(completion_timeout, gateway.complete(&history)) => outcome,
            };

            let event = match outcome {
                Ok(Ok(content)) => Event::CompletionSucceeded {
                    content,
                    turn_id: TurnId::generate(),
                },
                Ok(Err(e)) => Event::CompletionFailed {
                    message: e.message,
                    kind: e.kind,
                },
                Err(_) => {
                    let e = GatewayError::timeout(format!(
                        "No response from the gateway within {completion_timeout:?}"
                    ));
                    Event::CompletionFailed {
                        message: e.message,
                        kind: e.kind,
                    }
                }
            };

            let _ = command_tx.send(Command::notify(event)).await;
        });
    }

    fn publish_snapshot(&self) {
        self.snapshot_tx.send_replace(ThreadSnapshot {
            turns: self.thread.turns().to_vec(),
            pending: self.state.is_pending(),
            last_error: self.last_error.clone(),
        });
    }
}
