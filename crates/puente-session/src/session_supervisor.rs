//! Supervised session lifecycle: connect, consume events, reconnect.
//!
//! One task owns the loop. Every inbound message is relayed on its own task
//! so a long backoff chain never delays connection updates. On shutdown the
//! in-flight inbound tasks are awaited, since their chains always end either
//! delivered or spilled.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use puente_delivery::RequeueTrigger;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle, JoinSet};

use crate::connection_gate::{GateTransition, ReconnectDecision};
use crate::credential_store::CredentialStore;
use crate::event_relay::{EventRelay, InboundDisposition};
use crate::pairing_qr::render_pairing_qr;
use crate::session_events::{ConnectionUpdate, SessionEvent};
use crate::session_provider::SessionProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    Shutdown,
    /// The session was invalidated and needs a fresh pairing.
    LoggedOut,
}

enum SessionEnd {
    Shutdown,
    Closed(ReconnectDecision),
}

#[derive(Debug)]
/// Public struct `SessionSupervisorHandle` owning the session lifecycle task.
pub struct SessionSupervisorHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<SupervisorExit>>,
}

impl SessionSupervisorHandle {
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stops the supervisor and waits for in-flight inbound messages.
    ///
    /// Returns how the supervisor ended, or `None` when it was already joined.
    pub async fn shutdown(&mut self) -> Option<SupervisorExit> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        let task = self.task.take()?;
        match task.await {
            Ok(exit) => Some(exit),
            Err(error) => {
                tracing::error!(error = %error, "session supervisor task failed");
                None
            }
        }
    }
}

pub fn start_session_supervisor(
    provider: Arc<dyn SessionProvider>,
    relay: EventRelay,
    credentials: CredentialStore,
    requeue: RequeueTrigger,
) -> Result<SessionSupervisorHandle> {
    let handle = tokio::runtime::Handle::try_current()
        .context("session supervisor requires an active Tokio runtime")?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let supervisor = SessionSupervisor {
        provider,
        relay,
        credentials,
        requeue,
        inbound_tasks: JoinSet::new(),
    };
    let task = handle.spawn(supervisor.run(shutdown_rx));
    Ok(SessionSupervisorHandle {
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    })
}

struct SessionSupervisor {
    provider: Arc<dyn SessionProvider>,
    relay: EventRelay,
    credentials: CredentialStore,
    requeue: RequeueTrigger,
    inbound_tasks: JoinSet<InboundDisposition>,
}

impl SessionSupervisor {
    async fn run(mut self, mut shutdown_rx: oneshot::Receiver<()>) -> SupervisorExit {
        let exit = loop {
            let stored_credentials = self.load_credentials();
            let connected = tokio::select! {
                _ = &mut shutdown_rx => break SupervisorExit::Shutdown,
                result = self.provider.connect(stored_credentials) => result,
            };

            let delay = match connected {
                Ok(events) => {
                    tracing::info!("whatsapp session started");
                    match self.consume_session(events, &mut shutdown_rx).await {
                        SessionEnd::Shutdown => break SupervisorExit::Shutdown,
                        SessionEnd::Closed(ReconnectDecision::LoggedOut) => {
                            tracing::error!(
                                session_dir = %self.credentials.dir().display(),
                                "whatsapp session logged out; delete the session directory and restart to pair again"
                            );
                            break SupervisorExit::LoggedOut;
                        }
                        SessionEnd::Closed(ReconnectDecision::Reconnect { delay }) => delay,
                    }
                }
                Err(error) => {
                    tracing::error!(error = %format!("{error:#}"), "failed to start whatsapp session");
                    self.relay.gate().reconnect_delay()
                }
            };

            tracing::info!(delay_ms = duration_ms(delay), "reconnecting whatsapp session");
            tokio::select! {
                _ = &mut shutdown_rx => break SupervisorExit::Shutdown,
                _ = tokio::time::sleep(delay) => {}
            }
        };

        self.drain_inbound_tasks().await;
        tracing::info!(exit = ?exit, "session supervisor stopped");
        exit
    }

    async fn consume_session(
        &mut self,
        mut events: mpsc::Receiver<SessionEvent>,
        shutdown_rx: &mut oneshot::Receiver<()>,
    ) -> SessionEnd {
        loop {
            tokio::select! {
                _ = &mut *shutdown_rx => return SessionEnd::Shutdown,
                Some(joined) = self.inbound_tasks.join_next(), if !self.inbound_tasks.is_empty() => {
                    log_inbound_result(joined);
                }
                maybe_event = events.recv() => {
                    let event = maybe_event.unwrap_or_else(|| {
                        tracing::warn!("session event stream ended");
                        SessionEvent::ConnectionUpdate(ConnectionUpdate::closed(
                            None,
                            Some("session event stream ended".to_string()),
                        ))
                    });
                    if let Some(end) = self.handle_event(event) {
                        return end;
                    }
                }
            }
        }
    }

    fn handle_event(&mut self, event: SessionEvent) -> Option<SessionEnd> {
        match event {
            SessionEvent::ConnectionUpdate(update) => self.handle_connection_update(&update),
            SessionEvent::CredentialsUpdated(credentials) => {
                if let Err(error) = self.credentials.save(&credentials) {
                    tracing::error!(error = %format!("{error:#}"), "failed to persist session credentials");
                }
                None
            }
            SessionEvent::MessageReceived(message) => {
                self.relay.spawn_inbound(&mut self.inbound_tasks, message);
                None
            }
        }
    }

    fn handle_connection_update(&self, update: &ConnectionUpdate) -> Option<SessionEnd> {
        if let Some(qr) = update.qr.as_deref() {
            match render_pairing_qr(qr) {
                Ok(rendered) => {
                    tracing::info!("scan this QR code with WhatsApp to link the session\n{rendered}")
                }
                Err(error) => tracing::warn!(
                    qr,
                    error = %error,
                    "failed to render pairing QR code; pair with the raw value instead"
                ),
            }
        }
        match self.relay.apply_connection_update(update) {
            GateTransition::BecameConnected => {
                tracing::info!("whatsapp connected and ready");
                self.requeue.trigger();
                None
            }
            GateTransition::Disconnected(decision) => {
                tracing::warn!(
                    status_code = ?update.disconnect_status_code(),
                    reason = ?update.last_disconnect.as_ref().and_then(|last| last.message.as_deref()),
                    reconnect = matches!(decision, ReconnectDecision::Reconnect { .. }),
                    "whatsapp connection closed"
                );
                Some(SessionEnd::Closed(decision))
            }
            GateTransition::Unchanged => None,
        }
    }

    fn load_credentials(&self) -> Option<Value> {
        match self.credentials.load() {
            Ok(credentials) => credentials,
            Err(error) => {
                tracing::error!(error = %format!("{error:#}"), "failed to load session credentials; pairing from scratch");
                None
            }
        }
    }

    async fn drain_inbound_tasks(&mut self) {
        while let Some(joined) = self.inbound_tasks.join_next().await {
            log_inbound_result(joined);
        }
    }
}

fn log_inbound_result(joined: Result<InboundDisposition, JoinError>) {
    match joined {
        Ok(disposition) => tracing::debug!(disposition = ?disposition, "inbound message finished"),
        Err(error) => tracing::error!(error = %error, "inbound message task failed"),
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
