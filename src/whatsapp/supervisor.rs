//! Client lifecycle
//!
//! The supervisor owns the credential store and runs one protocol client per
//! pairing. The client reconnects dropped sockets by itself; a new one is only
//! built after a logout or when the old client's run loop ends, and the old one
//! is always fully closed (disconnected, link detached, runtime stopped) first.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::connector::{BotConnector, Connector};
use super::media::MediaFetcher;
use super::session::{Command, LinkEvent, Session};
use super::store::SessionStore;
use crate::config::{Config, SessionConfig};
use crate::error::GatewayError;

/// Why the supervisor stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// The shutdown token fired.
    Shutdown,
    /// `/logout` wiped the credentials and the process should restart.
    LoggedOut,
}

/// How one client generation ended.
#[derive(Debug)]
enum Outcome {
    Shutdown,
    Dropped { reason: String, was_connected: bool },
    LoggedOut,
    Logout(oneshot::Sender<crate::error::Result<()>>),
}

/// Exponential reconnect delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait now; doubles the next one up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

pub struct Supervisor {
    session: Arc<Session>,
    commands: mpsc::Receiver<Command>,
    store: Arc<SessionStore>,
    connector: Arc<dyn Connector>,
    exit_on_logout: bool,
    backoff: Backoff,
    shutdown: CancellationToken,
    generation: u64,
}

impl Supervisor {
    /// Open the credential store, wiping it first when `reset_on_start` is set.
    pub async fn open(
        config: &Config,
        session: Arc<Session>,
        commands: mpsc::Receiver<Command>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        if config.session.reset_on_start {
            tracing::warn!("RESET_SESSION set: clearing stored credentials");
            SessionStore::remove_dir(&config.session.auth_dir()).with_context(|| {
                format!(
                    "Failed to remove credentials at {}",
                    config.session.auth_dir().display()
                )
            })?;
        }

        let path = config.session.store_path();
        let store = Arc::new(
            SessionStore::open(&path)
                .await
                .with_context(|| format!("Failed to open session store at {}", path.display()))?,
        );
        let connector = BotConnector::new(
            store.clone(),
            MediaFetcher::new(&config.media)?,
            config.whatsapp.clone(),
        );

        Ok(Self::new(
            session,
            commands,
            store,
            Arc::new(connector),
            &config.session,
            shutdown,
        ))
    }

    pub fn new(
        session: Arc<Session>,
        commands: mpsc::Receiver<Command>,
        store: Arc<SessionStore>,
        connector: Arc<dyn Connector>,
        settings: &SessionConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            session,
            commands,
            store,
            connector,
            exit_on_logout: settings.exit_on_logout,
            backoff: Backoff::new(
                Duration::from_millis(settings.reconnect_initial_ms),
                Duration::from_millis(settings.reconnect_max_ms),
            ),
            shutdown,
            generation: 0,
        }
    }

    /// Run until shutdown, or until a logout asks for a process restart.
    pub async fn run(mut self) -> Result<Exit> {
        if self.store.is_paired().await.unwrap_or(false) {
            tracing::info!("WhatsApp: restoring stored session");
        } else {
            tracing::info!("WhatsApp: no stored session, a QR code will be issued");
        }

        let mut pending = None;
        loop {
            let outcome = match pending.take() {
                Some(outcome) => outcome,
                None => self.connect_once().await,
            };

            match outcome {
                Outcome::Shutdown => {
                    tracing::info!("WhatsApp supervisor stopping");
                    return Ok(Exit::Shutdown);
                }
                Outcome::Dropped {
                    reason,
                    was_connected,
                } => {
                    let delay = self.reconnect_delay(was_connected);
                    tracing::warn!(
                        "WhatsApp client stopped ({}), starting a new one in {}ms",
                        reason,
                        delay.as_millis()
                    );
                    pending = self.wait(delay).await;
                }
                Outcome::LoggedOut => {
                    if let Err(e) = self.store.wipe().await {
                        tracing::error!("Failed to wipe credentials after logout: {}", e);
                    }
                    self.backoff.reset();
                    let delay = self.backoff.next_delay();
                    pending = self.wait(delay).await;
                }
                Outcome::Logout(reply) => {
                    if let Some(exit) = self.finish_logout(reply).await {
                        return Ok(exit);
                    }
                }
            }
        }
    }

    /// A client that had reached `Connected` starts the backoff over.
    fn reconnect_delay(&mut self, was_connected: bool) -> Duration {
        if was_connected {
            self.backoff.reset();
        }
        self.backoff.next_delay()
    }

    /// Start one client and follow it until it can no longer be used.
    async fn connect_once(&mut self) -> Outcome {
        self.generation += 1;
        let generation = self.generation;
        self.session.begin(generation).await;
        tracing::debug!("WhatsApp: starting client generation {}", generation);

        let (events_tx, mut events) = mpsc::unbounded_channel();
        let mut socket = match self.connector.connect(events_tx).await {
            Ok(socket) => socket,
            Err(e) => return self.fail(generation, format!("{e:#}")).await,
        };
        self.session.attach(generation, socket.link.clone()).await;

        let mut was_connected = false;
        let outcome = loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break Outcome::Shutdown,
                Some(event) = events.recv() => {
                    if matches!(event, LinkEvent::Connected(_)) {
                        was_connected = true;
                    }
                    let terminal = event.is_terminal();
                    self.session.apply(generation, event).await;
                    if terminal {
                        break Outcome::LoggedOut;
                    }
                }
                command = self.commands.recv() => match command {
                    Some(Command::Logout { reply }) => break Outcome::Logout(reply),
                    None => break Outcome::Shutdown,
                },
                finished = &mut socket.finished => {
                    let reason = finished.unwrap_or_else(|_| "client stopped".to_string());
                    self.session
                        .apply(generation, LinkEvent::Disconnected(reason.clone()))
                        .await;
                    break Outcome::Dropped { reason, was_connected };
                }
            }
        };

        self.session.detach(generation).await;
        socket.close().await;
        tracing::debug!("WhatsApp: client generation {} closed", generation);
        outcome
    }

    async fn fail(&self, generation: u64, reason: String) -> Outcome {
        tracing::error!("WhatsApp: {}", reason);
        self.session
            .apply(generation, LinkEvent::Disconnected(reason.clone()))
            .await;
        Outcome::Dropped {
            reason,
            was_connected: false,
        }
    }

    /// Sleep before reconnecting while still answering shutdown and logout.
    async fn wait(&mut self, delay: Duration) -> Option<Outcome> {
        tokio::select! {
            _ = self.shutdown.cancelled() => Some(Outcome::Shutdown),
            _ = tokio::time::sleep(delay) => None,
            command = self.commands.recv() => match command {
                Some(Command::Logout { reply }) => Some(Outcome::Logout(reply)),
                None => Some(Outcome::Shutdown),
            },
        }
    }

    /// Wipe credentials after a logout request and answer the caller. Returns
    /// the exit reason when the process should stop.
    async fn finish_logout(
        &mut self,
        reply: oneshot::Sender<crate::error::Result<()>>,
    ) -> Option<Exit> {
        tracing::info!("WhatsApp: logout requested, wiping credentials");
        let result = self.store.wipe().await.map_err(GatewayError::from);
        let wiped = result.is_ok();
        if wiped {
            self.session.apply(self.generation, LinkEvent::LoggedOut).await;
        }
        let _ = reply.send(result);

        if wiped && self.exit_on_logout {
            return Some(Exit::LoggedOut);
        }
        self.backoff.reset();
        None
    }
}
