//! Session state machine
//!
//! ```text
//! Starting ──► Connecting ──► AwaitingScan ──► Connecting ──► Connected ◄──┐
//!                  ▲               (QR)          (paired)          │       │
//!                  │                                               ▼       │
//!                  │                                         Disconnected ─┘
//!                  └──────── new client ◄──────── LoggedOut    (client reconnects)
//! ```
//!
//! The supervisor is the only writer. Each client it builds gets a new
//! generation number; events carrying an older generation are dropped, so a
//! client that was already torn down can never move the state. At most one
//! [`Link`] is attached at a time and it is only handed out while `Connected`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};

use super::link::Link;
use super::store::PairedUser;
use crate::error::{GatewayError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Connecting,
    AwaitingScan { qr: String },
    Connected { user: Option<PairedUser> },
    Disconnected { reason: String },
    LoggedOut,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Connecting => "connecting",
            Self::AwaitingScan { .. } => "awaiting_scan",
            Self::Connected { .. } => "connected",
            Self::Disconnected { .. } => "disconnected",
            Self::LoggedOut => "logged_out",
        }
    }
}

/// What a socket reported, already translated from protocol-client events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Qr(String),
    Paired,
    Connected(Option<PairedUser>),
    Disconnected(String),
    LoggedOut,
}

impl LinkEvent {
    /// The client that produced this event will not recover on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::LoggedOut)
    }
}

/// Requests from the HTTP side to the supervisor.
#[derive(Debug)]
pub enum Command {
    Logout { reply: oneshot::Sender<Result<()>> },
}

/// Body of `GET /session`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub connected: bool,
    pub user: Option<PairedUser>,
    pub state: &'static str,
    pub since: DateTime<Utc>,
}

struct Inner {
    state: SessionState,
    since: DateTime<Utc>,
    generation: u64,
    link: Option<Arc<dyn Link>>,
}

impl Inner {
    fn transition(&mut self, state: SessionState) {
        tracing::debug!(
            "Session {} -> {} (generation {})",
            self.state.name(),
            state.name(),
            self.generation
        );
        self.state = state;
        self.since = Utc::now();
    }
}

/// Shared handle to the session, cloned into the HTTP layer.
pub struct Session {
    inner: RwLock<Inner>,
    commands: mpsc::Sender<Command>,
}

impl Session {
    /// New session in `Starting`, plus the receiving end of its command
    /// channel for the supervisor.
    pub fn new() -> (Arc<Self>, mpsc::Receiver<Command>) {
        let (commands, rx) = mpsc::channel(8);
        let session = Self {
            inner: RwLock::new(Inner {
                state: SessionState::Starting,
                since: Utc::now(),
                generation: 0,
                link: None,
            }),
            commands,
        };
        (Arc::new(session), rx)
    }

    /// A new socket is being built for `generation`; anything older is dead.
    pub async fn begin(&self, generation: u64) {
        let mut inner = self.inner.write().await;
        inner.generation = generation;
        inner.link = None;
        inner.transition(SessionState::Connecting);
    }

    /// Attach the link for `generation`. Ignored if a newer generation began.
    pub async fn attach(&self, generation: u64, link: Arc<dyn Link>) -> bool {
        let mut inner = self.inner.write().await;
        if inner.generation != generation {
            return false;
        }
        inner.link = Some(link);
        true
    }

    pub async fn detach(&self, generation: u64) {
        let mut inner = self.inner.write().await;
        if inner.generation == generation {
            inner.link = None;
        }
    }

    /// Apply an event from the socket of `generation`. Returns false when the
    /// event was stale and dropped.
    pub async fn apply(&self, generation: u64, event: LinkEvent) -> bool {
        let mut inner = self.inner.write().await;
        if inner.generation != generation {
            tracing::debug!(
                "Dropping {:?} from stale generation {} (current {})",
                event,
                generation,
                inner.generation
            );
            return false;
        }

        let next = match event {
            LinkEvent::Qr(qr) => SessionState::AwaitingScan { qr },
            LinkEvent::Paired => SessionState::Connecting,
            LinkEvent::Connected(user) => SessionState::Connected { user },
            LinkEvent::Disconnected(reason) => SessionState::Disconnected { reason },
            LinkEvent::LoggedOut => {
                inner.link = None;
                SessionState::LoggedOut
            }
        };
        inner.transition(next);
        true
    }

    pub async fn state(&self) -> SessionState {
        self.inner.read().await.state.clone()
    }

    /// The current link, only while authenticated.
    pub async fn ready_link(&self) -> Result<Arc<dyn Link>> {
        let inner = self.inner.read().await;
        match (&inner.state, &inner.link) {
            (SessionState::Connected { .. }, Some(link)) => Ok(link.clone()),
            _ => Err(GatewayError::NotReady),
        }
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.read().await;
        let user = match &inner.state {
            SessionState::Connected { user } => user.clone(),
            _ => None,
        };
        SessionSnapshot {
            connected: matches!(inner.state, SessionState::Connected { .. }),
            user,
            state: inner.state.name(),
            since: inner.since,
        }
    }

    /// Latest pairing QR, if one is waiting to be scanned.
    pub async fn qr(&self) -> Option<String> {
        match &self.inner.read().await.state {
            SessionState::AwaitingScan { qr } => Some(qr.clone()),
            _ => None,
        }
    }

    /// Ask the supervisor to drop the socket and wipe credentials. Resolves
    /// once the credentials are gone.
    pub async fn logout(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Logout { reply })
            .await
            .map_err(|_| GatewayError::SupervisorGone)?;
        rx.await.map_err(|_| GatewayError::SupervisorGone)?
    }
}
