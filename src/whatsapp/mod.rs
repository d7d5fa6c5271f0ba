//! WhatsApp Web session
//!
//! Everything between the HTTP layer and the protocol client: the credential
//! store, the session state machine, the reconnecting supervisor, and the
//! translation of `/send` requests into wire messages.

pub mod connector;
pub mod events;
pub mod jid;
pub mod link;
pub mod media;
pub mod outgoing;
pub mod qr;
pub mod session;
pub mod store;
pub mod supervisor;

pub use connector::{BotConnector, Connector, Socket};
pub use link::{ClientLink, Link};
pub use outgoing::{MessageKind, OutgoingMessage, SendRequest};
pub use session::{Session, SessionSnapshot, SessionState};
pub use store::{PairedUser, SessionStore};
pub use supervisor::{Exit, Supervisor};
