//! wagate - HTTP gateway for a WhatsApp Web session
//!
//! Keeps one linked-device session alive (pairing by QR, credential
//! persistence, reconnect with backoff) and exposes it over a small HTTP API.
//!
//! ## Routes
//!
//! - `GET /health` - liveness
//! - `GET /` - pairing page with the current QR code
//! - `GET /session` - connection state (bearer token)
//! - `POST /send` - send text or media by URL (bearer token)
//! - `POST /logout` - wipe credentials and restart (bearer token)
//!
//! ## Quick Start
//!
//! ```bash
//! AUTH_TOKEN=change-me PORT=8080 wagate
//!
//! curl -H "Authorization: Bearer change-me" -d '{"to":"5511999990000","message":"hi"}' \
//!      -H "Content-Type: application/json" localhost:8080/send
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod server;
pub mod utils;
pub mod whatsapp;

// Re-export commonly used types
pub use error::GatewayError;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
