//! Outbound send requests
//!
//! `SendRequest` is the raw `/send` body; `validate` turns it into a
//! recipient JID plus a typed `OutgoingMessage`, failing with the 400-class
//! errors callers see.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::jid::normalize_recipient;
use crate::error::{GatewayError, Result};

pub const DEFAULT_FILENAME: &str = "file";

/// Body of `POST /send`. Every field is optional at the wire level so that
/// missing values produce a field-specific 400 rather than a decode error.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    Document,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "audio" => Ok(Self::Audio),
            "document" => Ok(Self::Document),
            _ => Err(GatewayError::InvalidType(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingMessage {
    Text {
        body: String,
    },
    Image {
        url: String,
        caption: Option<String>,
    },
    Video {
        url: String,
        caption: Option<String>,
    },
    Audio {
        url: String,
    },
    Document {
        url: String,
        filename: String,
        caption: Option<String>,
    },
}

impl OutgoingMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Text { .. } => MessageKind::Text,
            Self::Image { .. } => MessageKind::Image,
            Self::Video { .. } => MessageKind::Video,
            Self::Audio { .. } => MessageKind::Audio,
            Self::Document { .. } => MessageKind::Document,
        }
    }

    /// Source URL for media kinds.
    pub fn media_url(&self) -> Option<&str> {
        match self {
            Self::Text { .. } => None,
            Self::Image { url, .. }
            | Self::Video { url, .. }
            | Self::Audio { url }
            | Self::Document { url, .. } => Some(url),
        }
    }
}

/// Empty or whitespace-only values count as absent.
fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn required(value: Option<String>, field: &'static str) -> Result<String> {
    present(value).ok_or(GatewayError::MissingField(field))
}

impl SendRequest {
    /// Check the request and resolve the recipient.
    ///
    /// `to` is checked first, then `type` (absent means text), then the
    /// fields the type needs: `message` for text, `url` for everything else.
    pub fn validate(self) -> Result<(String, OutgoingMessage)> {
        let to = required(self.to, "to")?;
        let kind = match present(self.kind) {
            Some(kind) => kind.parse()?,
            None => MessageKind::Text,
        };
        let caption = present(self.caption);

        let message = match kind {
            MessageKind::Text => OutgoingMessage::Text {
                body: required(self.message, "message")?,
            },
            MessageKind::Image => OutgoingMessage::Image {
                url: required(self.url, "url")?,
                caption,
            },
            MessageKind::Video => OutgoingMessage::Video {
                url: required(self.url, "url")?,
                caption,
            },
            MessageKind::Audio => OutgoingMessage::Audio {
                url: required(self.url, "url")?,
            },
            MessageKind::Document => OutgoingMessage::Document {
                url: required(self.url, "url")?,
                filename: present(self.filename).unwrap_or_else(|| DEFAULT_FILENAME.to_string()),
                caption,
            },
        };

        Ok((normalize_recipient(&to)?, message))
    }
}

/// Plain text message as sent on the wire.
pub fn text_message(body: &str) -> waproto::whatsapp::Message {
    waproto::whatsapp::Message {
        conversation: Some(body.to_string()),
        ..Default::default()
    }
}
