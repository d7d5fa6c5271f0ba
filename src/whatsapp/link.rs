//! The seam between the HTTP layer and a live socket.

use async_trait::async_trait;
use std::sync::Arc;
use wacore_binary::jid::Jid;
use whatsapp_rust::client::Client;
use whatsapp_rust::download::MediaType;

use super::media::{media_message, MediaFetcher, UploadedMedia};
use super::outgoing::{text_message, MessageKind, OutgoingMessage};
use crate::error::{GatewayError, Result};
use crate::utils::{retry, RetryConfig};

/// An authenticated connection that can deliver messages.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Link: Send + Sync {
    /// Deliver `message` to `jid`, returning the message id.
    async fn send(&self, jid: &str, message: OutgoingMessage) -> Result<String>;

    /// Close the underlying socket. Idempotent.
    async fn disconnect(&self);
}

/// [`Link`] backed by a protocol client.
pub struct ClientLink {
    client: Arc<Client>,
    media: MediaFetcher,
    retry: RetryConfig,
}

impl ClientLink {
    pub fn new(client: Arc<Client>, media: MediaFetcher, retry: RetryConfig) -> Self {
        Self {
            client,
            media,
            retry,
        }
    }

    async fn upload(&self, message: &OutgoingMessage) -> Result<waproto::whatsapp::Message> {
        let kind = message.kind();
        let (Some(url), Some(media_type)) = (message.media_url(), media_type(kind)) else {
            return Err(GatewayError::InvalidType(kind.to_string()));
        };

        let fetched = self.media.fetch(url, kind).await?;
        tracing::info!(
            "WhatsApp: uploading {} ({} bytes, {})",
            kind,
            fetched.bytes.len(),
            fetched.mimetype
        );

        let upload = self
            .client
            .upload(fetched.bytes, media_type)
            .await
            .map_err(|e| GatewayError::Send(format!("upload failed: {e}")))?;

        let uploaded = UploadedMedia {
            url: upload.url,
            direct_path: upload.direct_path,
            media_key: upload.media_key,
            file_enc_sha256: upload.file_enc_sha256,
            file_sha256: upload.file_sha256,
            file_length: upload.file_length,
            mimetype: fetched.mimetype,
        };
        media_message(message, uploaded).ok_or_else(|| GatewayError::InvalidType(kind.to_string()))
    }
}

fn media_type(kind: MessageKind) -> Option<MediaType> {
    match kind {
        MessageKind::Text => None,
        MessageKind::Image => Some(MediaType::Image),
        MessageKind::Video => Some(MediaType::Video),
        MessageKind::Audio => Some(MediaType::Audio),
        MessageKind::Document => Some(MediaType::Document),
    }
}

#[async_trait]
impl Link for ClientLink {
    async fn send(&self, jid: &str, message: OutgoingMessage) -> Result<String> {
        let to: Jid = jid
            .parse()
            .map_err(|e| GatewayError::InvalidRecipient(format!("{jid}: {e}")))?;

        let proto = match &message {
            OutgoingMessage::Text { body } => text_message(body),
            media => self.upload(media).await?,
        };

        let id = retry(&self.retry, "WhatsApp send", || {
            let client = self.client.clone();
            let to = to.clone();
            let proto = proto.clone();
            async move { client.send_message(to, proto).await }
        })
        .await
        .map_err(|e| GatewayError::Send(e.to_string()))?;

        tracing::info!("WhatsApp: sent {} to {} (id: {})", message.kind(), jid, id);
        Ok(id)
    }

    async fn disconnect(&self) {
        self.client.disconnect().await;
    }
}
