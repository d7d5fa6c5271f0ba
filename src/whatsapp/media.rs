//! Media fetched by URL for image/video/audio/document sends.

use std::time::Duration;

use super::outgoing::{MessageKind, OutgoingMessage};
use crate::config::MediaConfig;
use crate::error::{GatewayError, Result};

/// Bytes downloaded for an outbound media message.
#[derive(Debug, Clone)]
pub struct FetchedMedia {
    pub bytes: Vec<u8>,
    pub mimetype: String,
}

/// Result of uploading media to WhatsApp's CDN, copied out of the client's
/// upload response.
#[derive(Debug, Clone, Default)]
pub struct UploadedMedia {
    pub url: String,
    pub direct_path: String,
    pub media_key: Vec<u8>,
    pub file_enc_sha256: Vec<u8>,
    pub file_sha256: Vec<u8>,
    pub file_length: u64,
    pub mimetype: String,
}

#[derive(Debug, Clone)]
pub struct MediaFetcher {
    http: reqwest::Client,
    max_bytes: u64,
}

impl MediaFetcher {
    pub fn new(config: &MediaConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("wagate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GatewayError::Media(e.to_string()))?;
        Ok(Self {
            http,
            max_bytes: config.max_bytes,
        })
    }

    /// Download `url`, refusing bodies over the configured cap.
    pub async fn fetch(&self, url: &str, kind: MessageKind) -> Result<FetchedMedia> {
        let mut response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| GatewayError::Media(e.to_string()))?;

        if let Some(len) = response.content_length()
            && len > self.max_bytes
        {
            return Err(GatewayError::Media(format!(
                "{len} bytes exceeds the {} byte limit",
                self.max_bytes
            )));
        }

        let header_mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| GatewayError::Media(e.to_string()))?
        {
            if (bytes.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(GatewayError::Media(format!(
                    "body exceeds the {} byte limit",
                    self.max_bytes
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        let mimetype = resolve_mimetype(header_mime.as_deref(), url, kind);
        tracing::debug!("Fetched {} media: {} bytes ({})", kind, bytes.len(), mimetype);
        Ok(FetchedMedia { bytes, mimetype })
    }
}

/// Pick the mimetype for an upload: the response header if it fits the
/// message kind, then the URL's extension, then the kind's default. Audio is
/// always sent as `audio/mpeg`.
pub fn resolve_mimetype(header: Option<&str>, url: &str, kind: MessageKind) -> String {
    let fits = |mime: &str| match kind {
        MessageKind::Image => mime.starts_with("image/"),
        MessageKind::Video => mime.starts_with("video/"),
        MessageKind::Document => mime != "application/octet-stream",
        MessageKind::Audio | MessageKind::Text => false,
    };

    let header = header
        .and_then(|h| h.split(';').next())
        .map(|h| h.trim().to_ascii_lowercase())
        .filter(|h| fits(h));
    if let Some(mime) = header {
        return mime;
    }

    if let Some(mime) = mime_from_url(url).filter(|m| fits(m)) {
        return mime.to_string();
    }

    default_mimetype(kind).to_string()
}

fn default_mimetype(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::Image => "image/jpeg",
        MessageKind::Video => "video/mp4",
        MessageKind::Audio => "audio/mpeg",
        MessageKind::Document | MessageKind::Text => "application/octet-stream",
    }
}

fn mime_from_url(url: &str) -> Option<&'static str> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let name = parsed.path_segments()?.next_back()?;
    let (_, ext) = name.rsplit_once('.')?;
    let mime = match ext.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "3gp" => "video/3gpp",
        "mp3" => "audio/mpeg",
        "ogg" | "opus" => "audio/ogg",
        "m4a" => "audio/mp4",
        "wav" => "audio/wav",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "zip" => "application/zip",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => return None,
    };
    Some(mime)
}

/// Wire message for an uploaded media item. `None` for text.
pub fn media_message(
    message: &OutgoingMessage,
    media: UploadedMedia,
) -> Option<waproto::whatsapp::Message> {
    use waproto::whatsapp::message::{AudioMessage, DocumentMessage, ImageMessage, VideoMessage};
    use waproto::whatsapp::Message;

    let UploadedMedia {
        url,
        direct_path,
        media_key,
        file_enc_sha256,
        file_sha256,
        file_length,
        mimetype,
    } = media;

    let msg = match message {
        OutgoingMessage::Text { .. } => return None,
        OutgoingMessage::Image { caption, .. } => Message {
            image_message: Some(Box::new(ImageMessage {
                url: Some(url),
                direct_path: Some(direct_path),
                media_key: Some(media_key),
                file_enc_sha256: Some(file_enc_sha256),
                file_sha256: Some(file_sha256),
                file_length: Some(file_length),
                mimetype: Some(mimetype),
                caption: caption.clone(),
                ..Default::default()
            })),
            ..Default::default()
        },
        OutgoingMessage::Video { caption, .. } => Message {
            video_message: Some(Box::new(VideoMessage {
                url: Some(url),
                direct_path: Some(direct_path),
                media_key: Some(media_key),
                file_enc_sha256: Some(file_enc_sha256),
                file_sha256: Some(file_sha256),
                file_length: Some(file_length),
                mimetype: Some(mimetype),
                caption: caption.clone(),
                ..Default::default()
            })),
            ..Default::default()
        },
        OutgoingMessage::Audio { .. } => Message {
            audio_message: Some(Box::new(AudioMessage {
                url: Some(url),
                direct_path: Some(direct_path),
                media_key: Some(media_key),
                file_enc_sha256: Some(file_enc_sha256),
                file_sha256: Some(file_sha256),
                file_length: Some(file_length),
                mimetype: Some(mimetype),
                ..Default::default()
            })),
            ..Default::default()
        },
        OutgoingMessage::Document {
            filename, caption, ..
        } => Message {
            document_message: Some(Box::new(DocumentMessage {
                url: Some(url),
                direct_path: Some(direct_path),
                media_key: Some(media_key),
                file_enc_sha256: Some(file_enc_sha256),
                file_sha256: Some(file_sha256),
                file_length: Some(file_length),
                mimetype: Some(mimetype),
                file_name: Some(filename.clone()),
                title: Some(filename.clone()),
                caption: caption.clone(),
                ..Default::default()
            })),
            ..Default::default()
        },
    };
    Some(msg)
}
