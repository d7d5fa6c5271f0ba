//! Protocol client events → session events, plus the ping auto-reply.

use std::sync::Arc;
use tokio::sync::mpsc;
use wacore::types::events::Event;
use waproto::whatsapp::Message;
use whatsapp_rust::client::Client;

use super::link::{ClientLink, Link};
use super::media::MediaFetcher;
use super::outgoing::OutgoingMessage;
use super::qr;
use super::session::LinkEvent;
use super::store::SessionStore;
use crate::utils::{truncate_str, RetryConfig};

pub const PONG: &str = "pong ✅";

/// The parts of a protocol event this gateway acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Qr(String),
    Paired,
    Connected,
    Disconnected,
    StreamError(String),
    LoggedOut,
    Text {
        chat: String,
        sender: String,
        from_me: bool,
        text: String,
    },
    Ignored,
}

impl From<Event> for Inbound {
    fn from(event: Event) -> Self {
        match event {
            Event::PairingQrCode { code, .. } => Self::Qr(code),
            Event::PairSuccess(_) => Self::Paired,
            Event::Connected(_) => Self::Connected,
            Event::Disconnected(_) => Self::Disconnected,
            Event::StreamError(e) => Self::StreamError(format!("{e:?}")),
            Event::LoggedOut(_) => Self::LoggedOut,
            Event::Message(msg, info) => match extract_text(&msg) {
                Some(text) => Self::Text {
                    chat: info.source.chat.to_string(),
                    sender: info.source.sender.to_string(),
                    from_me: info.source.is_from_me,
                    text,
                },
                None => Self::Ignored,
            },
            other => {
                tracing::trace!("WhatsApp: unhandled event: {:?}", other);
                Self::Ignored
            }
        }
    }
}

/// Event handler for one client; every clone feeds the same supervisor channel.
#[derive(Clone)]
pub struct EventHandler {
    events: mpsc::UnboundedSender<LinkEvent>,
    store: Arc<SessionStore>,
    media: MediaFetcher,
    ping_reply: bool,
    print_qr: bool,
}

impl EventHandler {
    pub fn new(
        events: mpsc::UnboundedSender<LinkEvent>,
        store: Arc<SessionStore>,
        media: MediaFetcher,
        ping_reply: bool,
        print_qr: bool,
    ) -> Self {
        Self {
            events,
            store,
            media,
            ping_reply,
            print_qr,
        }
    }

    fn emit(&self, event: LinkEvent) {
        // The supervisor dropped the receiver: this client is being torn down.
        let _ = self.events.send(event);
    }

    pub async fn handle(&self, event: Event, client: Arc<Client>) {
        let link = ClientLink::new(client, self.media.clone(), RetryConfig::default());
        self.dispatch(event.into(), &link).await;
    }

    /// Act on one event; `link` carries the ping reply.
    pub async fn dispatch(&self, event: Inbound, link: &dyn Link) {
        match event {
            Inbound::Qr(code) => {
                tracing::info!("WhatsApp: QR code available, scan it from Linked Devices");
                if self.print_qr {
                    match qr::render_unicode(&code) {
                        Ok(text) => eprintln!("\n{text}"),
                        Err(e) => tracing::warn!("WhatsApp: could not draw QR: {}", e),
                    }
                }
                self.emit(LinkEvent::Qr(code));
            }
            Inbound::Paired => {
                tracing::info!("WhatsApp: pairing successful");
                self.emit(LinkEvent::Paired);
            }
            Inbound::Connected => {
                let user = match self.store.paired_user().await {
                    Ok(user) => user,
                    Err(e) => {
                        tracing::warn!("WhatsApp: connected but could not read device: {}", e);
                        None
                    }
                };
                match &user {
                    Some(u) => tracing::info!("WhatsApp: connected as {}", u.id),
                    None => tracing::info!("WhatsApp: connected"),
                }
                self.emit(LinkEvent::Connected(user));
            }
            Inbound::Disconnected => {
                tracing::warn!("WhatsApp: disconnected, client will reconnect");
                self.emit(LinkEvent::Disconnected("connection closed".to_string()));
            }
            Inbound::StreamError(e) => {
                tracing::warn!("WhatsApp: stream error: {}", e);
                self.emit(LinkEvent::Disconnected(format!("stream error: {e}")));
            }
            Inbound::LoggedOut => {
                tracing::warn!("WhatsApp: logged out by the server");
                self.emit(LinkEvent::LoggedOut);
            }
            Inbound::Text {
                chat,
                sender,
                from_me,
                text,
            } => {
                if from_me {
                    return;
                }
                tracing::debug!(
                    "WhatsApp: message from {}: {}",
                    sender,
                    truncate_str(&text, 80)
                );
                if self.ping_reply && is_ping(&text) {
                    let pong = OutgoingMessage::Text {
                        body: PONG.to_string(),
                    };
                    match link.send(&chat, pong).await {
                        Ok(id) => tracing::info!("WhatsApp: answered ping from {} ({})", chat, id),
                        Err(e) => tracing::warn!("WhatsApp: ping reply failed: {}", e),
                    }
                }
            }
            Inbound::Ignored => {}
        }
    }
}

/// Peel wrapper messages (linked-device sync, disappearing, view-once,
/// captioned document) down to the payload.
fn unwrap_message(msg: &Message) -> &Message {
    let inner = msg
        .device_sent_message
        .as_ref()
        .and_then(|m| m.message.as_deref())
        .or_else(|| msg.ephemeral_message.as_ref().and_then(|m| m.message.as_deref()))
        .or_else(|| msg.view_once_message.as_ref().and_then(|m| m.message.as_deref()))
        .or_else(|| {
            msg.document_with_caption_message
                .as_ref()
                .and_then(|m| m.message.as_deref())
        });
    match inner {
        Some(inner) => unwrap_message(inner),
        None => msg,
    }
}

pub fn extract_text(msg: &Message) -> Option<String> {
    let msg = unwrap_message(msg);
    let non_empty = |s: &Option<String>| s.as_ref().filter(|s| !s.is_empty()).cloned();

    non_empty(&msg.conversation)
        .or_else(|| msg.extended_text_message.as_ref().and_then(|m| non_empty(&m.text)))
        .or_else(|| msg.image_message.as_ref().and_then(|m| non_empty(&m.caption)))
        .or_else(|| msg.video_message.as_ref().and_then(|m| non_empty(&m.caption)))
}

pub fn is_ping(text: &str) -> bool {
    text.trim().eq_ignore_ascii_case("ping")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MediaConfig;
    use crate::whatsapp::link::MockLink;
    use crate::whatsapp::store::PairedUser;
    use wacore::store::traits::DeviceStore;
    use wacore::store::Device;
    use waproto::whatsapp::message::{ExtendedTextMessage, VideoMessage};

    const CHAT: &str = "5511999990000@s.whatsapp.net";

    async fn handler(
        ping_reply: bool,
    ) -> (EventHandler, mpsc::UnboundedReceiver<LinkEvent>, Arc<SessionStore>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let store = Arc::new(SessionStore::in_memory().await.unwrap());
        let media = MediaFetcher::new(&MediaConfig::default()).unwrap();
        (EventHandler::new(tx, store.clone(), media, ping_reply, false), rx, store)
    }

    fn incoming(text: &str, from_me: bool) -> Inbound {
        Inbound::Text {
            chat: CHAT.into(),
            sender: CHAT.into(),
            from_me,
            text: text.into(),
        }
    }

    #[tokio::test]
    async fn test_lifecycle_events_are_forwarded() {
        let (handler, mut rx, _store) = handler(true).await;
        let link = MockLink::new();

        handler.dispatch(Inbound::Qr("qr-data".into()), &link).await;
        handler.dispatch(Inbound::Paired, &link).await;
        handler.dispatch(Inbound::Disconnected, &link).await;
        handler.dispatch(Inbound::StreamError("code 515".into()), &link).await;
        handler.dispatch(Inbound::LoggedOut, &link).await;
        handler.dispatch(Inbound::Ignored, &link).await;

        assert_eq!(rx.recv().await, Some(LinkEvent::Qr("qr-data".into())));
        assert_eq!(rx.recv().await, Some(LinkEvent::Paired));
        assert_eq!(
            rx.recv().await,
            Some(LinkEvent::Disconnected("connection closed".into()))
        );
        assert_eq!(
            rx.recv().await,
            Some(LinkEvent::Disconnected("stream error: code 515".into()))
        );
        assert_eq!(rx.recv().await, Some(LinkEvent::LoggedOut));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connected_reports_stored_account() {
        let (handler, mut rx, store) = handler(true).await;
        let link = MockLink::new();

        handler.dispatch(Inbound::Connected, &link).await;
        assert_eq!(rx.recv().await, Some(LinkEvent::Connected(None)));

        let mut device = Device::new();
        device.pn = Some(CHAT.parse().unwrap());
        device.push_name = "Ana".into();
        store.save(&device).await.unwrap();

        handler.dispatch(Inbound::Connected, &link).await;
        assert_eq!(
            rx.recv().await,
            Some(LinkEvent::Connected(Some(PairedUser {
                id: CHAT.into(),
                name: Some("Ana".into()),
            })))
        );
    }

    #[tokio::test]
    async fn test_ping_gets_pong_in_same_chat() {
        let (handler, _rx, _store) = handler(true).await;
        let mut link = MockLink::new();
        link.expect_send()
            .withf(|jid, message| {
                jid == CHAT && *message == OutgoingMessage::Text { body: PONG.into() }
            })
            .times(1)
            .returning(|_, _| Ok("3EB0".into()));

        handler.dispatch(incoming(" Ping ", false), &link).await;
    }

    #[tokio::test]
    async fn test_no_reply_to_own_or_ordinary_messages() {
        let (handler, _rx, _store) = handler(true).await;
        let mut link = MockLink::new();
        link.expect_send().never();

        handler.dispatch(incoming("ping", true), &link).await;
        handler.dispatch(incoming("hello", false), &link).await;
    }

    #[tokio::test]
    async fn test_ping_reply_can_be_disabled() {
        let (handler, _rx, _store) = handler(false).await;
        let mut link = MockLink::new();
        link.expect_send().never();

        handler.dispatch(incoming("ping", false), &link).await;
    }

    #[tokio::test]
    async fn test_failed_pong_is_not_fatal() {
        let (handler, mut rx, _store) = handler(true).await;
        let mut link = MockLink::new();
        link.expect_send()
            .times(1)
            .returning(|_, _| Err(crate::GatewayError::Send("offline".into())));

        handler.dispatch(incoming("ping", false), &link).await;
        handler.dispatch(Inbound::Paired, &link).await;
        assert_eq!(rx.recv().await, Some(LinkEvent::Paired));
    }

    fn text(body: &str) -> Message {
        Message {
            conversation: Some(body.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_ping_matching() {
        assert!(is_ping("ping"));
        assert!(is_ping("  PING \n"));
        assert!(!is_ping("ping me"));
        assert!(!is_ping("pong"));
    }

    #[test]
    fn test_extract_conversation() {
        assert_eq!(extract_text(&text("hello")), Some("hello".into()));
        assert_eq!(extract_text(&text("")), None);
    }

    #[test]
    fn test_extract_extended_text() {
        let msg = Message {
            extended_text_message: Some(Box::new(ExtendedTextMessage {
                text: Some("see https://example.com".into()),
                ..Default::default()
            })),
            ..Default::default()
        };
        assert_eq!(extract_text(&msg), Some("see https://example.com".into()));
    }

    #[test]
    fn test_extract_video_caption() {
        let msg = Message {
            video_message: Some(Box::new(VideoMessage {
                caption: Some("clip".into()),
                ..Default::default()
            })),
            ..Default::default()
        };
        assert_eq!(extract_text(&msg), Some("clip".into()));
    }

    #[test]
    fn test_unwraps_nested_wrappers() {
        let mut synced = Message {
            device_sent_message: Some(Default::default()),
            ..Default::default()
        };
        if let Some(dsm) = synced.device_sent_message.as_mut() {
            dsm.message = Some(Box::new(text("ping")));
        }

        let mut msg = Message {
            ephemeral_message: Some(Default::default()),
            ..Default::default()
        };
        if let Some(eph) = msg.ephemeral_message.as_mut() {
            eph.message = Some(Box::new(synced));
        }

        assert_eq!(extract_text(&msg), Some("ping".into()));
    }

    #[test]
    fn test_media_without_caption_has_no_text() {
        let msg = Message {
            video_message: Some(Box::new(VideoMessage::default())),
            ..Default::default()
        };
        assert_eq!(extract_text(&msg), None);
    }
}
