//! Building protocol clients
//!
//! Each client lives on a small runtime of its own. The library spawns
//! long-lived workers (device saver, sync worker) that never return, so the
//! only way to release a client and its hold on the credential store is to
//! stop the runtime it was started on.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::{mpsc, oneshot};
use whatsapp_rust::bot::Bot;
use whatsapp_rust_tokio_transport::TokioWebSocketTransportFactory;
use whatsapp_rust_ureq_http_client::UreqHttpClient;

use super::events::EventHandler;
use super::link::{ClientLink, Link};
use super::media::MediaFetcher;
use super::session::LinkEvent;
use super::store::SessionStore;
use crate::config::WhatsAppConfig;
use crate::utils::RetryConfig;

const RUNTIME_THREADS: usize = 2;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Starts one protocol client per call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    /// Build and start a client. Its events are translated and sent to `events`.
    async fn connect(&self, events: mpsc::UnboundedSender<LinkEvent>) -> Result<Socket>;
}

/// A runtime that is stopped, not dropped, from async code.
struct ClientRuntime(Option<Runtime>);

impl ClientRuntime {
    fn start() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(RUNTIME_THREADS)
            .thread_name("wagate-wa")
            .enable_all()
            .build()
            .context("Failed to start client runtime")?;
        Ok(Self(Some(runtime)))
    }

    fn handle(&self) -> Option<&tokio::runtime::Handle> {
        self.0.as_ref().map(Runtime::handle)
    }

    /// Stop every task on the runtime and wait for its threads to exit.
    async fn stop(mut self) {
        let Some(runtime) = self.0.take() else {
            return;
        };
        let stopped =
            tokio::task::spawn_blocking(move || runtime.shutdown_timeout(SHUTDOWN_GRACE)).await;
        if let Err(e) = stopped {
            tracing::warn!("WhatsApp: client runtime did not stop cleanly: {}", e);
        }
    }
}

impl Drop for ClientRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

/// A running client. Dropping it stops everything the client spawned.
pub struct Socket {
    pub link: Arc<dyn Link>,
    /// Resolves with a reason once the client's run loop has ended.
    pub finished: oneshot::Receiver<String>,
    runtime: Option<ClientRuntime>,
}

impl Socket {
    pub fn new(link: Arc<dyn Link>, finished: oneshot::Receiver<String>) -> Self {
        Self {
            link,
            finished,
            runtime: None,
        }
    }

    /// Disconnect, then wait for the client's runtime to wind down.
    pub async fn close(self) {
        self.link.disconnect().await;
        if let Some(runtime) = self.runtime {
            runtime.stop().await;
        }
    }
}

/// [`Connector`] backed by `whatsapp-rust`.
pub struct BotConnector {
    store: Arc<SessionStore>,
    media: MediaFetcher,
    whatsapp: WhatsAppConfig,
}

impl BotConnector {
    pub fn new(store: Arc<SessionStore>, media: MediaFetcher, whatsapp: WhatsAppConfig) -> Self {
        Self {
            store,
            media,
            whatsapp,
        }
    }
}

#[async_trait]
impl Connector for BotConnector {
    async fn connect(&self, events: mpsc::UnboundedSender<LinkEvent>) -> Result<Socket> {
        let runtime = ClientRuntime::start()?;
        let Some(spawner) = runtime.handle().cloned() else {
            anyhow::bail!("client runtime already stopped");
        };

        let handler = EventHandler::new(
            events,
            self.store.clone(),
            self.media.clone(),
            self.whatsapp.ping_reply,
            self.whatsapp.print_qr_terminal,
        );
        let backend = self.store.clone();
        let device_name = self.whatsapp.device_name.clone();

        // On any early return `runtime` is dropped, which stops the half-built client.
        let (bot, client, task) = spawner
            .spawn(async move {
                let mut bot = Bot::builder()
                    .with_backend(backend)
                    .with_transport_factory(TokioWebSocketTransportFactory::new())
                    .with_http_client(UreqHttpClient::new())
                    .with_os_info(Some(device_name), None)
                    .on_event(move |event, client| {
                        let handler = handler.clone();
                        async move { handler.handle(event, client).await }
                    })
                    .build()
                    .await
                    .map_err(|e| anyhow::anyhow!("client build failed: {e}"))?;
                let client = bot.client();
                let task = bot
                    .run()
                    .await
                    .map_err(|e| anyhow::anyhow!("client start failed: {e}"))?;
                Ok::<_, anyhow::Error>((bot, client, task))
            })
            .await
            .context("Client start task panicked")??;

        let (done, finished) = oneshot::channel();
        spawner.spawn(async move {
            let _bot = bot;
            let reason = match task.await {
                Ok(()) => "client task finished".to_string(),
                Err(e) => format!("client task failed: {e}"),
            };
            let _ = done.send(reason);
        });

        let link: Arc<dyn Link> = Arc::new(ClientLink::new(
            client,
            self.media.clone(),
            RetryConfig::default(),
        ));
        Ok(Socket {
            link,
            finished,
            runtime: Some(runtime),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MediaConfig;
    use crate::whatsapp::link::MockLink;

    fn connector(store: Arc<SessionStore>) -> BotConnector {
        let whatsapp = WhatsAppConfig {
            print_qr_terminal: false,
            ..Default::default()
        };
        BotConnector::new(
            store,
            MediaFetcher::new(&MediaConfig::default()).unwrap(),
            whatsapp,
        )
    }

    #[tokio::test]
    async fn test_close_disconnects_link() {
        let mut link = MockLink::new();
        link.expect_disconnect().times(1).return_const(());
        let (_done, finished) = oneshot::channel();

        Socket::new(Arc::new(link), finished).close().await;
    }

    #[tokio::test]
    async fn test_closed_clients_release_the_store() {
        let store = Arc::new(SessionStore::in_memory().await.unwrap());
        let connector = connector(store.clone());

        for _ in 0..3 {
            let (events, _rx) = mpsc::unbounded_channel();
            let socket = connector.connect(events).await.unwrap();
            socket.close().await;
        }
        drop(connector);

        for _ in 0..50 {
            if Arc::strong_count(&store) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(Arc::strong_count(&store), 1);
    }
}
