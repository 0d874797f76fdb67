//! Browser context: owns the transport, the event fan-out, and the pages.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cdp_adapter::{
    CdpError, CdpErrorKind, CdpTransport, ChromiumTransport, CommandTarget, TransportEvent,
};
use webpilot_core_types::PageId;

use crate::config::AutomationConfig;
use crate::errors::Result;
use crate::llm::LlmProvider;
use crate::page::Page;

/// A connected browser. One event pump feeds every page's subscriptions.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    transport: Arc<dyn CdpTransport>,
    events: broadcast::Sender<TransportEvent>,
    config: AutomationConfig,
    llm: Arc<dyn LlmProvider>,
    pages: DashMap<PageId, Page>,
    shutdown: CancellationToken,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
        }
    }
}

impl Context {
    /// Launch a browser (or connect to one, per the adapter config) and
    /// start pumping events.
    pub async fn launch(config: AutomationConfig, llm: Arc<dyn LlmProvider>) -> Result<Self> {
        let transport: Arc<dyn CdpTransport> =
            Arc::new(ChromiumTransport::new(config.cdp_config()));
        Self::with_transport(transport, config, llm).await
    }

    /// Build a context over an explicit transport. This is also the seam
    /// tests use to run the whole stack against a recorded transport.
    pub async fn with_transport(
        transport: Arc<dyn CdpTransport>,
        config: AutomationConfig,
        llm: Arc<dyn LlmProvider>,
    ) -> Result<Self> {
        transport.start().await?;

        let (events, _) = broadcast::channel(1024);
        let inner = Arc::new(ContextInner {
            transport,
            events,
            config,
            llm,
            pages: DashMap::new(),
            shutdown: CancellationToken::new(),
            pump: Mutex::new(None),
        });

        let context = Self { inner };
        context.spawn_pump();
        info!(target: "context", "browser context ready");
        Ok(context)
    }

    fn spawn_pump(&self) {
        let transport = Arc::clone(&self.inner.transport);
        let events = self.inner.events.clone();
        let shutdown = self.inner.shutdown.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = transport.next_event() => {
                        match event {
                            Some(event) => {
                                let _ = events.send(event);
                            }
                            None => {
                                if shutdown.is_cancelled() {
                                    break;
                                }
                                warn!(target: "context", "transport stream ended; attempting restart");
                                if let Err(err) = transport.start().await {
                                    warn!(target: "context", %err, "transport restart failed");
                                }
                                tokio::time::sleep(Duration::from_millis(500)).await;
                            }
                        }
                    }
                }
            }
            debug!(target: "context", "event pump exiting");
        });
        *self.inner.pump.lock() = Some(handle);
    }

    /// Open a page on the given URL and attach automation to it.
    pub async fn new_page(&self, url: &str) -> Result<Page> {
        let response = self
            .inner
            .transport
            .send(
                CommandTarget::Browser,
                "Target.createTarget",
                json!({ "url": url }),
            )
            .await?;
        let target_id = response
            .get("targetId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                CdpError::new(CdpErrorKind::Internal)
                    .with_method("Target.createTarget")
                    .with_hint("createTarget response missing targetId")
            })?
            .to_string();

        let page = Page::attach(
            target_id,
            Arc::clone(&self.inner.transport),
            self.inner.events.clone(),
            self.inner.config.clone(),
            Arc::clone(&self.inner.llm),
        )
        .await?;

        self.inner.pages.insert(page.id(), page.clone());
        Ok(page)
    }

    pub fn pages(&self) -> Vec<Page> {
        self.inner
            .pages
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent> {
        self.inner.events.subscribe()
    }

    /// Close every page and the browser, then stop the pump.
    pub async fn close(&self) {
        for entry in self.inner.pages.iter() {
            if let Err(err) = entry.value().close().await {
                debug!(target: "context", %err, "page close failed during shutdown");
            }
        }
        self.inner.pages.clear();

        if let Err(err) = self
            .inner
            .transport
            .send(CommandTarget::Browser, "Browser.close", json!({}))
            .await
        {
            debug!(target: "context", %err, "browser close failed");
        }

        self.inner.shutdown.cancel();
        if let Some(handle) = self.inner.pump.lock().take() {
            handle.abort();
        }
    }
}
