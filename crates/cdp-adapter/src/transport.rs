//! Raw CDP transport: websocket connection, command/response correlation,
//! event forwarding.

use std::collections::HashMap;
use std::convert::TryInto;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::async_process::Child;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::target::SessionId as CdpSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide::error::CdpError as OxideError;
use chromiumoxide_types::{CallId, CdpJsonEventMessage, Message, MethodId, Response};
use futures::{future::BoxFuture, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{default_launch_args, CdpConfig};
use crate::error::{CdpError, CdpErrorKind};
use crate::util::extract_ws_url;

/// One CDP event as delivered by the browser, before any interpretation.
#[derive(Clone, Debug)]
pub struct TransportEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

/// Where a command is routed: the browser connection itself, or a flattened
/// per-target session.
#[derive(Clone, Debug)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

/// Minimal transport capability the rest of the stack builds on.
#[async_trait]
pub trait CdpTransport: Send + Sync {
    async fn start(&self) -> Result<(), CdpError>;
    async fn next_event(&self) -> Option<TransportEvent>;
    async fn send(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, CdpError>;
}

/// Transport that refuses every command. Used when no browser is reachable
/// and as a base for test doubles.
#[derive(Default)]
pub struct NoopTransport;

#[async_trait]
impl CdpTransport for NoopTransport {
    async fn start(&self) -> Result<(), CdpError> {
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        None
    }

    async fn send(
        &self,
        _target: CommandTarget,
        method: &str,
        _params: Value,
    ) -> Result<Value, CdpError> {
        Err(CdpError::new(CdpErrorKind::Internal)
            .with_method(method)
            .with_hint("transport not available"))
    }
}

type ConnFactory =
    Arc<dyn Fn(CdpConfig) -> BoxFuture<'static, Result<Arc<ConnState>, CdpError>> + Send + Sync>;

/// Production transport backed by a chromiumoxide websocket connection.
///
/// The underlying connection is created lazily and recreated when the pump
/// loop dies, so a browser crash surfaces as retriable errors instead of a
/// poisoned handle.
#[derive(Clone)]
pub struct ChromiumTransport {
    cfg: CdpConfig,
    state: Arc<OnceCell<Mutex<Option<Arc<ConnState>>>>>,
    factory: ConnFactory,
}

impl ChromiumTransport {
    pub fn new(cfg: CdpConfig) -> Self {
        let factory: ConnFactory = Arc::new(|cfg: CdpConfig| {
            Box::pin(async move {
                let state = ConnState::open(cfg).await?;
                Ok(Arc::new(state))
            })
        });
        Self {
            cfg,
            state: Arc::new(OnceCell::new()),
            factory,
        }
    }

    #[cfg(test)]
    fn with_factory(cfg: CdpConfig, factory: ConnFactory) -> Self {
        Self {
            cfg,
            state: Arc::new(OnceCell::new()),
            factory,
        }
    }

    async fn conn(&self) -> Result<Arc<ConnState>, CdpError> {
        let cell = self.state.get_or_init(|| async { Mutex::new(None) }).await;
        let mut guard = cell.lock().await;

        if let Some(state) = guard.as_ref() {
            if state.is_alive() {
                return Ok(state.clone());
            }
        }

        let state = (self.factory)(self.cfg.clone()).await?;
        *guard = Some(state.clone());
        Ok(state)
    }
}

#[async_trait]
impl CdpTransport for ChromiumTransport {
    async fn start(&self) -> Result<(), CdpError> {
        let conn = self.conn().await?;
        let deadline = Duration::from_millis(self.cfg.default_deadline_ms);

        conn.submit(
            CommandTarget::Browser,
            "Target.setDiscoverTargets",
            json!({ "discover": true }),
            deadline,
        )
        .await?;

        conn.submit(
            CommandTarget::Browser,
            "Target.setAutoAttach",
            json!({
                "autoAttach": true,
                "waitForDebuggerOnStart": false,
                "flatten": true,
            }),
            deadline,
        )
        .await?;

        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        match self.conn().await {
            Ok(conn) => conn.next_event().await,
            Err(err) => {
                warn!(target: "cdp-transport", %err, "transport not ready");
                None
            }
        }
    }

    async fn send(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, CdpError> {
        let conn = self.conn().await?;
        conn.submit(
            target,
            method,
            params,
            Duration::from_millis(self.cfg.default_deadline_ms),
        )
        .await
    }
}

struct PendingCommand {
    target: CommandTarget,
    method: String,
    params: Value,
    responder: oneshot::Sender<Result<Value, CdpError>>,
}

struct ConnState {
    command_tx: mpsc::Sender<PendingCommand>,
    events_rx: Mutex<mpsc::Receiver<TransportEvent>>,
    pump: JoinHandle<()>,
    child: Mutex<Option<Child>>,
    alive: Arc<AtomicBool>,
}

impl ConnState {
    async fn open(cfg: CdpConfig) -> Result<Self, CdpError> {
        let (child, ws_url) = if let Some(url) = cfg.websocket_url.clone() {
            (None, url)
        } else {
            let browser_cfg = browser_config(&cfg)?;
            launch_browser(browser_cfg).await?
        };

        let conn = Connection::<CdpEventMessage>::connect(&ws_url)
            .await
            .map_err(|err| CdpError::new(CdpErrorKind::Io).with_hint(err.to_string()))?;

        let (command_tx, command_rx) = mpsc::channel(128);
        let (events_tx, events_rx) = mpsc::channel(512);

        let alive = Arc::new(AtomicBool::new(true));
        let pump_alive = alive.clone();
        let pump = tokio::spawn(async move {
            let result = Self::pump_loop(conn, command_rx, events_tx).await;
            pump_alive.store(false, Ordering::Relaxed);
            if let Err(err) = result {
                error!(target: "cdp-transport", %err, "connection pump terminated with error");
            }
        });

        info!(target: "cdp-transport", url = %ws_url, "chromium connection established");

        Ok(Self {
            command_tx,
            events_rx: Mutex::new(events_rx),
            pump,
            child: Mutex::new(child),
            alive,
        })
    }

    #[cfg(test)]
    fn stub() -> (Arc<Self>, Arc<AtomicBool>) {
        let (command_tx, _command_rx) = mpsc::channel(8);
        let (_events_tx, events_rx) = mpsc::channel(8);
        let alive = Arc::new(AtomicBool::new(true));
        let pump_alive = alive.clone();
        let pump = tokio::spawn(async move {
            futures::future::pending::<()>().await;
            pump_alive.store(false, Ordering::Relaxed);
        });
        (
            Arc::new(Self {
                command_tx,
                events_rx: Mutex::new(events_rx),
                pump,
                child: Mutex::new(None),
                alive: alive.clone(),
            }),
            alive,
        )
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    async fn submit(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, CdpError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        let pending = PendingCommand {
            target,
            method: method.to_string(),
            params,
            responder: resp_tx,
        };

        self.command_tx.send(pending).await.map_err(|err| {
            CdpError::new(CdpErrorKind::Io)
                .with_method(method)
                .with_hint(err.to_string())
        })?;

        match tokio::time::timeout(deadline, resp_rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(err))) => Err(err.with_method(method)),
            Ok(Err(_)) => Err(CdpError::new(CdpErrorKind::Io)
                .with_method(method)
                .with_hint("command response channel closed")),
            Err(_) => Err(CdpError::new(CdpErrorKind::Timeout)
                .with_method(method)
                .retriable(true)),
        }
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        let mut guard = self.events_rx.lock().await;
        guard.recv().await
    }

    async fn pump_loop(
        mut conn: Connection<CdpEventMessage>,
        mut command_rx: mpsc::Receiver<PendingCommand>,
        events_tx: mpsc::Sender<TransportEvent>,
    ) -> Result<(), CdpError> {
        let mut inflight: HashMap<CallId, oneshot::Sender<Result<Value, CdpError>>> =
            HashMap::new();

        loop {
            tokio::select! {
                Some(cmd) = command_rx.recv() => {
                    Self::dispatch_command(&mut conn, cmd, &mut inflight)?;
                }
                message = conn.next() => {
                    match message {
                        Some(Ok(Message::Response(resp))) => {
                            Self::settle_response(resp, &mut inflight);
                        }
                        Some(Ok(Message::Event(event))) => {
                            if let Err(err) = Self::forward_event(event, &events_tx).await {
                                warn!(target: "cdp-transport", %err, "failed to forward event");
                            }
                        }
                        Some(Err(err)) => {
                            let mapped = map_oxide_error(err);
                            for (_, sender) in inflight.drain() {
                                let _ = sender.send(Err(mapped.clone()));
                            }
                            return Err(mapped);
                        }
                        None => {
                            let err = CdpError::new(CdpErrorKind::Io)
                                .with_hint("cdp connection closed");
                            for (_, sender) in inflight.drain() {
                                let _ = sender.send(Err(err.clone()));
                            }
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    fn dispatch_command(
        conn: &mut Connection<CdpEventMessage>,
        cmd: PendingCommand,
        inflight: &mut HashMap<CallId, oneshot::Sender<Result<Value, CdpError>>>,
    ) -> Result<(), CdpError> {
        let session = match cmd.target {
            CommandTarget::Browser => None,
            CommandTarget::Session(session_id) => Some(CdpSessionId::from(session_id)),
        };

        let method_id: MethodId = cmd.method.clone().into();
        match conn.submit_command(method_id, session, cmd.params) {
            Ok(call_id) => {
                inflight.insert(call_id, cmd.responder);
                Ok(())
            }
            Err(err) => {
                let mapped = CdpError::new(CdpErrorKind::Io).with_hint(err.to_string());
                let _ = cmd.responder.send(Err(mapped.clone()));
                Err(mapped)
            }
        }
    }

    fn settle_response(
        resp: Response,
        inflight: &mut HashMap<CallId, oneshot::Sender<Result<Value, CdpError>>>,
    ) {
        let entry = inflight.remove(&resp.id);
        let result = extract_payload(resp);
        if let Some(sender) = entry {
            let _ = sender.send(result);
        }
    }

    async fn forward_event(
        event: CdpEventMessage,
        events_tx: &mpsc::Sender<TransportEvent>,
    ) -> Result<(), CdpError> {
        let raw: CdpJsonEventMessage = event.try_into().map_err(|err| {
            CdpError::new(CdpErrorKind::Internal)
                .with_hint(format!("failed to decode cdp event: {err}"))
        })?;

        let payload = TransportEvent {
            method: raw.method.into_owned(),
            params: raw.params,
            session_id: raw.session_id,
        };

        events_tx
            .send(payload)
            .await
            .map_err(|err| CdpError::new(CdpErrorKind::Internal).with_hint(err.to_string()))
    }
}

impl Drop for ConnState {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
        self.pump.abort();
        if let Ok(mut guard) = self.child.try_lock() {
            if let Some(mut child) = guard.take() {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move {
                        if let Err(err) = child.kill().await {
                            warn!(target: "cdp-transport", %err, "failed to kill chromium child");
                        }
                    });
                } else {
                    debug!(target: "cdp-transport", "no tokio runtime available to kill chromium child");
                }
            }
        }
    }
}

fn extract_payload(resp: Response) -> Result<Value, CdpError> {
    if let Some(result) = resp.result {
        Ok(result)
    } else if let Some(error) = resp.error {
        let retriable = error.code >= 500;
        Err(CdpError::new(CdpErrorKind::Protocol)
            .with_hint(format!("cdp error {}: {}", error.code, error.message))
            .retriable(retriable))
    } else {
        Err(CdpError::new(CdpErrorKind::Internal).with_hint("empty cdp response"))
    }
}

fn map_oxide_error(err: OxideError) -> CdpError {
    let hint = err.to_string();
    match err {
        OxideError::Timeout => CdpError::new(CdpErrorKind::Timeout)
            .with_hint(hint)
            .retriable(true),
        OxideError::FrameNotFound(_)
        | OxideError::JavascriptException(_)
        | OxideError::Serde(_) => CdpError::new(CdpErrorKind::Internal).with_hint(hint),
        _ => CdpError::new(CdpErrorKind::Io).with_hint(hint).retriable(true),
    }
}

fn browser_config(cfg: &CdpConfig) -> Result<BrowserConfig, CdpError> {
    if cfg.websocket_url.is_some() {
        return Err(CdpError::new(CdpErrorKind::Internal)
            .with_hint("browser launch requested while websocket_url present"));
    }

    let executable = cfg.resolve_executable().ok_or_else(|| {
        CdpError::new(CdpErrorKind::Io).with_hint(
            "no chrome/chromium executable found (set WEBPILOT_CHROME to the full path)",
        )
    })?;

    let profile_dir = if cfg.user_data_dir.is_absolute() {
        cfg.user_data_dir.clone()
    } else {
        let cwd = std::env::current_dir().map_err(|err| {
            CdpError::new(CdpErrorKind::Internal)
                .with_hint(format!("failed to resolve cwd for user-data-dir: {err}"))
        })?;
        cwd.join(&cfg.user_data_dir)
    };
    fs::create_dir_all(&profile_dir).map_err(|err| {
        CdpError::new(CdpErrorKind::Internal)
            .with_hint(format!("failed to ensure user-data-dir: {err}"))
    })?;

    let mut builder = BrowserConfig::builder()
        .request_timeout(Duration::from_millis(cfg.default_deadline_ms))
        .launch_timeout(Duration::from_secs(20));

    if !cfg.headless {
        builder = builder.with_head();
    }

    let mut args: Vec<String> = default_launch_args(cfg.headless)
        .into_iter()
        .map(str::to_string)
        .collect();
    args.extend(cfg.extra_args.iter().cloned());
    builder = builder.args(args);

    builder = builder.chrome_executable(executable);
    builder = builder.user_data_dir(profile_dir);

    builder.build().map_err(|err| {
        CdpError::new(CdpErrorKind::Internal).with_hint(format!("browser config error: {err}"))
    })
}

async fn launch_browser(config: BrowserConfig) -> Result<(Option<Child>, String), CdpError> {
    let mut child = config.launch().map_err(|err| {
        CdpError::new(CdpErrorKind::Internal).with_hint(format!("failed to launch chromium: {err}"))
    })?;

    let ws_url = extract_ws_url(&mut child).await?;

    Ok((Some(child), ws_url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use tokio::sync::Mutex as TokioMutex;

    #[tokio::test]
    async fn reopens_connection_when_dead() {
        let open_count = Arc::new(AtomicUsize::new(0));
        let alive_flags = Arc::new(TokioMutex::new(Vec::<Arc<AtomicBool>>::new()));

        let factory: ConnFactory = {
            let open_count = open_count.clone();
            let alive_flags = alive_flags.clone();
            Arc::new(move |cfg: CdpConfig| {
                let open_count = open_count.clone();
                let alive_flags = alive_flags.clone();
                Box::pin(async move {
                    let _ = cfg;
                    open_count.fetch_add(1, AtomicOrdering::SeqCst);
                    let (conn, alive) = ConnState::stub();
                    alive_flags.lock().await.push(alive);
                    Ok(conn)
                })
            })
        };

        let transport = ChromiumTransport::with_factory(CdpConfig::default(), factory);

        let first = transport.conn().await.expect("first connection");
        assert_eq!(open_count.load(AtomicOrdering::SeqCst), 1);

        {
            let guard = alive_flags.lock().await;
            guard[0].store(false, AtomicOrdering::SeqCst);
        }

        let second = transport.conn().await.expect("second connection");
        assert_eq!(open_count.load(AtomicOrdering::SeqCst), 2);
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn noop_transport_refuses_commands() {
        let transport = NoopTransport;
        let err = transport
            .send(CommandTarget::Browser, "Page.enable", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, CdpErrorKind::Internal);
        assert_eq!(err.method.as_deref(), Some("Page.enable"));
    }
}
