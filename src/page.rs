//! The page facade.
//!
//! Owns everything per-page: the CDP session pool, the frame-ordinal
//! registry, the helper-script injection guard, and the execution-context
//! bookkeeping. Implements the perception and driver seams the handler
//! crates work against, and exposes the `act`/`observe`/`extract` entry
//! points plus the explicit CDP conveniences.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use action_primitives::{perform_method, wait_for_settled_dom, ExecCtx, PageDriver};
use cdp_adapter::{CdpError, CdpErrorKind, CdpTarget, CdpTransport, SessionPool, TransportEvent};
use perceiver_structural::{guarded_helper_script, injection_probe, FrameInfo, PagePerception};
use webpilot_core_types::{ActResult, ActionMethod, EncodedId, FrameId, ObserveResult, PageId};

use crate::config::AutomationConfig;
use crate::errors::{AutomationError, Result};
use crate::handlers::{self, ActInput, ExtractOptions, ExtractResult, ObserveOptions};
use crate::llm::LlmProvider;

/// An automated page. Cheap to clone; all state lives behind one `Arc`.
#[derive(Clone)]
pub struct Page {
    inner: Arc<PageInner>,
}

struct FrameOrdinals {
    map: HashMap<Option<String>, u32>,
    next: u32,
}

impl FrameOrdinals {
    fn new() -> Self {
        let mut map = HashMap::new();
        map.insert(None, 0);
        Self { map, next: 1 }
    }
}

struct PageInner {
    id: PageId,
    target_id: String,
    pool: Arc<SessionPool>,
    events: broadcast::Sender<TransportEvent>,
    config: AutomationConfig,
    llm: Arc<dyn LlmProvider>,
    ordinals: Mutex<FrameOrdinals>,
    /// frameId → main-world execution context id, maintained from
    /// `Runtime.executionContextCreated` events.
    contexts: Arc<DashMap<String, i64>>,
    scripts_injected: AtomicBool,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for PageInner {
    fn drop(&mut self) {
        if let Some(handle) = self.watcher.lock().take() {
            handle.abort();
        }
    }
}

impl Page {
    /// Attach to an existing page target and prepare it for automation.
    pub(crate) async fn attach(
        target_id: String,
        transport: Arc<dyn CdpTransport>,
        events: broadcast::Sender<TransportEvent>,
        config: AutomationConfig,
        llm: Arc<dyn LlmProvider>,
    ) -> Result<Self> {
        let pool = Arc::new(SessionPool::new(transport, target_id.clone()));
        pool.page_session().await?;

        let inner = Arc::new(PageInner {
            id: PageId::new(),
            target_id,
            pool: Arc::clone(&pool),
            events: events.clone(),
            config,
            llm,
            ordinals: Mutex::new(FrameOrdinals::new()),
            contexts: Arc::new(DashMap::new()),
            scripts_injected: AtomicBool::new(false),
            watcher: Mutex::new(None),
        });

        let page = Self { inner };

        // Page for navigation/frame events, Runtime so every frame's
        // main-world execution context is reported.
        page.inner.pool.enable("Page", &CdpTarget::Page).await?;
        page.inner.pool.enable("Runtime", &CdpTarget::Page).await?;

        page.spawn_watcher();
        page.install_helper_script().await;

        debug!(target: "page", page = %page.inner.id, "page attached");
        Ok(page)
    }

    fn spawn_watcher(&self) {
        let pool = Arc::clone(&self.inner.pool);
        let contexts = Arc::clone(&self.inner.contexts);
        let mut rx = self.inner.events.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                pool.observe_event(&event);
                match event.method.as_str() {
                    "Runtime.executionContextCreated" => {
                        let is_default = event
                            .params
                            .pointer("/context/auxData/isDefault")
                            .and_then(Value::as_bool)
                            .unwrap_or(false);
                        let frame_id = event
                            .params
                            .pointer("/context/auxData/frameId")
                            .and_then(Value::as_str);
                        let context_id =
                            event.params.pointer("/context/id").and_then(Value::as_i64);
                        if let (true, Some(frame_id), Some(context_id)) =
                            (is_default, frame_id, context_id)
                        {
                            contexts.insert(frame_id.to_string(), context_id);
                        }
                    }
                    "Runtime.executionContextDestroyed" => {
                        if let Some(context_id) = event
                            .params
                            .get("executionContextId")
                            .and_then(Value::as_i64)
                        {
                            contexts.retain(|_, cached| *cached != context_id);
                        }
                    }
                    "Runtime.executionContextsCleared" => {
                        contexts.clear();
                    }
                    _ => {}
                }
            }
        });
        *self.inner.watcher.lock() = Some(handle);
    }

    /// Install the helper blob for future documents and evaluate it in the
    /// current one. Failures are logged, never fatal: the init script makes
    /// the helpers available on the next load.
    async fn install_helper_script(&self) {
        let source = guarded_helper_script();
        if let Err(err) = self
            .inner
            .pool
            .send(
                "Page.addScriptToEvaluateOnNewDocument",
                json!({ "source": source }),
                &CdpTarget::Page,
            )
            .await
        {
            warn!(target: "page", %err, "failed to register helper init script");
        }
        match self.raw_evaluate(None, &source, true).await {
            Ok(_) => {
                self.inner.scripts_injected.store(true, Ordering::Relaxed);
                debug!(target: "page", "helper script injected");
            }
            Err(err) => {
                warn!(target: "page", %err, "helper script evaluation failed; will retry on next load");
            }
        }
    }

    /// Make sure every live frame carries the helpers before an observation.
    pub(crate) async fn ensure_helper_script(&self) {
        if !self.inner.scripts_injected.load(Ordering::Relaxed) {
            self.install_helper_script().await;
        }
        let frames = match PagePerception::frames(self).await {
            Ok(frames) => frames,
            Err(err) => {
                warn!(target: "page", %err, "frame walk failed while ensuring helpers");
                return;
            }
        };
        for frame in frames {
            let target = if frame.is_main() {
                None
            } else {
                Some(frame.id.clone())
            };
            let present = self
                .raw_evaluate(target.as_ref(), &injection_probe(), true)
                .await
                .ok()
                .and_then(|response| {
                    response
                        .pointer("/result/value")
                        .and_then(Value::as_bool)
                })
                .unwrap_or(false);
            if present {
                continue;
            }
            if let Err(err) = self
                .raw_evaluate(target.as_ref(), &guarded_helper_script(), true)
                .await
            {
                debug!(
                    target: "page",
                    %err,
                    frame = %frame.id,
                    "helper injection into frame failed"
                );
            }
        }
        self.inner.scripts_injected.store(true, Ordering::Relaxed);
    }

    pub fn id(&self) -> PageId {
        self.inner.id
    }

    pub(crate) fn config(&self) -> &AutomationConfig {
        &self.inner.config
    }

    pub(crate) fn llm(&self) -> Arc<dyn LlmProvider> {
        Arc::clone(&self.inner.llm)
    }

    /// Ordinal for a frame, assigned in first-seen order; main frame is 0.
    pub fn ordinal_for_frame_id(&self, frame: Option<&FrameId>) -> u32 {
        let key = frame.map(|f| f.as_str().to_string());
        let mut ordinals = self.inner.ordinals.lock();
        if let Some(existing) = ordinals.map.get(&key) {
            return *existing;
        }
        let assigned = ordinals.next;
        ordinals.map.insert(key, assigned);
        ordinals.next += 1;
        assigned
    }

    /// Restart ordinal assignment with main frame = 0.
    pub fn reset_frame_ordinals(&self) {
        *self.inner.ordinals.lock() = FrameOrdinals::new();
    }

    // ---- observe / act / extract ----------------------------------------

    pub async fn observe(&self, options: impl Into<ObserveOptions>) -> Result<Vec<ObserveResult>> {
        handlers::observe::handle(self, options.into()).await
    }

    pub async fn act(&self, input: impl Into<ActInput>) -> Result<ActResult> {
        handlers::act::handle(self, input.into()).await
    }

    pub async fn extract(&self, options: ExtractOptions) -> Result<ExtractResult> {
        handlers::extract::handle(self, options).await
    }

    /// Wait for the DOM to settle; `timeout_ms` defaults to the configured
    /// settle timeout.
    pub async fn wait_for_settled_dom(&self, timeout_ms: Option<u64>) -> Result<()> {
        let timeout = Duration::from_millis(
            timeout_ms.unwrap_or(self.inner.config.dom_settle_timeout_ms),
        );
        wait_for_settled_dom(self, timeout).await?;
        Ok(())
    }

    // ---- delegated conveniences ------------------------------------------

    pub async fn goto(&self, url: &str) -> Result<()> {
        info!(target: "page", url = %url, "navigating");
        PageDriver::navigate(self, url).await?;
        self.wait_for_settled_dom(None).await
    }

    pub async fn url(&self) -> Result<String> {
        Ok(PageDriver::current_url(self).await?)
    }

    pub async fn title(&self) -> Result<String> {
        let response = self.raw_evaluate(None, "document.title", true).await?;
        Ok(response
            .pointer("/result/value")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    pub async fn content(&self) -> Result<String> {
        let response = self
            .raw_evaluate(None, "document.documentElement.outerHTML", true)
            .await?;
        Ok(response
            .pointer("/result/value")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    /// Evaluate an expression in the main frame and return its value.
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        let response = self.raw_evaluate(None, expression, true).await?;
        Ok(response
            .pointer("/result/value")
            .cloned()
            .unwrap_or(Value::Null))
    }

    pub async fn screenshot(&self) -> Result<Vec<u8>> {
        let response = self
            .inner
            .pool
            .send("Page.captureScreenshot", json!({}), &CdpTarget::Page)
            .await?;
        let data = response
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| AutomationError::Cdp(
                CdpError::new(CdpErrorKind::Internal)
                    .with_method("Page.captureScreenshot")
                    .with_hint("screenshot payload missing data"),
            ))?;
        BASE64.decode(data).map_err(|err| {
            AutomationError::Cdp(
                CdpError::new(CdpErrorKind::Internal)
                    .with_method("Page.captureScreenshot")
                    .with_hint(format!("screenshot payload not base64: {err}")),
            )
        })
    }

    pub async fn click(&self, xpath: &str) -> Result<()> {
        self.run_method(ActionMethod::Click, xpath, &[]).await
    }

    pub async fn fill(&self, xpath: &str, value: &str) -> Result<()> {
        self.run_method(ActionMethod::Fill, xpath, &[value.to_string()])
            .await
    }

    pub async fn type_text(&self, xpath: &str, text: &str) -> Result<()> {
        self.run_method(ActionMethod::Type, xpath, &[text.to_string()])
            .await
    }

    pub async fn press(&self, xpath: &str, key: &str) -> Result<()> {
        self.run_method(ActionMethod::Press, xpath, &[key.to_string()])
            .await
    }

    pub async fn hover(&self, xpath: &str) -> Result<()> {
        self.run_method(ActionMethod::Hover, xpath, &[]).await
    }

    async fn run_method(&self, method: ActionMethod, xpath: &str, args: &[String]) -> Result<()> {
        let ctx = ExecCtx::with_timeout(Duration::from_millis(self.inner.config.act_timeout_ms));
        let settle = Duration::from_millis(self.inner.config.dom_settle_timeout_ms);
        perform_method(self, &ctx, method, xpath, args, settle).await?;
        Ok(())
    }

    /// Poll `document.readyState` until the document is interactive.
    pub async fn wait_for_load_state(&self, timeout_ms: Option<u64>) -> Result<()> {
        let timeout = Duration::from_millis(timeout_ms.unwrap_or(30_000));
        let deadline = Instant::now() + timeout;
        loop {
            if Instant::now() >= deadline {
                return Err(AutomationError::Timeout {
                    operation: "wait_for_load_state".to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            let ready = self
                .evaluate("document.readyState")
                .await
                .ok()
                .and_then(|value| value.as_str().map(str::to_string))
                .map(|state| matches!(state.as_str(), "interactive" | "complete"))
                .unwrap_or(false);
            if ready {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Poll an XPath until it matches, or time out.
    pub async fn wait_for_selector(&self, xpath: &str, timeout_ms: Option<u64>) -> Result<String> {
        let timeout = Duration::from_millis(timeout_ms.unwrap_or(30_000));
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(object_id) = PageDriver::resolve_xpath(self, None, xpath).await? {
                return Ok(object_id);
            }
            if Instant::now() >= deadline {
                return Err(AutomationError::Timeout {
                    operation: format!("wait_for_selector({xpath})"),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    pub async fn close(&self) -> Result<()> {
        info!(target: "page", page = %self.inner.id, "closing page");
        self.inner.pool.cleanup().await;
        self.inner
            .pool
            .send_to_browser(
                "Target.closeTarget",
                json!({ "targetId": self.inner.target_id }),
            )
            .await?;
        if let Some(handle) = self.inner.watcher.lock().take() {
            handle.abort();
        }
        Ok(())
    }

    // ---- shared plumbing --------------------------------------------------

    pub(crate) async fn raw_page_send(
        &self,
        method: &str,
        params: Value,
    ) -> std::result::Result<Value, CdpError> {
        self.raw_send(method, params, None).await
    }

    pub(crate) fn event_feed(&self) -> broadcast::Receiver<TransportEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn session_is_mine(&self, session_id: Option<&str>) -> bool {
        match session_id {
            None => true,
            Some(session) => self.inner.pool.is_known_session(session),
        }
    }

    fn target_for(&self, frame: Option<&FrameId>) -> CdpTarget {
        match frame {
            None => CdpTarget::Page,
            Some(frame) => CdpTarget::Frame(frame.clone()),
        }
    }

    async fn raw_send(
        &self,
        method: &str,
        params: Value,
        frame: Option<&FrameId>,
    ) -> std::result::Result<Value, CdpError> {
        self.inner.pool.send(method, params, &self.target_for(frame)).await
    }

    /// Route an evaluation: main frame and out-of-process frames go straight
    /// to their session; same-process frames get the frame's main-world
    /// execution context id on the page session.
    async fn raw_evaluate(
        &self,
        frame: Option<&FrameId>,
        expression: &str,
        by_value: bool,
    ) -> std::result::Result<Value, CdpError> {
        let mut params = json!({
            "expression": expression,
            "returnByValue": by_value,
            "awaitPromise": true,
        });

        let target = match frame {
            None => CdpTarget::Page,
            Some(frame) if self.inner.pool.has_separate_session(frame) => {
                CdpTarget::Frame(frame.clone())
            }
            Some(frame) => {
                let context_id = self
                    .inner
                    .contexts
                    .get(frame.as_str())
                    .map(|entry| *entry.value())
                    .ok_or_else(|| {
                        CdpError::new(CdpErrorKind::Internal)
                            .with_method("Runtime.evaluate")
                            .with_hint(format!("no execution context for frame {frame}"))
                    })?;
                params["contextId"] = json!(context_id);
                CdpTarget::Page
            }
        };

        let response = self
            .inner
            .pool
            .send("Runtime.evaluate", params, &target)
            .await?;
        check_exception(&response, "Runtime.evaluate")?;
        Ok(response)
    }
}

/// Map a thrown JavaScript exception to a protocol-kind error.
fn check_exception(response: &Value, method: &str) -> std::result::Result<(), CdpError> {
    if let Some(details) = response.get("exceptionDetails") {
        let description = details
            .pointer("/exception/description")
            .and_then(Value::as_str)
            .or_else(|| details.get("text").and_then(Value::as_str))
            .unwrap_or("javascript exception");
        return Err(CdpError::new(CdpErrorKind::Protocol)
            .with_method(method)
            .with_hint(description));
    }
    Ok(())
}

fn xpath_resolution_expression(xpath: &str) -> String {
    format!(
        r#"(() => {{
  const res = document.evaluate(
    {xpath},
    document,
    null,
    XPathResult.FIRST_ORDERED_NODE_TYPE,
    null
  );
  return res.singleNodeValue;
}})()"#,
        xpath = Value::String(xpath.to_string()),
    )
}

#[async_trait]
impl PagePerception for Page {
    async fn send_cdp(
        &self,
        method: &str,
        params: Value,
        frame: Option<&FrameId>,
    ) -> std::result::Result<Value, CdpError> {
        self.raw_send(method, params, frame).await
    }

    async fn evaluate_in_frame(
        &self,
        frame: Option<&FrameId>,
        expression: &str,
    ) -> std::result::Result<Value, CdpError> {
        self.raw_evaluate(frame, expression, true).await
    }

    async fn resolve_xpath(
        &self,
        frame: Option<&FrameId>,
        xpath: &str,
    ) -> std::result::Result<Option<String>, CdpError> {
        let response = self
            .raw_evaluate(frame, &xpath_resolution_expression(xpath), false)
            .await?;
        Ok(response
            .pointer("/result/objectId")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    async fn call_function_on(
        &self,
        frame: Option<&FrameId>,
        object_id: &str,
        declaration: &str,
    ) -> std::result::Result<Value, CdpError> {
        PageDriver::call_function_on(self, frame, object_id, declaration, vec![]).await
    }

    fn has_separate_session(&self, frame: &FrameId) -> bool {
        self.inner.pool.has_separate_session(frame)
    }

    async fn frames(&self) -> std::result::Result<Vec<FrameInfo>, CdpError> {
        let mut frames = Vec::new();
        let mut seen = HashSet::new();

        let tree = self
            .raw_send("Page.getFrameTree", json!({}), None)
            .await?;
        if let Some(root) = tree.get("frameTree") {
            collect_frames(root, None, &mut frames, &mut seen);
        }

        // Out-of-process frames report their subtrees on their own session.
        for frame in self.inner.pool.separate_frames() {
            let parent = frames
                .iter()
                .find(|info| info.id == frame)
                .and_then(|info| info.parent.clone());
            let subtree = match self
                .raw_send("Page.getFrameTree", json!({}), Some(&frame))
                .await
            {
                Ok(subtree) => subtree,
                Err(err) => {
                    debug!(target: "page", %err, frame = %frame, "frame tree fetch failed");
                    continue;
                }
            };
            if let Some(root) = subtree.get("frameTree") {
                collect_frames(root, parent, &mut frames, &mut seen);
            }
        }

        Ok(frames)
    }

    fn encode_with_frame_id(&self, frame: Option<&FrameId>, backend_node_id: i64) -> EncodedId {
        EncodedId::new(self.ordinal_for_frame_id(frame), backend_node_id)
    }
}

fn collect_frames(
    node: &Value,
    parent: Option<FrameId>,
    out: &mut Vec<FrameInfo>,
    seen: &mut HashSet<String>,
) {
    let id = match node.pointer("/frame/id").and_then(Value::as_str) {
        Some(id) => id.to_string(),
        None => return,
    };
    let url = node
        .pointer("/frame/url")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let frame_id = FrameId::new(id.clone());
    if seen.insert(id) {
        out.push(FrameInfo {
            id: frame_id.clone(),
            parent,
            url,
        });
    }

    if let Some(children) = node.get("childFrames").and_then(Value::as_array) {
        for child in children {
            collect_frames(child, Some(frame_id.clone()), out, seen);
        }
    }
}

#[async_trait]
impl PageDriver for Page {
    async fn send_cdp(
        &self,
        method: &str,
        params: Value,
        frame: Option<&FrameId>,
    ) -> std::result::Result<Value, CdpError> {
        self.raw_send(method, params, frame).await
    }

    async fn evaluate_in_frame(
        &self,
        frame: Option<&FrameId>,
        expression: &str,
    ) -> std::result::Result<Value, CdpError> {
        self.raw_evaluate(frame, expression, true).await
    }

    async fn call_function_on(
        &self,
        frame: Option<&FrameId>,
        object_id: &str,
        declaration: &str,
        args: Vec<Value>,
    ) -> std::result::Result<Value, CdpError> {
        let arguments: Vec<Value> = args.into_iter().map(|value| json!({ "value": value })).collect();
        let response = self
            .raw_send(
                "Runtime.callFunctionOn",
                json!({
                    "functionDeclaration": declaration,
                    "objectId": object_id,
                    "arguments": arguments,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
                frame,
            )
            .await?;
        check_exception(&response, "Runtime.callFunctionOn")?;
        Ok(response)
    }

    async fn resolve_xpath(
        &self,
        frame: Option<&FrameId>,
        xpath: &str,
    ) -> std::result::Result<Option<String>, CdpError> {
        PagePerception::resolve_xpath(self, frame, xpath).await
    }

    async fn current_url(&self) -> std::result::Result<String, CdpError> {
        let response = self.raw_evaluate(None, "window.location.href", true).await?;
        Ok(response
            .pointer("/result/value")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    async fn navigate(&self, url: &str) -> std::result::Result<(), CdpError> {
        self.raw_send("Page.navigate", json!({ "url": url }), None)
            .await
            .map(|_| ())
    }

    async fn close_target(&self, target_id: &str) -> std::result::Result<(), CdpError> {
        self.inner
            .pool
            .send_to_browser("Target.closeTarget", json!({ "targetId": target_id }))
            .await
            .map(|_| ())
    }

    fn page_target_id(&self) -> String {
        self.inner.target_id.clone()
    }

    fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent> {
        self.inner.events.subscribe()
    }

    fn owns_session(&self, session_id: Option<&str>) -> bool {
        match session_id {
            // Browser-level events (target lifecycle) are always relevant.
            None => true,
            Some(session) => self.inner.pool.is_known_session(session),
        }
    }
}
