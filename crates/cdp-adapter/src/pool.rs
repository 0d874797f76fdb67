//! Per-target CDP session pool.
//!
//! Serves at most one session per (page, frame). The page itself owns a
//! session; an out-of-process iframe gets its own flattened session; a
//! same-process iframe aliases the page session, so callers never observe
//! the distinction.

use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use webpilot_core_types::FrameId;

use crate::error::{CdpError, CdpErrorKind};
use crate::transport::{CdpTransport, CommandTarget, TransportEvent};

/// A command destination within one page.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CdpTarget {
    Page,
    Frame(FrameId),
}

impl CdpTarget {
    pub fn frame(id: impl Into<String>) -> Self {
        CdpTarget::Frame(FrameId::new(id))
    }
}

/// Session cache for one page target and the frames it hosts.
pub struct SessionPool {
    transport: Arc<dyn CdpTransport>,
    target_id: String,
    deadline: Duration,
    page_session: OnceCell<String>,
    frame_sessions: DashMap<FrameId, String>,
    aliases: DashSet<FrameId>,
}

impl SessionPool {
    pub fn new(transport: Arc<dyn CdpTransport>, target_id: impl Into<String>) -> Self {
        Self {
            transport,
            target_id: target_id.into(),
            deadline: Duration::from_secs(30),
            page_session: OnceCell::new(),
            frame_sessions: DashMap::new(),
            aliases: DashSet::new(),
        }
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    /// The session for the page itself, attaching on first use.
    pub async fn page_session(&self) -> Result<String, CdpError> {
        self.page_session
            .get_or_try_init(|| async {
                let response = self
                    .transport
                    .send(
                        CommandTarget::Browser,
                        "Target.attachToTarget",
                        json!({ "targetId": self.target_id, "flatten": true }),
                    )
                    .await?;
                session_id_from(&response, "Target.attachToTarget")
            })
            .await
            .map(|session| session.clone())
    }

    /// Resolve the session for a target, opening or aliasing as needed.
    ///
    /// A frame whose attach attempt fails at the protocol level has no
    /// separate session: it lives in the page's renderer, so the page session
    /// is recorded as its alias and returned.
    pub async fn session(&self, target: &CdpTarget) -> Result<String, CdpError> {
        match target {
            CdpTarget::Page => self.page_session().await,
            CdpTarget::Frame(frame) => {
                if let Some(existing) = self.frame_sessions.get(frame) {
                    return Ok(existing.value().clone());
                }
                if self.aliases.contains(frame) {
                    return self.page_session().await;
                }

                let attach = self
                    .transport
                    .send(
                        CommandTarget::Browser,
                        "Target.attachToTarget",
                        json!({ "targetId": frame.as_str(), "flatten": true }),
                    )
                    .await;

                match attach {
                    Ok(response) => {
                        let session = session_id_from(&response, "Target.attachToTarget")?;
                        self.frame_sessions.insert(frame.clone(), session.clone());
                        Ok(session)
                    }
                    Err(err) if err.kind == CdpErrorKind::Protocol => {
                        debug!(
                            target: "cdp-pool",
                            frame = %frame,
                            "frame has no separate session; aliasing to page"
                        );
                        self.aliases.insert(frame.clone());
                        self.page_session().await
                    }
                    Err(err) => Err(err),
                }
            }
        }
    }

    /// Record a session handed to us by `Target.attachedToTarget` auto-attach.
    pub fn adopt_frame_session(&self, frame: FrameId, session: impl Into<String>) {
        self.aliases.remove(&frame);
        self.frame_sessions.insert(frame, session.into());
    }

    /// Drop cached state for a frame that went away.
    pub fn release_frame(&self, frame: &FrameId) {
        self.frame_sessions.remove(frame);
        self.aliases.remove(frame);
    }

    /// Whether the frame runs out-of-process with its own session.
    pub fn has_separate_session(&self, frame: &FrameId) -> bool {
        self.frame_sessions.contains_key(frame)
    }

    /// Every frame currently holding its own session.
    pub fn separate_frames(&self) -> Vec<FrameId> {
        self.frame_sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Whether a session id belongs to this page or one of its frames.
    pub fn is_known_session(&self, session: &str) -> bool {
        if self
            .page_session
            .get()
            .map(|cached| cached == session)
            .unwrap_or(false)
        {
            return true;
        }
        self.frame_sessions
            .iter()
            .any(|entry| entry.value() == session)
    }

    /// Update pool state from a transport event. Auto-attached iframe targets
    /// are adopted; detached sessions are evicted.
    pub fn observe_event(&self, event: &TransportEvent) {
        match event.method.as_str() {
            "Target.attachedToTarget" => {
                let target_type = event
                    .params
                    .pointer("/targetInfo/type")
                    .and_then(Value::as_str);
                if target_type != Some("iframe") {
                    return;
                }
                let target_id = event
                    .params
                    .pointer("/targetInfo/targetId")
                    .and_then(Value::as_str);
                let session = event.params.get("sessionId").and_then(Value::as_str);
                if let (Some(target_id), Some(session)) = (target_id, session) {
                    self.adopt_frame_session(FrameId::new(target_id), session);
                }
            }
            "Target.detachedFromTarget" => {
                if let Some(session) = event.params.get("sessionId").and_then(Value::as_str) {
                    self.frame_sessions
                        .retain(|_, cached| cached.as_str() != session);
                }
            }
            "Page.frameDetached" => {
                if let Some(frame_id) = event.params.get("frameId").and_then(Value::as_str) {
                    self.release_frame(&FrameId::new(frame_id));
                }
            }
            _ => {}
        }
    }

    /// Send a command through the right session for the target.
    pub async fn send(
        &self,
        method: &str,
        params: Value,
        target: &CdpTarget,
    ) -> Result<Value, CdpError> {
        let session = self.session(target).await?;
        self.transport
            .send(CommandTarget::Session(session), method, params)
            .await
            .map_err(|err| err.with_method(method))
    }

    /// Send a browser-level command (target management and the like).
    pub async fn send_to_browser(&self, method: &str, params: Value) -> Result<Value, CdpError> {
        self.transport
            .send(CommandTarget::Browser, method, params)
            .await
            .map_err(|err| err.with_method(method))
    }

    pub async fn enable(&self, domain: &str, target: &CdpTarget) -> Result<(), CdpError> {
        self.send(&format!("{domain}.enable"), json!({}), target)
            .await
            .map(|_| ())
    }

    pub async fn disable(&self, domain: &str, target: &CdpTarget) -> Result<(), CdpError> {
        self.send(&format!("{domain}.disable"), json!({}), target)
            .await
            .map(|_| ())
    }

    /// Detach every still-live session this pool opened.
    pub async fn cleanup(&self) {
        let mut sessions: Vec<String> = self
            .frame_sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        if let Some(page) = self.page_session.get() {
            sessions.push(page.clone());
        }
        for session in sessions {
            let result = self
                .transport
                .send(
                    CommandTarget::Browser,
                    "Target.detachFromTarget",
                    json!({ "sessionId": session }),
                )
                .await;
            if let Err(err) = result {
                warn!(target: "cdp-pool", %err, "session detach failed during cleanup");
            }
        }
        self.frame_sessions.clear();
        self.aliases.clear();
    }

    pub fn default_deadline(&self) -> Duration {
        self.deadline
    }
}

fn session_id_from(response: &Value, method: &str) -> Result<String, CdpError> {
    response
        .get("sessionId")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            CdpError::new(CdpErrorKind::Internal)
                .with_method(method)
                .with_hint("attach response missing sessionId")
        })
}
