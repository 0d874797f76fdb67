//! The seam between action dispatch and the page facade.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use cdp_adapter::{CdpError, TransportEvent};
use webpilot_core_types::FrameId;

/// Page-level capabilities the dispatcher borrows from the facade.
///
/// `frame: None` always means the main frame.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Send a CDP command to the session owning the given frame.
    async fn send_cdp(
        &self,
        method: &str,
        params: Value,
        frame: Option<&FrameId>,
    ) -> Result<Value, CdpError>;

    /// Evaluate an expression in a frame's execution context; returns the raw
    /// `Runtime.evaluate` result object.
    async fn evaluate_in_frame(
        &self,
        frame: Option<&FrameId>,
        expression: &str,
    ) -> Result<Value, CdpError>;

    /// Call a function declaration with a remote object bound as `this`.
    /// The frame names the session that owns the object id. Returned
    /// promises are awaited; a JavaScript exception surfaces as a
    /// protocol-kind [`CdpError`].
    async fn call_function_on(
        &self,
        frame: Option<&FrameId>,
        object_id: &str,
        declaration: &str,
        args: Vec<Value>,
    ) -> Result<Value, CdpError>;

    /// Resolve an XPath to the remote object id of its first match, `None`
    /// when it matches nothing.
    async fn resolve_xpath(
        &self,
        frame: Option<&FrameId>,
        xpath: &str,
    ) -> Result<Option<String>, CdpError>;

    /// URL of the main frame right now.
    async fn current_url(&self) -> Result<String, CdpError>;

    /// Navigate the page and return once the navigation is accepted.
    async fn navigate(&self, url: &str) -> Result<(), CdpError>;

    /// Close another target (the new-tab discipline).
    async fn close_target(&self, target_id: &str) -> Result<(), CdpError>;

    /// CDP target id of this page, so new-tab detection can ignore self.
    fn page_target_id(&self) -> String;

    /// Live feed of every transport event.
    fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent>;

    /// Whether an event session belongs to this page (its session or one of
    /// its frames'). Events from other pages must not disturb the waiter.
    fn owns_session(&self, session_id: Option<&str>) -> bool;
}
