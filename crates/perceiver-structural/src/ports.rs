//! The seam between perception and the page facade.

use async_trait::async_trait;
use serde_json::Value;

use cdp_adapter::CdpError;
use webpilot_core_types::{EncodedId, FrameId};

/// One live frame, as reported by the frame tree walk.
#[derive(Clone, Debug)]
pub struct FrameInfo {
    pub id: FrameId,
    /// `None` for the main frame.
    pub parent: Option<FrameId>,
    pub url: String,
}

impl FrameInfo {
    pub fn is_main(&self) -> bool {
        self.parent.is_none()
    }
}

/// Page-level capabilities the perceiver borrows from the facade.
///
/// `frame: None` always means the main frame. Routing a command to a frame
/// transparently uses the frame's own session for out-of-process frames and
/// the page session otherwise.
#[async_trait]
pub trait PagePerception: Send + Sync {
    /// Send a CDP command to the session owning the given frame.
    async fn send_cdp(
        &self,
        method: &str,
        params: Value,
        frame: Option<&FrameId>,
    ) -> Result<Value, CdpError>;

    /// Evaluate an expression in the frame's execution context. Returns the
    /// raw `Runtime.evaluate` response; values travel in `/result/value`.
    async fn evaluate_in_frame(
        &self,
        frame: Option<&FrameId>,
        expression: &str,
    ) -> Result<Value, CdpError>;

    /// Resolve an XPath to the remote object id of its first match in the
    /// frame's document, `None` when it matches nothing.
    async fn resolve_xpath(
        &self,
        frame: Option<&FrameId>,
        xpath: &str,
    ) -> Result<Option<String>, CdpError>;

    /// Call a function declaration on a remote object
    /// (`Runtime.callFunctionOn` with the object as `this`). The frame names
    /// the session that owns the object id.
    async fn call_function_on(
        &self,
        frame: Option<&FrameId>,
        object_id: &str,
        declaration: &str,
    ) -> Result<Value, CdpError>;

    /// Whether the frame runs out-of-process with its own CDP session.
    fn has_separate_session(&self, frame: &FrameId) -> bool;

    /// Every live frame, main frame first, parents before children.
    async fn frames(&self) -> Result<Vec<FrameInfo>, CdpError>;

    /// Encode a backend node id under the ordinal of the owning frame.
    fn encode_with_frame_id(&self, frame: Option<&FrameId>, backend_node_id: i64) -> EncodedId;
}
