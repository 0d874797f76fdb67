//! Shared identifiers and data model for the webpilot automation stack.
//!
//! Everything that crosses a crate boundary lives here: page/frame ids, the
//! `EncodedId` scheme that ties accessibility nodes back to DOM backend ids,
//! the observe/act result types, and the small text/selector helpers the
//! handlers share.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a page owned by a context.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PageId(pub Uuid);

impl PageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// CDP frame identifier, as reported by `Page.getFrameTree`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameId(pub String);

impl FrameId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `"<frameOrdinal>-<backendNodeId>"`, unique per page.
///
/// The frame ordinal is assigned by the page in the order frames are first
/// seen (main frame = 0); the backend node id is the stable integer the
/// browser assigns to a DOM node.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncodedId(String);

impl EncodedId {
    pub fn new(frame_ordinal: u32, backend_node_id: i64) -> Self {
        Self(format!("{frame_ordinal}-{backend_node_id}"))
    }

    /// Parse a raw label, accepting only the `digits-digits` shape.
    pub fn parse(raw: &str) -> Option<Self> {
        let (ordinal, backend) = raw.split_once('-')?;
        if ordinal.is_empty() || backend.is_empty() {
            return None;
        }
        if !ordinal.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if !backend.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self(raw.to_string()))
    }

    pub fn frame_ordinal(&self) -> u32 {
        self.0
            .split_once('-')
            .and_then(|(ord, _)| ord.parse().ok())
            .unwrap_or(0)
    }

    pub fn backend_node_id(&self) -> i64 {
        self.0
            .split_once('-')
            .and_then(|(_, backend)| backend.parse().ok())
            .unwrap_or(0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EncodedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coarse action categories reported in an [`ActResult`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Click,
    Fill,
    Type,
    Press,
    Scroll,
    Hover,
    Drag,
    Screenshot,
    Wait,
    Navigate,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Click => "click",
            ActionType::Fill => "fill",
            ActionType::Type => "type",
            ActionType::Press => "press",
            ActionType::Scroll => "scroll",
            ActionType::Hover => "hover",
            ActionType::Drag => "drag",
            ActionType::Screenshot => "screenshot",
            ActionType::Wait => "wait",
            ActionType::Navigate => "navigate",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed set of element-level methods an observation may name.
///
/// `NotSupported` is the literal the model returns when no supported method
/// applies; the act handler treats it as a terminal failure and never retries.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ActionMethod {
    #[serde(rename = "click")]
    Click,
    #[serde(rename = "fill")]
    Fill,
    #[serde(rename = "type")]
    Type,
    #[serde(rename = "press")]
    Press,
    #[serde(rename = "hover")]
    Hover,
    #[serde(rename = "selectOption")]
    SelectOption,
    #[serde(rename = "check")]
    Check,
    #[serde(rename = "uncheck")]
    Uncheck,
    #[serde(rename = "focus")]
    Focus,
    #[serde(rename = "blur")]
    Blur,
    #[serde(rename = "scrollIntoView")]
    ScrollIntoView,
    #[serde(rename = "scrollTo")]
    ScrollTo,
    #[serde(rename = "scroll")]
    Scroll,
    #[serde(rename = "nextChunk")]
    NextChunk,
    #[serde(rename = "prevChunk")]
    PrevChunk,
    #[serde(rename = "not-supported")]
    NotSupported,
}

impl ActionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionMethod::Click => "click",
            ActionMethod::Fill => "fill",
            ActionMethod::Type => "type",
            ActionMethod::Press => "press",
            ActionMethod::Hover => "hover",
            ActionMethod::SelectOption => "selectOption",
            ActionMethod::Check => "check",
            ActionMethod::Uncheck => "uncheck",
            ActionMethod::Focus => "focus",
            ActionMethod::Blur => "blur",
            ActionMethod::ScrollIntoView => "scrollIntoView",
            ActionMethod::ScrollTo => "scrollTo",
            ActionMethod::Scroll => "scroll",
            ActionMethod::NextChunk => "nextChunk",
            ActionMethod::PrevChunk => "prevChunk",
            ActionMethod::NotSupported => "not-supported",
        }
    }

    /// Every method the dispatcher accepts, in the order the observe prompt
    /// enumerates them.
    pub fn supported() -> &'static [ActionMethod] {
        &[
            ActionMethod::Click,
            ActionMethod::Fill,
            ActionMethod::Type,
            ActionMethod::Press,
            ActionMethod::Hover,
            ActionMethod::SelectOption,
            ActionMethod::Check,
            ActionMethod::Uncheck,
            ActionMethod::Focus,
            ActionMethod::Blur,
            ActionMethod::ScrollIntoView,
            ActionMethod::ScrollTo,
            ActionMethod::Scroll,
            ActionMethod::NextChunk,
            ActionMethod::PrevChunk,
        ]
    }

    /// Map a method back to the coarse action category used in reports.
    pub fn action_type(&self) -> ActionType {
        match self {
            ActionMethod::Fill | ActionMethod::Type => ActionType::Fill,
            ActionMethod::Press => ActionType::Press,
            ActionMethod::Hover => ActionType::Hover,
            ActionMethod::ScrollIntoView
            | ActionMethod::ScrollTo
            | ActionMethod::Scroll
            | ActionMethod::NextChunk
            | ActionMethod::PrevChunk => ActionType::Scroll,
            _ => ActionType::Click,
        }
    }
}

impl FromStr for ActionMethod {
    type Err = UnknownMethod;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "click" => Ok(ActionMethod::Click),
            "fill" => Ok(ActionMethod::Fill),
            "type" => Ok(ActionMethod::Type),
            "press" => Ok(ActionMethod::Press),
            "hover" => Ok(ActionMethod::Hover),
            "selectOption" => Ok(ActionMethod::SelectOption),
            "check" => Ok(ActionMethod::Check),
            "uncheck" => Ok(ActionMethod::Uncheck),
            "focus" => Ok(ActionMethod::Focus),
            "blur" => Ok(ActionMethod::Blur),
            "scrollIntoView" => Ok(ActionMethod::ScrollIntoView),
            "scrollTo" => Ok(ActionMethod::ScrollTo),
            "scroll" => Ok(ActionMethod::Scroll),
            "nextChunk" => Ok(ActionMethod::NextChunk),
            "prevChunk" => Ok(ActionMethod::PrevChunk),
            "not-supported" => Ok(ActionMethod::NotSupported),
            other => Err(UnknownMethod(other.to_string())),
        }
    }
}

impl fmt::Display for ActionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A method name outside the closed dispatch set.
#[derive(Clone, Debug, thiserror::Error)]
#[error("unsupported method '{0}'")]
pub struct UnknownMethod(pub String);

/// A reshaped accessibility node, one observe/extract call's worth of state.
///
/// Trees are rebuilt from scratch on every call; backend ids may be reused
/// after navigation so nodes are never cached across calls.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AccessibilityNode {
    #[serde(rename = "nodeId")]
    pub node_id: String,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(rename = "encodedId", skip_serializing_if = "Option::is_none")]
    pub encoded_id: Option<EncodedId>,
    #[serde(rename = "backendDOMNodeId", skip_serializing_if = "Option::is_none")]
    pub backend_dom_node_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<AccessibilityNode>,
}

/// `EncodedId → lowercase tag name`, populated during the DOM walk.
pub type TagNameMap = HashMap<EncodedId, String>;

/// `EncodedId → relative XPath`, rooted at the owning frame's document.
pub type XPathMap = HashMap<EncodedId, String>;

/// Result of building the accessibility tree for one target.
#[derive(Clone, Debug, Default)]
pub struct TreeResult {
    pub tree: Vec<AccessibilityNode>,
    /// Depth-indented `[id] role: name` outline handed to the model.
    pub simplified: String,
    /// Nodes whose post-processing role is `Iframe`.
    pub iframes: Vec<AccessibilityNode>,
    pub id_to_url: HashMap<EncodedId, String>,
    pub xpath_map: XPathMap,
}

/// One candidate element returned by observe.
///
/// `selector` always carries the `xpath=` prefix; the tail may be empty, which
/// callers must treat as "no element".
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObserveResult {
    pub selector: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<ActionMethod>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<String>,
    #[serde(rename = "encodedId", skip_serializing_if = "Option::is_none")]
    pub encoded_id: Option<EncodedId>,
}

impl ObserveResult {
    /// The selector tail with the `xpath=` prefix stripped.
    pub fn xpath(&self) -> &str {
        self.selector.strip_prefix("xpath=").unwrap_or(&self.selector)
    }

    pub fn has_selector(&self) -> bool {
        !self.xpath().is_empty()
    }
}

/// Outcome of a single act call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActResult {
    pub success: bool,
    pub action: ActionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ActResult {
    pub fn success(action: ActionType) -> Self {
        Self {
            success: true,
            action,
            selector: None,
            description: None,
            error: None,
            metadata: None,
        }
    }

    pub fn failure(action: ActionType, error: impl Into<String>) -> Self {
        Self {
            success: false,
            action,
            selector: None,
            description: None,
            error: Some(error.into()),
            metadata: None,
        }
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Strip the `xpath=` prefix and force a leading `/` on the remainder.
///
/// Empty selectors stay empty so "no element" survives normalization.
pub fn clean_selector(selector: &str) -> String {
    let cleaned = selector.strip_prefix("xpath=").unwrap_or(selector).trim();
    if cleaned.is_empty() || cleaned.starts_with('/') {
        cleaned.to_string()
    } else {
        format!("/{cleaned}")
    }
}

const PUA_START: u32 = 0xE000;
const PUA_END: u32 = 0xF8FF;
const NBSP_CHARS: [u32; 4] = [0x00A0, 0x202F, 0x2007, 0xFEFF];

/// Remove private-use glyphs, collapse NBSP-family characters into single
/// spaces, and trim.
pub fn clean_text(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut prev_was_space = false;
    for ch in input.chars() {
        let code = ch as u32;
        if (PUA_START..=PUA_END).contains(&code) {
            continue;
        }
        if NBSP_CHARS.contains(&code) {
            if !prev_was_space {
                output.push(' ');
                prev_was_space = true;
            }
            continue;
        }
        output.push(ch);
        prev_was_space = ch == ' ';
    }
    output.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_id_round_trips() {
        let id = EncodedId::new(1, 42);
        assert_eq!(id.as_str(), "1-42");
        assert_eq!(id.frame_ordinal(), 1);
        assert_eq!(id.backend_node_id(), 42);
    }

    #[test]
    fn encoded_id_rejects_malformed_labels() {
        assert!(EncodedId::parse("0-13").is_some());
        assert!(EncodedId::parse("13").is_none());
        assert!(EncodedId::parse("a-13").is_none());
        assert!(EncodedId::parse("1-").is_none());
        assert!(EncodedId::parse("-7").is_none());
    }

    #[test]
    fn method_names_round_trip() {
        for method in ActionMethod::supported() {
            assert_eq!(method.as_str().parse::<ActionMethod>().unwrap(), *method);
        }
        assert_eq!(
            "not-supported".parse::<ActionMethod>().unwrap(),
            ActionMethod::NotSupported
        );
        assert!("teleport".parse::<ActionMethod>().is_err());
    }

    #[test]
    fn clean_selector_strips_prefix_and_anchors_path() {
        assert_eq!(clean_selector("xpath=/html[1]/body[1]"), "/html[1]/body[1]");
        assert_eq!(clean_selector("html[1]/body[1]"), "/html[1]/body[1]");
        assert_eq!(clean_selector("xpath="), "");
        assert_eq!(clean_selector(""), "");
    }

    #[test]
    fn clean_text_collapses_nbsp_and_drops_pua() {
        assert_eq!(clean_text("a\u{00A0}\u{202F}b"), "a b");
        assert_eq!(clean_text("\u{E000}hello\u{F8FF} "), "hello");
        assert_eq!(clean_text("  plain  text  "), "plain  text");
    }

    #[test]
    fn observe_result_selector_accessors() {
        let result = ObserveResult {
            selector: "xpath=/html[1]/body[1]/a[1]".to_string(),
            description: "link".to_string(),
            method: Some(ActionMethod::Click),
            arguments: vec![],
            encoded_id: EncodedId::parse("0-12"),
        };
        assert_eq!(result.xpath(), "/html[1]/body[1]/a[1]");
        assert!(result.has_selector());

        let empty = ObserveResult {
            selector: "xpath=".to_string(),
            description: "nothing".to_string(),
            method: None,
            arguments: vec![],
            encoded_id: None,
        };
        assert!(!empty.has_selector());
    }

    #[test]
    fn method_serde_uses_wire_names() {
        let json = serde_json::to_string(&ActionMethod::SelectOption).unwrap();
        assert_eq!(json, "\"selectOption\"");
        let parsed: ActionMethod = serde_json::from_str("\"not-supported\"").unwrap();
        assert_eq!(parsed, ActionMethod::NotSupported);
    }
}
