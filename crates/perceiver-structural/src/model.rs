//! Wire-shaped CDP payloads consumed by the perceiver.

use serde::Deserialize;
use serde_json::Value;

use webpilot_core_types::{TagNameMap, XPathMap};

/// One node from `DOM.getDocument { depth: -1, pierce: true }`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomNode {
    #[serde(default)]
    pub node_id: i64,
    #[serde(default)]
    pub backend_node_id: Option<i64>,
    #[serde(default)]
    pub node_name: String,
    #[serde(default = "element_node_type")]
    pub node_type: i64,
    #[serde(default)]
    pub children: Vec<DomNode>,
    #[serde(default)]
    pub content_document: Option<Box<DomNode>>,
    #[serde(default)]
    pub frame_id: Option<String>,
}

fn element_node_type() -> i64 {
    ELEMENT_NODE
}

pub const ELEMENT_NODE: i64 = 1;
pub const TEXT_NODE: i64 = 3;
pub const COMMENT_NODE: i64 = 8;

/// A typed CDP AX value: `{ type, value }`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AxValue {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub value: Option<Value>,
}

impl AxValue {
    pub fn as_str(&self) -> Option<&str> {
        self.value.as_ref().and_then(Value::as_str)
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self {
            kind: "string".to_string(),
            value: Some(Value::String(value.into())),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AxProperty {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: Option<AxValue>,
}

/// One flat node from `Accessibility.getFullAXTree`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AxPayloadNode {
    #[serde(default)]
    pub node_id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub role: Option<AxValue>,
    #[serde(default)]
    pub name: Option<AxValue>,
    #[serde(default)]
    pub description: Option<AxValue>,
    #[serde(default)]
    pub value: Option<AxValue>,
    #[serde(default)]
    pub child_ids: Vec<String>,
    #[serde(default)]
    pub backend_dom_node_id: Option<i64>,
    #[serde(default)]
    pub properties: Vec<AxProperty>,
}

impl AxPayloadNode {
    pub fn role_value(&self) -> &str {
        self.role.as_ref().and_then(AxValue::as_str).unwrap_or("")
    }

    pub fn name_value(&self) -> &str {
        self.name.as_ref().and_then(AxValue::as_str).unwrap_or("")
    }

    /// Negative node ids are pseudo nodes the browser synthesizes; they never
    /// correspond to DOM content and are dropped everywhere.
    pub fn is_pseudo(&self) -> bool {
        self.node_id.parse::<i64>().map(|v| v < 0).unwrap_or(false)
    }
}

/// The two maps produced by the DOM walk.
#[derive(Clone, Debug, Default)]
pub struct BackendIdMaps {
    pub tag_name_map: TagNameMap,
    pub xpath_map: XPathMap,
}
