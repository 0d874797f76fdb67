//! Stitching a same-process iframe into the combined view, end to end over
//! canned CDP payloads.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use cdp_adapter::CdpError;
use perceiver_structural::{
    get_accessibility_tree_with_frames, FrameInfo, PagePerception,
};
use webpilot_core_types::{EncodedId, FrameId};

/// A page with one same-process iframe hosting a single button:
/// `<html><body><iframe><html><body><button>…</button></body></html></iframe></body></html>`.
struct IframePage {
    ordinals: Mutex<Vec<Option<String>>>,
}

impl IframePage {
    fn new() -> Self {
        Self {
            ordinals: Mutex::new(vec![None]),
        }
    }

    fn pierced_document() -> Value {
        json!({
            "root": {
                "nodeId": 1, "backendNodeId": 1, "nodeName": "#document", "nodeType": 9,
                "children": [{
                    "nodeId": 2, "backendNodeId": 2, "nodeName": "HTML", "nodeType": 1,
                    "children": [{
                        "nodeId": 3, "backendNodeId": 3, "nodeName": "BODY", "nodeType": 1,
                        "children": [{
                            "nodeId": 4, "backendNodeId": 4, "nodeName": "IFRAME", "nodeType": 1,
                            "contentDocument": {
                                "nodeId": 5, "backendNodeId": 5, "nodeName": "#document",
                                "nodeType": 9, "frameId": "child-frame",
                                "children": [{
                                    "nodeId": 6, "backendNodeId": 6, "nodeName": "HTML", "nodeType": 1,
                                    "children": [{
                                        "nodeId": 7, "backendNodeId": 7, "nodeName": "BODY", "nodeType": 1,
                                        "children": [{
                                            "nodeId": 8, "backendNodeId": 8, "nodeName": "BUTTON", "nodeType": 1,
                                        }],
                                    }],
                                }],
                            },
                        }],
                    }],
                }],
            }
        })
    }

    fn main_ax_tree() -> Value {
        json!({
            "nodes": [
                {
                    "nodeId": "1",
                    "role": { "type": "role", "value": "RootWebArea" },
                    "name": { "type": "computedString", "value": "Outer page" },
                    "childIds": ["2"],
                    "backendDOMNodeId": 1,
                },
                {
                    "nodeId": "2",
                    "parentId": "1",
                    "role": { "type": "role", "value": "Iframe" },
                    "backendDOMNodeId": 4,
                    "childIds": [],
                },
            ]
        })
    }

    fn child_ax_tree() -> Value {
        json!({
            "nodes": [
                {
                    "nodeId": "10",
                    "role": { "type": "role", "value": "RootWebArea" },
                    "name": { "type": "computedString", "value": "Inner page" },
                    "childIds": ["11"],
                    "backendDOMNodeId": 5,
                },
                {
                    "nodeId": "11",
                    "parentId": "10",
                    "role": { "type": "role", "value": "button" },
                    "name": { "type": "computedString", "value": "Click me in iframe" },
                    "backendDOMNodeId": 8,
                },
            ]
        })
    }
}

#[async_trait]
impl PagePerception for IframePage {
    async fn send_cdp(
        &self,
        method: &str,
        params: Value,
        _frame: Option<&FrameId>,
    ) -> Result<Value, CdpError> {
        match method {
            "DOM.getDocument" => Ok(Self::pierced_document()),
            "DOM.getFrameOwner" => Ok(json!({ "backendNodeId": 4 })),
            "DOM.resolveNode" => Ok(json!({ "object": { "objectId": "iframe-obj" } })),
            "Accessibility.getFullAXTree" => {
                if params.get("frameId").and_then(Value::as_str) == Some("child-frame") {
                    Ok(Self::child_ax_tree())
                } else {
                    Ok(Self::main_ax_tree())
                }
            }
            _ => Ok(json!({})),
        }
    }

    async fn evaluate_in_frame(
        &self,
        _frame: Option<&FrameId>,
        _expression: &str,
    ) -> Result<Value, CdpError> {
        Ok(json!({ "result": { "value": [] } }))
    }

    async fn resolve_xpath(
        &self,
        _frame: Option<&FrameId>,
        _xpath: &str,
    ) -> Result<Option<String>, CdpError> {
        Ok(None)
    }

    async fn call_function_on(
        &self,
        _frame: Option<&FrameId>,
        object_id: &str,
        _declaration: &str,
    ) -> Result<Value, CdpError> {
        assert_eq!(object_id, "iframe-obj");
        Ok(json!({ "result": { "value": "/html[1]/body[1]/iframe[1]" } }))
    }

    fn has_separate_session(&self, _frame: &FrameId) -> bool {
        false
    }

    async fn frames(&self) -> Result<Vec<FrameInfo>, CdpError> {
        let main = FrameId::new("main-frame");
        Ok(vec![
            FrameInfo {
                id: main.clone(),
                parent: None,
                url: "https://example.com/".to_string(),
            },
            FrameInfo {
                id: FrameId::new("child-frame"),
                parent: Some(main),
                url: "https://example.com/inner".to_string(),
            },
        ])
    }

    fn encode_with_frame_id(&self, frame: Option<&FrameId>, backend_node_id: i64) -> EncodedId {
        let key = frame.map(|f| f.as_str().to_string());
        let mut ordinals = self.ordinals.lock().unwrap();
        let ordinal = match ordinals.iter().position(|entry| *entry == key) {
            Some(position) => position,
            None => {
                ordinals.push(key);
                ordinals.len() - 1
            }
        };
        EncodedId::new(ordinal as u32, backend_node_id)
    }
}

#[tokio::test]
async fn iframe_subtree_is_stitched_under_its_host_line() {
    let page = IframePage::new();
    let combined = get_accessibility_tree_with_frames(&page).await.unwrap();

    let lines: Vec<&str> = combined.combined_tree.split('\n').collect();
    let host_index = lines
        .iter()
        .position(|line| line.contains("Iframe"))
        .expect("host iframe line present");
    let button_index = lines
        .iter()
        .position(|line| line.contains("Click me in iframe"))
        .expect("button line present");

    assert!(
        button_index > host_index,
        "iframe subtree must follow its host line"
    );
    let host_indent = lines[host_index].len() - lines[host_index].trim_start().len();
    let button_line = lines[button_index];
    let button_indent = button_line.len() - button_line.trim_start().len();
    assert!(
        button_indent > host_indent,
        "injected subtree must be indented deeper than its host"
    );
}

#[tokio::test]
async fn combined_map_prefixes_child_paths_with_the_host_iframe() {
    let page = IframePage::new();
    let combined = get_accessibility_tree_with_frames(&page).await.unwrap();

    // The button lives in frame ordinal 1; its absolute path crosses the
    // host iframe.
    let button = EncodedId::new(1, 8);
    let xpath = combined
        .combined_xpath_map
        .get(&button)
        .expect("button has a combined xpath");
    assert_eq!(
        xpath,
        "/html[1]/body[1]/iframe[1]/html[1]/body[1]/button[1]"
    );
    assert!(xpath.ends_with("/button[1]"));

    // The iframe element itself stays in the main frame's space.
    let iframe_el = EncodedId::new(0, 4);
    assert_eq!(
        combined.combined_xpath_map.get(&iframe_el).map(String::as_str),
        Some("/html[1]/body[1]/iframe[1]")
    );
}

#[tokio::test]
async fn page_with_no_child_frames_needs_no_stitching() {
    struct MainOnly;

    #[async_trait]
    impl PagePerception for MainOnly {
        async fn send_cdp(
            &self,
            method: &str,
            _params: Value,
            _frame: Option<&FrameId>,
        ) -> Result<Value, CdpError> {
            match method {
                "DOM.getDocument" => Ok(json!({
                    "root": {
                        "nodeId": 1, "backendNodeId": 1, "nodeName": "#document", "nodeType": 9,
                        "children": [{
                            "nodeId": 2, "backendNodeId": 2, "nodeName": "HTML", "nodeType": 1,
                        }],
                    }
                })),
                "Accessibility.getFullAXTree" => Ok(json!({
                    "nodes": [{
                        "nodeId": "1",
                        "role": { "type": "role", "value": "RootWebArea" },
                        "name": { "type": "computedString", "value": "Plain page" },
                        "backendDOMNodeId": 1,
                    }]
                })),
                _ => Ok(json!({})),
            }
        }

        async fn evaluate_in_frame(
            &self,
            _frame: Option<&FrameId>,
            _expression: &str,
        ) -> Result<Value, CdpError> {
            Ok(json!({ "result": { "value": [] } }))
        }

        async fn resolve_xpath(
            &self,
            _frame: Option<&FrameId>,
            _xpath: &str,
        ) -> Result<Option<String>, CdpError> {
            Ok(None)
        }

        async fn call_function_on(
            &self,
            _frame: Option<&FrameId>,
            _object_id: &str,
            _declaration: &str,
        ) -> Result<Value, CdpError> {
            Ok(json!({}))
        }

        fn has_separate_session(&self, _frame: &FrameId) -> bool {
            false
        }

        async fn frames(&self) -> Result<Vec<FrameInfo>, CdpError> {
            Ok(vec![FrameInfo {
                id: FrameId::new("main-frame"),
                parent: None,
                url: "https://example.com/".to_string(),
            }])
        }

        fn encode_with_frame_id(&self, _frame: Option<&FrameId>, backend_node_id: i64) -> EncodedId {
            EncodedId::new(0, backend_node_id)
        }
    }

    let combined = get_accessibility_tree_with_frames(&MainOnly).await.unwrap();
    assert!(combined.combined_tree.contains("Plain page"));
    // Every combined path is already absolute in the main document.
    for xpath in combined.combined_xpath_map.values() {
        assert!(xpath.starts_with('/'));
        assert!(!xpath.contains("iframe"));
    }
}
