//! Backend-id and XPath map construction (DOM walk).
//!
//! Walks `DOM.getDocument { depth: -1, pierce: true }` and records, for every
//! node with a backend id, its lowercase tag name and its XPath relative to
//! the owning frame's document root. Same-process iframe content documents
//! open a fresh sub-space: a new frame ordinal and an empty base path.

use serde_json::json;
use tracing::{debug, warn};

use webpilot_core_types::FrameId;

use crate::errors::PerceiveError;
use crate::model::{BackendIdMaps, DomNode, COMMENT_NODE, TEXT_NODE};
use crate::ports::PagePerception;

/// Build `(TagNameMap, XPathMap)` for the page or one specific frame.
///
/// CDP errors while enabling DOM or fetching the document are non-fatal: the
/// builder logs and returns whatever it gathered (possibly empty maps).
/// `DOM.disable` always runs on the session that was enabled.
pub async fn build_backend_id_maps(
    page: &dyn PagePerception,
    target_frame: Option<&FrameId>,
) -> Result<BackendIdMaps, PerceiveError> {
    if let Err(err) = page.send_cdp("DOM.enable", json!({}), target_frame).await {
        warn!(target: "perceiver", %err, "DOM.enable failed; returning empty maps");
        return Ok(BackendIdMaps::default());
    }

    let result = build_maps_inner(page, target_frame).await;

    if let Err(err) = page.send_cdp("DOM.disable", json!({}), target_frame).await {
        debug!(target: "perceiver", %err, "DOM.disable failed during cleanup");
    }

    result
}

async fn build_maps_inner(
    page: &dyn PagePerception,
    target_frame: Option<&FrameId>,
) -> Result<BackendIdMaps, PerceiveError> {
    let document = match page
        .send_cdp(
            "DOM.getDocument",
            json!({ "depth": -1, "pierce": true }),
            target_frame,
        )
        .await
    {
        Ok(response) => response,
        Err(err) => {
            warn!(target: "perceiver", %err, "DOM.getDocument failed; returning empty maps");
            return Ok(BackendIdMaps::default());
        }
    };

    let root: DomNode = serde_json::from_value(
        document
            .get("root")
            .cloned()
            .ok_or_else(|| PerceiveError::MalformedPayload("getDocument missing root".into()))?,
    )
    .map_err(|err| PerceiveError::MalformedPayload(err.to_string()))?;

    // Pick the start node and the frame id that owns it.
    let mut start_node = &root;
    let mut root_fid: Option<FrameId> = target_frame.cloned();

    if let Some(frame) = target_frame {
        if !page.has_separate_session(frame) {
            // Same-process iframe: the document we fetched belongs to the
            // page, so walk down to the iframe's contentDocument.
            let owner = page
                .send_cdp(
                    "DOM.getFrameOwner",
                    json!({ "frameId": frame.as_str() }),
                    None,
                )
                .await?;
            let owner_backend_id = owner
                .get("backendNodeId")
                .and_then(serde_json::Value::as_i64)
                .ok_or_else(|| {
                    PerceiveError::MalformedPayload("getFrameOwner missing backendNodeId".into())
                })?;

            let iframe_node = locate_by_backend_id(&root, owner_backend_id).ok_or_else(|| {
                PerceiveError::FrameNotFound(format!(
                    "iframe element for frame {frame} not found in document"
                ))
            })?;
            let content = iframe_node.content_document.as_deref().ok_or_else(|| {
                PerceiveError::FrameNotFound(format!(
                    "iframe for frame {frame} has no contentDocument"
                ))
            })?;
            start_node = content;
            root_fid = content
                .frame_id
                .as_deref()
                .map(FrameId::new)
                .or_else(|| Some(frame.clone()));
        }
    }

    let mut maps = BackendIdMaps::default();
    let mut seen = std::collections::HashSet::new();

    // DFS with explicit stack; children pushed right-to-left so the visit
    // order stays left-to-right.
    let mut stack: Vec<(&DomNode, String, Option<FrameId>)> =
        vec![(start_node, String::new(), root_fid)];

    while let Some((node, path, fid)) = stack.pop() {
        let backend_id = match node.backend_node_id {
            Some(id) if id > 0 => id,
            _ => continue,
        };

        let enc = page.encode_with_frame_id(fid.as_ref(), backend_id);
        if !seen.insert(enc.clone()) {
            continue;
        }

        let tag = node.node_name.to_lowercase();
        maps.tag_name_map.insert(enc.clone(), tag.clone());
        maps.xpath_map.insert(enc, path.clone());

        // Pierced same-process iframes carry their contentDocument inline;
        // recurse into it under the child frame's ordinal and a fresh path.
        if tag == "iframe" {
            if let Some(content) = node.content_document.as_deref() {
                let child_fid = content
                    .frame_id
                    .as_deref()
                    .map(FrameId::new)
                    .or_else(|| fid.clone());
                stack.push((content, String::new(), child_fid));
            }
        }

        if node.children.is_empty() {
            continue;
        }

        // Per-parent counters keyed on nodeType:tag; indices are 1-based.
        let mut counters: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        let mut segments = Vec::with_capacity(node.children.len());
        for child in &node.children {
            let child_tag = child.node_name.to_lowercase();
            let key = format!("{}:{}", child.node_type, child_tag);
            let index = counters.entry(key).or_insert(0);
            *index += 1;
            let segment = match child.node_type {
                TEXT_NODE => format!("text()[{index}]"),
                COMMENT_NODE => format!("comment()[{index}]"),
                _ => format!("{child_tag}[{index}]"),
            };
            segments.push(segment);
        }

        for (child, segment) in node.children.iter().zip(segments.iter()).rev() {
            stack.push((child, format!("{path}/{segment}"), fid.clone()));
        }
    }

    Ok(maps)
}

/// Depth-first search for the node with a given backend id, descending into
/// children and content documents.
fn locate_by_backend_id(node: &DomNode, backend_id: i64) -> Option<&DomNode> {
    if node.backend_node_id == Some(backend_id) {
        return Some(node);
    }
    for child in &node.children {
        if let Some(found) = locate_by_backend_id(child, backend_id) {
            return Some(found);
        }
    }
    if let Some(content) = node.content_document.as_deref() {
        return locate_by_backend_id(content, backend_id);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cdp_adapter::CdpError;
    use serde_json::Value;
    use std::sync::Mutex;
    use webpilot_core_types::EncodedId;

    use crate::ports::FrameInfo;

    /// Perception double that answers getDocument with a canned payload and
    /// assigns frame ordinals in first-seen order.
    struct CannedPage {
        document: Value,
        ordinals: Mutex<Vec<Option<String>>>,
    }

    impl CannedPage {
        fn new(document: Value) -> Self {
            Self {
                document,
                ordinals: Mutex::new(vec![None]),
            }
        }
    }

    #[async_trait]
    impl PagePerception for CannedPage {
        async fn send_cdp(
            &self,
            method: &str,
            _params: Value,
            _frame: Option<&FrameId>,
        ) -> Result<Value, CdpError> {
            match method {
                "DOM.getDocument" => Ok(self.document.clone()),
                _ => Ok(serde_json::json!({})),
            }
        }

        async fn evaluate_in_frame(
            &self,
            _frame: Option<&FrameId>,
            _expression: &str,
        ) -> Result<Value, CdpError> {
            Ok(serde_json::json!({}))
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
            Ok(serde_json::json!({}))
        }

        fn has_separate_session(&self, _frame: &FrameId) -> bool {
            false
        }

        async fn frames(&self) -> Result<Vec<FrameInfo>, CdpError> {
            Ok(vec![])
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

    fn example_document() -> Value {
        serde_json::json!({
            "root": {
                "nodeId": 1,
                "backendNodeId": 1,
                "nodeName": "#document",
                "nodeType": 9,
                "children": [{
                    "nodeId": 2,
                    "backendNodeId": 2,
                    "nodeName": "HTML",
                    "nodeType": 1,
                    "children": [{
                        "nodeId": 3,
                        "backendNodeId": 3,
                        "nodeName": "BODY",
                        "nodeType": 1,
                        "children": [
                            {
                                "nodeId": 4,
                                "backendNodeId": 4,
                                "nodeName": "P",
                                "nodeType": 1,
                                "children": [{
                                    "nodeId": 5,
                                    "backendNodeId": 5,
                                    "nodeName": "#text",
                                    "nodeType": 3,
                                }],
                            },
                            {
                                "nodeId": 6,
                                "backendNodeId": 6,
                                "nodeName": "P",
                                "nodeType": 1,
                                "children": [{
                                    "nodeId": 7,
                                    "backendNodeId": 7,
                                    "nodeName": "A",
                                    "nodeType": 1,
                                }],
                            },
                        ],
                    }],
                }],
            }
        })
    }

    #[tokio::test]
    async fn builds_positional_paths_with_per_parent_counters() {
        let page = CannedPage::new(example_document());
        let maps = build_backend_id_maps(&page, None).await.unwrap();

        let link = EncodedId::new(0, 7);
        assert_eq!(
            maps.xpath_map.get(&link).map(String::as_str),
            Some("/html[1]/body[1]/p[2]/a[1]")
        );
        assert_eq!(maps.tag_name_map.get(&link).map(String::as_str), Some("a"));

        let text = EncodedId::new(0, 5);
        assert_eq!(
            maps.xpath_map.get(&text).map(String::as_str),
            Some("/html[1]/body[1]/p[1]/text()[1]")
        );

        // Root document node owns the empty path.
        assert_eq!(
            maps.xpath_map.get(&EncodedId::new(0, 1)).map(String::as_str),
            Some("")
        );
    }

    #[tokio::test]
    async fn every_xpath_key_has_a_tag_entry() {
        let page = CannedPage::new(example_document());
        let maps = build_backend_id_maps(&page, None).await.unwrap();
        assert!(!maps.xpath_map.is_empty());
        for key in maps.xpath_map.keys() {
            assert!(maps.tag_name_map.contains_key(key));
        }
    }

    #[tokio::test]
    async fn deterministic_for_a_static_page() {
        let page = CannedPage::new(example_document());
        let first = build_backend_id_maps(&page, None).await.unwrap();
        let second = build_backend_id_maps(&page, None).await.unwrap();
        assert_eq!(first.xpath_map, second.xpath_map);
        assert_eq!(first.tag_name_map, second.tag_name_map);
    }

    #[tokio::test]
    async fn iframe_content_document_opens_a_new_subspace() {
        let document = serde_json::json!({
            "root": {
                "nodeId": 1,
                "backendNodeId": 1,
                "nodeName": "#document",
                "nodeType": 9,
                "children": [{
                    "nodeId": 2,
                    "backendNodeId": 2,
                    "nodeName": "HTML",
                    "nodeType": 1,
                    "children": [{
                        "nodeId": 3,
                        "backendNodeId": 3,
                        "nodeName": "BODY",
                        "nodeType": 1,
                        "children": [{
                            "nodeId": 4,
                            "backendNodeId": 4,
                            "nodeName": "IFRAME",
                            "nodeType": 1,
                            "contentDocument": {
                                "nodeId": 5,
                                "backendNodeId": 5,
                                "nodeName": "#document",
                                "nodeType": 9,
                                "frameId": "child-frame",
                                "children": [{
                                    "nodeId": 6,
                                    "backendNodeId": 6,
                                    "nodeName": "HTML",
                                    "nodeType": 1,
                                    "children": [{
                                        "nodeId": 7,
                                        "backendNodeId": 7,
                                        "nodeName": "BODY",
                                        "nodeType": 1,
                                        "children": [{
                                            "nodeId": 8,
                                            "backendNodeId": 8,
                                            "nodeName": "BUTTON",
                                            "nodeType": 1,
                                        }],
                                    }],
                                }],
                            },
                        }],
                    }],
                }],
            }
        });

        let page = CannedPage::new(document);
        let maps = build_backend_id_maps(&page, None).await.unwrap();

        // The iframe element itself lives in the main frame's space.
        assert_eq!(
            maps.xpath_map
                .get(&EncodedId::new(0, 4))
                .map(String::as_str),
            Some("/html[1]/body[1]/iframe[1]")
        );

        // Content nodes get ordinal 1 and a path relative to their own root.
        assert_eq!(
            maps.xpath_map
                .get(&EncodedId::new(1, 8))
                .map(String::as_str),
            Some("/html[1]/body[1]/button[1]")
        );
        assert_eq!(
            maps.xpath_map
                .get(&EncodedId::new(1, 5))
                .map(String::as_str),
            Some("")
        );
    }
}
