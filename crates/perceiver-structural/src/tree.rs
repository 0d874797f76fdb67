//! Accessibility tree construction.
//!
//! Turns the flat `Accessibility.getFullAXTree` payload into a pruned
//! hierarchy, decorates scroll containers, collects link URLs, and renders
//! the depth-indented outline handed to the model.

use std::collections::{HashMap, HashSet};

use serde_json::{json, Value};
use tracing::{debug, warn};

use webpilot_core_types::{clean_text, AccessibilityNode, EncodedId, FrameId, TagNameMap, TreeResult};

use crate::backend_maps::build_backend_id_maps;
use crate::errors::PerceiveError;
use crate::model::{AxPayloadNode, AxValue};
use crate::ports::PagePerception;

/// Roles that never matter to the model on their own.
fn is_structural_role(role: &str) -> bool {
    matches!(role, "generic" | "none")
}

/// A node is interactive when its role is none of the filler roles.
fn is_interactive(node: &AxPayloadNode) -> bool {
    !matches!(node.role_value(), "none" | "generic" | "InlineTextBox")
}

/// Extract a URL carried by a link node: `value.type == "url"` first, then an
/// `href` property with a string value.
pub(crate) fn extract_url_from_ax_node(node: &AxPayloadNode) -> Option<String> {
    if node.role_value() != "link" {
        return None;
    }
    if let Some(value) = &node.value {
        if value.kind == "url" {
            if let Some(url) = value.as_str() {
                return Some(url.to_string());
            }
        }
    }
    for property in &node.properties {
        if property.name == "href" {
            if let Some(value) = &property.value {
                if value.kind == "string" {
                    if let Some(url) = value.as_str() {
                        return Some(url.to_string());
                    }
                }
            }
        }
    }
    None
}

/// Prepend `"scrollable"` to the role of any node whose backend id was
/// detected as a scroll container.
pub(crate) fn decorate_roles(nodes: &mut [AxPayloadNode], scrollable_ids: &HashSet<i64>) {
    for node in nodes.iter_mut() {
        let backend_id = match node.backend_dom_node_id {
            Some(id) => id,
            None => continue,
        };
        if !scrollable_ids.contains(&backend_id) {
            continue;
        }
        let role = node.role_value().to_string();
        let decorated = if !role.is_empty() && !is_structural_role(&role) {
            format!("scrollable, {role}")
        } else {
            "scrollable".to_string()
        };
        node.role = Some(AxValue::string(decorated));
    }
}

/// Recursively prune or collapse structural nodes.
///
/// A `generic`/`none` leaf is dropped; one with a single kept child collapses
/// to that child; one with a known tag that survives takes the tag as its
/// role. `StaticText` children repeating the parent's name are removed.
pub(crate) fn clean_structural_nodes(
    mut node: AccessibilityNode,
    tag_name_map: &TagNameMap,
) -> Option<AccessibilityNode> {
    if node.node_id.parse::<i64>().map(|v| v < 0).unwrap_or(false) {
        return None;
    }

    if node.children.is_empty() {
        if is_structural_role(&node.role) {
            return None;
        }
        return Some(node);
    }

    let children = std::mem::take(&mut node.children);
    let cleaned: Vec<AccessibilityNode> = children
        .into_iter()
        .filter_map(|child| clean_structural_nodes(child, tag_name_map))
        .collect();

    if is_structural_role(&node.role) {
        if cleaned.len() == 1 {
            return cleaned.into_iter().next();
        }
        if cleaned.is_empty() {
            return None;
        }
    }

    if is_structural_role(&node.role) {
        if let Some(encoded_id) = &node.encoded_id {
            if let Some(tag) = tag_name_map.get(encoded_id) {
                node.role = tag.clone();
            }
        }
    }

    let pruned = remove_redundant_static_text_children(&node, cleaned);
    if pruned.is_empty() && is_structural_role(&node.role) {
        return None;
    }

    node.children = pruned;
    Some(node)
}

/// Drop `StaticText` children whose trimmed name equals the parent's.
pub(crate) fn remove_redundant_static_text_children(
    parent: &AccessibilityNode,
    children: Vec<AccessibilityNode>,
) -> Vec<AccessibilityNode> {
    let parent_text = parent.name.as_deref().map(str::trim).unwrap_or("");
    if parent_text.is_empty() {
        return children;
    }
    children
        .into_iter()
        .filter(|child| {
            if child.role != "StaticText" {
                return true;
            }
            child.name.as_deref().map(str::trim).unwrap_or("") != parent_text
        })
        .collect()
}

/// Render the depth-indented outline: `[encodedId | nodeId] role: name`.
/// Backend-derived ids are preferred when known.
pub fn format_simplified_tree(node: &AccessibilityNode, level: usize) -> String {
    let indent = "  ".repeat(level);
    let label = node
        .encoded_id
        .as_ref()
        .map(EncodedId::to_string)
        .unwrap_or_else(|| node.node_id.clone());
    let name_part = node
        .name
        .as_deref()
        .filter(|name| !name.is_empty())
        .map(|name| format!(": {}", clean_text(name)))
        .unwrap_or_default();

    let mut out = format!("{indent}[{label}] {}{name_part}\n", node.role);
    for child in &node.children {
        out.push_str(&format_simplified_tree(child, level + 1));
    }
    out
}

/// Convert the flat AX payload into a cleaned hierarchy plus the maps that
/// travel with it. Pure with respect to CDP: testable without a browser.
pub fn build_hierarchical_tree(
    nodes: Vec<AxPayloadNode>,
    tag_name_map: &TagNameMap,
    xpath_map: webpilot_core_types::XPathMap,
) -> TreeResult {
    let mut id_to_url: HashMap<EncodedId, String> = HashMap::new();
    let mut node_map: HashMap<String, AccessibilityNode> = HashMap::new();
    let mut iframe_list: Vec<AccessibilityNode> = Vec::new();

    // backendId → every EncodedId built from it; ambiguity across frames
    // disqualifies the match to avoid cross-frame collisions.
    let mut backend_to_ids: HashMap<i64, Vec<EncodedId>> = HashMap::new();
    for enc in tag_name_map.keys() {
        backend_to_ids
            .entry(enc.backend_node_id())
            .or_default()
            .push(enc.clone());
    }

    // Pass 1: copy and filter the nodes worth keeping.
    for node in &nodes {
        if node.is_pseudo() {
            continue;
        }

        let name_value = node.name_value();
        let keep = !name_value.trim().is_empty() || !node.child_ids.is_empty() || is_interactive(node);
        if !keep {
            continue;
        }

        let encoded_id = node.backend_dom_node_id.and_then(|backend| {
            match backend_to_ids.get(&backend).map(Vec::as_slice) {
                Some([only]) => Some(only.clone()),
                _ => None,
            }
        });

        if let (Some(url), Some(enc)) = (extract_url_from_ax_node(node), encoded_id.as_ref()) {
            id_to_url.insert(enc.clone(), url);
        }

        let rich = AccessibilityNode {
            node_id: node.node_id.clone(),
            role: node.role_value().to_string(),
            name: node.name.as_ref().and_then(AxValue::as_str).map(str::to_string),
            description: node
                .description
                .as_ref()
                .and_then(AxValue::as_str)
                .map(str::to_string),
            value: node.value.as_ref().and_then(AxValue::as_str).map(str::to_string),
            encoded_id,
            backend_dom_node_id: node.backend_dom_node_id,
            children: Vec::new(),
        };
        node_map.insert(node.node_id.clone(), rich);
    }

    // Pass 2: record iframe nodes and the parent/child wiring.
    let mut children_of: HashMap<String, Vec<String>> = HashMap::new();
    for node in &nodes {
        if node.role_value() == "Iframe" {
            iframe_list.push(AccessibilityNode {
                node_id: node.node_id.clone(),
                role: "Iframe".to_string(),
                ..Default::default()
            });
        }
        if let Some(parent_id) = &node.parent_id {
            if node_map.contains_key(parent_id) && node_map.contains_key(&node.node_id) {
                children_of
                    .entry(parent_id.clone())
                    .or_default()
                    .push(node.node_id.clone());
            }
        }
    }

    // Pass 3: assemble owned subtrees from the roots, then prune.
    let root_ids: Vec<String> = nodes
        .iter()
        .filter(|node| node.parent_id.is_none() && node_map.contains_key(&node.node_id))
        .map(|node| node.node_id.clone())
        .collect();

    fn assemble(
        node_id: &str,
        node_map: &mut HashMap<String, AccessibilityNode>,
        children_of: &HashMap<String, Vec<String>>,
    ) -> Option<AccessibilityNode> {
        let mut node = node_map.remove(node_id)?;
        if let Some(child_ids) = children_of.get(node_id) {
            node.children = child_ids
                .iter()
                .filter_map(|child_id| assemble(child_id, node_map, children_of))
                .collect();
        }
        Some(node)
    }

    let cleaned_roots: Vec<AccessibilityNode> = root_ids
        .iter()
        .filter_map(|root_id| assemble(root_id, &mut node_map, &children_of))
        .filter_map(|root| clean_structural_nodes(root, tag_name_map))
        .collect();

    let simplified = cleaned_roots
        .iter()
        .map(|root| format_simplified_tree(root, 0))
        .collect::<Vec<_>>()
        .join("\n");

    TreeResult {
        tree: cleaned_roots,
        simplified,
        iframes: iframe_list,
        id_to_url,
        xpath_map,
    }
}

/// Resolve the helper script's scrollable XPaths to backend node ids.
/// Individual resolution failures are logged and skipped.
pub(crate) async fn find_scrollable_backend_ids(
    page: &dyn PagePerception,
    target_frame: Option<&FrameId>,
) -> HashSet<i64> {
    let mut backend_ids = HashSet::new();

    let xpaths = match page
        .evaluate_in_frame(
            target_frame,
            "window.getScrollableElementXpaths ? window.getScrollableElementXpaths() : []",
        )
        .await
    {
        Ok(response) => response
            .pointer("/result/value")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default(),
        Err(err) => {
            debug!(target: "perceiver", %err, "scrollable xpath enumeration failed");
            return backend_ids;
        }
    };

    for xpath in xpaths {
        if xpath.is_empty() {
            continue;
        }
        let object_id = match page.resolve_xpath(target_frame, &xpath).await {
            Ok(Some(object_id)) => object_id,
            Ok(None) => continue,
            Err(err) => {
                debug!(target: "perceiver", %err, xpath = %xpath, "scrollable xpath resolution failed");
                continue;
            }
        };
        match page
            .send_cdp(
                "DOM.describeNode",
                json!({ "objectId": object_id }),
                target_frame,
            )
            .await
        {
            Ok(response) => {
                if let Some(backend_id) = response
                    .pointer("/node/backendNodeId")
                    .and_then(Value::as_i64)
                {
                    backend_ids.insert(backend_id);
                }
            }
            Err(err) => {
                debug!(target: "perceiver", %err, "describeNode failed for scrollable element");
            }
        }
    }

    backend_ids
}

/// Build a [`TreeResult`] for the page or one specific frame.
///
/// Session routing follows the frame topology: an out-of-process frame is
/// queried through its own session with no extra parameters; a same-process
/// frame through the page session with `{ frameId }`; the main frame through
/// the page session.
pub async fn get_accessibility_tree(
    page: &dyn PagePerception,
    target_frame: Option<&FrameId>,
) -> Result<TreeResult, PerceiveError> {
    let maps = build_backend_id_maps(page, target_frame).await?;

    page.send_cdp("Accessibility.enable", json!({}), target_frame)
        .await?;

    let result = fetch_and_build(page, target_frame, &maps).await;

    if let Err(err) = page
        .send_cdp("Accessibility.disable", json!({}), target_frame)
        .await
    {
        debug!(target: "perceiver", %err, "Accessibility.disable failed during cleanup");
    }

    result
}

async fn fetch_and_build(
    page: &dyn PagePerception,
    target_frame: Option<&FrameId>,
    maps: &crate::model::BackendIdMaps,
) -> Result<TreeResult, PerceiveError> {
    // Same-process frames need the page session plus an explicit frameId;
    // out-of-process frames take no parameters on their own session.
    let (session_frame, params) = match target_frame {
        Some(frame) if !page.has_separate_session(frame) => {
            (None, json!({ "frameId": frame.as_str() }))
        }
        other => (other, json!({})),
    };

    let response = page
        .send_cdp("Accessibility.getFullAXTree", params, session_frame)
        .await?;

    let mut nodes: Vec<AxPayloadNode> = serde_json::from_value(
        response
            .get("nodes")
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new())),
    )
    .map_err(|err| PerceiveError::MalformedPayload(err.to_string()))?;

    let scrollable_ids = find_scrollable_backend_ids(page, target_frame).await;
    if !scrollable_ids.is_empty() {
        debug!(
            target: "perceiver",
            count = scrollable_ids.len(),
            "decorating scroll containers"
        );
    }
    decorate_roles(&mut nodes, &scrollable_ids);

    if nodes.is_empty() {
        warn!(target: "perceiver", "accessibility tree came back empty");
    }

    Ok(build_hierarchical_tree(
        nodes,
        &maps.tag_name_map,
        maps.xpath_map.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(json: Value) -> Vec<AxPayloadNode> {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn keeps_named_nodes_and_drops_empty_generics() {
        let nodes = payload(json!([
            { "nodeId": "1", "role": { "type": "role", "value": "RootWebArea" },
              "name": { "type": "computedString", "value": "Example" },
              "childIds": ["2", "3"] },
            { "nodeId": "2", "parentId": "1",
              "role": { "type": "role", "value": "link" },
              "name": { "type": "computedString", "value": "More information" },
              "backendDOMNodeId": 7 },
            { "nodeId": "3", "parentId": "1",
              "role": { "type": "role", "value": "generic" },
              "name": { "type": "computedString", "value": "" } },
        ]));

        let mut tags = TagNameMap::new();
        tags.insert(EncodedId::new(0, 7), "a".to_string());

        let result = build_hierarchical_tree(nodes, &tags, Default::default());
        assert_eq!(result.tree.len(), 1);
        let root = &result.tree[0];
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].role, "link");
        assert_eq!(
            root.children[0].encoded_id,
            Some(EncodedId::new(0, 7))
        );
        assert!(result.simplified.contains("[0-7] link: More information"));
    }

    #[test]
    fn single_child_generic_collapses_to_child() {
        let nodes = payload(json!([
            { "nodeId": "1", "role": { "type": "role", "value": "RootWebArea" },
              "name": { "type": "computedString", "value": "page" },
              "childIds": ["2"] },
            { "nodeId": "2", "parentId": "1",
              "role": { "type": "role", "value": "generic" },
              "childIds": ["3"] },
            { "nodeId": "3", "parentId": "2",
              "role": { "type": "role", "value": "button" },
              "name": { "type": "computedString", "value": "Go" } },
        ]));

        let result = build_hierarchical_tree(nodes, &TagNameMap::new(), Default::default());
        let root = &result.tree[0];
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].role, "button");
    }

    #[test]
    fn surviving_generic_takes_its_tag_name() {
        let nodes = payload(json!([
            { "nodeId": "1", "role": { "type": "role", "value": "RootWebArea" },
              "name": { "type": "computedString", "value": "page" },
              "childIds": ["2"] },
            { "nodeId": "2", "parentId": "1",
              "role": { "type": "role", "value": "generic" },
              "backendDOMNodeId": 4, "childIds": ["3", "4"] },
            { "nodeId": "3", "parentId": "2",
              "role": { "type": "role", "value": "button" },
              "name": { "type": "computedString", "value": "Yes" } },
            { "nodeId": "4", "parentId": "2",
              "role": { "type": "role", "value": "button" },
              "name": { "type": "computedString", "value": "No" } },
        ]));

        let mut tags = TagNameMap::new();
        tags.insert(EncodedId::new(0, 4), "div".to_string());

        let result = build_hierarchical_tree(nodes, &tags, Default::default());
        let wrapper = &result.tree[0].children[0];
        assert_eq!(wrapper.role, "div");
        assert_eq!(wrapper.children.len(), 2);
    }

    #[test]
    fn redundant_static_text_children_are_dropped() {
        let parent = AccessibilityNode {
            node_id: "1".to_string(),
            role: "button".to_string(),
            name: Some("Submit".to_string()),
            ..Default::default()
        };
        let children = vec![
            AccessibilityNode {
                node_id: "2".to_string(),
                role: "StaticText".to_string(),
                name: Some(" Submit ".to_string()),
                ..Default::default()
            },
            AccessibilityNode {
                node_id: "3".to_string(),
                role: "StaticText".to_string(),
                name: Some("other".to_string()),
                ..Default::default()
            },
        ];
        let kept = remove_redundant_static_text_children(&parent, children);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name.as_deref(), Some("other"));
    }

    #[test]
    fn pseudo_nodes_are_dropped() {
        let nodes = payload(json!([
            { "nodeId": "-100", "role": { "type": "role", "value": "button" },
              "name": { "type": "computedString", "value": "ghost" } },
            { "nodeId": "1", "role": { "type": "role", "value": "button" },
              "name": { "type": "computedString", "value": "real" } },
        ]));
        let result = build_hierarchical_tree(nodes, &TagNameMap::new(), Default::default());
        assert_eq!(result.tree.len(), 1);
        assert_eq!(result.tree[0].name.as_deref(), Some("real"));
    }

    #[test]
    fn link_urls_recorded_only_for_unambiguous_backend_ids() {
        let nodes = payload(json!([
            { "nodeId": "1", "role": { "type": "role", "value": "link" },
              "name": { "type": "computedString", "value": "docs" },
              "value": { "type": "url", "value": "https://example.com/docs" },
              "backendDOMNodeId": 5 },
            { "nodeId": "2", "role": { "type": "role", "value": "link" },
              "name": { "type": "computedString", "value": "dup" },
              "value": { "type": "url", "value": "https://example.com/dup" },
              "backendDOMNodeId": 9 },
        ]));

        let mut tags = TagNameMap::new();
        tags.insert(EncodedId::new(0, 5), "a".to_string());
        // Backend id 9 appears under two frame ordinals: ambiguous.
        tags.insert(EncodedId::new(0, 9), "a".to_string());
        tags.insert(EncodedId::new(1, 9), "a".to_string());

        let result = build_hierarchical_tree(nodes, &tags, Default::default());
        assert_eq!(
            result.id_to_url.get(&EncodedId::new(0, 5)).map(String::as_str),
            Some("https://example.com/docs")
        );
        assert!(result.id_to_url.keys().all(|k| k.backend_node_id() != 9));
    }

    #[test]
    fn scrollable_decoration_prefixes_roles() {
        let mut nodes = payload(json!([
            { "nodeId": "1", "role": { "type": "role", "value": "group" },
              "backendDOMNodeId": 11 },
            { "nodeId": "2", "role": { "type": "role", "value": "generic" },
              "backendDOMNodeId": 12 },
            { "nodeId": "3", "role": { "type": "role", "value": "button" },
              "backendDOMNodeId": 13 },
        ]));
        let scrollable: HashSet<i64> = [11, 12].into_iter().collect();
        decorate_roles(&mut nodes, &scrollable);

        assert_eq!(nodes[0].role_value(), "scrollable, group");
        assert_eq!(nodes[1].role_value(), "scrollable");
        assert_eq!(nodes[2].role_value(), "button");
    }

    #[test]
    fn iframe_roles_are_collected() {
        let nodes = payload(json!([
            { "nodeId": "1", "role": { "type": "role", "value": "RootWebArea" },
              "name": { "type": "computedString", "value": "page" },
              "childIds": ["2"] },
            { "nodeId": "2", "parentId": "1",
              "role": { "type": "role", "value": "Iframe" },
              "backendDOMNodeId": 21, "childIds": [] },
        ]));
        let result = build_hierarchical_tree(nodes, &TagNameMap::new(), Default::default());
        assert_eq!(result.iframes.len(), 1);
        assert_eq!(result.iframes[0].node_id, "2");
    }
}
