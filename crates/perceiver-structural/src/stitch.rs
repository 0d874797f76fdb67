//! Multi-frame tree stitching.
//!
//! Runs the single-frame builder once per reachable frame, computes the host
//! iframe element (backend id + absolute XPath) for every non-main frame,
//! injects each subtree outline into the main outline right under its host
//! line, and merges per-frame XPath maps under absolute host prefixes.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, warn};

use webpilot_core_types::{EncodedId, FrameId, XPathMap};

use crate::errors::PerceiveError;
use crate::ports::{FrameInfo, PagePerception};
use crate::tree::get_accessibility_tree;

/// Combined view across every frame of a page.
#[derive(Clone, Debug, Default)]
pub struct CombinedTree {
    pub combined_tree: String,
    pub combined_xpath_map: XPathMap,
    pub combined_url_map: HashMap<EncodedId, String>,
}

/// Everything remembered about one frame's snapshot before stitching.
struct FrameSnapshot {
    tree: String,
    xpath_map: XPathMap,
    url_map: HashMap<EncodedId, String>,
    frame_xpath: String,
    backend_node_id: Option<i64>,
    frame_id: Option<FrameId>,
}

/// Positional absolute XPath of an element, evaluated with the element bound
/// as `this`.
const FRAME_ROOT_XPATH_FN: &str = r#"function() {
  const pos = (el) => {
    let i = 1;
    for (let sib = el.previousElementSibling; sib; sib = sib.previousElementSibling) {
      if (sib.tagName === el.tagName) i += 1;
    }
    return i;
  };
  const segs = [];
  for (let el = this; el; el = el.parentElement) {
    segs.unshift(`${el.tagName.toLowerCase()}[${pos(el)}]`);
  }
  return `/${segs.join('/')}`;
}"#;

/// Backend node id of the iframe element hosting a frame. `None` for main.
async fn get_frame_root_backend_node_id(
    page: &dyn PagePerception,
    frame: &FrameInfo,
) -> Result<Option<i64>, PerceiveError> {
    if frame.is_main() {
        return Ok(None);
    }
    let response = page
        .send_cdp(
            "DOM.getFrameOwner",
            json!({ "frameId": frame.id.as_str() }),
            frame.parent.as_ref(),
        )
        .await?;
    Ok(response.get("backendNodeId").and_then(Value::as_i64))
}

/// Absolute XPath of the iframe element hosting a frame, within its parent
/// document. `/` when the frame is main or the owner cannot be resolved.
async fn get_frame_root_xpath(
    page: &dyn PagePerception,
    frame: &FrameInfo,
    owner_backend_id: Option<i64>,
) -> String {
    let backend_id = match owner_backend_id {
        Some(id) => id,
        None => return "/".to_string(),
    };

    let resolved = page
        .send_cdp(
            "DOM.resolveNode",
            json!({ "backendNodeId": backend_id }),
            frame.parent.as_ref(),
        )
        .await;

    let object_id = match resolved {
        Ok(response) => response
            .pointer("/object/objectId")
            .and_then(Value::as_str)
            .map(str::to_string),
        Err(err) => {
            debug!(target: "perceiver", %err, frame = %frame.id, "resolveNode for frame owner failed");
            None
        }
    };

    let object_id = match object_id {
        Some(id) => id,
        None => return "/".to_string(),
    };

    match page
        .call_function_on(frame.parent.as_ref(), &object_id, FRAME_ROOT_XPATH_FN)
        .await
    {
        Ok(response) => response
            .pointer("/result/value")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| "/".to_string()),
        Err(err) => {
            debug!(target: "perceiver", %err, frame = %frame.id, "frame root xpath evaluation failed");
            "/".to_string()
        }
    }
}

static LABEL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\[([^\]]+)\]").unwrap());
static ENCODED_LABEL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+-\d+$").unwrap());

/// The only encoded id in `id_to_tree` ending in this backend id, or `None`
/// when several frames share it. A collision means we cannot tell which
/// subtree belongs under the line, so the ambiguity is surfaced and the line
/// left alone.
fn unique_by_backend<'a>(
    id_to_tree: &'a HashMap<EncodedId, String>,
    backend_id: i64,
) -> Option<&'a EncodedId> {
    let mut found: Option<&EncodedId> = None;
    for enc in id_to_tree.keys() {
        if enc.backend_node_id() == backend_id {
            if let Some(previous) = found {
                warn!(
                    target: "perceiver",
                    first = %previous,
                    second = %enc,
                    "backend id collision across frames; skipping subtree injection"
                );
                return None;
            }
            found = Some(enc);
        }
    }
    found
}

/// Inject iframe subtree outlines into the main outline.
///
/// Walks the outline line by line; a bracketed label matching a known host
/// iframe (exactly, or uniquely by backend id) has the matching subtree
/// spliced in immediately after, indented two spaces deeper. A `visited` set
/// prevents reinjection.
pub fn inject_subtrees(tree: &str, id_to_tree: &HashMap<EncodedId, String>) -> String {
    struct StackEntry {
        lines: Vec<String>,
        idx: usize,
        indent: String,
    }

    let mut stack = vec![StackEntry {
        lines: tree.split('\n').map(str::to_string).collect(),
        idx: 0,
        indent: String::new(),
    }];
    let mut out: Vec<String> = Vec::new();
    let mut visited: HashSet<EncodedId> = HashSet::new();

    loop {
        let next = match stack.last_mut() {
            None => break,
            Some(top) if top.idx >= top.lines.len() => None,
            Some(top) => {
                let raw = top.lines[top.idx].clone();
                top.idx += 1;
                Some((raw, top.indent.clone()))
            }
        };

        let (raw, indent) = match next {
            Some(pair) => pair,
            None => {
                stack.pop();
                continue;
            }
        };

        let line = format!("{indent}{raw}");
        out.push(line.clone());

        let label = match LABEL_RE.captures(&raw) {
            Some(captures) => captures.get(1).map(|m| m.as_str().to_string()),
            None => None,
        };
        let label = match label {
            Some(label) => label,
            None => continue,
        };

        // Exact "<ordinal>-<backend>" match first, then unique-by-backend.
        let enc = if let Some(exact) = EncodedId::parse(&label)
            .filter(|candidate| id_to_tree.contains_key(candidate))
        {
            Some(exact)
        } else {
            let backend_id = if ENCODED_LABEL_RE.is_match(&label) {
                label.split('-').nth(1).and_then(|s| s.parse::<i64>().ok())
            } else {
                label.parse::<i64>().ok()
            };
            backend_id.and_then(|id| unique_by_backend(id_to_tree, id).cloned())
        };

        let enc = match enc {
            Some(enc) if !visited.contains(&enc) => enc,
            _ => continue,
        };

        let child = match id_to_tree.get(&enc) {
            Some(child) if !child.is_empty() => child.clone(),
            _ => continue,
        };

        visited.insert(enc);
        let child_indent = line.len() - line.trim_start().len();
        stack.push(StackEntry {
            lines: child.split('\n').map(str::to_string).collect(),
            idx: 0,
            indent: format!("{}  ", " ".repeat(child_indent)),
        });
    }

    out.join("\n")
}

/// Absolute XPath prefix for a frame: the host hops of every ancestor iframe
/// joined root-to-leaf. Empty for the main frame.
fn full_prefix(
    frame: Option<&FrameId>,
    host_xpath: &HashMap<FrameId, String>,
    parent_of: &HashMap<FrameId, Option<FrameId>>,
) -> String {
    let mut hops: Vec<&str> = Vec::new();
    let mut current = frame;
    while let Some(frame_id) = current {
        if let Some(hop) = host_xpath.get(frame_id) {
            if hop != "/" {
                hops.push(hop);
            }
        }
        current = parent_of.get(frame_id).and_then(Option::as_ref);
    }
    hops.reverse();
    hops.concat()
}

/// Build and stitch accessibility trees for the main document and every
/// reachable iframe.
///
/// A page with no child frames produces a single snapshot and no stitching
/// steps. Per-frame failures are logged and skipped so one broken iframe
/// cannot take down the whole observation.
pub async fn get_accessibility_tree_with_frames(
    page: &dyn PagePerception,
) -> Result<CombinedTree, PerceiveError> {
    let frames = page.frames().await.map_err(PerceiveError::from)?;
    if frames.is_empty() {
        return Err(PerceiveError::Internal(
            "frame walk returned no frames".to_string(),
        ));
    }

    let mut snapshots: Vec<FrameSnapshot> = Vec::new();
    let mut host_xpath: HashMap<FrameId, String> = HashMap::new();
    let mut parent_of: HashMap<FrameId, Option<FrameId>> = HashMap::new();

    for frame in &frames {
        parent_of.insert(frame.id.clone(), frame.parent.clone());

        let target = if frame.is_main() {
            None
        } else {
            Some(&frame.id)
        };

        let result = get_accessibility_tree(page, target).await;
        let tree = match result {
            Ok(tree) => tree,
            Err(err) => {
                warn!(
                    target: "perceiver",
                    %err,
                    frame = %frame.id,
                    url = %frame.url,
                    "failed to build accessibility tree for frame"
                );
                continue;
            }
        };

        let backend_node_id = match get_frame_root_backend_node_id(page, frame).await {
            Ok(id) => id,
            Err(err) => {
                debug!(target: "perceiver", %err, frame = %frame.id, "frame owner lookup failed");
                None
            }
        };

        let frame_xpath = if frame.is_main() {
            "/".to_string()
        } else {
            get_frame_root_xpath(page, frame, backend_node_id).await
        };
        host_xpath.insert(frame.id.clone(), frame_xpath.clone());

        snapshots.push(FrameSnapshot {
            tree: tree.simplified.trim_end().to_string(),
            xpath_map: tree.xpath_map,
            url_map: tree.id_to_url,
            frame_xpath,
            backend_node_id,
            frame_id: if frame.is_main() {
                None
            } else {
                Some(frame.id.clone())
            },
        });
    }

    // Merge per-frame maps under their absolute host prefixes.
    let mut combined_xpath_map: XPathMap = XPathMap::new();
    let mut combined_url_map: HashMap<EncodedId, String> = HashMap::new();

    for snapshot in &snapshots {
        let prefix = match &snapshot.frame_id {
            None => String::new(),
            Some(frame_id) => full_prefix(Some(frame_id), &host_xpath, &parent_of),
        };

        for (enc, local) in &snapshot.xpath_map {
            let absolute = if local.is_empty() {
                if prefix.is_empty() {
                    "/".to_string()
                } else {
                    prefix.clone()
                }
            } else if prefix.is_empty() {
                local.clone()
            } else {
                format!(
                    "{}/{}",
                    prefix.trim_end_matches('/'),
                    local.trim_start_matches('/')
                )
            };
            combined_xpath_map.insert(enc.clone(), absolute);
        }

        combined_url_map.extend(
            snapshot
                .url_map
                .iter()
                .map(|(enc, url)| (enc.clone(), url.clone())),
        );
    }

    // EncodedId of each host iframe element → that frame's outline.
    let mut id_to_tree: HashMap<EncodedId, String> = HashMap::new();
    for snapshot in &snapshots {
        if let (Some(frame_id), Some(backend_id)) = (&snapshot.frame_id, snapshot.backend_node_id) {
            let enc = page.encode_with_frame_id(Some(frame_id), backend_id);
            id_to_tree.insert(enc, snapshot.tree.clone());
        }
    }

    let root = snapshots.iter().find(|snap| snap.frame_xpath == "/");
    let combined_tree = match root {
        Some(root) => inject_subtrees(&root.tree, &id_to_tree),
        None => snapshots
            .first()
            .map(|snap| snap.tree.clone())
            .unwrap_or_default(),
    };

    Ok(CombinedTree {
        combined_tree,
        combined_xpath_map,
        combined_url_map,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injects_subtree_under_matching_label() {
        let main = "[0-1] RootWebArea: Outer\n  [0-42] Iframe";
        let mut id_to_tree = HashMap::new();
        id_to_tree.insert(
            EncodedId::new(1, 42),
            "[1-7] button: Click me in iframe".to_string(),
        );

        let combined = inject_subtrees(main, &id_to_tree);
        let lines: Vec<&str> = combined.split('\n').collect();
        assert_eq!(lines[1], "  [0-42] Iframe");
        assert_eq!(lines[2], "    [1-7] button: Click me in iframe");
    }

    #[test]
    fn visited_set_prevents_reinjection() {
        let main = "[0-42] Iframe\n[0-42] Iframe";
        let mut id_to_tree = HashMap::new();
        id_to_tree.insert(EncodedId::new(1, 42), "[1-7] button: inner".to_string());

        let combined = inject_subtrees(main, &id_to_tree);
        assert_eq!(
            combined.matches("button: inner").count(),
            1,
            "subtree must be injected exactly once"
        );
    }

    #[test]
    fn backend_collision_skips_injection() {
        let main = "[0-42] Iframe";
        let mut id_to_tree = HashMap::new();
        id_to_tree.insert(EncodedId::new(1, 42), "[1-7] button: one".to_string());
        id_to_tree.insert(EncodedId::new(2, 42), "[2-9] button: two".to_string());

        let combined = inject_subtrees(main, &id_to_tree);
        assert!(!combined.contains("button: one"));
        assert!(!combined.contains("button: two"));
    }

    #[test]
    fn full_prefix_joins_host_hops_root_first() {
        let outer = FrameId::new("outer");
        let inner = FrameId::new("inner");

        let mut host_xpath = HashMap::new();
        host_xpath.insert(outer.clone(), "/html[1]/body[1]/iframe[1]".to_string());
        host_xpath.insert(inner.clone(), "/html[1]/body[1]/iframe[2]".to_string());

        let mut parent_of = HashMap::new();
        parent_of.insert(outer.clone(), None);
        parent_of.insert(inner.clone(), Some(outer.clone()));

        assert_eq!(
            full_prefix(Some(&inner), &host_xpath, &parent_of),
            "/html[1]/body[1]/iframe[1]/html[1]/body[1]/iframe[2]"
        );
        assert_eq!(
            full_prefix(Some(&outer), &host_xpath, &parent_of),
            "/html[1]/body[1]/iframe[1]"
        );
        assert_eq!(full_prefix(None, &host_xpath, &parent_of), "");
    }
}
