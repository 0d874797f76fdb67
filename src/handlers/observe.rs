//! Observe: accessibility outline → model → validated element candidates.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use perceiver_structural::{get_accessibility_tree, get_accessibility_tree_with_frames};
use webpilot_core_types::{ActionMethod, EncodedId, ObserveResult, XPathMap};

use crate::errors::Result;
use crate::llm::ChatMessage;
use crate::page::Page;

/// Options for one observation.
#[derive(Clone, Debug, Default)]
pub struct ObserveOptions {
    pub instruction: Option<String>,
    /// Restrict candidates to visible elements (hint passed to the model).
    pub only_visible: bool,
    /// Outline each returned element on the page.
    pub draw_overlay: bool,
    /// Stitch iframes into the outline and resolve across frames.
    pub iframes: bool,
    /// Act-mode: exactly one result with a method and arguments.
    pub from_act: bool,
    /// Ask for a suggested action on each candidate.
    pub return_action: bool,
    pub model_name: Option<String>,
}

impl From<&str> for ObserveOptions {
    fn from(instruction: &str) -> Self {
        Self {
            instruction: Some(instruction.to_string()),
            ..Default::default()
        }
    }
}

impl From<String> for ObserveOptions {
    fn from(instruction: String) -> Self {
        Self {
            instruction: Some(instruction),
            ..Default::default()
        }
    }
}

const SYSTEM_PROMPT: &str =
    "You are a web automation assistant that identifies interactive elements on web pages. \
     You always answer with JSON and nothing else.";

pub(crate) async fn handle(page: &Page, options: ObserveOptions) -> Result<Vec<ObserveResult>> {
    info!(
        target: "observe",
        instruction = options.instruction.as_deref().unwrap_or(""),
        iframes = options.iframes,
        from_act = options.from_act,
        "starting observation"
    );

    page.wait_for_settled_dom(None).await?;
    page.ensure_helper_script().await;

    let (outline, xpath_map) = if options.iframes {
        let combined = get_accessibility_tree_with_frames(page).await?;
        (combined.combined_tree, combined.combined_xpath_map)
    } else {
        let tree = get_accessibility_tree(page, None).await?;
        (tree.simplified, tree.xpath_map)
    };

    let url = page.url().await.unwrap_or_default();
    let title = page.title().await.unwrap_or_default();

    let prompt = if options.from_act {
        build_act_prompt(&url, &title, &outline, &options)
    } else {
        build_observe_prompt(&url, &title, &outline, &options)
    };

    let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)];
    let response = page.llm().chat_json(&messages, 0.1).await?;

    let mut results = parse_observe_response(&response, &xpath_map, options.from_act);

    // Text and comment tails are never valid act targets.
    results.retain(|result| {
        let xpath = result.xpath();
        !(xpath.contains("/text()[") || xpath.contains("/comment()["))
    });

    if options.from_act {
        results.truncate(1);
    }

    if options.draw_overlay && !results.is_empty() {
        draw_overlay(page, &results).await;
    }

    info!(target: "observe", found = results.len(), "observation completed");
    Ok(results)
}

fn build_observe_prompt(url: &str, title: &str, outline: &str, options: &ObserveOptions) -> String {
    let mut prompt = format!(
        "Analyze the following web page and identify interactive elements.\n\n\
         Page URL: {url}\nPage Title: {title}\n\n\
         Accessibility outline (bracketed labels are element ids):\n{outline}\n"
    );
    if options.only_visible {
        prompt.push_str("\nOnly include elements currently visible in the viewport.\n");
    }
    match &options.instruction {
        Some(instruction) => {
            prompt.push_str(&format!("\nUser Instruction: {instruction}\n"));
        }
        None => {
            prompt.push_str("\nIdentify the most important interactive elements on this page.\n");
        }
    }
    let action_field = if options.return_action {
        ",\n    \"action\": \"suggested action (click, fill, ...)\""
    } else {
        ""
    };
    prompt.push_str(&format!(
        "\nReturn a JSON array of elements in this format:\n\
         [\n  {{\n    \"elementId\": \"the bracketed id from the outline (e.g. 0-15)\",\n    \
         \"description\": \"human-readable description\"{action_field}\n  }}\n]\n\
         Only include elements that match the instruction.\n"
    ));
    prompt
}

fn build_act_prompt(url: &str, title: &str, outline: &str, options: &ObserveOptions) -> String {
    let methods = ActionMethod::supported()
        .iter()
        .map(|m| m.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let instruction = options.instruction.as_deref().unwrap_or("");
    format!(
        "Find the most relevant element to perform an action on given the following action: \
         {instruction}\n\n\
         Page URL: {url}\nPage Title: {title}\n\n\
         Accessibility outline (bracketed labels are element ids):\n{outline}\n\n\
         Provide a method and arguments for this element. The supported methods are: {methods}. \
         If none of them can express the action, use the literal string \"not-supported\".\n\n\
         Important:\n\
         - For fill/type actions, extract the text to input from the instruction\n\
         - For click actions, use the 'click' method with no arguments\n\
         - For press actions, extract the key to press (e.g. 'Enter', 'Tab', 'Space')\n\n\
         Return ONLY ONE element that best matches the action, as a JSON object:\n\
         {{\n  \"elementId\": \"the bracketed id from the outline (e.g. 0-15)\",\n  \
         \"description\": \"human-readable description\",\n  \
         \"method\": \"one of the supported methods\",\n  \
         \"arguments\": [\"array\", \"of\", \"string\", \"arguments\"]\n}}\n"
    )
}

#[derive(Debug, Deserialize)]
struct RawActEntry {
    #[serde(rename = "elementId")]
    element_id: String,
    #[serde(default)]
    description: String,
    method: String,
    #[serde(default)]
    arguments: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(rename = "elementId")]
    element_id: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    #[allow(dead_code)]
    action: Option<String>,
}

/// Parse and validate the model's answer. Invalid entries are dropped;
/// a payload that fails wholesale yields an empty list, never an error.
pub(crate) fn parse_observe_response(
    response: &Value,
    xpath_map: &XPathMap,
    from_act: bool,
) -> Vec<ObserveResult> {
    if from_act {
        // A single object is expected; tolerate a one-element array.
        let candidate = if let Some(items) = response.as_array() {
            items.first().cloned().unwrap_or(Value::Null)
        } else {
            response.clone()
        };
        let raw: RawActEntry = match serde_json::from_value(candidate) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(target: "observe", %err, "act observation failed validation");
                return Vec::new();
            }
        };
        let method = match raw.method.parse::<ActionMethod>() {
            Ok(method) => method,
            Err(err) => {
                warn!(target: "observe", %err, "act observation named an unknown method");
                return Vec::new();
            }
        };
        return build_result(&raw.element_id, &raw.description, xpath_map)
            .map(|mut result| {
                result.method = Some(method);
                result.arguments = raw.arguments;
                vec![result]
            })
            .unwrap_or_default();
    }

    let items = match response.as_array() {
        Some(items) => items.clone(),
        None => {
            warn!(target: "observe", "observation payload was not an array");
            return Vec::new();
        }
    };

    items
        .into_iter()
        .filter_map(|item| {
            let raw: RawEntry = match serde_json::from_value(item) {
                Ok(raw) => raw,
                Err(err) => {
                    debug!(target: "observe", %err, "skipping invalid element entry");
                    return None;
                }
            };
            build_result(&raw.element_id, &raw.description, xpath_map)
        })
        .collect()
}

fn build_result(
    element_id: &str,
    description: &str,
    xpath_map: &XPathMap,
) -> Option<ObserveResult> {
    let encoded = match EncodedId::parse(element_id) {
        Some(encoded) => encoded,
        None => {
            debug!(target: "observe", element_id, "dropping entry with malformed element id");
            return None;
        }
    };
    let xpath = xpath_map.get(&encoded).cloned().unwrap_or_default();
    if xpath.is_empty() {
        debug!(target: "observe", element = %encoded, "no xpath known for element");
    }
    Some(ObserveResult {
        selector: format!("xpath={xpath}"),
        description: if description.is_empty() {
            "No description".to_string()
        } else {
            description.to_string()
        },
        method: None,
        arguments: Vec::new(),
        encoded_id: Some(encoded),
    })
}

/// Outline returned elements on the page; failures are logged and swallowed.
async fn draw_overlay(page: &Page, results: &[ObserveResult]) {
    let xpaths: Vec<Value> = results
        .iter()
        .map(|result| Value::String(result.xpath().to_string()))
        .collect();
    let expression = format!(
        "window.drawObserveOverlay && window.drawObserveOverlay({})",
        Value::Array(xpaths)
    );
    if let Err(err) = page.evaluate(&expression).await {
        debug!(target: "observe", %err, "overlay drawing failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map_with(entries: &[(&str, &str)]) -> XPathMap {
        entries
            .iter()
            .filter_map(|(id, xpath)| {
                EncodedId::parse(id).map(|enc| (enc, xpath.to_string()))
            })
            .collect()
    }

    #[test]
    fn act_response_yields_single_result_with_method() {
        let map = map_with(&[("0-7", "/html[1]/body[1]/p[2]/a[1]")]);
        let response = json!({
            "elementId": "0-7",
            "description": "More information link",
            "method": "click",
            "arguments": [],
        });

        let results = parse_observe_response(&response, &map, true);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].selector, "xpath=/html[1]/body[1]/p[2]/a[1]");
        assert_eq!(results[0].method, Some(ActionMethod::Click));
    }

    #[test]
    fn unknown_method_invalidates_act_entry() {
        let map = map_with(&[("0-7", "/html[1]/a[1]")]);
        let response = json!({
            "elementId": "0-7",
            "description": "x",
            "method": "teleport",
            "arguments": [],
        });
        assert!(parse_observe_response(&response, &map, true).is_empty());
    }

    #[test]
    fn not_supported_method_is_preserved() {
        let map = map_with(&[("0-7", "/html[1]/a[1]")]);
        let response = json!({
            "elementId": "0-7",
            "description": "x",
            "method": "not-supported",
            "arguments": [],
        });
        let results = parse_observe_response(&response, &map, true);
        assert_eq!(results[0].method, Some(ActionMethod::NotSupported));
    }

    #[test]
    fn generic_response_drops_invalid_entries() {
        let map = map_with(&[("0-3", "/html[1]/body[1]/button[1]")]);
        let response = json!([
            { "elementId": "0-3", "description": "ok" },
            { "description": "missing id" },
            { "elementId": "bogus", "description": "malformed id" },
        ]);
        let results = parse_observe_response(&response, &map, false);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].encoded_id, EncodedId::parse("0-3"));
    }

    #[test]
    fn unknown_element_id_keeps_empty_selector_prefix() {
        let map = XPathMap::new();
        let response = json!([{ "elementId": "0-99", "description": "ghost" }]);
        let results = parse_observe_response(&response, &map, false);
        assert_eq!(results[0].selector, "xpath=");
        assert!(!results[0].has_selector());
    }
}
