//! End-to-end observe / act / extract against a recorded transport.
//!
//! The transport replays canned CDP payloads for a static example.com-like
//! page; the model is the scripted provider. No browser involved.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use cdp_adapter::{CdpError, CdpErrorKind, CdpTransport, CommandTarget, TransportEvent};
use webpilot::llm::ScriptedLlmProvider;
use webpilot::{
    ActionType, AutomationConfig, Context, ExtractOptions, ObserveOptions,
};

/// Replays canned responses for the example page:
/// `<html><body><p>text</p><p><a>More information...</a></p></body></html>`.
struct RecordingTransport {
    fail_clicks: AtomicBool,
    click_attempts: AtomicUsize,
}

impl RecordingTransport {
    fn new() -> Self {
        Self {
            fail_clicks: AtomicBool::new(false),
            click_attempts: AtomicUsize::new(0),
        }
    }

    fn failing_clicks() -> Self {
        Self {
            fail_clicks: AtomicBool::new(true),
            click_attempts: AtomicUsize::new(0),
        }
    }

    fn dom_document() -> Value {
        json!({
            "root": {
                "nodeId": 1, "backendNodeId": 1, "nodeName": "#document", "nodeType": 9,
                "children": [{
                    "nodeId": 2, "backendNodeId": 2, "nodeName": "HTML", "nodeType": 1,
                    "children": [{
                        "nodeId": 3, "backendNodeId": 3, "nodeName": "BODY", "nodeType": 1,
                        "children": [
                            {
                                "nodeId": 4, "backendNodeId": 4, "nodeName": "P", "nodeType": 1,
                                "children": [
                                    { "nodeId": 5, "backendNodeId": 5, "nodeName": "#text", "nodeType": 3 },
                                ],
                            },
                            {
                                "nodeId": 6, "backendNodeId": 6, "nodeName": "P", "nodeType": 1,
                                "children": [{
                                    "nodeId": 7, "backendNodeId": 7, "nodeName": "A", "nodeType": 1,
                                    "children": [
                                        { "nodeId": 8, "backendNodeId": 8, "nodeName": "#text", "nodeType": 3 },
                                    ],
                                }],
                            },
                        ],
                    }],
                }],
            }
        })
    }

    fn ax_tree() -> Value {
        json!({
            "nodes": [
                {
                    "nodeId": "1",
                    "role": { "type": "role", "value": "RootWebArea" },
                    "name": { "type": "computedString", "value": "Example Domain" },
                    "childIds": ["2"],
                    "backendDOMNodeId": 1,
                },
                {
                    "nodeId": "2",
                    "parentId": "1",
                    "role": { "type": "role", "value": "link" },
                    "name": { "type": "computedString", "value": "More information..." },
                    "value": { "type": "url", "value": "https://www.iana.org/domains/example" },
                    "backendDOMNodeId": 7,
                },
            ]
        })
    }

    fn frame_tree() -> Value {
        json!({
            "frameTree": {
                "frame": { "id": "main-frame", "url": "https://example.com/" },
                "childFrames": [],
            }
        })
    }

    fn evaluate_response(expression: &str) -> Value {
        if expression.starts_with("if (!window.__aiBrowserAutomationInjected)") {
            json!({ "result": { "value": null } })
        } else if expression.starts_with("!!window.__aiBrowserAutomationInjected") {
            json!({ "result": { "value": true } })
        } else if expression.contains("getScrollableElementXpaths") {
            json!({ "result": { "value": [] } })
        } else if expression.contains("location.href") {
            json!({ "result": { "value": "https://example.com/" } })
        } else if expression.contains("document.title") {
            json!({ "result": { "value": "Example Domain" } })
        } else if expression.contains("document.readyState") {
            json!({ "result": { "value": "complete" } })
        } else if expression.contains("document.evaluate") {
            json!({ "result": { "objectId": "obj-link" } })
        } else if expression.contains("innerText") {
            json!({ "result": { "value": "Example Domain\nMore information..." } })
        } else {
            json!({ "result": { "value": null } })
        }
    }
}

#[async_trait]
impl CdpTransport for RecordingTransport {
    async fn start(&self) -> Result<(), CdpError> {
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        futures::future::pending().await
    }

    async fn send(
        &self,
        _target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, CdpError> {
        match method {
            "Target.createTarget" => Ok(json!({ "targetId": "page-target" })),
            "Target.attachToTarget" => {
                let target_id = params.get("targetId").and_then(Value::as_str).unwrap_or("");
                if target_id == "page-target" {
                    Ok(json!({ "sessionId": "page-session" }))
                } else {
                    Err(CdpError::new(CdpErrorKind::Protocol)
                        .with_hint("cdp error -32602: No target with given id found"))
                }
            }
            "Page.getFrameTree" => Ok(Self::frame_tree()),
            "DOM.getDocument" => Ok(Self::dom_document()),
            "Accessibility.getFullAXTree" => Ok(Self::ax_tree()),
            "Runtime.evaluate" => {
                let expression = params
                    .get("expression")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                Ok(Self::evaluate_response(expression))
            }
            "Runtime.callFunctionOn" => {
                let declaration = params
                    .get("functionDeclaration")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                if declaration.contains("this.click()") {
                    self.click_attempts.fetch_add(1, Ordering::SeqCst);
                    if self.fail_clicks.load(Ordering::SeqCst) {
                        return Err(CdpError::new(CdpErrorKind::Protocol)
                            .with_method(method)
                            .with_hint("node detached from document"));
                    }
                }
                Ok(json!({ "result": { "value": null } }))
            }
            "Network.getCookies" => Ok(json!({
                "cookies": [{ "name": "session", "value": "abc123", "domain": "example.com" }],
            })),
            "Performance.getMetrics" => Ok(json!({
                "metrics": [
                    { "name": "Documents", "value": 1.0 },
                    { "name": "JSHeapUsedSize", "value": 1048576.0 },
                ],
            })),
            "Page.captureSnapshot" => Ok(json!({ "data": "From: <Saved by webpilot>" })),
            _ => Ok(json!({})),
        }
    }
}

fn test_config() -> AutomationConfig {
    let mut config = AutomationConfig::default();
    // Keep waits short so failing paths do not stretch the suite.
    config.dom_settle_timeout_ms = 3_000;
    config.act_timeout_ms = 10_000;
    config
}

#[tokio::test]
async fn observe_maps_element_ids_to_xpaths() {
    let llm = Arc::new(ScriptedLlmProvider::new([json!([
        { "elementId": "0-7", "description": "More information link", "action": "click" },
    ])]));
    let transport = Arc::new(RecordingTransport::new());
    let context = Context::with_transport(transport, test_config(), llm)
        .await
        .unwrap();
    let page = context.new_page("https://example.com").await.unwrap();

    let results = page.observe("find all links").await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].selector, "xpath=/html[1]/body[1]/p[2]/a[1]");
    assert!(results[0].description.contains("More information"));
    assert!(results[0].selector.starts_with("xpath="));
}

#[tokio::test]
async fn observe_from_act_returns_one_result_with_method() {
    let llm = Arc::new(ScriptedLlmProvider::new([json!({
        "elementId": "0-7",
        "description": "More information link",
        "method": "click",
        "arguments": [],
    })]));
    let transport = Arc::new(RecordingTransport::new());
    let context = Context::with_transport(transport, test_config(), llm)
        .await
        .unwrap();
    let page = context.new_page("https://example.com").await.unwrap();

    let results = page
        .observe(ObserveOptions {
            instruction: Some("click the more information link".to_string()),
            from_act: true,
            return_action: true,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(
        results[0].method,
        Some(webpilot::ActionMethod::Click)
    );
    assert_eq!(results[0].selector, "xpath=/html[1]/body[1]/p[2]/a[1]");
}

#[tokio::test]
async fn act_from_instruction_clicks_the_observed_element() {
    let llm = Arc::new(ScriptedLlmProvider::new([json!({
        "elementId": "0-7",
        "description": "More information link",
        "method": "click",
        "arguments": [],
    })]));
    let transport = Arc::new(RecordingTransport::new());
    let context = Context::with_transport(transport.clone(), test_config(), llm)
        .await
        .unwrap();
    let page = context.new_page("https://example.com").await.unwrap();

    let result = page.act("click the More information link").await.unwrap();

    assert!(result.success, "act failed: {:?}", result.error);
    assert_eq!(result.action, ActionType::Click);
    assert_eq!(
        result.selector.as_deref(),
        Some("xpath=/html[1]/body[1]/p[2]/a[1]")
    );
    assert_eq!(transport.click_attempts.load(Ordering::SeqCst), 1);
    let metadata = result.metadata.unwrap();
    assert_eq!(metadata["method"], "click");
}

#[tokio::test]
async fn self_heal_retries_until_exhausted() {
    let act_response = json!({
        "elementId": "0-7",
        "description": "login button",
        "method": "click",
        "arguments": [],
    });
    // One initial observation plus one per healing attempt.
    let llm = Arc::new(ScriptedLlmProvider::new([
        act_response.clone(),
        act_response.clone(),
        act_response.clone(),
    ]));
    let transport = Arc::new(RecordingTransport::failing_clicks());
    let mut config = test_config();
    config.max_retries = 2;
    let context = Context::with_transport(transport.clone(), config, llm)
        .await
        .unwrap();
    let page = context.new_page("https://example.com").await.unwrap();

    let result = page.act("click login").await.unwrap();

    assert!(!result.success);
    assert!(result.error.as_deref().unwrap_or("").contains("click"));
    let metadata = result.metadata.unwrap();
    assert_eq!(metadata["self_healing_attempted"], true);
    assert_eq!(metadata["retry_count"], 2);
    assert_eq!(transport.click_attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn not_supported_method_fails_without_retry() {
    let llm = Arc::new(ScriptedLlmProvider::new([json!({
        "elementId": "0-7",
        "description": "impossible request",
        "method": "not-supported",
        "arguments": [],
    })]));
    let transport = Arc::new(RecordingTransport::new());
    let context = Context::with_transport(transport.clone(), test_config(), llm.clone())
        .await
        .unwrap();
    let page = context.new_page("https://example.com").await.unwrap();

    let result = page.act("rotate the page by 45 degrees").await.unwrap();

    assert!(!result.success);
    assert!(result
        .error
        .as_deref()
        .unwrap_or("")
        .contains("not-supported"));
    assert_eq!(transport.click_attempts.load(Ordering::SeqCst), 0);
    assert_eq!(llm.remaining(), 0);
}

#[tokio::test]
async fn extract_validates_against_the_schema() {
    let llm = Arc::new(ScriptedLlmProvider::new([json!({
        "title": "Example Domain",
    })]));
    let transport = Arc::new(RecordingTransport::new());
    let context = Context::with_transport(transport, test_config(), llm)
        .await
        .unwrap();
    let page = context.new_page("https://example.com").await.unwrap();

    let schema = json!({
        "type": "object",
        "required": ["title"],
        "properties": { "title": { "type": "string" } },
    });
    let result = page.extract(ExtractOptions::new(schema)).await.unwrap();
    assert_eq!(result.data["title"], "Example Domain");
    assert_eq!(result.metadata["url"], "https://example.com/");
}

#[tokio::test]
async fn extract_surfaces_schema_violations() {
    let llm = Arc::new(ScriptedLlmProvider::new([json!({
        "unexpected": 42,
    })]));
    let transport = Arc::new(RecordingTransport::new());
    let context = Context::with_transport(transport, test_config(), llm)
        .await
        .unwrap();
    let page = context.new_page("https://example.com").await.unwrap();

    let schema = json!({
        "type": "object",
        "required": ["title"],
        "properties": { "title": { "type": "string" } },
    });
    let err = page.extract(ExtractOptions::new(schema)).await.unwrap_err();
    match err {
        webpilot::AutomationError::SchemaValidation { reason, payload } => {
            assert!(reason.contains("title"));
            assert_eq!(payload["unexpected"], 42);
        }
        other => panic!("expected schema validation error, got {other}"),
    }
}

#[tokio::test]
async fn cdp_conveniences_round_trip_through_the_pool() {
    let llm = Arc::new(ScriptedLlmProvider::default());
    let transport = Arc::new(RecordingTransport::new());
    let context = Context::with_transport(transport, test_config(), llm)
        .await
        .unwrap();
    let page = context.new_page("https://example.com").await.unwrap();

    let cookies = page.get_cookies().await.unwrap();
    assert_eq!(cookies.len(), 1);
    assert_eq!(cookies[0]["name"], "session");

    let metrics = page.get_performance_metrics().await.unwrap();
    assert_eq!(metrics.get("Documents"), Some(&1.0));
    assert_eq!(metrics.get("JSHeapUsedSize"), Some(&1_048_576.0));

    let snapshot = page.capture_snapshot().await.unwrap();
    assert!(snapshot.starts_with("From:"));

    page.emulate_network_conditions(false, 50, -1, -1)
        .await
        .unwrap();
    page.set_request_interception(&["*"]).await.unwrap();
}

#[tokio::test]
async fn frame_ordinals_are_stable_until_reset() {
    let llm = Arc::new(ScriptedLlmProvider::default());
    let transport = Arc::new(RecordingTransport::new());
    let context = Context::with_transport(transport, test_config(), llm)
        .await
        .unwrap();
    let page = context.new_page("https://example.com").await.unwrap();

    let frame_a = webpilot::FrameId::new("frame-a");
    let frame_b = webpilot::FrameId::new("frame-b");

    assert_eq!(page.ordinal_for_frame_id(None), 0);
    assert_eq!(page.ordinal_for_frame_id(Some(&frame_a)), 1);
    assert_eq!(page.ordinal_for_frame_id(Some(&frame_b)), 2);
    // Repeated lookups never reassign.
    assert_eq!(page.ordinal_for_frame_id(Some(&frame_a)), 1);
    assert_eq!(page.ordinal_for_frame_id(None), 0);

    page.reset_frame_ordinals();
    assert_eq!(page.ordinal_for_frame_id(None), 0);
    assert_eq!(page.ordinal_for_frame_id(Some(&frame_b)), 1);
}
