//! CDP conveniences on the page facade.
//!
//! Raw-protocol capabilities that sit next to observe/act/extract: cookies,
//! network shaping and interception, performance metrics, tracing, console
//! log capture, and DOM snapshots.

use std::collections::HashMap;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use crate::errors::Result;
use crate::page::Page;

/// One captured browser console entry.
#[derive(Clone, Debug)]
pub struct ConsoleEntry {
    pub level: String,
    pub text: String,
    pub url: Option<String>,
}

impl Page {
    /// Escape hatch: send any CDP command on the page session.
    pub async fn send_cdp_command(&self, method: &str, params: Value) -> Result<Value> {
        Ok(self.raw_page_send(method, params).await?)
    }

    /// All cookies visible to this page.
    pub async fn get_cookies(&self) -> Result<Vec<Value>> {
        let response = self.raw_page_send("Network.getCookies", json!({})).await?;
        Ok(response
            .get("cookies")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// Shape the network: offline toggle, added latency, throughput caps in
    /// bytes/sec (`-1` for unlimited).
    pub async fn emulate_network_conditions(
        &self,
        offline: bool,
        latency_ms: u64,
        download_throughput: i64,
        upload_throughput: i64,
    ) -> Result<()> {
        self.raw_page_send(
            "Network.emulateNetworkConditions",
            json!({
                "offline": offline,
                "latency": latency_ms,
                "downloadThroughput": download_throughput,
                "uploadThroughput": upload_throughput,
            }),
        )
        .await?;
        Ok(())
    }

    /// Intercept requests matching the given URL patterns. Pair with a
    /// subscription on `Network.requestIntercepted` and answer each
    /// interception via [`Page::continue_intercepted_request`].
    pub async fn set_request_interception(&self, url_patterns: &[&str]) -> Result<()> {
        let patterns: Vec<Value> = url_patterns
            .iter()
            .map(|pattern| json!({ "urlPattern": pattern }))
            .collect();
        self.raw_page_send("Network.enable", json!({})).await?;
        self.raw_page_send(
            "Network.setRequestInterception",
            json!({ "patterns": patterns }),
        )
        .await?;
        Ok(())
    }

    /// Release (or modify) an intercepted request. `overrides` may carry
    /// `url`, `method`, `postData`, `headers`, or `errorReason` to abort.
    pub async fn continue_intercepted_request(
        &self,
        interception_id: &str,
        overrides: Option<Value>,
    ) -> Result<()> {
        let mut params = json!({ "interceptionId": interception_id });
        if let Some(Value::Object(entries)) = overrides {
            for (key, value) in entries {
                params[key] = value;
            }
        }
        self.raw_page_send("Network.continueInterceptedRequest", params)
            .await?;
        Ok(())
    }

    /// Runtime counters from the Performance domain (layout counts, script
    /// duration, JS heap, ...).
    pub async fn get_performance_metrics(&self) -> Result<HashMap<String, f64>> {
        self.raw_page_send("Performance.enable", json!({})).await?;
        let response = self.raw_page_send("Performance.getMetrics", json!({})).await?;
        let mut metrics = HashMap::new();
        if let Some(entries) = response.get("metrics").and_then(Value::as_array) {
            for entry in entries {
                let name = entry.get("name").and_then(Value::as_str);
                let value = entry.get("value").and_then(Value::as_f64);
                if let (Some(name), Some(value)) = (name, value) {
                    metrics.insert(name.to_string(), value);
                }
            }
        }
        Ok(metrics)
    }

    /// Start a tracing session over the given categories.
    pub async fn start_tracing(&self, categories: &[&str]) -> Result<()> {
        self.raw_page_send(
            "Tracing.start",
            json!({ "categories": categories.join(",") }),
        )
        .await?;
        Ok(())
    }

    /// Stop tracing; completion and data arrive as `Tracing.*` events on the
    /// context's event feed.
    pub async fn end_tracing(&self) -> Result<()> {
        self.raw_page_send("Tracing.end", json!({})).await?;
        Ok(())
    }

    /// Capture the page as an MHTML snapshot.
    pub async fn capture_snapshot(&self) -> Result<String> {
        let response = self
            .raw_page_send("Page.captureSnapshot", json!({ "format": "mhtml" }))
            .await?;
        Ok(response
            .get("data")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    /// Frame/resource hierarchy as reported by the browser.
    pub async fn get_resource_tree(&self) -> Result<Value> {
        Ok(self.raw_page_send("Page.getResourceTree", json!({})).await?)
    }

    /// Stream browser console entries. Enables the Log domain and forwards
    /// every `Log.entryAdded` for this page until the receiver is dropped.
    pub async fn console_logs(&self) -> Result<mpsc::Receiver<ConsoleEntry>> {
        self.raw_page_send("Log.enable", json!({})).await?;

        let (tx, rx) = mpsc::channel(64);
        let mut events = self.event_feed();
        let page = self.clone();
        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                if event.method != "Log.entryAdded" {
                    continue;
                }
                if !page.session_is_mine(event.session_id.as_deref()) {
                    continue;
                }
                let entry = event.params.get("entry").cloned().unwrap_or(Value::Null);
                let console_entry = ConsoleEntry {
                    level: entry
                        .get("level")
                        .and_then(Value::as_str)
                        .unwrap_or("log")
                        .to_string(),
                    text: entry
                        .get("text")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    url: entry
                        .get("url")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                };
                if tx.send(console_entry).await.is_err() {
                    debug!(target: "page", "console log receiver dropped");
                    break;
                }
            }
        });

        Ok(rx)
    }
}
