//! DOM-settle waiting.
//!
//! Publishes one "settled" signal per call: no inflight network request and
//! no pending main-document load for a quiet window, or the overall timeout.
//! A periodic stall sweep evicts requests the browser never finishes so a
//! half-closed resource cannot hang an action.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use cdp_adapter::TransportEvent;

use crate::errors::ActionError;
use crate::ports::PageDriver;

/// Quiet window that must elapse with nothing inflight.
pub const DEFAULT_QUIET_MS: u64 = 500;
/// How often the stall sweep runs.
const STALL_SWEEP_MS: u64 = 500;
/// Requests older than this are evicted as stalled.
const STALL_EVICT_MS: u64 = 2_000;

struct RequestMeta {
    url: String,
    started_at: Instant,
}

/// Wait until the DOM settles or `timeout` elapses.
///
/// Listeners are attached before the domains are enabled so no request-start
/// can slip between enabling and tracking. The timeout path is non-fatal: it
/// logs which URLs were still pending and resolves. All subscription state is
/// function-local, so returning (by any path) unwinds the listeners.
pub async fn wait_for_settled_dom(
    driver: &dyn PageDriver,
    timeout: Duration,
) -> Result<(), ActionError> {
    let mut events = driver.subscribe_events();

    driver.send_cdp("Network.enable", json!({}), None).await?;
    driver.send_cdp("Page.enable", json!({}), None).await?;
    driver
        .send_cdp(
            "Target.setAutoAttach",
            json!({
                "autoAttach": true,
                "waitForDebuggerOnStart": false,
                "flatten": true,
            }),
            None,
        )
        .await?;

    let quiet = Duration::from_millis(DEFAULT_QUIET_MS);
    let mut inflight: HashMap<String, RequestMeta> = HashMap::new();
    let mut doc_by_frame: HashMap<String, String> = HashMap::new();

    // Nothing inflight yet: the quiet window starts armed.
    let mut quiet_deadline: Option<Instant> = Some(Instant::now() + quiet);

    let overall = tokio::time::sleep(timeout);
    tokio::pin!(overall);

    let mut sweep = tokio::time::interval(Duration::from_millis(STALL_SWEEP_MS));
    sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let quiet_timer = async {
            match quiet_deadline {
                Some(at) => tokio::time::sleep_until(at.into()).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = &mut overall => {
                if !inflight.is_empty() {
                    let pending: Vec<&str> =
                        inflight.values().map(|meta| meta.url.as_str()).collect();
                    warn!(
                        target: "dom-settle",
                        count = inflight.len(),
                        urls = ?pending,
                        "settle timeout reached with requests still pending"
                    );
                }
                break;
            }
            _ = quiet_timer => {
                break;
            }
            _ = sweep.tick() => {
                let now = Instant::now();
                let mut evicted = Vec::new();
                inflight.retain(|request_id, meta| {
                    let stalled = now.duration_since(meta.started_at)
                        > Duration::from_millis(STALL_EVICT_MS);
                    if stalled {
                        debug!(
                            target: "dom-settle",
                            url = %meta.url,
                            "forcing completion of stalled request"
                        );
                        evicted.push(request_id.clone());
                    }
                    !stalled
                });
                for request_id in evicted {
                    doc_by_frame.retain(|_, rid| *rid != request_id);
                }
                if inflight.is_empty() && quiet_deadline.is_none() {
                    quiet_deadline = Some(now + quiet);
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if driver.owns_session(event.session_id.as_deref()) {
                            track_event(
                                &event,
                                &mut inflight,
                                &mut doc_by_frame,
                                &mut quiet_deadline,
                                quiet,
                            );
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(target: "dom-settle", skipped, "event stream lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

fn track_event(
    event: &TransportEvent,
    inflight: &mut HashMap<String, RequestMeta>,
    doc_by_frame: &mut HashMap<String, String>,
    quiet_deadline: &mut Option<Instant>,
    quiet: Duration,
) {
    match event.method.as_str() {
        "Network.requestWillBeSent" => {
            // Streaming channels never finish; they must not hold the gate.
            let resource_type = event.params.get("type").and_then(Value::as_str);
            if matches!(resource_type, Some("WebSocket") | Some("EventSource")) {
                return;
            }
            let request_id = match event.params.get("requestId").and_then(Value::as_str) {
                Some(id) => id.to_string(),
                None => return,
            };
            let url = event
                .params
                .pointer("/request/url")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            inflight.insert(
                request_id.clone(),
                RequestMeta {
                    url,
                    started_at: Instant::now(),
                },
            );
            if resource_type == Some("Document") {
                if let Some(frame_id) = event.params.get("frameId").and_then(Value::as_str) {
                    doc_by_frame.insert(frame_id.to_string(), request_id);
                }
            }
            *quiet_deadline = None;
        }
        "Network.loadingFinished"
        | "Network.loadingFailed"
        | "Network.requestServedFromCache" => {
            if let Some(request_id) = event.params.get("requestId").and_then(Value::as_str) {
                finish_request(request_id, inflight, doc_by_frame, quiet_deadline, quiet);
            }
        }
        "Network.responseReceived" => {
            let is_data_url = event
                .params
                .pointer("/response/url")
                .and_then(Value::as_str)
                .map(|url| url.starts_with("data:"))
                .unwrap_or(false);
            if is_data_url {
                if let Some(request_id) = event.params.get("requestId").and_then(Value::as_str) {
                    finish_request(request_id, inflight, doc_by_frame, quiet_deadline, quiet);
                }
            }
        }
        "Page.frameStoppedLoading" => {
            if let Some(frame_id) = event.params.get("frameId").and_then(Value::as_str) {
                if let Some(request_id) = doc_by_frame.remove(frame_id) {
                    finish_request(&request_id, inflight, doc_by_frame, quiet_deadline, quiet);
                }
            }
        }
        _ => {}
    }
}

fn finish_request(
    request_id: &str,
    inflight: &mut HashMap<String, RequestMeta>,
    doc_by_frame: &mut HashMap<String, String>,
    quiet_deadline: &mut Option<Instant>,
    quiet: Duration,
) {
    if inflight.remove(request_id).is_none() {
        return;
    }
    doc_by_frame.retain(|_, rid| rid != request_id);
    if inflight.is_empty() {
        *quiet_deadline = Some(Instant::now() + quiet);
    }
}
