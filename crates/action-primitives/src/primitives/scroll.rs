//! Scroll family: into-view, to-percentage, viewport chunks.
//!
//! Percentage and chunk scrolls go through the injected helper script so the
//! real scrolling element is used: when the target is `<html>`/`<body>` the
//! window scrolls, otherwise the element itself.

use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use webpilot_core_types::FrameId;

use crate::errors::ActionError;
use crate::ports::PageDriver;
use crate::primitives::{method_failed, resolve_element};

const SCROLL_INTO_VIEW_FN: &str =
    "function() { this.scrollIntoView({ behavior: 'smooth', block: 'center' }); }";

/// Smooth scrolls need a beat to move before the next observation runs.
const SCROLL_SETTLE_MS: u64 = 500;

pub(crate) async fn scroll_into_view(
    driver: &dyn PageDriver,
    frame: Option<&FrameId>,
    xpath: &str,
) -> Result<(), ActionError> {
    let object_id = resolve_element(driver, frame, xpath).await?;
    driver
        .call_function_on(frame, &object_id, SCROLL_INTO_VIEW_FN, vec![])
        .await
        .map_err(method_failed("scrollIntoView", xpath))?;
    tokio::time::sleep(Duration::from_millis(SCROLL_SETTLE_MS)).await;
    Ok(())
}

pub(crate) async fn scroll_to_percentage(
    driver: &dyn PageDriver,
    frame: Option<&FrameId>,
    xpath: &str,
    args: &[String],
) -> Result<(), ActionError> {
    let raw = args.first().map(String::as_str).unwrap_or("0%");
    let percent: f64 = raw.trim_end_matches('%').trim().parse().map_err(|_| {
        ActionError::MethodFailed {
            method: "scrollTo".to_string(),
            xpath: xpath.to_string(),
            cause: format!("invalid percentage argument '{raw}'"),
        }
    })?;

    let expression = format!(
        r#"(() => {{
  const xpath = {xpath_literal};
  const node = window.getNodeFromXpath ? window.getNodeFromXpath(xpath) : null;
  if (!node || node.nodeType !== Node.ELEMENT_NODE) {{
    console.warn('could not locate element to scroll on');
    return;
  }}
  const pct = {percent};
  const tag = node.tagName.toLowerCase();
  if (tag === 'html' || tag === 'body') {{
    const top = (document.body.scrollHeight - window.innerHeight) * (pct / 100);
    window.scrollTo({{ top, behavior: 'smooth' }});
  }} else {{
    const top = (node.scrollHeight - node.clientHeight) * (pct / 100);
    node.scrollTo({{ top, behavior: 'smooth' }});
  }}
}})()"#,
        xpath_literal = Value::String(xpath.to_string()),
        percent = percent,
    );

    driver
        .evaluate_in_frame(frame, &expression)
        .await
        .map_err(method_failed("scrollTo", xpath))?;
    tokio::time::sleep(Duration::from_millis(SCROLL_SETTLE_MS)).await;
    Ok(())
}

/// One viewport-height hop; `direction` is `1` for next, `-1` for previous.
pub(crate) async fn scroll_chunk(
    driver: &dyn PageDriver,
    frame: Option<&FrameId>,
    xpath: &str,
    direction: i32,
) -> Result<(), ActionError> {
    debug!(target: "act", xpath = %xpath, direction, "scrolling by one chunk");

    let expression = format!(
        r#"(() => {{
  const xpath = {xpath_literal};
  const node = window.getNodeFromXpath ? window.getNodeFromXpath(xpath) : null;
  if (!node || node.nodeType !== Node.ELEMENT_NODE) {{
    console.warn('could not locate element to scroll by its height');
    return Promise.resolve();
  }}
  const tag = node.tagName.toLowerCase();
  if (tag === 'html' || tag === 'body') {{
    const height = window.visualViewport.height;
    window.scrollBy({{ top: {direction} * height, left: 0, behavior: 'smooth' }});
    const scroller = document.scrollingElement || document.documentElement;
    return window.waitForElementScrollEnd(scroller);
  }}
  const height = node.getBoundingClientRect().height;
  node.scrollBy({{ top: {direction} * height, left: 0, behavior: 'smooth' }});
  return window.waitForElementScrollEnd(node);
}})()"#,
        xpath_literal = Value::String(xpath.to_string()),
        direction = direction,
    );

    let method = if direction > 0 { "nextChunk" } else { "prevChunk" };
    driver
        .evaluate_in_frame(frame, &expression)
        .await
        .map_err(method_failed(method, xpath))?;
    Ok(())
}
