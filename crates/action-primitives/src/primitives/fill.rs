//! Fill / type: three tiers of text entry.
//!
//! The primary path writes the value through the native setter and fires
//! synthetic `input`/`change` events. When that fails, the fallback types the
//! text as real per-character key events, which is what masked inputs and
//! keystroke-driven widgets (autocomplete, character counters) actually
//! listen for. Only if keystroke dispatch also fails does the atomic
//! `Input.insertText` run as a last resort.

use serde_json::{json, Value};
use tracing::info;

use webpilot_core_types::FrameId;

use crate::errors::ActionError;
use crate::ports::PageDriver;
use crate::primitives::press::key_events;
use crate::primitives::{method_failed, resolve_element};

/// Set the value through the native setter so framework-bound inputs see a
/// real input event, not just a property write.
const FILL_FN: &str = r#"function(value) {
  this.focus();
  const proto = this.tagName === 'TEXTAREA'
    ? HTMLTextAreaElement.prototype
    : HTMLInputElement.prototype;
  const descriptor = Object.getOwnPropertyDescriptor(proto, 'value');
  if (descriptor && descriptor.set) {
    descriptor.set.call(this, value);
  } else {
    this.value = value;
  }
  this.dispatchEvent(new Event('input', { bubbles: true }));
  this.dispatchEvent(new Event('change', { bubbles: true }));
}"#;

const CLEAR_FN: &str = r#"function() {
  this.focus();
  this.value = '';
  this.dispatchEvent(new Event('input', { bubbles: true }));
}"#;

pub(crate) async fn execute(
    driver: &dyn PageDriver,
    frame: Option<&FrameId>,
    xpath: &str,
    args: &[String],
) -> Result<(), ActionError> {
    let text = args.first().cloned().unwrap_or_default();
    let object_id = resolve_element(driver, frame, xpath).await?;

    // Clear first so every tier lands on an empty control.
    driver
        .call_function_on(frame, &object_id, CLEAR_FN, vec![])
        .await
        .map_err(method_failed("fill", xpath))?;

    let primary = driver
        .call_function_on(frame, &object_id, FILL_FN, vec![Value::String(text.clone())])
        .await;

    let Err(err) = primary else {
        return Ok(());
    };
    info!(target: "act", %err, xpath = %xpath, "fill failed; typing per-character instead");

    driver
        .send_cdp("DOM.focus", json!({ "objectId": object_id }), frame)
        .await
        .map_err(method_failed("fill", xpath))?;

    if let Err(err) = type_text_as_keystrokes(driver, frame, &text).await {
        info!(target: "act", %err, xpath = %xpath, "keystroke typing failed; inserting text atomically");
        driver
            .send_cdp("Input.insertText", json!({ "text": text }), frame)
            .await
            .map_err(method_failed("fill", xpath))?;
    }

    Ok(())
}

/// Dispatch real keyDown/keyUp pairs for every character, so key-event
/// listeners fire the way they would for a typing user.
async fn type_text_as_keystrokes(
    driver: &dyn PageDriver,
    frame: Option<&FrameId>,
    text: &str,
) -> Result<(), cdp_adapter::CdpError> {
    for ch in text.chars() {
        let (down, up) = key_events(&ch.to_string());
        driver
            .send_cdp("Input.dispatchKeyEvent", down, frame)
            .await?;
        driver.send_cdp("Input.dispatchKeyEvent", up, frame).await?;
    }
    Ok(())
}
