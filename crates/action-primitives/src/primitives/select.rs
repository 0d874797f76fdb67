//! Hover, option selection, check state, and focus management.

use serde_json::{json, Value};

use webpilot_core_types::FrameId;

use crate::errors::ActionError;
use crate::ports::PageDriver;
use crate::primitives::{method_failed, resolve_element};

const CENTER_FN: &str = r#"function() {
  const rect = this.getBoundingClientRect();
  return { x: rect.x + rect.width / 2, y: rect.y + rect.height / 2 };
}"#;

const SELECT_OPTION_FN: &str = r#"function(wanted) {
  if (this.tagName !== 'SELECT') {
    throw new Error('selectOption target is not a <select> element');
  }
  const options = Array.from(this.options);
  const match = options.find((option) =>
    option.value === wanted
    || option.label === wanted
    || option.textContent.trim() === wanted);
  if (!match) {
    throw new Error(`option not found: ${wanted}`);
  }
  this.value = match.value;
  this.dispatchEvent(new Event('input', { bubbles: true }));
  this.dispatchEvent(new Event('change', { bubbles: true }));
}"#;

const SET_CHECKED_FN: &str = r#"function(desired) {
  if (this.checked !== desired) {
    this.click();
  }
}"#;

const BLUR_FN: &str = "function() { this.blur(); }";

pub(crate) async fn hover(
    driver: &dyn PageDriver,
    frame: Option<&FrameId>,
    xpath: &str,
) -> Result<(), ActionError> {
    let object_id = resolve_element(driver, frame, xpath).await?;
    let center = driver
        .call_function_on(frame, &object_id, CENTER_FN, vec![])
        .await
        .map_err(method_failed("hover", xpath))?;

    let x = center.pointer("/result/value/x").and_then(Value::as_f64);
    let y = center.pointer("/result/value/y").and_then(Value::as_f64);
    let (x, y) = match (x, y) {
        (Some(x), Some(y)) => (x, y),
        _ => {
            return Err(ActionError::MethodFailed {
                method: "hover".to_string(),
                xpath: xpath.to_string(),
                cause: "element has no layout box".to_string(),
            })
        }
    };

    driver
        .send_cdp(
            "Input.dispatchMouseEvent",
            json!({ "type": "mouseMoved", "x": x, "y": y }),
            frame,
        )
        .await
        .map_err(method_failed("hover", xpath))?;
    Ok(())
}

pub(crate) async fn select_option(
    driver: &dyn PageDriver,
    frame: Option<&FrameId>,
    xpath: &str,
    args: &[String],
) -> Result<(), ActionError> {
    let wanted = args.first().cloned().unwrap_or_default();
    let object_id = resolve_element(driver, frame, xpath).await?;
    driver
        .call_function_on(frame, &object_id, SELECT_OPTION_FN, vec![Value::String(wanted)])
        .await
        .map_err(method_failed("selectOption", xpath))?;
    Ok(())
}

pub(crate) async fn set_checked(
    driver: &dyn PageDriver,
    frame: Option<&FrameId>,
    xpath: &str,
    desired: bool,
) -> Result<(), ActionError> {
    let method = if desired { "check" } else { "uncheck" };
    let object_id = resolve_element(driver, frame, xpath).await?;
    driver
        .call_function_on(frame, &object_id, SET_CHECKED_FN, vec![Value::Bool(desired)])
        .await
        .map_err(method_failed(method, xpath))?;
    Ok(())
}

pub(crate) async fn focus(
    driver: &dyn PageDriver,
    frame: Option<&FrameId>,
    xpath: &str,
) -> Result<(), ActionError> {
    let object_id = resolve_element(driver, frame, xpath).await?;
    driver
        .send_cdp("DOM.focus", json!({ "objectId": object_id }), frame)
        .await
        .map_err(method_failed("focus", xpath))?;
    Ok(())
}

pub(crate) async fn blur(
    driver: &dyn PageDriver,
    frame: Option<&FrameId>,
    xpath: &str,
) -> Result<(), ActionError> {
    let object_id = resolve_element(driver, frame, xpath).await?;
    driver
        .call_function_on(frame, &object_id, BLUR_FN, vec![])
        .await
        .map_err(method_failed("blur", xpath))?;
    Ok(())
}
