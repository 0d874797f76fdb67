//! Press: element-level key dispatch with page-level fallback.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

use webpilot_core_types::FrameId;

use crate::errors::ActionError;
use crate::navigation::handle_possible_page_navigation;
use crate::ports::PageDriver;
use crate::primitives::{method_failed, resolve_element};

struct KeyInfo {
    key: &'static str,
    code: &'static str,
    virtual_key_code: i64,
    text: Option<&'static str>,
}

fn known_key(key: &str) -> Option<KeyInfo> {
    let info = match key {
        "Enter" => KeyInfo { key: "Enter", code: "Enter", virtual_key_code: 13, text: Some("\r") },
        "Tab" => KeyInfo { key: "Tab", code: "Tab", virtual_key_code: 9, text: None },
        "Space" | " " => KeyInfo { key: " ", code: "Space", virtual_key_code: 32, text: Some(" ") },
        "Escape" => KeyInfo { key: "Escape", code: "Escape", virtual_key_code: 27, text: None },
        "Backspace" => KeyInfo { key: "Backspace", code: "Backspace", virtual_key_code: 8, text: None },
        "Delete" => KeyInfo { key: "Delete", code: "Delete", virtual_key_code: 46, text: None },
        "ArrowUp" => KeyInfo { key: "ArrowUp", code: "ArrowUp", virtual_key_code: 38, text: None },
        "ArrowDown" => KeyInfo { key: "ArrowDown", code: "ArrowDown", virtual_key_code: 40, text: None },
        "ArrowLeft" => KeyInfo { key: "ArrowLeft", code: "ArrowLeft", virtual_key_code: 37, text: None },
        "ArrowRight" => KeyInfo { key: "ArrowRight", code: "ArrowRight", virtual_key_code: 39, text: None },
        _ => return None,
    };
    Some(info)
}

pub(crate) fn key_events(key: &str) -> (Value, Value) {
    if let Some(info) = known_key(key) {
        let mut down = json!({
            "type": "rawKeyDown",
            "key": info.key,
            "code": info.code,
            "windowsVirtualKeyCode": info.virtual_key_code,
            "nativeVirtualKeyCode": info.virtual_key_code,
        });
        if let Some(text) = info.text {
            down["type"] = Value::String("keyDown".to_string());
            down["text"] = Value::String(text.to_string());
        }
        let up = json!({
            "type": "keyUp",
            "key": info.key,
            "code": info.code,
            "windowsVirtualKeyCode": info.virtual_key_code,
            "nativeVirtualKeyCode": info.virtual_key_code,
        });
        return (down, up);
    }

    // Single printable character.
    let down = json!({
        "type": "keyDown",
        "key": key,
        "text": key,
    });
    let up = json!({
        "type": "keyUp",
        "key": key,
    });
    (down, up)
}

fn triggers_navigation(key: &str) -> bool {
    matches!(key.to_ascii_lowercase().as_str(), "enter" | "space" | " ")
}

pub(crate) async fn execute(
    driver: &dyn PageDriver,
    frame: Option<&FrameId>,
    xpath: &str,
    args: &[String],
    initial_url: &str,
    settle_timeout: Duration,
) -> Result<(), ActionError> {
    let key = args.first().map(String::as_str).unwrap_or("Enter");

    // Element-level press first: focus the target so the key lands on it.
    // When focusing fails the press degrades to page level.
    match resolve_element(driver, frame, xpath).await {
        Ok(object_id) => {
            if let Err(err) = driver
                .send_cdp("DOM.focus", json!({ "objectId": object_id }), frame)
                .await
            {
                debug!(target: "act", %err, "element focus failed; page-level key press");
            }
        }
        Err(err) => {
            debug!(target: "act", %err, "press target unresolved; page-level key press");
        }
    }

    let (down, up) = key_events(key);
    driver
        .send_cdp("Input.dispatchKeyEvent", down, frame)
        .await
        .map_err(method_failed("press", xpath))?;
    driver
        .send_cdp("Input.dispatchKeyEvent", up, frame)
        .await
        .map_err(method_failed("press", xpath))?;

    if triggers_navigation(key) {
        handle_possible_page_navigation(driver, "press", xpath, initial_url, settle_timeout)
            .await?;
    }

    Ok(())
}
