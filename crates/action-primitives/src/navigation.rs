//! Post-action navigation handling.
//!
//! After a click or an enter-like press the page may navigate in place or
//! pop a new tab. New tabs are folded back into single-tab discipline: the
//! new target is closed and the current page navigates to its URL. Either
//! way the DOM-settle waiter runs before control returns to the caller.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::errors::ActionError;
use crate::ports::PageDriver;
use crate::waiting::wait_for_settled_dom;

/// How long a freshly dispatched action is given to open a new tab.
const NEW_TAB_WINDOW_MS: u64 = 1_500;

/// Watch for navigation fallout after `action` ran against `xpath`.
pub async fn handle_possible_page_navigation(
    driver: &dyn PageDriver,
    action: &str,
    xpath: &str,
    initial_url: &str,
    settle_timeout: Duration,
) -> Result<(), ActionError> {
    debug!(
        target: "act",
        action = %action,
        xpath = %xpath,
        initial_url = %initial_url,
        "checking for page navigation"
    );

    if let Some((target_id, url)) = wait_for_new_page(driver).await {
        info!(target: "act", url = %url, "new tab detected; folding back into current page");
        if let Err(err) = driver.close_target(&target_id).await {
            debug!(target: "act", %err, "closing new tab failed");
        }
        driver.navigate(&url).await?;
    } else {
        debug!(target: "act", action = %action, "no new tabs opened");
    }

    match driver.current_url().await {
        Ok(url) if url != initial_url => {
            info!(target: "act", from = %initial_url, to = %url, "page navigated");
        }
        Ok(_) => {}
        Err(err) => debug!(target: "act", %err, "url check after action failed"),
    }

    wait_for_settled_dom(driver, settle_timeout).await
}

/// Wait up to ~1.5 s for a page target to open on a non-blank URL.
/// Returns `(target_id, url)` when one shows up.
async fn wait_for_new_page(driver: &dyn PageDriver) -> Option<(String, String)> {
    let mut events = driver.subscribe_events();
    let window = tokio::time::sleep(Duration::from_millis(NEW_TAB_WINDOW_MS));
    tokio::pin!(window);

    loop {
        tokio::select! {
            _ = &mut window => return None,
            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                };
                if event.method != "Target.targetCreated" {
                    continue;
                }
                let target_type = event.params.pointer("/targetInfo/type").and_then(Value::as_str);
                if target_type != Some("page") {
                    continue;
                }
                let target_id = event
                    .params
                    .pointer("/targetInfo/targetId")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                let url = event
                    .params
                    .pointer("/targetInfo/url")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                if target_id.is_empty() || target_id == driver.page_target_id() {
                    continue;
                }
                if url.is_empty() || url == "about:blank" {
                    continue;
                }
                return Some((target_id.to_string(), url.to_string()));
            }
        }
    }
}
