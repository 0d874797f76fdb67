//! Click: in-page `el.click()` with navigation follow-up.

use std::time::Duration;

use tracing::debug;

use webpilot_core_types::FrameId;

use crate::errors::ActionError;
use crate::navigation::handle_possible_page_navigation;
use crate::ports::PageDriver;
use crate::primitives::resolve_element;

/// In-page click matches what a user-dispatched activation does, including
/// default actions like link navigation and form submission.
const CLICK_FN: &str = "function() { this.click(); }";

pub(crate) async fn execute(
    driver: &dyn PageDriver,
    frame: Option<&FrameId>,
    xpath: &str,
    initial_url: &str,
    settle_timeout: Duration,
) -> Result<(), ActionError> {
    let object_id = resolve_element(driver, frame, xpath).await?;

    driver
        .call_function_on(frame, &object_id, CLICK_FN, vec![])
        .await
        .map_err(|err| ActionError::ClickFailed {
            xpath: xpath.to_string(),
            cause: err.to_string(),
        })?;

    debug!(target: "act", xpath = %xpath, "click dispatched");

    handle_possible_page_navigation(driver, "click", xpath, initial_url, settle_timeout).await
}
