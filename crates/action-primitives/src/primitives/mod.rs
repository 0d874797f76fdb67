//! The closed method set the act dispatcher executes.
//!
//! Every verb receives an already-resolved frame chain tail and operates on
//! the first XPath match inside that frame. Methods that can navigate
//! (click, enter-like presses) run the navigation handler afterwards.

mod click;
mod fill;
mod press;
mod scroll;
mod select;

use std::time::Duration;

use tracing::debug;

use webpilot_core_types::{ActionMethod, FrameId};

use crate::errors::ActionError;
use crate::locator::resolve_frame_chain;
use crate::ports::PageDriver;
use crate::types::ExecCtx;

/// Resolve an XPath to its first matching element or fail with a clear error.
pub(crate) async fn resolve_element(
    driver: &dyn PageDriver,
    frame: Option<&FrameId>,
    xpath: &str,
) -> Result<String, ActionError> {
    driver
        .resolve_xpath(frame, xpath)
        .await?
        .ok_or_else(|| ActionError::ElementNotFound(xpath.to_string()))
}

pub(crate) fn method_failed(
    method: &str,
    xpath: &str,
) -> impl Fn(cdp_adapter::CdpError) -> ActionError {
    let method = method.to_string();
    let xpath = xpath.to_string();
    move |err| ActionError::MethodFailed {
        method: method.clone(),
        xpath: xpath.clone(),
        cause: err.to_string(),
    }
}

/// Execute one method against an absolute XPath.
///
/// The XPath is resolved through the frame chain first; the verb then runs
/// against the tail inside the final frame.
pub async fn perform_method(
    driver: &dyn PageDriver,
    ctx: &ExecCtx,
    method: ActionMethod,
    xpath: &str,
    args: &[String],
    settle_timeout: Duration,
) -> Result<(), ActionError> {
    if ctx.is_cancelled() {
        return Err(ActionError::Interrupted("context cancelled".to_string()));
    }
    if ctx.is_timed_out() {
        return Err(ActionError::WaitTimeout(
            "action deadline exceeded".to_string(),
        ));
    }

    let (frames, tail) = resolve_frame_chain(driver, xpath).await?;
    let frame = frames.last().cloned();

    let initial_url = driver.current_url().await.unwrap_or_default();

    debug!(
        target: "act",
        action_id = %ctx.action_id,
        method = %method,
        xpath = %tail,
        frames = frames.len(),
        args = ?args,
        "dispatching method"
    );

    match method {
        ActionMethod::Click => {
            click::execute(driver, frame.as_ref(), &tail, &initial_url, settle_timeout).await
        }
        ActionMethod::Fill | ActionMethod::Type => {
            fill::execute(driver, frame.as_ref(), &tail, args).await
        }
        ActionMethod::Press => {
            press::execute(driver, frame.as_ref(), &tail, args, &initial_url, settle_timeout).await
        }
        ActionMethod::Hover => select::hover(driver, frame.as_ref(), &tail).await,
        ActionMethod::SelectOption => select::select_option(driver, frame.as_ref(), &tail, args).await,
        ActionMethod::Check => select::set_checked(driver, frame.as_ref(), &tail, true).await,
        ActionMethod::Uncheck => select::set_checked(driver, frame.as_ref(), &tail, false).await,
        ActionMethod::Focus => select::focus(driver, frame.as_ref(), &tail).await,
        ActionMethod::Blur => select::blur(driver, frame.as_ref(), &tail).await,
        ActionMethod::ScrollIntoView => scroll::scroll_into_view(driver, frame.as_ref(), &tail).await,
        ActionMethod::ScrollTo | ActionMethod::Scroll => {
            scroll::scroll_to_percentage(driver, frame.as_ref(), &tail, args).await
        }
        ActionMethod::NextChunk => scroll::scroll_chunk(driver, frame.as_ref(), &tail, 1).await,
        ActionMethod::PrevChunk => scroll::scroll_chunk(driver, frame.as_ref(), &tail, -1).await,
        ActionMethod::NotSupported => Err(ActionError::Unsupported(
            "observation declared the action not supported".to_string(),
        )),
    }
}
