//! Frame-chain resolution for absolute XPaths.
//!
//! A stitched XPath may cross iframe boundaries. This walker accumulates
//! steps until a prefix ends in `iframe[n]`, resolves that prefix to the host
//! element in the current frame, descends into its content frame, and keeps
//! going with the remainder. The tail it returns executes inside the final
//! frame.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tracing::debug;

use webpilot_core_types::FrameId;

use crate::errors::ActionError;
use crate::ports::PageDriver;

static IFRAME_STEP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^iframe\[\d+\]$").unwrap());

/// The frames an absolute XPath traverses (outermost first) plus the tail
/// XPath that executes inside the final frame.
pub async fn resolve_frame_chain(
    driver: &dyn PageDriver,
    abs_path: &str,
) -> Result<(Vec<FrameId>, String), ActionError> {
    let mut path = if abs_path.starts_with('/') {
        abs_path.to_string()
    } else {
        format!("/{abs_path}")
    };

    let mut chain: Vec<FrameId> = Vec::new();

    loop {
        let ctx_frame = chain.last().cloned();

        // Does the whole remainder already resolve inside the current frame?
        if driver
            .resolve_xpath(ctx_frame.as_ref(), &path)
            .await?
            .is_some()
        {
            return Ok((chain, path));
        }

        // Accumulate steps until one ends in iframe[n], then descend.
        let steps: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut descended = false;

        for (index, step) in steps.iter().enumerate() {
            if !IFRAME_STEP_RE.is_match(step) {
                continue;
            }

            let prefix = format!("/{}", steps[..=index].join("/"));
            let object_id = driver
                .resolve_xpath(ctx_frame.as_ref(), &prefix)
                .await?
                .ok_or_else(|| {
                    ActionError::FrameChainUnresolved(format!("iframe element not found: {prefix}"))
                })?;

            let described = driver
                .send_cdp(
                    "DOM.describeNode",
                    json!({ "objectId": object_id }),
                    ctx_frame.as_ref(),
                )
                .await?;
            let content_frame = described
                .pointer("/node/frameId")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    ActionError::FrameChainUnresolved(format!(
                        "content frame not found for: {prefix}"
                    ))
                })?;

            debug!(
                target: "locator",
                prefix = %prefix,
                frame = %content_frame,
                "descending into iframe"
            );

            chain.push(FrameId::new(content_frame));
            path = format!("/{}", steps[index + 1..].join("/"));
            descended = true;
            break;
        }

        if !descended {
            return Err(ActionError::FrameChainUnresolved(format!(
                "xpath resolution failed: {abs_path}"
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cdp_adapter::{CdpError, TransportEvent};
    use tokio::sync::broadcast;

    /// Driver double describing one same-process iframe whose document
    /// contains a single button.
    struct IframeDriver {
        events: broadcast::Sender<TransportEvent>,
    }

    impl IframeDriver {
        fn new() -> Self {
            let (events, _) = broadcast::channel(8);
            Self { events }
        }
    }

    #[async_trait]
    impl PageDriver for IframeDriver {
        async fn send_cdp(
            &self,
            method: &str,
            _params: Value,
            _frame: Option<&FrameId>,
        ) -> Result<Value, CdpError> {
            if method == "DOM.describeNode" {
                return Ok(json!({ "node": { "frameId": "child-frame" } }));
            }
            Ok(json!({}))
        }

        async fn evaluate_in_frame(
            &self,
            _frame: Option<&FrameId>,
            _expression: &str,
        ) -> Result<Value, CdpError> {
            Ok(json!({}))
        }

        async fn call_function_on(
            &self,
            _frame: Option<&FrameId>,
            _object_id: &str,
            _declaration: &str,
            _args: Vec<Value>,
        ) -> Result<Value, CdpError> {
            Ok(json!({}))
        }

        async fn resolve_xpath(
            &self,
            frame: Option<&FrameId>,
            xpath: &str,
        ) -> Result<Option<String>, CdpError> {
            match (frame.map(FrameId::as_str), xpath) {
                // Main document: only the iframe prefix resolves.
                (None, "/html[1]/body[1]/iframe[1]") => Ok(Some("iframe-object".to_string())),
                (None, _) => Ok(None),
                // Inside the child frame: the button tail resolves.
                (Some("child-frame"), "/html[1]/body[1]/button[1]") => {
                    Ok(Some("button-object".to_string()))
                }
                (Some(_), _) => Ok(None),
            }
        }

        async fn current_url(&self) -> Result<String, CdpError> {
            Ok("about:blank".to_string())
        }

        async fn navigate(&self, _url: &str) -> Result<(), CdpError> {
            Ok(())
        }

        async fn close_target(&self, _target_id: &str) -> Result<(), CdpError> {
            Ok(())
        }

        fn page_target_id(&self) -> String {
            "page-target".to_string()
        }

        fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent> {
            self.events.subscribe()
        }

        fn owns_session(&self, _session_id: Option<&str>) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn crosses_one_iframe_boundary() {
        let driver = IframeDriver::new();
        let (frames, tail) = resolve_frame_chain(
            &driver,
            "/html[1]/body[1]/iframe[1]/html[1]/body[1]/button[1]",
        )
        .await
        .unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_str(), "child-frame");
        assert_eq!(tail, "/html[1]/body[1]/button[1]");
    }

    #[tokio::test]
    async fn plain_path_stays_in_main_frame() {
        struct MainOnly {
            events: broadcast::Sender<TransportEvent>,
        }

        #[async_trait]
        impl PageDriver for MainOnly {
            async fn send_cdp(
                &self,
                _method: &str,
                _params: Value,
                _frame: Option<&FrameId>,
            ) -> Result<Value, CdpError> {
                Ok(json!({}))
            }
            async fn evaluate_in_frame(
                &self,
                _frame: Option<&FrameId>,
                _expression: &str,
            ) -> Result<Value, CdpError> {
                Ok(json!({}))
            }
            async fn call_function_on(
                &self,
                _frame: Option<&FrameId>,
                _object_id: &str,
                _declaration: &str,
                _args: Vec<Value>,
            ) -> Result<Value, CdpError> {
                Ok(json!({}))
            }
            async fn resolve_xpath(
                &self,
                _frame: Option<&FrameId>,
                _xpath: &str,
            ) -> Result<Option<String>, CdpError> {
                Ok(Some("object".to_string()))
            }
            async fn current_url(&self) -> Result<String, CdpError> {
                Ok(String::new())
            }
            async fn navigate(&self, _url: &str) -> Result<(), CdpError> {
                Ok(())
            }
            async fn close_target(&self, _target_id: &str) -> Result<(), CdpError> {
                Ok(())
            }
            fn page_target_id(&self) -> String {
                String::new()
            }
            fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent> {
                self.events.subscribe()
            }
            fn owns_session(&self, _session_id: Option<&str>) -> bool {
                true
            }
        }

        let (events, _) = broadcast::channel(8);
        let driver = MainOnly { events };
        let (frames, tail) = resolve_frame_chain(&driver, "/html[1]/body[1]/p[2]/a[1]")
            .await
            .unwrap();
        assert!(frames.is_empty());
        assert_eq!(tail, "/html[1]/body[1]/p[2]/a[1]");
    }

    #[tokio::test]
    async fn dead_end_reports_clear_error() {
        let driver = IframeDriver::new();
        let err = resolve_frame_chain(&driver, "/html[1]/body[1]/div[9]")
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::FrameChainUnresolved(_)));
    }
}
