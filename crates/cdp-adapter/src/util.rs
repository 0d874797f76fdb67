//! Chromium process helpers.

use chromiumoxide::async_process::Child;
use futures::io::{AsyncBufReadExt, BufReader};
use futures::stream::StreamExt;
use tokio::time::{timeout, Duration};

use crate::error::{CdpError, CdpErrorKind};

/// How long a freshly launched Chromium gets to print its DevTools banner.
const BANNER_WAIT: Duration = Duration::from_secs(20);

/// How much stderr to keep for the error hint when the banner never shows.
const STDERR_PREVIEW_LIMIT: usize = 512;

/// Parse the `DevTools listening on ws://...` banner line.
fn devtools_url_from_line(line: &str) -> Option<&str> {
    let (_, rest) = line.rsplit_once("listening on ")?;
    let ws = rest.trim();
    (ws.starts_with("ws") && ws.contains("devtools/browser")).then_some(ws)
}

/// Extract the DevTools websocket URL from Chromium's stderr.
///
/// Chromium announces the endpoint exactly once shortly after launch; if the
/// process dies first, the captured stderr rides along in the error hint.
pub(crate) async fn extract_ws_url(child: &mut Child) -> Result<String, CdpError> {
    let stderr = child.stderr.take().ok_or_else(|| {
        CdpError::new(CdpErrorKind::Io).with_hint("chromium process missing stderr handle")
    })?;

    let scan = async move {
        let mut lines = BufReader::new(stderr).lines();
        let mut preview = String::new();

        while let Some(line) = lines.next().await {
            let line = line.map_err(|err| {
                CdpError::new(CdpErrorKind::Io)
                    .with_hint(format!("reading chromium stderr: {err}"))
            })?;
            if let Some(ws) = devtools_url_from_line(&line) {
                return Ok(ws.to_string());
            }
            if preview.len() < STDERR_PREVIEW_LIMIT {
                if !preview.is_empty() {
                    preview.push_str(" | ");
                }
                preview.push_str(&line);
            }
        }

        Err(CdpError::new(CdpErrorKind::Io).with_hint(format!(
            "chromium exited before exposing a devtools websocket url. stderr preview: {preview}"
        )))
    };

    match timeout(BANNER_WAIT, scan).await {
        Ok(result) => result,
        Err(_) => Err(CdpError::new(CdpErrorKind::Timeout)
            .with_hint("timed out waiting for the chromium devtools banner")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banner_line_yields_the_ws_url() {
        let line = "DevTools listening on ws://127.0.0.1:9222/devtools/browser/abc-def";
        assert_eq!(
            devtools_url_from_line(line),
            Some("ws://127.0.0.1:9222/devtools/browser/abc-def")
        );
    }

    #[test]
    fn unrelated_stderr_lines_are_ignored() {
        assert_eq!(devtools_url_from_line("[1234:5678] GPU process launched"), None);
        // The banner must name a browser endpoint, not just any websocket.
        assert_eq!(
            devtools_url_from_line("listening on ws://127.0.0.1:9222/json"),
            None
        );
        assert_eq!(
            devtools_url_from_line("listening on http://127.0.0.1:9222/"),
            None
        );
    }
}
