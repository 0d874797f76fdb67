//! Chromium DevTools Protocol plumbing for webpilot.
//!
//! This crate owns the websocket transport to the browser and the per-target
//! session pool built on top of it. Everything higher in the stack borrows
//! sessions through [`SessionPool`]; only the pool opens or detaches them.

pub mod config;
pub mod error;
pub mod pool;
pub mod transport;
mod util;

pub use config::{detect_chrome_executable, CdpConfig};
pub use error::{CdpError, CdpErrorKind};
pub use pool::{CdpTarget, SessionPool};
pub use transport::{ChromiumTransport, CdpTransport, CommandTarget, NoopTransport, TransportEvent};
