//! Element-level action execution for webpilot.
//!
//! Owns the dispatch side of `act`: resolving stitched XPaths across iframe
//! boundaries, executing the closed method set against the resolved element,
//! folding new tabs back into single-tab discipline, and the DOM-settle
//! waiter every action gates on.

pub mod errors;
pub mod locator;
pub mod navigation;
pub mod ports;
pub mod primitives;
pub mod types;
pub mod waiting;

pub use errors::ActionError;
pub use locator::resolve_frame_chain;
pub use navigation::handle_possible_page_navigation;
pub use ports::PageDriver;
pub use primitives::perform_method;
pub use types::ExecCtx;
pub use waiting::{wait_for_settled_dom, DEFAULT_QUIET_MS};
