//! The observe / act / extract handlers.

pub mod act;
pub mod extract;
pub mod observe;

pub use act::{parse_action_input, ActInput, ActOptions};
pub use extract::{ContentSource, ExtractOptions, ExtractResult, SchemaValidator};
pub use observe::ObserveOptions;
