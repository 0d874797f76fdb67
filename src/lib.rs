//! Natural-language browser automation over the Chrome DevTools Protocol.
//!
//! A [`Context`] owns a browser connection and hands out [`Page`]s. Each page
//! exposes three verbs: [`Page::observe`] turns the live page into a compact
//! accessibility outline and asks a model for matching elements,
//! [`Page::act`] executes one element-level method (with self-healing
//! retries), and [`Page::extract`] pulls a schema-shaped object out of page
//! content. The heavy lifting lives in the workspace crates: `cdp-adapter`
//! (transport + session pool), `perceiver-structural` (DOM maps, the
//! accessibility tree, frame stitching), and `action-primitives` (method
//! dispatch, frame-chain resolution, DOM-settle waiting).
//!
//! ```no_run
//! use std::sync::Arc;
//! use webpilot::{AutomationConfig, Context};
//! use webpilot::llm::OpenAiProvider;
//!
//! # async fn demo() -> webpilot::Result<()> {
//! let llm = Arc::new(OpenAiProvider::from_env());
//! let context = Context::launch(AutomationConfig::default(), llm).await?;
//! let page = context.new_page("https://example.com").await?;
//!
//! let candidates = page.observe("find all links").await?;
//! println!("{} candidate(s)", candidates.len());
//!
//! let outcome = page.act("click the 'More information' link").await?;
//! assert!(outcome.success);
//! # Ok(())
//! # }
//! ```

pub mod cdp_features;
pub mod config;
pub mod context;
pub mod errors;
pub mod handlers;
pub mod llm;
pub mod logging;
pub mod page;

pub use cdp_features::ConsoleEntry;
pub use config::AutomationConfig;
pub use context::Context;
pub use errors::{AutomationError, Result};
pub use handlers::{
    ActInput, ActOptions, ContentSource, ExtractOptions, ExtractResult, ObserveOptions,
    SchemaValidator,
};
pub use page::Page;

pub use webpilot_core_types::{
    clean_selector, clean_text, ActResult, ActionMethod, ActionType, EncodedId, FrameId,
    ObserveResult, PageId,
};
