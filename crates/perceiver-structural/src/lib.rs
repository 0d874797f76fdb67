//! Structural perception of a live page.
//!
//! Converts a browser page into the compact representations the rest of the
//! stack works with: backend-id/XPath maps from the DOM walk, the pruned
//! accessibility tree with its simplified outline, and the stitched
//! multi-frame view. The in-page helper blob that backs scrollable detection
//! and XPath synthesis also lives here.

pub mod backend_maps;
pub mod errors;
pub mod model;
pub mod ports;
pub mod scripts;
pub mod stitch;
pub mod tree;

pub use backend_maps::build_backend_id_maps;
pub use errors::PerceiveError;
pub use model::{AxPayloadNode, AxProperty, AxValue, BackendIdMaps, DomNode};
pub use ports::{FrameInfo, PagePerception};
pub use scripts::{guarded_helper_script, injection_probe, HELPER_SCRIPT, INJECTED_FLAG};
pub use stitch::{get_accessibility_tree_with_frames, inject_subtrees, CombinedTree};
pub use tree::{build_hierarchical_tree, format_simplified_tree, get_accessibility_tree};
