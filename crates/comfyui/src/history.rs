//! Typed view of the `GET /history/{prompt_id}` document.
//!
//! ```json
//! {"<prompt_id>": {"outputs": {"<node_id>": {"images": [
//!     {"filename": "a.png", "subfolder": "", "type": "output"}
//! ]}}}}
//! ```

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;

/// History keyed by prompt id.
pub type History = HashMap<String, HistoryEntry>;

/// One prompt's execution record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub outputs: BTreeMap<String, NodeOutput>,
}

/// Files produced by one node.
///
/// Image nodes report `images`; video-combine nodes report `gifs`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    pub images: Vec<OutputDescriptor>,
    #[serde(default)]
    pub gifs: Vec<OutputDescriptor>,
}

impl NodeOutput {
    /// All output files in the order the backend listed them.
    pub fn descriptors(&self) -> impl Iterator<Item = &OutputDescriptor> {
        self.images.iter().chain(self.gifs.iter())
    }
}

/// Location of one output file on the backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutputDescriptor {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// Storage bucket, e.g. `output` or `temp`.
    #[serde(rename = "type", default = "default_storage_type")]
    pub storage_type: String,
}

fn default_storage_type() -> String {
    "output".to_string()
}
