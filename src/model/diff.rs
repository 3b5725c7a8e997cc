use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which leaf paths count as changed when comparing two resource states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffMode {
    /// Only fields that exist on the server with a different value
    MaskOnly,
    /// Modified fields plus fields the server does not know yet
    WithNewFields,
}

/// Result of comparing the current and the desired state of a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffPlan {
    pub mode: DiffMode,
    /// Dotted leaf paths, in the key order of the desired state
    pub changed_paths: Vec<String>,
    /// The desired values of the changed leaves, nested like the resource
    pub payload: Value,
}

impl DiffPlan {
    pub fn has_changes(&self) -> bool {
        !self.changed_paths.is_empty()
    }

    /// Comma separated paths, as expected by `updateMask` parameters
    pub fn update_mask(&self) -> String {
        self.changed_paths.iter().join(",")
    }
}

/// Everything needed to issue one partial update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialUpdate {
    /// Fields sent as the update mask
    pub mask: DiffPlan,
    /// Changed and new fields, for diagnostics
    pub trace: DiffPlan,
    /// Request body
    pub body: Value,
}

impl PartialUpdate {
    /// An empty mask means the server already holds the desired values
    pub fn is_noop(&self) -> bool {
        !self.mask.has_changes()
    }
}
