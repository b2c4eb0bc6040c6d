//! Valid area centers and their branch lists.
//!
//! Loaded once at startup from a JSON file whose top-level object maps each
//! area center (back-office id) to its list of branch identifiers:
//!
//! ```json
//! { "A01": ["8801", "8802"], "A02": ["8810"] }
//! ```
//!
//! The data plane only reads this mapping; it never mutates it.

use crate::error::FeedError;
use std::collections::BTreeMap;
use std::path::Path;

/// Area-center → branches mapping plus the derived reverse index.
#[derive(Debug, Clone, Default)]
pub struct AreaMap {
    branches_by_area: BTreeMap<String, Vec<String>>,
    area_by_branch: BTreeMap<String, String>,
}

impl AreaMap {
    /// Loads the mapping from a JSON file. Failure is fatal at startup.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FeedError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            FeedError::LoadFailed(format!("area mapping {}: {e}", path.display()))
        })?;
        Self::from_json(&text)
    }

    /// Parses the mapping from its JSON representation.
    pub fn from_json(text: &str) -> Result<Self, FeedError> {
        let branches_by_area: BTreeMap<String, Vec<String>> = serde_json::from_str(text)
            .map_err(|e| FeedError::Parse(format!("area mapping: {e}")))?;

        let mut area_by_branch = BTreeMap::new();
        for (area, branches) in &branches_by_area {
            for branch in branches {
                area_by_branch.insert(branch.clone(), area.clone());
            }
        }

        Ok(Self {
            branches_by_area,
            area_by_branch,
        })
    }

    /// Returns true if `area` is a configured area center.
    pub fn is_valid_area(&self, area: &str) -> bool {
        self.branches_by_area.contains_key(area)
    }

    /// The configured back-office ids, in stable (sorted) order. These are
    /// the keys the company rollup sums over.
    pub fn back_office_ids(&self) -> impl Iterator<Item = &str> {
        self.branches_by_area.keys().map(String::as_str)
    }

    /// Branches belonging to one area center; empty for unknown areas.
    pub fn branches_for(&self, area: &str) -> &[String] {
        self.branches_by_area
            .get(area)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The union of every area's branches, deduplicated and sorted. This is
    /// the branch list carried by the company rollup.
    pub fn all_branches(&self) -> Vec<String> {
        self.area_by_branch.keys().cloned().collect()
    }

    /// Reverse lookup: the area center a branch belongs to.
    pub fn area_for_branch(&self, branch: &str) -> Option<&str> {
        self.area_by_branch.get(branch).map(String::as_str)
    }

    /// Number of configured area centers.
    pub fn len(&self) -> usize {
        self.branches_by_area.len()
    }

    /// Returns true if no area centers are configured.
    pub fn is_empty(&self) -> bool {
        self.branches_by_area.is_empty()
    }
}
