use serde::{Deserialize, Serialize};

use crate::models::attribute::{AttributeColor, FitPillar};
use crate::models::deal::ContentHashes;

/// Admin correction to one attribute's display, scoped to a content-hash pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeOverride {
    pub deal_id: String,
    pub attribute_name: String,
    pub jd_hash: String,
    pub profile_hash: String,
    pub label: Option<String>,
    pub pillar: Option<FitPillar>,
    pub color: Option<AttributeColor>,
    pub visible: Option<bool>,
}

impl AttributeOverride {
    /// True only while both hashes still match the deal's current content.
    pub fn is_valid_for(&self, current: &ContentHashes) -> bool {
        self.jd_hash == current.jd_hash && self.profile_hash == current.profile_hash
    }
}
