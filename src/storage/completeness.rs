//! Completeness predicate deciding whether an item still needs processing
//!
//! The predicate only ever looks at a detail payload. Stores evaluate it on
//! every write and persist the result as a flag that can be raised but never
//! lowered, so an item that was complete once stays out of every later claim.

use crate::models::{ItemDetail, RelationKind};

/// Rule deciding whether a detail payload is complete
pub trait CompletenessPredicate: Send + Sync {
    fn is_complete(&self, detail: &ItemDetail) -> bool;
}

/// Default rule: a title plus at least one entry in each required collection
#[derive(Debug, Clone)]
pub struct RequiredFields {
    pub require_title: bool,
    pub required_relations: Vec<RelationKind>,
}

impl Default for RequiredFields {
    fn default() -> Self {
        Self {
            require_title: true,
            required_relations: RelationKind::all().to_vec(),
        }
    }
}

impl RequiredFields {
    /// Only require a non-blank title
    pub fn title_only() -> Self {
        Self {
            require_title: true,
            required_relations: Vec::new(),
        }
    }
}

impl CompletenessPredicate for RequiredFields {
    fn is_complete(&self, detail: &ItemDetail) -> bool {
        if self.require_title && detail.title.as_deref().map_or(true, |t| t.trim().is_empty()) {
            return false;
        }

        self.required_relations
            .iter()
            .all(|kind| !detail.relations(*kind).is_empty())
    }
}
