// Core data structures for the harvester backlog

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Stable identity of a work item; ascending order drives claim order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub i64);

impl ItemId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ItemId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Identifier a worker stamps onto the leases it holds
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    /// Create a worker id, rejecting blank identifiers
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// Worker id for slot `index` of a pool named `prefix`
    pub fn indexed(prefix: &str, index: usize) -> Self {
        Self(format!("{prefix}-{index}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for WorkerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Named relationship collections carried by an item's detail payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    Author,
    Publisher,
    Subject,
}

impl RelationKind {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Author => "author",
            Self::Publisher => "publisher",
            Self::Subject => "subject",
        }
    }

    /// Create from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "author" | "authors" => Some(Self::Author),
            "publisher" | "publishers" => Some(Self::Publisher),
            "subject" | "subjects" => Some(Self::Subject),
            _ => None,
        }
    }

    /// Get all relation kinds
    pub fn all() -> [Self; 3] {
        [Self::Author, Self::Publisher, Self::Subject]
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Auxiliary lookup entity referenced from a relationship collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedEntity {
    /// Natural key, unique per relation kind
    pub key: String,
    pub name: String,
}

impl RelatedEntity {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
        }
    }
}

/// Detail payload produced by the extractor for one work item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemDetail {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub published_on: Option<String>,
    pub attributes: BTreeMap<String, serde_json::Value>,
    pub authors: Vec<RelatedEntity>,
    pub publishers: Vec<RelatedEntity>,
    pub subjects: Vec<RelatedEntity>,
}

impl ItemDetail {
    /// Entities of one relationship collection
    pub fn relations(&self, kind: RelationKind) -> &[RelatedEntity] {
        match kind {
            RelationKind::Author => &self.authors,
            RelationKind::Publisher => &self.publishers,
            RelationKind::Subject => &self.subjects,
        }
    }
}

/// Exclusive, non-expiring claim embedded in a work item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub owner: WorkerId,
    pub acquired_at: DateTime<Utc>,
}

/// A unit of backlog work as persisted by the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: ItemId,
    pub locator: String,
    pub detail: Option<ItemDetail>,
    pub lease: Option<Lease>,
    pub complete: bool,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub retry_at: Option<DateTime<Utc>>,
    pub poisoned: bool,
}

impl WorkItem {
    /// Create an unleased, pending item
    pub fn new(id: ItemId, locator: impl Into<String>) -> Self {
        Self {
            id,
            locator: locator.into(),
            detail: None,
            lease: None,
            complete: false,
            attempts: 0,
            last_error: None,
            retry_at: None,
            poisoned: false,
        }
    }

    pub fn is_leased(&self) -> bool {
        self.lease.is_some()
    }

    /// Whether a batch claim at `now` may select this item
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        !self.complete
            && !self.poisoned
            && self.lease.is_none()
            && self.retry_at.map_or(true, |at| at <= now)
    }

    pub fn claimed(&self) -> ClaimedItem {
        ClaimedItem {
            id: self.id,
            locator: self.locator.clone(),
            attempts: self.attempts,
        }
    }
}

/// Identity/locator projection returned by a claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimedItem {
    pub id: ItemId,
    pub locator: String,
    pub attempts: u32,
}

/// Backlog counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BacklogStats {
    pub total: usize,
    pub pending: usize,
    pub complete: usize,
    pub leased: usize,
    pub poisoned: usize,
}

impl BacklogStats {
    /// Completion ratio (0.0 - 1.0)
    pub fn completion_rate(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.complete as f64 / self.total as f64
    }
}
