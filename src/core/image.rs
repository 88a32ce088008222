use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::core::hash::BitHash;
use crate::error::{EngineError, Result};

/// One appearance of an image in the source corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(alias = "lid")]
    pub local_id: String,
    #[serde(default)]
    pub thread_id: String,
    pub timestamp: i64,
    pub hash: BitHash,
    /// Post metadata carried through untouched.
    #[serde(flatten)]
    pub meta: BTreeMap<String, Value>,
}

impl Usage {
    pub fn new(local_id: impl Into<String>, timestamp: i64, hash: BitHash) -> Self {
        Self {
            local_id: local_id.into(),
            thread_id: String::new(),
            timestamp,
            hash,
            meta: BTreeMap::new(),
        }
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = thread_id.into();
        self
    }
}

/// Canonical ordering of usages: by timestamp, then by `local_id`.
pub fn usage_order(a: &Usage, b: &Usage) -> Ordering {
    a.timestamp
        .cmp(&b.timestamp)
        .then_with(|| a.local_id.cmp(&b.local_id))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelativeLink {
    pub id: usize,
    pub dist: f64,
}

/// A deduplicated image: every occurrence of the same picture, plus its
/// links to visually related images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: usize,
    pub hash: BitHash,
    pub usages: Vec<Usage>,
    #[serde(default)]
    pub relatives: Vec<RelativeLink>,
}

impl ImageRecord {
    /// Builds a record from the members of one cluster. The earliest usage
    /// provides the canonical hash.
    pub fn from_cluster(id: usize, mut usages: Vec<Usage>) -> Result<Self> {
        if usages.is_empty() {
            return Err(EngineError::EmptyCluster { cluster: id });
        }
        usages.sort_by(usage_order);
        Ok(Self {
            id,
            hash: usages[0].hash.clone(),
            usages,
            relatives: Vec::new(),
        })
    }

    pub fn earliest(&self) -> &Usage {
        &self.usages[0]
    }

    pub fn latest(&self) -> &Usage {
        &self.usages[self.usages.len() - 1]
    }

    pub fn first_seen(&self) -> i64 {
        self.earliest().timestamp
    }

    pub fn last_seen(&self) -> i64 {
        self.latest().timestamp
    }

    /// Key the viewer uses to look up this record's thumbnail.
    pub fn thumbnail_key(&self) -> &str {
        &self.earliest().local_id
    }

    pub fn relative(&self, id: usize) -> Option<&RelativeLink> {
        self.relatives.iter().find(|link| link.id == id)
    }

    pub(crate) fn sort_relatives(&mut self) {
        self.relatives
            .sort_by(|a, b| a.dist.total_cmp(&b.dist).then_with(|| a.id.cmp(&b.id)));
    }
}
