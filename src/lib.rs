//! Perceptual-hash deduplication and relationship graphs for image archives.
//!
//! Occurrences of images (a hash, a timestamp and some metadata) are merged
//! into records when their hashes are near-identical, records with similar
//! hashes are linked as relatives, and the result is written as one JSON
//! dataset a viewer can serve without further computation.

pub mod config;
pub mod core;
pub mod error;
pub mod history;

pub use crate::config::EngineConfig;
pub use crate::core::dataset::{Dataset, DatasetAssembler, DatasetSummary};
pub use crate::core::genealogy::{genealogy, Genealogy};
pub use crate::core::hash::{BitHash, Metric};
pub use crate::core::image::{ImageRecord, RelativeLink, Usage};
pub use crate::core::index::PairStrategy;
pub use crate::core::relatives::LinkBasis;
pub use crate::core::repository::{HashRepository, LoadReport};
pub use crate::error::{EngineError, Result};
