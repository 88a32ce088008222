use crate::core::dataset::Dataset;
use crate::core::image::ImageRecord;
use crate::error::{EngineError, Result};

/// A record's relatives split by when each was first seen.
#[derive(Debug, Clone, PartialEq)]
pub struct Genealogy<'a> {
    pub ancestors: Vec<(&'a ImageRecord, f64)>,
    pub descendants: Vec<(&'a ImageRecord, f64)>,
}

/// Splits the relatives of `record` into ancestors (first seen strictly
/// earlier) and descendants (first seen at the same time or later).
///
/// Equal first-seen timestamps count as descendants. Recomputed on every call;
/// nothing is stored on the record.
pub fn genealogy<'a>(record: &ImageRecord, dataset: &'a Dataset) -> Result<Genealogy<'a>> {
    let born = record.first_seen();
    let mut ancestors = Vec::new();
    let mut descendants = Vec::new();
    for link in &record.relatives {
        let relative = dataset
            .get(link.id)
            .ok_or(EngineError::UnknownRecord(link.id))?;
        if relative.first_seen() < born {
            ancestors.push((relative, link.dist));
        } else {
            descendants.push((relative, link.dist));
        }
    }
    Ok(Genealogy {
        ancestors,
        descendants,
    })
}
