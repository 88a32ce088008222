use log::{debug, info};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

use crate::config::EngineConfig;
use crate::core::duplicate::DuplicateClusterer;
use crate::core::image::{usage_order, ImageRecord};
use crate::core::relatives::RelativeGraphBuilder;
use crate::core::repository::HashRepository;
use crate::core::{benchmark, progress_bar};
use crate::error::{EngineError, Result};

/// The assembled collection, indexed by dense record id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    records: Vec<ImageRecord>,
}

/// Aggregates shown on the viewer's index page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetSummary {
    pub records: usize,
    pub usages: usize,
    pub relative_pairs: usize,
    /// Earliest first usage across the dataset.
    pub start_ts: i64,
    /// Latest last usage across the dataset.
    pub end_ts: i64,
    pub most_used: usize,
    pub most_recent: usize,
    pub most_relatives: usize,
}

impl Dataset {
    /// Wraps records whose ids already equal their positions.
    pub fn from_records(records: Vec<ImageRecord>) -> Self {
        Self { records }
    }

    pub fn get(&self, id: usize) -> Option<&ImageRecord> {
        self.records.get(id).filter(|r| r.id == id)
    }

    pub fn records(&self) -> &[ImageRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn usage_count(&self) -> usize {
        self.records.iter().map(|r| r.usages.len()).sum()
    }

    pub fn relative_pairs(&self) -> usize {
        self.records.iter().map(|r| r.relatives.len()).sum::<usize>() / 2
    }

    /// Exactly the bytes `save` writes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Writes the dataset to a temporary file next to `path` and renames it
    /// into place. Returns the blake3 digest of the written bytes.
    pub fn save(&self, path: &Path) -> Result<String> {
        let bytes = self.to_bytes()?;
        let fail = |source: std::io::Error| EngineError::Persistence {
            path: path.to_path_buf(),
            source,
        };

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir).map_err(fail)?;
        tmp.write_all(&bytes).map_err(fail)?;
        tmp.as_file().sync_all().map_err(fail)?;
        tmp.persist(path).map_err(|e| fail(e.error))?;

        debug!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(digest(&bytes))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        Self::from_slice(&bytes)
    }

    /// Parses a persisted dataset and checks its structural invariants.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let raw: BTreeMap<String, ImageRecord> = serde_json::from_slice(bytes)
            .map_err(|e| EngineError::CorruptDataset(e.to_string()))?;

        let mut records = Vec::with_capacity(raw.len());
        for (key, record) in raw {
            if key != record.id.to_string() {
                return Err(EngineError::CorruptDataset(format!(
                    "key {:?} holds record {}",
                    key, record.id
                )));
            }
            records.push(record);
        }
        records.sort_by_key(|r| r.id);

        let dataset = Self { records };
        dataset.validate()?;
        Ok(dataset)
    }

    pub fn validate(&self) -> Result<()> {
        let corrupt = |msg: String| Err(EngineError::CorruptDataset(msg));
        let n = self.records.len();
        let hash_bits = self.records.first().map(|r| r.hash.len());

        for (pos, record) in self.records.iter().enumerate() {
            if record.id != pos {
                return corrupt(format!("ids are not dense: found {} at {}", record.id, pos));
            }
            if record.usages.is_empty() {
                return corrupt(format!("record {} has no usages", record.id));
            }
            if record
                .usages
                .windows(2)
                .any(|w| usage_order(&w[0], &w[1]) == Ordering::Greater)
            {
                return corrupt(format!("record {} usages are out of order", record.id));
            }
            if record.hash != record.earliest().hash {
                return corrupt(format!(
                    "record {} hash is not its earliest usage's hash",
                    record.id
                ));
            }
            if record.usages.iter().any(|u| Some(u.hash.len()) != hash_bits) {
                return corrupt(format!("record {} mixes hash lengths", record.id));
            }

            let mut targets = BTreeSet::new();
            for link in &record.relatives {
                if link.id == record.id {
                    return corrupt(format!("record {} links to itself", record.id));
                }
                if link.id >= n {
                    return corrupt(format!(
                        "record {} links to missing record {}",
                        record.id, link.id
                    ));
                }
                if !targets.insert(link.id) {
                    return corrupt(format!(
                        "record {} links to {} twice",
                        record.id, link.id
                    ));
                }
                match self.records[link.id].relative(record.id) {
                    Some(back) if back.dist == link.dist => {}
                    _ => {
                        return corrupt(format!(
                            "link {} -> {} has no matching reverse link",
                            record.id, link.id
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn summary(&self) -> Option<DatasetSummary> {
        let first = self.records.first()?;
        Some(DatasetSummary {
            records: self.len(),
            usages: self.usage_count(),
            relative_pairs: self.relative_pairs(),
            start_ts: self
                .records
                .iter()
                .map(|r| r.first_seen())
                .min()
                .unwrap_or(first.first_seen()),
            end_ts: self
                .records
                .iter()
                .map(|r| r.last_seen())
                .max()
                .unwrap_or(first.last_seen()),
            most_used: self.argmax(|r| r.usages.len()),
            // Ties go to the highest id: the last record seen at that time.
            most_recent: self
                .records
                .iter()
                .max_by_key(|r| r.last_seen())
                .map_or(first.id, |r| r.id),
            most_relatives: self.argmax(|r| r.relatives.len()),
        })
    }

    /// Id of the first record with the largest key.
    fn argmax<K: Ord>(&self, key: impl Fn(&ImageRecord) -> K) -> usize {
        let mut best: Option<(K, usize)> = None;
        for record in &self.records {
            let k = key(record);
            if best.as_ref().is_none_or(|(b, _)| k > *b) {
                best = Some((k, record.id));
            }
        }
        best.map(|(_, id)| id).unwrap_or(0)
    }
}

impl Serialize for Dataset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.records.len()))?;
        for record in &self.records {
            map.serialize_entry(&record.id.to_string(), record)?;
        }
        map.end()
    }
}

pub fn digest(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Turns clusters of repository indices into records with dense ids, ordered
/// by earliest usage.
pub(crate) fn assign_ids(
    repo: &HashRepository,
    mut components: Vec<Vec<usize>>,
) -> Result<Vec<ImageRecord>> {
    // Repository order is (timestamp, local_id), so a component's smallest
    // index is its earliest usage.
    for members in components.iter_mut() {
        members.sort_unstable();
    }
    components.sort_by_key(|members| members.first().copied());

    components
        .into_iter()
        .enumerate()
        .map(|(id, members)| {
            let usages = members
                .into_iter()
                .map(|i| repo.usages()[i].clone())
                .collect();
            ImageRecord::from_cluster(id, usages)
        })
        .collect()
}

/// Runs clustering, id assignment and relative linking over a repository.
pub struct DatasetAssembler {
    config: EngineConfig,
    progress: bool,
}

impl DatasetAssembler {
    /// Fails fast on an invalid configuration.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            progress: false,
        })
    }

    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.progress = enabled;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn assemble(&self, repo: &HashRepository) -> Result<Dataset> {
        if repo.hash_bits() != self.config.hash_bits() {
            return Err(EngineError::Configuration(format!(
                "repository holds {}-bit hashes but hash_size {} needs {} bits",
                repo.hash_bits(),
                self.config.hash_size,
                self.config.hash_bits()
            )));
        }

        let clusterer = DuplicateClusterer::new(&self.config)
            .with_progress(progress_bar(self.progress, "clustering"));
        let components = benchmark("clustering duplicates", || clusterer.components(repo));
        let mut records = assign_ids(repo, components)?;

        let builder = RelativeGraphBuilder::new(&self.config)
            .with_progress(progress_bar(self.progress, "relatives"));
        let pairs = benchmark("linking relatives", || builder.link(&mut records));

        info!(
            "Assembled {} image record(s) from {} occurrence(s) with {} relative pair(s)",
            records.len(),
            repo.len(),
            pairs
        );
        Ok(Dataset::from_records(records))
    }
}
