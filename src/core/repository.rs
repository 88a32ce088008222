use log::{debug, info, warn};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::EngineConfig;
use crate::core::hash::BitHash;
use crate::core::image::{usage_order, Usage};
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub occurrence: String,
    pub reason: String,
}

/// Outcome of ingesting raw occurrences.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub accepted: usize,
    pub rejected: Vec<Rejection>,
}

impl LoadReport {
    fn reject(&mut self, err: EngineError) {
        let (occurrence, reason) = match err {
            EngineError::MalformedInput { occurrence, reason } => (occurrence, reason),
            other => (String::new(), other.to_string()),
        };
        warn!("Skipping occurrence {}: {}", occurrence, reason);
        self.rejected.push(Rejection { occurrence, reason });
    }
}

/// Validated, read-only set of hashed occurrences.
///
/// Usages are kept in canonical `(timestamp, local_id)` order, so everything
/// derived from the repository is independent of the order the input
/// arrived in.
#[derive(Debug, Clone)]
pub struct HashRepository {
    hash_bits: usize,
    usages: Vec<Usage>,
}

impl HashRepository {
    /// Reads occurrences from a JSON file, or from every `*.json` file below a
    /// directory. Each file maps occurrence ids to occurrence objects.
    pub fn load(path: &Path, config: &EngineConfig) -> Result<(Self, LoadReport)> {
        let files = input_files(path)?;
        info!("Reading {} input file(s) from {}", files.len(), path.display());

        let mut entries = Vec::new();
        for file in &files {
            let content = fs::read_to_string(file)?;
            let value: Value = serde_json::from_str(&content)?;
            let Value::Object(map) = value else {
                return Err(EngineError::malformed(
                    file.display().to_string(),
                    "top level must be an object of occurrences",
                ));
            };
            debug!("{}: {} occurrence(s)", file.display(), map.len());
            entries.extend(map);
        }

        Ok(Self::from_raw(config.hash_bits(), entries))
    }

    /// Parses raw `(occurrence id, object)` pairs, rejecting malformed ones.
    pub fn from_raw<I>(hash_bits: usize, entries: I) -> (Self, LoadReport)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut report = LoadReport::default();
        let mut usages = Vec::new();
        for (occurrence, value) in entries {
            match parse_occurrence(&occurrence, value, hash_bits) {
                Ok(usage) => usages.push(usage),
                Err(err) => report.reject(err),
            }
        }
        let (repo, rest) = Self::from_usages(hash_bits, usages);
        report.accepted = rest.accepted;
        report.rejected.extend(rest.rejected);
        (repo, report)
    }

    /// Builds a repository from already-typed usages. Usages with a hash of
    /// the wrong length or a repeated `local_id` are rejected.
    pub fn from_usages(hash_bits: usize, usages: Vec<Usage>) -> (Self, LoadReport) {
        let mut report = LoadReport::default();

        let mut by_id: BTreeMap<String, Vec<Usage>> = BTreeMap::new();
        for usage in usages {
            if usage.hash.len() != hash_bits {
                report.reject(EngineError::malformed(
                    usage.local_id.clone(),
                    format!("hash has {} bits, expected {}", usage.hash.len(), hash_bits),
                ));
                continue;
            }
            by_id.entry(usage.local_id.clone()).or_default().push(usage);
        }

        let mut kept = Vec::with_capacity(by_id.len());
        for (local_id, mut group) in by_id {
            // Keep one deterministic winner per local_id whatever the input order.
            group.sort_by(|a, b| usage_order(a, b).then_with(|| a.hash.cmp(&b.hash)));
            let mut group = group.into_iter();
            if let Some(first) = group.next() {
                kept.push(first);
            }
            for _ in group {
                report.reject(EngineError::malformed(local_id.clone(), "duplicate local_id"));
            }
        }

        kept.sort_by(usage_order);
        report.accepted = kept.len();
        (
            Self {
                hash_bits,
                usages: kept,
            },
            report,
        )
    }

    pub fn hash_bits(&self) -> usize {
        self.hash_bits
    }

    pub fn usages(&self) -> &[Usage] {
        &self.usages
    }

    pub fn hashes(&self) -> Vec<&BitHash> {
        self.usages.iter().map(|u| &u.hash).collect()
    }

    pub fn len(&self) -> usize {
        self.usages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.usages.is_empty()
    }
}

fn input_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(EngineError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("input path {} does not exist", path.display()),
        )));
    }
    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.into_path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
        })
        .collect();
    files.sort();
    Ok(files)
}

fn parse_occurrence(occurrence: &str, value: Value, hash_bits: usize) -> Result<Usage> {
    let Value::Object(mut map) = value else {
        return Err(EngineError::malformed(occurrence, "occurrence must be an object"));
    };

    let hash = match map.remove("hash") {
        Some(raw) => BitHash::from_json(&raw, hash_bits)
            .map_err(|e| EngineError::malformed(occurrence, format!("hash: {}", e)))?,
        None => return Err(EngineError::malformed(occurrence, "missing hash")),
    };

    let timestamp = match map.remove("timestamp") {
        Some(raw) => raw.as_i64().ok_or_else(|| {
            EngineError::malformed(occurrence, format!("timestamp {} is not an integer", raw))
        })?,
        None => return Err(EngineError::malformed(occurrence, "missing timestamp")),
    };

    let thread_id = match map.remove("thread_id") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => {
            return Err(EngineError::malformed(
                occurrence,
                format!("thread_id {} is not a string", other),
            ));
        }
    };

    let lid = map.remove("lid");
    let local_id = match map.remove("local_id").or(lid) {
        None => occurrence.to_string(),
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => {
            return Err(EngineError::malformed(
                occurrence,
                format!("local_id {} is not a string", other),
            ));
        }
    };

    Ok(Usage {
        local_id,
        thread_id,
        timestamp,
        hash,
        meta: into_meta(map),
    })
}

fn into_meta(map: Map<String, Value>) -> BTreeMap<String, Value> {
    map.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn raw(entries: Value) -> Vec<(String, Value)> {
        match entries {
            Value::Object(map) => map.into_iter().collect(),
            _ => panic!("test input must be an object"),
        }
    }

    #[test]
    fn test_parses_scraped_post_shape() {
        let (repo, report) = HashRepository::from_raw(
            64,
            raw(json!({
                "1001": {
                    "hash": "ffff0000ffff0000",
                    "timestamp": 1500000000,
                    "thread_id": "88",
                    "lid": "1001",
                    "media_url": "http://example/1001.jpg",
                    "attachments": ["1001.jpg"]
                }
            })),
        );

        assert_eq!(report.accepted, 1);
        assert!(report.rejected.is_empty());
        let usage = &repo.usages()[0];
        assert_eq!(usage.local_id, "1001");
        assert_eq!(usage.thread_id, "88");
        assert_eq!(usage.timestamp, 1500000000);
        assert_eq!(usage.meta["media_url"], "http://example/1001.jpg");
        assert!(!usage.meta.contains_key("hash"));
    }

    #[test]
    fn test_malformed_occurrences_are_skipped_and_counted() {
        let (repo, report) = HashRepository::from_raw(
            64,
            raw(json!({
                "ok": {"hash": "0000000000000000", "timestamp": 10},
                "short_hash": {"hash": "00ff", "timestamp": 10},
                "no_timestamp": {"hash": "0000000000000001"},
                "float_timestamp": {"hash": "0000000000000001", "timestamp": 1.5},
                "no_hash": {"timestamp": 10},
                "not_object": 12
            })),
        );

        assert_eq!(repo.len(), 1);
        assert_eq!(report.accepted, 1);
        assert_eq!(report.rejected.len(), 5);
        let rejected: Vec<&str> = report
            .rejected
            .iter()
            .map(|r| r.occurrence.as_str())
            .collect();
        assert!(rejected.contains(&"short_hash"));
        assert!(rejected.contains(&"no_timestamp"));
        assert!(rejected.contains(&"not_object"));
    }

    #[test]
    fn test_duplicate_local_ids_keep_one() {
        let (repo, report) = HashRepository::from_raw(
            64,
            raw(json!({
                "a": {"hash": "0000000000000000", "timestamp": 20, "local_id": "x"},
                "b": {"hash": "0000000000000001", "timestamp": 10, "local_id": "x"}
            })),
        );
        assert_eq!(repo.len(), 1);
        assert_eq!(repo.usages()[0].timestamp, 10);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].reason, "duplicate local_id");
    }

    #[test]
    fn test_usages_are_in_canonical_order() {
        let hash = BitHash::zero(64);
        let (repo, _) = HashRepository::from_usages(
            64,
            vec![
                Usage::new("c", 30, hash.clone()),
                Usage::new("b", 10, hash.clone()),
                Usage::new("a", 10, hash.clone()),
            ],
        );
        let order: Vec<&str> = repo.usages().iter().map(|u| u.local_id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_wrong_length_usage_is_rejected() {
        let (repo, report) = HashRepository::from_usages(
            64,
            vec![
                Usage::new("ok", 1, BitHash::zero(64)),
                Usage::new("bad", 2, BitHash::zero(256)),
            ],
        );
        assert_eq!(repo.len(), 1);
        assert_eq!(report.rejected[0].occurrence, "bad");
    }

    #[test]
    fn test_load_walks_directory() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("threads");
        fs::create_dir_all(&nested).unwrap();
        fs::write(
            temp_dir.path().join("a.json"),
            r#"{"1": {"hash": "000000000000000f", "timestamp": 5}}"#,
        )
        .unwrap();
        fs::write(
            nested.join("b.json"),
            r#"{"2": {"hash": "00000000000000f0", "timestamp": 3}}"#,
        )
        .unwrap();
        fs::write(nested.join("notes.txt"), "ignored").unwrap();

        let (repo, report) =
            HashRepository::load(temp_dir.path(), &EngineConfig::default()).unwrap();
        assert_eq!(report.accepted, 2);
        assert_eq!(repo.usages()[0].local_id, "2");
        assert_eq!(repo.usages()[1].local_id, "1");
    }

    #[test]
    fn test_load_rejects_non_object_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("input.json");
        fs::write(&path, "[1, 2, 3]").unwrap();
        let err = HashRepository::load(&path, &EngineConfig::default()).unwrap_err();
        assert!(matches!(err, EngineError::MalformedInput { .. }));
    }
}
