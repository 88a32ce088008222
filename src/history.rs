use chrono::Utc;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::config::EngineConfig;
use crate::error::Result;

pub const HISTORY_FILE: &str = ".lineage-history.jsonl";

/// One successful `build`, as stored in the history file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BuildRecord {
    pub timestamp: String,
    pub input: String,
    pub output: String,
    pub accepted: usize,
    pub rejected: usize,
    pub records: usize,
    pub relative_pairs: usize,
    pub digest: String,
    pub config: EngineConfig,
}

impl BuildRecord {
    /// Stamps a record with the current time.
    #[allow(clippy::too_many_arguments)]
    pub fn now(
        input: &Path,
        output: &Path,
        accepted: usize,
        rejected: usize,
        records: usize,
        relative_pairs: usize,
        digest: String,
        config: EngineConfig,
    ) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            input: input.to_string_lossy().into_owned(),
            output: output.to_string_lossy().into_owned(),
            accepted,
            rejected,
            records,
            relative_pairs,
            digest,
            config,
        }
    }
}

/// History file kept next to a dataset.
pub fn history_path(dataset: &Path) -> PathBuf {
    match dataset.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(HISTORY_FILE),
        _ => PathBuf::from(HISTORY_FILE),
    }
}

pub fn append(path: &Path, record: &BuildRecord) -> Result<()> {
    let mut out = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(out, "{}", serde_json::to_string(record)?)?;
    Ok(())
}

/// All readable entries, oldest first. A missing file is an empty history.
pub fn read(path: &Path) -> Result<Vec<BuildRecord>> {
    let f = match File::open(path) {
        Ok(f) => f,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut records = Vec::new();
    for (i, line) in BufReader::new(f).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<BuildRecord>(&line) {
            Ok(rec) => records.push(rec),
            Err(err) => warn!("Skipping malformed history entry {}: {}", i, err),
        }
    }
    Ok(records)
}
