//! All-pairs search over bit hashes within a Hamming bound.
//!
//! Two strategies produce the same pair set:
//! - an exhaustive scan whose rows are spread across the rayon pool, and
//! - multi-index hashing: cut each hash into `k + 1` segments; two hashes
//!   within distance `k` must agree exactly on at least one segment, so only
//!   hashes sharing a segment bucket are compared.

use clap::ValueEnum;
use indicatif::ProgressBar;
use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::hash::BitHash;

/// Smallest segment width worth bucketing on.
const MIN_SEGMENT_BITS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PairStrategy {
    /// Multi-index when segments stay at least 8 bits wide, else exhaustive
    #[default]
    Auto,
    Exhaustive,
    MultiIndex,
}

/// An unordered pair `a < b` and its Hamming distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pair {
    pub a: usize,
    pub b: usize,
    pub hamming: u32,
}

pub struct PairFinder<'a> {
    hashes: Vec<&'a BitHash>,
    progress: ProgressBar,
}

impl<'a> PairFinder<'a> {
    pub fn new(hashes: Vec<&'a BitHash>) -> Self {
        Self {
            hashes,
            progress: ProgressBar::hidden(),
        }
    }

    /// Ticks `progress` once per scanned row.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Every pair within `max_hamming`, sorted by `(a, b)`.
    pub fn find(&self, max_hamming: u32, strategy: PairStrategy) -> Vec<Pair> {
        let bits = self.hashes.first().map(|h| h.len()).unwrap_or(0);
        let segments = max_hamming as usize + 1;
        let use_index = match strategy {
            PairStrategy::Exhaustive => false,
            PairStrategy::MultiIndex => segments <= bits,
            PairStrategy::Auto => bits / segments >= MIN_SEGMENT_BITS,
        };
        debug!(
            "Pair search over {} hashes, bound {}, {}",
            self.hashes.len(),
            max_hamming,
            if use_index { "multi-index" } else { "exhaustive" }
        );

        self.progress.set_length(self.hashes.len() as u64);
        let pairs = if use_index {
            self.multi_index(max_hamming, bits)
        } else {
            self.exhaustive(max_hamming)
        };
        self.progress.finish_and_clear();
        pairs
    }

    fn exhaustive(&self, max_hamming: u32) -> Vec<Pair> {
        let n = self.hashes.len();
        (0..n)
            .into_par_iter()
            .flat_map_iter(|a| {
                let row: Vec<Pair> = ((a + 1)..n)
                    .filter_map(|b| {
                        let hamming = self.hashes[a].hamming(self.hashes[b]);
                        (hamming <= max_hamming).then_some(Pair { a, b, hamming })
                    })
                    .collect();
                self.progress.inc(1);
                row
            })
            .collect()
    }

    fn multi_index(&self, max_hamming: u32, bits: usize) -> Vec<Pair> {
        let n = self.hashes.len();
        let bounds = segment_bounds(bits, max_hamming as usize + 1);

        // keys[s][i]: segment s of hash i
        let keys: Vec<Vec<Vec<u64>>> = bounds
            .par_iter()
            .map(|&(start, len)| {
                self.hashes
                    .iter()
                    .map(|hash| hash.segment(start, len))
                    .collect()
            })
            .collect();

        // Buckets list hash indices in ascending order.
        let tables: Vec<HashMap<&[u64], Vec<usize>>> = keys
            .iter()
            .map(|column| {
                let mut table: HashMap<&[u64], Vec<usize>> = HashMap::new();
                for (i, key) in column.iter().enumerate() {
                    table.entry(key.as_slice()).or_default().push(i);
                }
                table
            })
            .collect();

        (0..n)
            .into_par_iter()
            .flat_map_iter(|a| {
                let mut row = Vec::new();
                for (s, table) in tables.iter().enumerate() {
                    let Some(bucket) = table.get(keys[s][a].as_slice()) else {
                        continue;
                    };
                    let after = bucket.partition_point(|&b| b <= a);
                    for &b in &bucket[after..] {
                        // Emit each pair only from the first segment it agrees on.
                        if (0..s).any(|earlier| keys[earlier][a] == keys[earlier][b]) {
                            continue;
                        }
                        let hamming = self.hashes[a].hamming(self.hashes[b]);
                        if hamming <= max_hamming {
                            row.push(Pair { a, b, hamming });
                        }
                    }
                }
                row.sort_unstable();
                self.progress.inc(1);
                row
            })
            .collect()
    }
}

/// Splits `bits` into `count` contiguous `(start, len)` ranges whose widths
/// differ by at most one.
fn segment_bounds(bits: usize, count: usize) -> Vec<(usize, usize)> {
    (0..count)
        .map(|s| {
            let start = s * bits / count;
            let end = (s + 1) * bits / count;
            (start, end - start)
        })
        .collect()
}
