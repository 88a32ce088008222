use clap::ValueEnum;
use indicatif::ProgressBar;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::EngineConfig;
use crate::core::hash::BitHash;
use crate::core::image::{ImageRecord, RelativeLink};
use crate::core::index::PairFinder;

/// Which hashes stand in for a record when measuring relative distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum LinkBasis {
    /// The record's canonical (earliest) hash
    #[default]
    Canonical,
    /// The closest pair of member hashes between the two records
    NearestMember,
}

/// Record-level edge: positions of both records and their Hamming distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub a: usize,
    pub b: usize,
    pub hamming: u32,
}

pub struct RelativeGraphBuilder<'a> {
    config: &'a EngineConfig,
    progress: ProgressBar,
}

impl<'a> RelativeGraphBuilder<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self {
            config,
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Unordered record pairs within the related threshold, sorted by `(a, b)`.
    pub fn edges(&self, records: &[ImageRecord]) -> Vec<Edge> {
        let bound = self.config.related_bound();
        match self.config.link_basis {
            LinkBasis::Canonical => {
                let hashes: Vec<&BitHash> = records.iter().map(|r| &r.hash).collect();
                PairFinder::new(hashes)
                    .with_progress(self.progress.clone())
                    .find(bound, self.config.pair_strategy)
                    .into_iter()
                    .map(|p| Edge {
                        a: p.a,
                        b: p.b,
                        hamming: p.hamming,
                    })
                    .collect()
            }
            LinkBasis::NearestMember => {
                // One point per distinct member hash, remembering its record.
                let mut owners = Vec::new();
                let mut hashes: Vec<&BitHash> = Vec::new();
                for (pos, record) in records.iter().enumerate() {
                    let distinct: BTreeSet<&BitHash> =
                        record.usages.iter().map(|u| &u.hash).collect();
                    for hash in distinct {
                        owners.push(pos);
                        hashes.push(hash);
                    }
                }

                let mut nearest: BTreeMap<(usize, usize), u32> = BTreeMap::new();
                let pairs = PairFinder::new(hashes)
                    .with_progress(self.progress.clone())
                    .find(bound, self.config.pair_strategy);
                for pair in pairs {
                    let (ra, rb) = (owners[pair.a], owners[pair.b]);
                    if ra == rb {
                        continue;
                    }
                    let key = (ra.min(rb), ra.max(rb));
                    nearest
                        .entry(key)
                        .and_modify(|h| *h = (*h).min(pair.hamming))
                        .or_insert(pair.hamming);
                }
                nearest
                    .into_iter()
                    .map(|((a, b), hamming)| Edge { a, b, hamming })
                    .collect()
            }
        }
    }

    /// Attaches every edge to both endpoints and returns the number of
    /// linked pairs. Records must sit at the position matching their id.
    pub fn link(&self, records: &mut [ImageRecord]) -> usize {
        let edges = self.edges(records);
        debug!("{} relative pair(s) among {} record(s)", edges.len(), records.len());

        for edge in &edges {
            let dist = self.config.metric.for_hamming(edge.hamming);
            let (id_a, id_b) = (records[edge.a].id, records[edge.b].id);
            records[edge.a].relatives.push(RelativeLink { id: id_b, dist });
            records[edge.b].relatives.push(RelativeLink { id: id_a, dist });
        }
        for record in records.iter_mut() {
            record.sort_relatives();
        }
        edges.len()
    }
}
