// Duplicate detection: groups occurrences whose hashes are chained together by
// distances within the identical threshold.

use indicatif::ProgressBar;
use log::debug;

use crate::config::EngineConfig;
use crate::core::dataset::assign_ids;
use crate::core::image::ImageRecord;
use crate::core::index::PairFinder;
use crate::core::repository::HashRepository;
use crate::error::Result;

/// Disjoint-set forest with path compression and union by rank.
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    pub fn union(&mut self, x: usize, y: usize) -> bool {
        let rx = self.find(x);
        let ry = self.find(y);
        if rx == ry {
            return false;
        }
        if self.rank[rx] < self.rank[ry] {
            self.parent[rx] = ry;
        } else if self.rank[rx] > self.rank[ry] {
            self.parent[ry] = rx;
        } else {
            self.parent[ry] = rx;
            self.rank[rx] += 1;
        }
        true
    }

    /// Members of every set, each ascending, sets ordered by smallest member.
    pub fn components(&mut self) -> Vec<Vec<usize>> {
        let n = self.parent.len();
        let mut slot: Vec<Option<usize>> = vec![None; n];
        let mut out: Vec<Vec<usize>> = Vec::new();
        for i in 0..n {
            let root = self.find(i);
            match slot[root] {
                Some(idx) => out[idx].push(i),
                None => {
                    slot[root] = Some(out.len());
                    out.push(vec![i]);
                }
            }
        }
        out
    }
}

pub struct DuplicateClusterer<'a> {
    config: &'a EngineConfig,
    progress: ProgressBar,
}

impl<'a> DuplicateClusterer<'a> {
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

    /// Connected components of the "within identical threshold" graph, as
    /// indices into `repo.usages()`.
    ///
    /// Since the repository is in canonical order, each component's first
    /// index is its earliest usage and components come out ordered by it.
    pub fn components(&self, repo: &HashRepository) -> Vec<Vec<usize>> {
        let bound = self.config.identical_bound();
        let pairs = PairFinder::new(repo.hashes())
            .with_progress(self.progress.clone())
            .find(bound, self.config.pair_strategy);
        debug!(
            "{} identical pair(s) among {} occurrence(s)",
            pairs.len(),
            repo.len()
        );

        let mut sets = UnionFind::new(repo.len());
        for pair in &pairs {
            sets.union(pair.a, pair.b);
        }
        sets.components()
    }

    /// One record per component, ids ordered by earliest usage.
    pub fn cluster(&self, repo: &HashRepository) -> Result<Vec<ImageRecord>> {
        assign_ids(repo, self.components(repo))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hash::{BitHash, Metric};
    use crate::core::image::Usage;

    fn config(threshold: f64) -> EngineConfig {
        EngineConfig {
            metric: Metric::Hamming,
            identical_threshold: threshold,
            related_threshold: threshold.max(6.0),
            ..Default::default()
        }
    }

    /// Zero hash with the lowest `n` bits set.
    fn low_bits(n: usize) -> BitHash {
        (0..n).fold(BitHash::zero(64), |h, pos| h.with_flipped(pos))
    }

    fn repo(usages: Vec<Usage>) -> HashRepository {
        HashRepository::from_usages(64, usages).0
    }

    #[test]
    fn test_union_find_components() {
        let mut sets = UnionFind::new(6);
        assert!(sets.union(4, 1));
        assert!(sets.union(1, 3));
        assert!(!sets.union(3, 4));
        assert!(sets.union(5, 2));
        assert_eq!(sets.components(), vec![vec![0], vec![1, 3, 4], vec![2, 5]]);
    }

    #[test]
    fn test_chain_is_transitive() {
        // A-B and B-C are within 2 bits, A-C is 4 bits apart.
        let repo = repo(vec![
            Usage::new("a", 1, low_bits(0)),
            Usage::new("b", 2, low_bits(2)),
            Usage::new("c", 3, low_bits(4)),
        ]);
        let config = config(2.0);
        let records = DuplicateClusterer::new(&config).cluster(&repo).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].usages.len(), 3);
        assert_eq!(records[0].hash, low_bits(0));
    }

    #[test]
    fn test_three_occurrence_scenario() {
        let base = low_bits(0);
        let repo = repo(vec![
            Usage::new("p3", 300, low_bits(5)),
            Usage::new("p1", 100, base.clone()),
            Usage::new("p2", 200, base.with_flipped(63)),
        ]);
        let config = config(2.0);
        let records = DuplicateClusterer::new(&config).cluster(&repo).unwrap();

        assert_eq!(records.len(), 2);
        let merged: Vec<&str> = records[0]
            .usages
            .iter()
            .map(|u| u.local_id.as_str())
            .collect();
        assert_eq!(merged, vec!["p1", "p2"]);
        assert_eq!(records[0].hash, base);
        assert_eq!(records[1].usages[0].local_id, "p3");
    }

    #[test]
    fn test_every_occurrence_lands_in_exactly_one_record() {
        let mut usages = Vec::new();
        for i in 0..40usize {
            usages.push(Usage::new(format!("u{}", i), (i * 7 % 13) as i64, low_bits(i % 9)));
        }
        let repo = repo(usages);
        let config = config(1.0);
        let records = DuplicateClusterer::new(&config).cluster(&repo).unwrap();

        let mut seen: Vec<&str> = records
            .iter()
            .flat_map(|r| r.usages.iter().map(|u| u.local_id.as_str()))
            .collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 40);
        assert_eq!(records.iter().map(|r| r.usages.len()).sum::<usize>(), 40);
        for record in &records {
            assert!(record.usages.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        }
    }

    #[test]
    fn test_membership_ignores_input_order() {
        let make = |order: &[usize]| {
            let usages: Vec<Usage> = order
                .iter()
                .map(|&i| Usage::new(format!("u{}", i), (i % 4) as i64, low_bits(i * 3 % 11)))
                .collect();
            let config = config(2.0);
            DuplicateClusterer::new(&config)
                .cluster(&repo(usages))
                .unwrap()
        };
        let forward: Vec<usize> = (0..12).collect();
        let backward: Vec<usize> = (0..12).rev().collect();
        assert_eq!(make(&forward), make(&backward));
    }
}
