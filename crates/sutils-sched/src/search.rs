//! Allocation search over per-node CPU counts.
//!
//! Given the CPU counts of the nodes in a partition and a CPU target, find
//! the subset of nodes whose CPUs cover the target with the smallest total,
//! breaking ties by the smallest number of nodes. This is a covering variant
//! of subset-sum, solved by memoized recursion.
//!
//! The nodes are grouped by CPU count. Each recursion step takes the next
//! distinct count and branches on how many of its nodes to include, which
//! collapses every order of single-node include/exclude steps over that
//! count into one branch. A sub-problem is identified by the remaining
//! distinct counts and the remaining target, and the memo stores only the
//! `(sum, len)` of its best cover plus the branch taken, from which the
//! subset is rebuilt once at the end.
//!
//! There are at most `distinct counts * target` sub-problems, each trying
//! every node count of its group, so the cost grows with the target and the
//! partition size rather than with the number of node subsets.

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::topology::TopologyModel;

/// Size of an allocation found by [`find_resources`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    /// Sum of CPUs over the chosen nodes.
    pub cpus: u32,
    /// Number of chosen nodes.
    pub nodes: u32,
}

/// Find the cheapest allocation of at least `target_cpus` CPUs in `topology`.
///
/// With `idle`, only fully idle nodes are considered and their idle CPUs are
/// counted; otherwise every node counts with its total CPUs. Nodes with zero
/// CPUs are ignored. Returns `None` when the available CPUs do not cover the
/// target. A zero target yields an empty allocation.
pub fn find_resources(topology: &TopologyModel, target_cpus: u32, idle: bool) -> Option<Allocation> {
    let capacities = if idle {
        topology.filter_idle().idle_cpus().to_vec()
    } else {
        topology.total_cpus().to_vec()
    };

    let result = optimal_subset(&capacities, target_cpus).map(|subset| Allocation {
        cpus: subset.iter().sum(),
        nodes: subset.len() as u32,
    });

    debug!(
        target_cpus,
        idle,
        candidates = capacities.len(),
        ?result,
        "allocation search finished"
    );
    result
}

/// The minimal covering subset of `capacities` for `target`, sorted ascending.
///
/// Minimizes the subset sum first and the subset size second. Zero entries
/// are dropped before searching. Among covers with the same sum and size,
/// the one with the fewest nodes of the smallest CPU counts is returned.
///
/// Memory use is one memo entry per reachable `(distinct count, target)`
/// pair, bounded by the number of distinct counts times `target`.
pub fn optimal_subset(capacities: &[u32], target: u32) -> Option<Vec<u32>> {
    let mut sorted: Vec<u32> = capacities.iter().copied().filter(|&c| c > 0).collect();
    sorted.sort_unstable();

    let mut search = SubsetSearch::new(&sorted);
    let subset = search.solve(0, target).map(|_| search.rebuild(target));
    debug!(
        nodes = sorted.len(),
        distinct = search.groups.len(),
        target,
        memo_entries = search.memo.len(),
        "subset search"
    );
    subset
}

/// Best cover of a sub-problem and how many nodes of its first group it takes.
#[derive(Debug, Clone, Copy)]
struct Cover {
    sum: u64,
    len: u32,
    take: u32,
}

impl Cover {
    /// Ordering key: total CPUs, then node count.
    fn rank(&self) -> (u64, u32) {
        (self.sum, self.len)
    }
}

/// Memo table for one top-level search.
struct SubsetSearch {
    /// `(cpus, node count)` per distinct CPU count, ascending.
    groups: Vec<(u32, u32)>,
    /// CPUs available in `groups[i..]`.
    suffix: Vec<u64>,
    /// Keyed by the first remaining group and the remaining target.
    memo: FxHashMap<(usize, u32), Option<Cover>>,
}

impl SubsetSearch {
    /// `caps` must be sorted ascending and free of zeros.
    fn new(caps: &[u32]) -> Self {
        let mut groups: Vec<(u32, u32)> = Vec::new();
        for &c in caps {
            match groups.last_mut() {
                Some((cpus, count)) if *cpus == c => *count += 1,
                _ => groups.push((c, 1)),
            }
        }

        let mut suffix = vec![0u64; groups.len() + 1];
        for i in (0..groups.len()).rev() {
            let (cpus, count) = groups[i];
            suffix[i] = suffix[i + 1] + u64::from(cpus) * u64::from(count);
        }

        Self {
            groups,
            suffix,
            memo: FxHashMap::default(),
        }
    }

    fn solve(&mut self, group: usize, target: u32) -> Option<Cover> {
        if target == 0 {
            return Some(Cover { sum: 0, len: 0, take: 0 });
        }
        if u64::from(target) > self.suffix[group] {
            return None;
        }
        if let Some(hit) = self.memo.get(&(group, target)) {
            return *hit;
        }

        let result = if u64::from(target) == self.suffix[group] {
            Some(Cover {
                sum: self.suffix[group],
                len: self.groups[group..].iter().map(|&(_, n)| n).sum(),
                take: self.groups[group].1,
            })
        } else {
            self.branch(group, target)
        };

        self.memo.insert((group, target), result);
        result
    }

    fn branch(&mut self, group: usize, target: u32) -> Option<Cover> {
        let (cpus, count) = self.groups[group];
        let mut best: Option<Cover> = None;

        for take in 0..=count {
            let taken = u64::from(cpus) * u64::from(take);
            // never above target, so it fits in u32
            let rest = u64::from(target).saturating_sub(taken) as u32;
            let candidate = self.solve(group + 1, rest).map(|sub| Cover {
                sum: taken + sub.sum,
                len: take + sub.len,
                take,
            });

            if let Some(candidate) = candidate {
                if best.is_none_or(|b| candidate.rank() < b.rank()) {
                    best = Some(candidate);
                }
            }
            // more nodes of this count can only add to an existing cover
            if taken >= u64::from(target) {
                break;
            }
        }

        best
    }

    /// Walk the recorded branches from the root to recover the subset.
    fn rebuild(&mut self, target: u32) -> Vec<u32> {
        let mut subset = Vec::new();
        let mut remaining = target;
        for group in 0..self.groups.len() {
            let Some(cover) = self.solve(group, remaining) else {
                break;
            };
            if cover.len == 0 {
                break;
            }
            let (cpus, _) = self.groups[group];
            subset.extend(std::iter::repeat_n(cpus, cover.take as usize));
            remaining = remaining.saturating_sub(cpus.saturating_mul(cover.take));
        }
        subset
    }
}
