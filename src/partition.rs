//! Deterministic assignment of emulator systems to worker processes.
//!
//! Systems are independent and cheap to parallelize; fitting cost is
//! dominated by training-set size, so the partitioner balances total
//! assigned size rather than system count. The assignment is a greedy
//! longest-processing-time pass with fully deterministic tie-breaking, so
//! re-runs on the same process count reproduce the same partition.

/// Assignment of work items (by index) to processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    assignments: Vec<Vec<usize>>,
}

impl Partition {
    /// Item indices assigned to each process.
    pub fn assignments(&self) -> &[Vec<usize>] {
        &self.assignments
    }

    /// Number of processes in the partition.
    pub fn n_processes(&self) -> usize {
        self.assignments.len()
    }

    /// Total work per process under the given sizes.
    pub fn loads(&self, sizes: &[usize]) -> Vec<usize> {
        self.assignments
            .iter()
            .map(|items| items.iter().map(|&i| sizes[i]).sum())
            .collect()
    }
}

/// Partition `sizes.len()` items across `processes` workers.
///
/// Greedy longest-processing-time: items sorted by (size descending,
/// index ascending) are assigned one by one to the least-loaded process,
/// ties to the lowest process index. Guarantees:
/// - every process receives at least one item when there are at least as
///   many items as processes;
/// - for equal sizes the heaviest load exceeds the lightest by at most one
///   item;
/// - identical inputs produce identical output.
pub fn partition(sizes: &[usize], processes: usize) -> Partition {
    assert!(processes > 0, "partition requires at least one process");

    let mut order: Vec<usize> = (0..sizes.len()).collect();
    order.sort_by_key(|&i| (std::cmp::Reverse(sizes[i]), i));

    let mut assignments = vec![Vec::new(); processes];
    let mut loads = vec![0usize; processes];
    for i in order {
        // min_by_key picks the first minimum, i.e. the lowest process index.
        let target = (0..processes)
            .min_by_key(|&p| loads[p])
            .unwrap_or(0);
        assignments[target].push(i);
        loads[target] += sizes[i];
    }
    Partition { assignments }
}
