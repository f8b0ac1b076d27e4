//! Per-call coordinator/worker pool.
//!
//! Each construct or analyze call spawns a fresh pool of scoped worker
//! threads; no pool persists across calls. The coordinator computes the
//! partition once, sends every worker exactly one assignment message over
//! its own channel, and collects tagged results over a shared channel.
//! Workers share nothing mutable: each owns its assigned items for the
//! duration of the call.

use std::sync::mpsc;
use std::thread;

use crate::partition::partition;

/// Assignment message sent to one worker.
#[derive(Debug, Clone)]
struct Assignment {
    items: Vec<usize>,
}

/// Run `job` over item indices `0..sizes.len()`, partitioned across
/// `workers` threads by the per-item sizes.
///
/// Results are returned in item order. `workers == 1` still goes through
/// the same channel machinery, so serial and parallel runs exercise one
/// code path.
pub fn run_partitioned<O, F>(workers: usize, sizes: &[usize], job: F) -> Vec<O>
where
    O: Send,
    F: Fn(usize) -> O + Sync,
{
    let assignment_plan = partition(sizes, workers);
    tracing::debug!(
        processes = assignment_plan.n_processes(),
        loads = ?assignment_plan.loads(sizes),
        "work items partitioned"
    );
    let job = &job;

    let mut slots: Vec<Option<O>> = (0..sizes.len()).map(|_| None).collect();
    thread::scope(|scope| {
        let (result_tx, result_rx) = mpsc::channel::<(usize, O)>();

        for items in assignment_plan.assignments() {
            if items.is_empty() {
                continue;
            }
            let (tx, rx) = mpsc::channel::<Assignment>();
            // The partition is computed once and shipped in the message;
            // workers never consult shared scheduling state.
            let _ = tx.send(Assignment {
                items: items.clone(),
            });
            drop(tx);

            let result_tx = result_tx.clone();
            scope.spawn(move || {
                while let Ok(assignment) = rx.recv() {
                    for i in assignment.items {
                        let out = job(i);
                        if result_tx.send((i, out)).is_err() {
                            return;
                        }
                    }
                }
            });
        }
        drop(result_tx);

        for (i, out) in result_rx {
            slots[i] = Some(out);
        }
    });

    // A missing slot means a worker died mid-assignment, which thread::scope
    // has already turned into a panic by this point.
    slots
        .into_iter()
        .map(|slot| slot.expect("worker completed its assignment"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_results_in_item_order() {
        let sizes = vec![1usize; 9];
        let out = run_partitioned(3, &sizes, |i| i * i);
        assert_eq!(out, vec![0, 1, 4, 9, 16, 25, 36, 49, 64]);
    }

    #[test]
    fn test_serial_matches_parallel() {
        let sizes = vec![2usize; 12];
        let serial = run_partitioned(1, &sizes, |i| i as f64 * 0.5);
        let parallel = run_partitioned(4, &sizes, |i| i as f64 * 0.5);
        assert_eq!(serial, parallel);
    }

    #[test]
    fn test_every_item_runs_exactly_once() {
        let sizes = vec![1usize; 20];
        let counter = AtomicUsize::new(0);
        let out = run_partitioned(5, &sizes, |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(out.len(), 20);
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn test_more_workers_than_items() {
        let out = run_partitioned(8, &[1, 1], |i| i);
        assert_eq!(out, vec![0, 1]);
    }

    #[test]
    fn test_no_items() {
        let out: Vec<usize> = run_partitioned(4, &[], |i| i);
        assert!(out.is_empty());
    }
}
