use super::restack::restack_status;
use super::{BranchStore, RestackStatus, StackRepository};
use crate::errors::Result;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::thread;
use tracing::{debug, warn};

/// Restack status of each of `branches`, in the same order.
///
/// Up to `workers` threads drain a shared queue. Each opens its own
/// repository with `open_repo`; nothing is written.
pub fn restack_statuses<R, S, F>(
    open_repo: F,
    store: &S,
    branches: &[String],
    workers: usize,
) -> Vec<(String, RestackStatus)>
where
    R: StackRepository,
    S: BranchStore + Sync,
    F: Fn() -> Result<R> + Sync,
{
    let workers = workers.clamp(1, branches.len().max(1));
    let queue: Mutex<VecDeque<(usize, &str)>> = Mutex::new(
        branches
            .iter()
            .enumerate()
            .map(|(i, name)| (i, name.as_str()))
            .collect(),
    );
    let results: Mutex<Vec<RestackStatus>> =
        Mutex::new(vec![RestackStatus::Unknown; branches.len()]);

    debug!(
        "Checking restack status of {} branches with {} workers",
        branches.len(),
        workers
    );

    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| {
                let repo = match open_repo() {
                    Ok(repo) => Ok(repo),
                    Err(e) => {
                        warn!("Could not open repository for status worker: {}", e);
                        Err(e.to_string())
                    }
                };

                loop {
                    let Some((index, name)) = queue.lock().pop_front() else {
                        break;
                    };
                    let status = match &repo {
                        Ok(repo) => restack_status(repo, store, name),
                        Err(msg) => RestackStatus::Error(msg.clone()),
                    };
                    results.lock()[index] = status;
                }
            });
        }
    });

    branches
        .iter()
        .cloned()
        .zip(results.into_inner())
        .collect()
}
