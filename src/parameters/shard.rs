use serde::{Deserialize, Serialize};

use super::ParameterSet;

/// A worker's private, possibly stale view of the model.
///
/// Holds the weights the worker last pulled and the global step at which it
/// pulled them; the gap between that step and the current one is what the
/// staleness factor is derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerShard {
    worker_id: usize,
    weights: ParameterSet,
    last_sync: u64,
}

impl WorkerShard {
    /// Creates a new `WorkerShard`.
    ///
    /// # Arguments
    /// * `worker_id` - The worker's index in `0..workers_num`.
    /// * `weights` - The worker's starting view, a copy of the master.
    pub fn new(worker_id: usize, weights: ParameterSet) -> Self {
        Self {
            worker_id,
            weights,
            last_sync: 0,
        }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn weights(&self) -> &ParameterSet {
        &self.weights
    }

    pub fn last_sync(&self) -> u64 {
        self.last_sync
    }

    /// Records a pull: caches the snapshot and stamps the sync point.
    ///
    /// # Arguments
    /// * `snapshot` - The master snapshot handed to the worker.
    /// * `global_step` - The master's step counter at pull time.
    pub fn record_pull(&mut self, snapshot: ParameterSet, global_step: u64) {
        self.weights = snapshot;
        self.last_sync = global_step;
    }

    /// The staleness factor for an update pushed at `global_step`:
    /// `(global_step - last_sync) / workers + 1`.
    ///
    /// A worker cannot have synced ahead of the current step, so the result
    /// is always at least 1.
    pub fn staleness(&self, global_step: u64, workers: usize) -> f32 {
        let delayed = global_step.saturating_sub(self.last_sync);
        delayed as f32 / workers as f32 + 1.
    }
}

#[cfg(test)]
mod tests {
    use ndarray::arr1;

    use super::*;

    fn toy_weights() -> ParameterSet {
        let mut set = ParameterSet::new();
        set.insert("w", arr1(&[1., 2.]).into_dyn(), true);
        set
    }

    #[test]
    fn test_fresh_shard_has_unit_staleness() {
        let shard = WorkerShard::new(0, toy_weights());
        assert_eq!(shard.staleness(0, 4), 1.);
    }

    #[test]
    fn test_staleness_grows_with_missed_updates() {
        let mut shard = WorkerShard::new(2, toy_weights());
        shard.record_pull(toy_weights(), 8);

        assert_eq!(shard.staleness(8, 4), 1.);
        assert_eq!(shard.staleness(10, 4), 1.5);
        assert_eq!(shard.staleness(12, 4), 2.);
    }

    #[test]
    fn test_staleness_never_drops_below_one() {
        let mut shard = WorkerShard::new(0, toy_weights());
        shard.record_pull(toy_weights(), 8);

        // A step counter behind the sync point clamps instead of wrapping.
        assert_eq!(shard.staleness(3, 4), 1.);
    }

    #[test]
    fn test_record_pull_replaces_cached_view() {
        let mut shard = WorkerShard::new(1, toy_weights());
        let fresh = toy_weights().zeros_like();

        shard.record_pull(fresh.clone(), 5);
        assert_eq!(shard.weights(), &fresh);
        assert_eq!(shard.last_sync(), 5);
    }
}
