use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;

use crate::{
    config::{AggregationConfig, Mode, ServerConfig},
    error::{PsErr, Result},
    optimization::UpdateRule,
    parameters::{ParameterSet, WeightStore, WorkerShard},
    schedule::Schedule,
    snapshot::ServerState,
};

/// The parameter server: owns the master weights, hands out per-worker
/// snapshots, folds pushed gradients back under the staleness policy.
///
/// All methods take `&self`; the server is shared across worker threads.
/// `push` is the only path that mutates master state and runs as a critical
/// section, so concurrent pushes serialize and never tear a tensor. `pull`
/// and the diagnostics accessors read a consistent snapshot and may run
/// concurrently with anything.
pub struct ParameterServer {
    config: ServerConfig,
    rule: UpdateRule,
    store: RwLock<WeightStore>,
    shards: Vec<Mutex<WorkerShard>>,
    schedule: RwLock<Schedule>,
    aggregation: RwLock<AggregationConfig>,
}

impl ParameterServer {
    /// Creates a new `ParameterServer`.
    ///
    /// # Arguments
    /// * `config` - The full configuration surface, including the initial
    ///   aggregation regime.
    /// * `initial` - The initial master weights; fixes the parameter name
    ///   set for the run.
    pub fn new(config: ServerConfig, initial: ParameterSet) -> Self {
        let schedule = Schedule::for_run(&config, &config.aggregation);
        let rule = UpdateRule::new(config.optimizer, config.weight_decay, config.grad_clip);
        let shards = (0..config.workers_num.get())
            .map(|id| Mutex::new(WorkerShard::new(id, initial.clone())))
            .collect();

        info!(
            workers = config.workers_num.get(),
            mode = config.aggregation.mode().as_str(),
            params = initial.len(),
            lr = schedule.target_lr();
            "parameter server ready"
        );

        Self {
            rule,
            store: RwLock::new(WeightStore::new(initial)),
            shards,
            schedule: RwLock::new(schedule),
            aggregation: RwLock::new(config.aggregation),
            config,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn workers_num(&self) -> usize {
        self.shards.len()
    }

    fn shard(&self, worker_id: usize) -> Result<&Mutex<WorkerShard>> {
        self.shards.get(worker_id).ok_or(PsErr::InvalidWorker {
            got: worker_id,
            workers: self.shards.len(),
        })
    }

    /// Hands `worker_id` a fresh snapshot of the master weights.
    ///
    /// The snapshot shares no storage with the live weights. The shard's
    /// cached view and sync point are refreshed; how many local steps the
    /// worker takes before pulling again is the caller's business, and is
    /// exactly the asynchrony the staleness factor measures.
    pub fn pull(&self, worker_id: usize) -> Result<ParameterSet> {
        let shard = self.shard(worker_id)?;

        let (snapshot, step) = {
            let store = self.store.read();
            (store.snapshot(), store.global_step())
        };
        shard.lock().record_pull(snapshot.clone(), step);

        debug!(worker_id = worker_id, step = step; "pull served");
        Ok(snapshot)
    }

    /// Folds a worker's gradient into the master state.
    ///
    /// Validation happens before any mutation: a failed push leaves the
    /// master weights, momentum buffers, step counter and schedule clock all
    /// untouched. The staleness factor is derived from the shard's sync
    /// point rather than trusted from the caller, so `tau >= 1` holds by
    /// construction; synchronous mode pins it at 1.
    ///
    /// # Arguments
    /// * `worker_id` - The pushing worker.
    /// * `grads` - The accumulated mini-batch gradient, consumed here.
    /// * `epoch` - The driver's epoch counter, carried for observability.
    /// * `iteration` - The driver's iteration counter, carried for
    ///   observability.
    ///
    /// # Returns
    /// The step norm: the L2 magnitude of the applied delta, the signal the
    /// statistics collaborator watches for divergence.
    pub fn push(
        &self,
        worker_id: usize,
        grads: ParameterSet,
        epoch: usize,
        iteration: usize,
    ) -> Result<f32> {
        let shard = self.shard(worker_id)?;

        let mut store = self.store.write();
        let mode = self.aggregation.read().mode();
        store.master().check_compatible(&grads)?;

        let tau = match mode {
            Mode::Sync => 1.,
            Mode::Async => shard.lock().staleness(store.global_step(), self.shards.len()),
        };
        let (lr, momentum) = self.schedule.write().tick();

        let step_norm = self.rule.step(&mut store, grads, lr, momentum, tau)?;

        debug!(
            worker_id = worker_id,
            epoch = epoch,
            iteration = iteration,
            tau = tau,
            lr = lr,
            step_norm = step_norm;
            "push applied"
        );
        Ok(step_norm)
    }

    /// Switches the aggregation regime.
    ///
    /// Explicit and operator-triggered: every shard's cached view is
    /// re-seeded from the current master, the schedule clock restarts at
    /// zero, and the effective learning rate is recomputed under the new
    /// regime's scaling law. Exclusive with `push`/`pull` for the duration.
    pub fn reconfigure(&self, aggregation: AggregationConfig) {
        let store = self.store.write();
        let snapshot = store.snapshot();
        let step = store.global_step();

        for shard in &self.shards {
            shard.lock().record_pull(snapshot.clone(), step);
        }

        let mut schedule = self.schedule.write();
        *schedule = Schedule::for_run(&self.config, &aggregation);

        let mut current = self.aggregation.write();
        info!(
            from = current.mode().as_str(),
            to = aggregation.mode().as_str(),
            start_lr = schedule.start_lr(),
            target_lr = schedule.target_lr();
            "aggregation mode switched"
        );
        *current = aggregation;
    }

    /// L2 norm of the master weights.
    pub fn get_server_weights(&self) -> f32 {
        self.store.read().master().l2_norm()
    }

    /// L2 norm of the momentum buffers.
    pub fn get_server_gradients(&self) -> f32 {
        self.store.read().momentum().l2_norm()
    }

    /// Mean pairwise L2 distance between the workers' cached weights; the
    /// drift the asynchrony introduces between worker views.
    pub fn get_workers_mean_statistics(&self) -> f32 {
        let views = self.shard_views();
        let n = views.len();
        if n < 2 {
            return 0.;
        }

        let total: f64 = (0..n)
            .into_par_iter()
            .map(|i| {
                (i + 1..n)
                    .map(|j| views[i].distance(&views[j]) as f64)
                    .sum::<f64>()
            })
            .sum();

        let pairs = (n * (n - 1) / 2) as f64;
        (total / pairs) as f32
    }

    /// Mean L2 distance of each worker's cached weights from the master.
    pub fn get_workers_master_statistics(&self) -> f32 {
        let master = self.store.read().snapshot();
        let views = self.shard_views();

        let total: f64 = views
            .par_iter()
            .map(|v| v.distance(&master) as f64)
            .sum();
        (total / views.len() as f64) as f32
    }

    /// L2 distance of the elementwise mean of the workers' cached weights
    /// from the master.
    pub fn get_mean_master_dist(&self) -> f32 {
        let master = self.store.read().snapshot();
        let views = self.shard_views();

        match ParameterSet::mean(&views) {
            Some(mean) => mean.distance(&master),
            None => 0.,
        }
    }

    fn shard_views(&self) -> Vec<ParameterSet> {
        self.shards
            .iter()
            .map(|shard| shard.lock().weights().clone())
            .collect()
    }

    /// Captures the complete server state for the checkpoint collaborator.
    ///
    /// Takes exclusive access for the duration, so the capture is a single
    /// consistent point in time.
    pub fn export_state(&self) -> ServerState {
        let store = self.store.write();
        let shards = self.shards.iter().map(|s| s.lock().clone()).collect();

        ServerState {
            store: store.clone(),
            shards,
            schedule: self.schedule.read().clone(),
            aggregation: *self.aggregation.read(),
        }
    }

    /// Replaces the server state with a previously exported capture.
    ///
    /// # Returns
    /// `IncompatibleState` if the snapshot was taken against a different
    /// parameter name set, worker count or aggregation mode, or if any shard
    /// claims a sync point ahead of the restored step counter. Validation
    /// happens before any mutation.
    pub fn restore_state(&self, state: ServerState) -> Result<()> {
        let mut store = self.store.write();

        if state.shards.len() != self.shards.len() {
            return Err(PsErr::IncompatibleState {
                reason: format!(
                    "snapshot has {} workers, server is configured for {}",
                    state.shards.len(),
                    self.shards.len()
                ),
            });
        }

        let configured = self.aggregation.read().mode();
        if state.aggregation.mode() != configured {
            return Err(PsErr::IncompatibleState {
                reason: format!(
                    "snapshot was taken in {} mode, server runs in {} mode",
                    state.aggregation.mode().as_str(),
                    configured.as_str()
                ),
            });
        }

        let incompatible = |e: PsErr| PsErr::IncompatibleState {
            reason: e.to_string(),
        };
        store
            .master()
            .check_compatible(state.store.master())
            .map_err(incompatible)?;

        for (id, shard) in state.shards.iter().enumerate() {
            if shard.worker_id() != id {
                return Err(PsErr::IncompatibleState {
                    reason: format!("shard {} carries worker id {}", id, shard.worker_id()),
                });
            }

            store
                .master()
                .check_compatible(shard.weights())
                .map_err(incompatible)?;

            if shard.last_sync() > state.store.global_step() {
                return Err(PsErr::IncompatibleState {
                    reason: format!(
                        "worker {id} synced at step {}, past the master's step {}",
                        shard.last_sync(),
                        state.store.global_step()
                    ),
                });
            }
        }

        info!(step = state.store.global_step(); "restoring server state");

        *store = state.store;
        for (slot, shard) in self.shards.iter().zip(state.shards) {
            *slot.lock() = shard;
        }
        *self.schedule.write() = state.schedule;
        *self.aggregation.write() = state.aggregation;
        Ok(())
    }
}
