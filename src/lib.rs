//! A staleness-aware parameter server for data-parallel training.
//!
//! Logical workers share one master model but train against private,
//! possibly stale snapshots of it. The [`ParameterServer`] owns the
//! authoritative weights, serves per-worker snapshots through `pull`, and
//! folds pushed gradients back through a momentum update whose magnitude is
//! dampened by each worker's staleness. Data loading, model definitions,
//! statistics history and checkpoint files are collaborators behind
//! interfaces, not part of this crate.

pub mod config;
pub mod error;
pub mod optimization;
pub mod parameters;
pub mod schedule;
pub mod server;
pub mod snapshot;

pub use config::{
    AggregationConfig, AsyncParams, GRAD_CLIP_DISABLED, Mode, OptimizerKind, ServerConfig,
    SyncParams,
};
pub use error::{PsErr, Result};
pub use parameters::{Parameter, ParameterSet, WeightStore, WorkerShard};
pub use schedule::Schedule;
pub use server::ParameterServer;
pub use snapshot::{Checkpoint, ServerState};
