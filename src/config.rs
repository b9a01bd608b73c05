use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

/// Gradient clipping is skipped once the configured ceiling reaches this
/// sentinel.
pub const GRAD_CLIP_DISABLED: f32 = 1000.;

/// Which update rule the server applies on `push`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizerKind {
    /// Plain SGD; momentum buffers stay at zero.
    Sgd,
    /// SGD with momentum buffers folded into every step.
    Momentum,
}

/// The aggregation regime discriminant, used for logging and for validating
/// checkpoint restores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Sync,
    Async,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Sync => "sync",
            Mode::Async => "async",
        }
    }
}

/// Parameters specific to the synchronous regime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncParams {
    /// Ramp the learning rate up from `lr / workers_num` over the first
    /// warm-up epochs instead of starting at the scaled rate.
    pub lr_warm_up: bool,
}

/// Parameters specific to the asynchronous regime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncParams {
    /// Use the steeper "fast" warm-up ramp in place of the default scaling
    /// law; takes precedence over `lr_warm_up`.
    pub fast_im: bool,
    pub lr_warm_up: bool,
}

/// The aggregation regime, carrying only the fields that regime needs.
///
/// Selected at construction and on explicit reconfiguration; there is no
/// partially-initialized in-between state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregationConfig {
    Sync(SyncParams),
    Async(AsyncParams),
}

impl AggregationConfig {
    pub fn mode(&self) -> Mode {
        match self {
            AggregationConfig::Sync(_) => Mode::Sync,
            AggregationConfig::Async(_) => Mode::Async,
        }
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        AggregationConfig::Sync(SyncParams::default())
    }
}

/// The configuration surface consumed when the server is constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub optimizer: OptimizerKind,
    pub workers_num: NonZeroUsize,
    /// Effective (accumulated) batch size per update.
    pub batch_size: usize,
    /// The batch size the base learning rate was tuned against.
    pub baseline: usize,
    pub lr: f32,
    pub momentum: f32,
    pub weight_decay: f32,
    /// Global L2 ceiling for incoming gradients; `GRAD_CLIP_DISABLED` and
    /// above turns clipping off.
    pub grad_clip: f32,
    /// Pushes per epoch; fixes the length of warm-up ramps.
    pub iterations_per_epoch: usize,
    pub aggregation: AggregationConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            optimizer: OptimizerKind::Momentum,
            workers_num: NonZeroUsize::MIN,
            batch_size: 256,
            baseline: 256,
            lr: 0.1,
            momentum: 0.9,
            weight_decay: 1e-4,
            grad_clip: GRAD_CLIP_DISABLED,
            iterations_per_epoch: 1,
            aggregation: AggregationConfig::default(),
        }
    }
}
