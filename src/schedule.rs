use serde::{Deserialize, Serialize};

use crate::config::{AggregationConfig, ServerConfig};

/// How many epochs a learning-rate warm-up ramp spans.
pub const WARM_UP_EPOCHS: usize = 5;

/// The learning-rate / momentum schedule of one aggregation regime.
///
/// Evaluation is pure in the schedule's parameters; the only state is a
/// clock counting iterations since the run (or the last reconfiguration)
/// started, which is what warm-up ramps are measured against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    start_lr: f32,
    target_lr: f32,
    increment: f32,
    ramp_iters: u64,
    momentum: f32,
    clock: u64,
}

impl Schedule {
    /// A constant-rate schedule with no warm-up.
    pub fn flat(lr: f32, momentum: f32) -> Self {
        Self {
            start_lr: lr,
            target_lr: lr,
            increment: 0.,
            ramp_iters: 0,
            momentum,
            clock: 0,
        }
    }

    /// A schedule that ramps linearly from `start_lr` to `target_lr` over
    /// `ramp_iters` iterations, then stays at `target_lr`.
    pub fn warm_up(start_lr: f32, target_lr: f32, ramp_iters: u64, momentum: f32) -> Self {
        let increment = if ramp_iters == 0 {
            0.
        } else {
            (target_lr - start_lr) / ramp_iters as f32
        };

        Self {
            start_lr,
            target_lr,
            increment,
            ramp_iters,
            momentum,
            clock: 0,
        }
    }

    /// Derives the schedule the given regime prescribes.
    ///
    /// The base rate is rescaled by the regime's scaling law; moving between
    /// regimes without recomputing these constants would silently train with
    /// the wrong effective rate.
    pub fn for_run(config: &ServerConfig, aggregation: &AggregationConfig) -> Self {
        let workers = config.workers_num.get();
        let ramp = (config.iterations_per_epoch * WARM_UP_EPOCHS) as u64;
        let target = scaled_lr(config.lr, workers, config.batch_size, config.baseline);
        let start = config.lr / workers as f32;

        match aggregation {
            AggregationConfig::Sync(p) if p.lr_warm_up => {
                Self::warm_up(start, target, ramp, config.momentum)
            }
            AggregationConfig::Sync(_) => Self::flat(target, config.momentum),
            AggregationConfig::Async(p) if p.fast_im => {
                let end = fast_ramp_end(config.lr, workers, config.batch_size, config.baseline);
                Self::warm_up(start, end, ramp, config.momentum)
            }
            AggregationConfig::Async(p) if p.lr_warm_up => {
                Self::warm_up(start, target, ramp, config.momentum)
            }
            AggregationConfig::Async(_) => Self::flat(target, config.momentum),
        }
    }

    /// The `(learning_rate, momentum)` pair at the current clock; the clock
    /// then advances by one iteration.
    pub fn tick(&mut self) -> (f32, f32) {
        let lr = self.lr_at(self.clock);
        self.clock += 1;
        (lr, self.momentum)
    }

    /// The learning rate `t` iterations after the clock started.
    pub fn lr_at(&self, t: u64) -> f32 {
        if t < self.ramp_iters {
            self.start_lr + self.increment * t as f32
        } else {
            self.target_lr
        }
    }

    pub fn start_lr(&self) -> f32 {
        self.start_lr
    }

    pub fn target_lr(&self) -> f32 {
        self.target_lr
    }

    pub fn momentum(&self) -> f32 {
        self.momentum
    }

    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// Restarts warm-up from iteration zero.
    pub fn reset_clock(&mut self) {
        self.clock = 0;
    }
}

/// The effective rate after a regime change:
/// `lr * sqrt(workers * batch / baseline) / workers`.
pub fn scaled_lr(lr: f32, workers: usize, batch_size: usize, baseline: usize) -> f32 {
    lr * ((workers * batch_size) as f32 / baseline as f32).sqrt() / workers as f32
}

/// The end point of the fast warm-up ramp:
/// `lr * (workers * batch / baseline) / sqrt(workers)`.
pub fn fast_ramp_end(lr: f32, workers: usize, batch_size: usize, baseline: usize) -> f32 {
    lr * ((workers * batch_size) as f32 / baseline as f32) / (workers as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use super::*;
    use crate::config::{AsyncParams, SyncParams};

    fn config(workers: usize, batch_size: usize) -> ServerConfig {
        ServerConfig {
            workers_num: NonZeroUsize::new(workers).unwrap(),
            batch_size,
            baseline: 256,
            lr: 0.1,
            momentum: 0.9,
            iterations_per_epoch: 10,
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_scaling_law() {
        // 4 workers at the baseline batch: sqrt(4) / 4 halves the rate.
        assert!((scaled_lr(0.1, 4, 256, 256) - 0.05).abs() < 1e-7);
        // 4 workers at 4x the baseline batch: sqrt(16) / 4 keeps it.
        assert!((scaled_lr(0.1, 4, 1024, 256) - 0.1).abs() < 1e-7);
        assert!((scaled_lr(0.1, 1, 256, 256) - 0.1).abs() < 1e-7);
    }

    #[test]
    fn test_fast_ramp_end() {
        // 16x the baseline throughput over sqrt(4) workers.
        assert!((fast_ramp_end(0.1, 4, 1024, 256) - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_flat_schedule_ignores_clock() {
        let mut s = Schedule::flat(0.05, 0.9);
        assert_eq!(s.tick(), (0.05, 0.9));
        assert_eq!(s.tick(), (0.05, 0.9));
        assert_eq!(s.clock(), 2);
    }

    #[test]
    fn test_warm_up_ramp_endpoints() {
        let s = Schedule::warm_up(0.1, 0.5, 4, 0.9);
        assert!((s.lr_at(0) - 0.1).abs() < 1e-7);
        assert!((s.lr_at(2) - 0.3).abs() < 1e-7);
        // Past the ramp the target holds.
        assert!((s.lr_at(4) - 0.5).abs() < 1e-7);
        assert!((s.lr_at(100) - 0.5).abs() < 1e-7);
    }

    #[test]
    fn test_reset_restarts_warm_up() {
        let mut s = Schedule::warm_up(0., 1., 10, 0.9);
        for _ in 0..10 {
            s.tick();
        }
        assert!((s.tick().0 - 1.).abs() < 1e-7);

        s.reset_clock();
        assert_eq!(s.clock(), 0);
        assert!((s.tick().0 - 0.).abs() < 1e-7);
    }

    #[test]
    fn test_for_run_selects_regime_law() {
        let config = config(4, 1024);

        let sync = Schedule::for_run(&config, &AggregationConfig::Sync(SyncParams::default()));
        assert!((sync.lr_at(0) - 0.1).abs() < 1e-6);

        let fast = Schedule::for_run(
            &config,
            &AggregationConfig::Async(AsyncParams {
                fast_im: true,
                lr_warm_up: false,
            }),
        );
        // Linear ramp from lr / workers to the fast end point over 5 epochs.
        assert!((fast.lr_at(0) - 0.025).abs() < 1e-6);
        assert!((fast.lr_at(50) - 0.8).abs() < 1e-6);

        let warm = Schedule::for_run(
            &config,
            &AggregationConfig::Async(AsyncParams {
                fast_im: false,
                lr_warm_up: true,
            }),
        );
        assert!((warm.lr_at(0) - 0.025).abs() < 1e-6);
        assert!((warm.lr_at(50) - 0.1).abs() < 1e-6);
    }
}
