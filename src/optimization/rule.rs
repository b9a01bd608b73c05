use ndarray::Zip;

use crate::{
    config::{GRAD_CLIP_DISABLED, OptimizerKind},
    error::Result,
    parameters::{ParameterSet, WeightStore},
};

/// One staleness-weighted optimizer step over the master state.
///
/// The rule consumes the pushed gradient: weight decay is folded into it in
/// place, the result is optionally clipped, accumulated into the momentum
/// buffers, and applied scaled by `-lr / tau`. Larger staleness means a
/// smaller effective step.
#[derive(Debug, Clone, Copy)]
pub struct UpdateRule {
    kind: OptimizerKind,
    weight_decay: f32,
    grad_clip: f32,
}

impl UpdateRule {
    /// Creates a new `UpdateRule`.
    ///
    /// # Arguments
    /// * `kind` - Which update rule to apply on each step.
    /// * `weight_decay` - Coefficient added as `decay * weight` to the
    ///   gradient of every decay-flagged parameter.
    /// * `grad_clip` - Global L2 ceiling for the gradient; values at or
    ///   above `GRAD_CLIP_DISABLED` turn clipping off.
    pub fn new(kind: OptimizerKind, weight_decay: f32, grad_clip: f32) -> Self {
        Self {
            kind,
            weight_decay,
            grad_clip,
        }
    }

    /// Applies one update to `store` and returns the step norm.
    ///
    /// A validation failure leaves the store untouched; the gradient is
    /// never retained past this call.
    ///
    /// # Arguments
    /// * `store` - The master state to update.
    /// * `grads` - The pushed gradient, consumed by the step.
    /// * `lr` - The learning rate for this iteration.
    /// * `momentum` - The momentum coefficient for this iteration.
    /// * `tau` - The staleness factor; must be at least 1.
    ///
    /// # Returns
    /// The L2 norm of the applied delta, or `ShapeMismatch` if the gradient
    /// disagrees with the master.
    pub fn step(
        &self,
        store: &mut WeightStore,
        mut grads: ParameterSet,
        lr: f32,
        momentum: f32,
        tau: f32,
    ) -> Result<f32> {
        store.master().check_compatible(&grads)?;

        self.decay_in_place(store.master(), &mut grads);
        self.clip_in_place(&mut grads);

        let scale = -lr / tau;
        match self.kind {
            OptimizerKind::Sgd => store.apply_delta(&grads, scale),
            OptimizerKind::Momentum => {
                store.accumulate_momentum(&grads, momentum)?;
                store.apply_momentum(scale)
            }
        }
    }

    /// Adds `weight_decay * weight` to the gradient of every decay-flagged
    /// parameter. Decay is folded into the gradient rather than the weight
    /// so it passes through clipping, momentum and staleness like any other
    /// gradient term.
    fn decay_in_place(&self, master: &ParameterSet, grads: &mut ParameterSet) {
        if self.weight_decay == 0. {
            return;
        }

        let wd = self.weight_decay;
        for (name, grad) in grads.iter_mut() {
            let Some(param) = master.get(name) else {
                continue;
            };

            if param.decay() {
                Zip::from(grad.values_mut())
                    .and(param.values())
                    .par_for_each(|g, &w| *g += wd * w);
            }
        }
    }

    /// Rescales the gradient so its global L2 norm fits under the ceiling.
    fn clip_in_place(&self, grads: &mut ParameterSet) {
        if self.grad_clip >= GRAD_CLIP_DISABLED {
            return;
        }

        let norm = grads.l2_norm();
        if norm > self.grad_clip {
            grads.scale(self.grad_clip / norm);
        }
    }
}
