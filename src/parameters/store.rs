use serde::{Deserialize, Serialize};

use super::ParameterSet;
use crate::error::Result;

/// The authoritative model state: master weights, momentum buffers and the
/// global step counter.
///
/// Owned exclusively by the server; mutated only from inside `push`. The
/// momentum buffers mirror the master's name set and start at zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightStore {
    master: ParameterSet,
    momentum: ParameterSet,
    global_step: u64,
}

impl WeightStore {
    /// Creates a new `WeightStore`.
    ///
    /// # Arguments
    /// * `initial` - The initial master weights; fixes the name set for the run.
    pub fn new(initial: ParameterSet) -> Self {
        let momentum = initial.zeros_like();

        Self {
            master: initial,
            momentum,
            global_step: 0,
        }
    }

    pub fn master(&self) -> &ParameterSet {
        &self.master
    }

    pub fn momentum(&self) -> &ParameterSet {
        &self.momentum
    }

    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    /// Returns an independent copy of the master weights.
    ///
    /// The copy shares no storage with the live weights, so a caller running
    /// forward/backward against it cannot mutate master state.
    pub fn snapshot(&self) -> ParameterSet {
        self.master.clone()
    }

    /// Applies `master[name] += scale * delta[name]` for every named tensor.
    ///
    /// Increments the global step counter exactly once per successful call;
    /// a validation failure leaves the store untouched.
    ///
    /// # Returns
    /// The L2 norm of the applied delta, or `ShapeMismatch` if `delta`
    /// disagrees with the master on names or shapes.
    pub fn apply_delta(&mut self, delta: &ParameterSet, scale: f32) -> Result<f32> {
        self.master.scaled_add(delta, scale)?;
        self.global_step += 1;
        Ok(scale.abs() * delta.l2_norm())
    }

    /// Folds a gradient into the momentum buffers:
    /// `momentum[name] = mu * momentum[name] + grad[name]`.
    pub fn accumulate_momentum(&mut self, grads: &ParameterSet, mu: f32) -> Result<()> {
        self.momentum.check_compatible(grads)?;
        self.momentum.scale(mu);
        self.momentum.scaled_add(grads, 1.)
    }

    /// Applies the momentum buffers as a delta, scaled by `scale`.
    ///
    /// Counts as one update: the global step counter advances once.
    ///
    /// # Returns
    /// The L2 norm of the applied delta.
    pub fn apply_momentum(&mut self, scale: f32) -> Result<f32> {
        let Self {
            master, momentum, ..
        } = self;

        master.scaled_add(momentum, scale)?;
        self.global_step += 1;
        Ok(scale.abs() * self.momentum.l2_norm())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::arr1;

    use super::*;

    fn toy_store() -> WeightStore {
        let mut initial = ParameterSet::new();
        initial.insert("w", arr1(&[1., 2.]).into_dyn(), true);
        initial.insert("b", arr1(&[0.]).into_dyn(), false);
        WeightStore::new(initial)
    }

    #[test]
    fn test_apply_delta_updates_and_counts() {
        let mut store = toy_store();
        let mut delta = store.master().zeros_like();
        delta.insert("w", arr1(&[1., 1.]).into_dyn(), true);

        let norm = store.apply_delta(&delta, -2.).unwrap();
        assert_eq!(store.global_step(), 1);
        assert_eq!(
            store.master().get("w").unwrap().values(),
            &arr1(&[-1., 0.]).into_dyn()
        );
        assert!((norm - 2. * 2f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_failed_apply_leaves_store_untouched() {
        let mut store = toy_store();
        let before = store.clone();

        assert!(store.apply_delta(&ParameterSet::new(), 1.).is_err());
        assert_eq!(store, before);
        assert_eq!(store.global_step(), 0);
    }

    #[test]
    fn test_snapshot_does_not_alias_master() {
        let store = toy_store();
        let mut snap = store.snapshot();
        snap.scale(100.);

        assert_eq!(
            store.master().get("w").unwrap().values(),
            &arr1(&[1., 2.]).into_dyn()
        );
    }

    #[test]
    fn test_momentum_accumulation_and_apply() {
        let mut store = toy_store();
        let mut grad = store.master().zeros_like();
        grad.insert("w", arr1(&[1., 0.]).into_dyn(), true);

        store.accumulate_momentum(&grad, 0.5).unwrap();
        store.accumulate_momentum(&grad, 0.5).unwrap();

        // v = 0.5 * (0.5 * 0 + 1) + 1 = 1.5
        assert_eq!(
            store.momentum().get("w").unwrap().values(),
            &arr1(&[1.5, 0.]).into_dyn()
        );

        let norm = store.apply_momentum(-1.).unwrap();
        assert_eq!(store.global_step(), 1);
        assert!((norm - 1.5).abs() < 1e-6);
        assert_eq!(
            store.master().get("w").unwrap().values(),
            &arr1(&[-0.5, 2.]).into_dyn()
        );
    }
}
