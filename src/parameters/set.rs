use std::collections::BTreeMap;

use ndarray::{ArrayD, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{PsErr, Result};

/// A single named model parameter: a dense tensor plus its decay capability.
///
/// Whether weight decay applies is a property of the parameter itself (bias
/// and normalization tensors opt out), not of the layer that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    values: ArrayD<f32>,
    decay: bool,
}

impl Parameter {
    /// Creates a new `Parameter`.
    ///
    /// # Arguments
    /// * `values` - The dense tensor holding the parameter values.
    /// * `decay` - Whether weight decay applies to this parameter.
    pub fn new(values: ArrayD<f32>, decay: bool) -> Self {
        Self { values, decay }
    }

    pub fn values(&self) -> &ArrayD<f32> {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut ArrayD<f32> {
        &mut self.values
    }

    pub fn decay(&self) -> bool {
        self.decay
    }

    pub fn shape(&self) -> &[usize] {
        self.values.shape()
    }
}

/// A mapping from parameter name to dense tensor.
///
/// The name set is fixed for the lifetime of a run and identical across the
/// master and every worker shard; all cross-set operations validate that
/// invariant and fail with `ShapeMismatch` when it doesn't hold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    params: BTreeMap<String, Parameter>,
}

impl ParameterSet {
    /// Creates an empty `ParameterSet`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a named parameter, replacing any previous tensor of that name.
    ///
    /// # Arguments
    /// * `name` - The parameter name.
    /// * `values` - The dense tensor holding the parameter values.
    /// * `decay` - Whether weight decay applies to this parameter.
    pub fn insert(&mut self, name: impl Into<String>, values: ArrayD<f32>, decay: bool) {
        self.params.insert(name.into(), Parameter::new(values, decay));
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.get(name)
    }

    /// Iterates parameters in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Parameter)> {
        self.params.iter()
    }

    /// Iterates parameters mutably in name order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut Parameter)> {
        self.params.iter_mut()
    }

    /// Returns a set with the same names, shapes and decay flags, all zeros.
    pub fn zeros_like(&self) -> Self {
        let params = self
            .params
            .iter()
            .map(|(name, p)| {
                let zeros = ArrayD::zeros(p.values.raw_dim());
                (name.clone(), Parameter::new(zeros, p.decay))
            })
            .collect();

        Self { params }
    }

    /// Validates that `other` carries exactly this set's names and shapes.
    ///
    /// # Returns
    /// `ShapeMismatch` naming the first offending parameter otherwise.
    pub fn check_compatible(&self, other: &Self) -> Result<()> {
        for (name, param) in &self.params {
            let Some(theirs) = other.params.get(name) else {
                return Err(PsErr::ShapeMismatch {
                    name: name.clone(),
                    got: vec![],
                    expected: param.shape().to_vec(),
                });
            };

            if theirs.shape() != param.shape() {
                return Err(PsErr::ShapeMismatch {
                    name: name.clone(),
                    got: theirs.shape().to_vec(),
                    expected: param.shape().to_vec(),
                });
            }
        }

        for (name, theirs) in &other.params {
            if !self.params.contains_key(name) {
                return Err(PsErr::ShapeMismatch {
                    name: name.clone(),
                    got: theirs.shape().to_vec(),
                    expected: vec![],
                });
            }
        }

        Ok(())
    }

    /// The L2 norm over all tensors of the set, taken as one flat vector.
    pub fn l2_norm(&self) -> f32 {
        let sq: f64 = self
            .params
            .values()
            .map(|p| p.values.iter().map(|&v| v as f64 * v as f64).sum::<f64>())
            .sum();

        sq.sqrt() as f32
    }

    /// The L2 distance between this set and `other`, taken as flat vectors.
    ///
    /// # Panics
    /// If the sets don't share the same names and shapes.
    pub fn distance(&self, other: &Self) -> f32 {
        assert_eq!(self.len(), other.len(), "parameter sets differ in size");

        let sq: f64 = self
            .params
            .iter()
            .zip(&other.params)
            .map(|((name, a), (other_name, b))| {
                assert_eq!(name, other_name, "parameter sets differ in names");
                a.values
                    .iter()
                    .zip(b.values.iter())
                    .map(|(&x, &y)| {
                        let d = x as f64 - y as f64;
                        d * d
                    })
                    .sum::<f64>()
            })
            .sum();

        sq.sqrt() as f32
    }

    /// Adds `scale * delta[name]` to every named tensor.
    pub fn scaled_add(&mut self, delta: &Self, scale: f32) -> Result<()> {
        self.check_compatible(delta)?;

        self.params
            .values_mut()
            .zip(delta.params.values())
            .for_each(|(p, d)| {
                Zip::from(&mut p.values)
                    .and(&d.values)
                    .par_for_each(|w, &g| *w += scale * g);
            });

        Ok(())
    }

    /// Multiplies every tensor in place by `factor`.
    pub fn scale(&mut self, factor: f32) {
        for p in self.params.values_mut() {
            p.values.par_mapv_inplace(|v| v * factor);
        }
    }

    /// The elementwise mean of the provided sets, or `None` if empty.
    ///
    /// # Panics
    /// If the sets don't all share the same names and shapes.
    pub fn mean(sets: &[Self]) -> Option<Self> {
        let (first, rest) = sets.split_first()?;

        let mut acc = first.clone();
        for set in rest {
            acc.scaled_add(set, 1.)
                .expect("parameter sets differ in names or shapes");
        }
        acc.scale(1. / sets.len() as f32);
        Some(acc)
    }
}
