use std::{
    error::Error,
    fmt::{self, Display},
};

use ndarray::{ArrayD, IxDyn};
use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};

use super::ParameterSet;

/// The result type for parameter initialization.
pub type Result<T> = std::result::Result<T, InitErr>;

/// Failures while seeding a model's initial parameters.
#[derive(Debug)]
pub enum InitErr {
    /// The generator ran out of values before every tensor was filled.
    Exhausted { name: String, wanted: usize },
    /// A distribution could not be constructed from its hyperparameters.
    Distribution { detail: String },
}

impl Display for InitErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitErr::Exhausted { name, wanted } => write!(
                f,
                "weight generator exhausted while sampling {wanted} values for parameter {name}"
            ),
            InitErr::Distribution { detail } => {
                write!(f, "invalid distribution parameters: {detail}")
            }
        }
    }
}

impl Error for InitErr {}

/// A named tensor blueprint: shape plus whether weight decay applies.
#[derive(Debug, Clone)]
pub struct TensorSpec {
    pub name: String,
    pub shape: Vec<usize>,
    pub decay: bool,
}

impl TensorSpec {
    pub fn new(name: impl Into<String>, shape: &[usize], decay: bool) -> Self {
        Self {
            name: name.into(),
            shape: shape.to_vec(),
            decay,
        }
    }
}

/// Produces initial parameter values.
pub trait WeightGen {
    /// Samples up to `n` values; `None` once the generator is exhausted.
    fn sample(&mut self, n: usize) -> Option<Vec<f32>>;
}

/// Builds a `ParameterSet` from tensor specs, drawing values from `weight_gen`.
///
/// # Arguments
/// * `specs` - The named tensor blueprints, one per parameter.
/// * `weight_gen` - The weight generator to draw initial values from.
///
/// # Returns
/// An error if the generator cannot supply enough values for a spec.
pub fn generate<G: WeightGen>(specs: &[TensorSpec], weight_gen: &mut G) -> Result<ParameterSet> {
    let mut set = ParameterSet::new();

    for spec in specs {
        let wanted: usize = spec.shape.iter().product();
        let exhausted = || InitErr::Exhausted {
            name: spec.name.clone(),
            wanted,
        };

        let values = weight_gen
            .sample(wanted)
            .filter(|v| v.len() == wanted)
            .ok_or_else(exhausted)?;

        let tensor = ArrayD::from_shape_vec(IxDyn(&spec.shape), values)
            .map_err(|e| InitErr::Distribution {
                detail: e.to_string(),
            })?;
        set.insert(&spec.name, tensor, spec.decay);
    }

    Ok(set)
}

/// A weight generator that repeats a single value, never exhausting.
#[derive(Debug, Clone, Copy)]
pub struct ConstWeightGen {
    value: f32,
}

impl ConstWeightGen {
    pub fn new(value: f32) -> Self {
        Self { value }
    }
}

impl WeightGen for ConstWeightGen {
    fn sample(&mut self, n: usize) -> Option<Vec<f32>> {
        Some(vec![self.value; n])
    }
}

/// A weight generator that samples a probabilistic distribution, up to a
/// fixed budget of values.
pub struct RandWeightGen<R: Rng, D: Distribution<f32>> {
    rng: R,
    distribution: D,
    remaining: usize,
}

impl<R: Rng, D: Distribution<f32>> RandWeightGen<R, D> {
    /// Creates a new `RandWeightGen`.
    ///
    /// # Arguments
    /// * `rng` - A random number generator.
    /// * `distribution` - The distribution to sample values from.
    /// * `limit` - The maximum amount of values to generate.
    pub fn new(rng: R, distribution: D, limit: usize) -> Self {
        Self {
            rng,
            distribution,
            remaining: limit,
        }
    }
}

impl<R: Rng> RandWeightGen<R, Uniform<f32>> {
    /// A uniform generator over `[low, high)`.
    ///
    /// # Returns
    /// An error if the range is invalid (`low > high`).
    pub fn uniform(rng: R, limit: usize, low: f32, high: f32) -> Result<Self> {
        let distribution = Uniform::new(low, high).map_err(|e| InitErr::Distribution {
            detail: e.to_string(),
        })?;
        Ok(Self::new(rng, distribution, limit))
    }

    /// Xavier uniform initialization for a `fan_in x fan_out` tensor.
    pub fn xavier_uniform(rng: R, limit: usize, fan_in: usize, fan_out: usize) -> Result<Self> {
        let range = (6. / (fan_in + fan_out) as f32).sqrt();
        Self::uniform(rng, limit, -range, range)
    }
}

impl<R: Rng> RandWeightGen<R, Normal<f32>> {
    /// A normal generator with the given mean and standard deviation.
    ///
    /// # Returns
    /// An error if `std_dev` is negative or NaN.
    pub fn normal(rng: R, limit: usize, mean: f32, std_dev: f32) -> Result<Self> {
        let distribution = Normal::new(mean, std_dev).map_err(|e| InitErr::Distribution {
            detail: e.to_string(),
        })?;
        Ok(Self::new(rng, distribution, limit))
    }

    /// Kaiming normal initialization for a tensor with `fan_in` inputs.
    pub fn kaiming(rng: R, limit: usize, fan_in: usize) -> Result<Self> {
        let std_dev = (2. / fan_in as f32).sqrt();
        Self::normal(rng, limit, 0., std_dev)
    }
}

impl<R: Rng, D: Distribution<f32>> WeightGen for RandWeightGen<R, D> {
    fn sample(&mut self, mut n: usize) -> Option<Vec<f32>> {
        if self.remaining == 0 {
            return None;
        }

        n = n.min(self.remaining);
        self.remaining -= n;

        let sample = (0..n)
            .map(|_| self.distribution.sample(&mut self.rng))
            .collect();
        Some(sample)
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn seeded_rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn test_generate_from_constant() {
        let specs = [
            TensorSpec::new("fc.weight", &[2, 3], true),
            TensorSpec::new("fc.bias", &[3], false),
        ];

        let set = generate(&specs, &mut ConstWeightGen::new(0.5)).unwrap();
        assert_eq!(set.len(), 2);

        let weight = set.get("fc.weight").unwrap();
        assert_eq!(weight.shape(), &[2, 3]);
        assert!(weight.decay());
        assert!(weight.values().iter().all(|&v| v == 0.5));
        assert!(!set.get("fc.bias").unwrap().decay());
    }

    #[test]
    fn test_generate_fails_on_exhaustion() {
        let specs = [TensorSpec::new("w", &[4], true)];
        let mut short = RandWeightGen::normal(seeded_rng(), 3, 0., 1.).unwrap();

        assert!(matches!(
            generate(&specs, &mut short),
            Err(InitErr::Exhausted { wanted: 4, .. })
        ));
    }

    #[test]
    fn test_random_generator_respects_limit() {
        let mut weight_gen = RandWeightGen::normal(seeded_rng(), 10, 0., 1.).unwrap();

        assert_eq!(weight_gen.sample(6).unwrap().len(), 6);
        assert_eq!(weight_gen.sample(6).unwrap().len(), 4);
        assert!(weight_gen.sample(1).is_none());
    }

    #[test]
    fn test_invalid_range_is_rejected() {
        assert!(RandWeightGen::uniform(seeded_rng(), 1, 1., -1.).is_err());
        assert!(RandWeightGen::normal(seeded_rng(), 1, 0., f32::NAN).is_err());
    }
}
