//! Seeded uniform input generation for the A and B buffers.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::config::AdderConfig;
use crate::dispatch::ArrayShape;
use crate::error::Result;
use crate::Scalar;

/// Host-side contents of the two input buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct InputData {
    pub a: Vec<Scalar>,
    pub b: Vec<Scalar>,
    /// Seed the values were drawn from; `None` for caller-supplied inputs.
    pub seed: Option<u64>,
}

impl InputData {
    /// Wraps explicit inputs, checking both against `shape`.
    pub fn from_vecs(shape: ArrayShape, a: Vec<Scalar>, b: Vec<Scalar>) -> Result<Self> {
        shape.check(a.len())?;
        shape.check(b.len())?;
        Ok(Self { a, b, seed: None })
    }
}

/// Draws A and B independently from `[value_min, value_max]`.
///
/// Returns the seed that was used so a run without an explicit seed can be replayed.
pub fn generate(config: &AdderConfig) -> Result<InputData> {
    config.validate()?;
    let shape = config.shape()?;
    let seed = config.seed.unwrap_or_else(|| rand::thread_rng().gen());
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let a = uniform_values(&mut rng, shape, config.value_min, config.value_max);
    let b = uniform_values(&mut rng, shape, config.value_min, config.value_max);
    Ok(InputData {
        a,
        b,
        seed: Some(seed),
    })
}

fn uniform_values<R: Rng + ?Sized>(
    rng: &mut R,
    shape: ArrayShape,
    min: Scalar,
    max: Scalar,
) -> Vec<Scalar> {
    (0..shape.length())
        .map(|_| rng.gen_range(min..=max))
        .collect()
}
