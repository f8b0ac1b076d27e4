//! Seeded Latin hypercube designs.
//!
//! The first iteration's design and every analysis proposal set come from
//! here. All draws go through a `Xoshiro256PlusPlus` generator seeded from
//! the configuration, so the same seed reproduces the same design exactly.

use rand::seq::SliceRandom;
use rand::Rng;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::space::{ParameterSpace, Sample, SampleSet};

/// Draw an `n`-point Latin hypercube design over the space's bounds.
///
/// Each parameter's range is split into `n` equal strata; every stratum
/// receives exactly one point, jittered uniformly within the stratum, and
/// strata are permuted independently per dimension. This gives one-point-
/// per-row-and-column space filling without any optimization pass.
pub fn latin_hypercube(space: &ParameterSpace, n: usize, seed: u64) -> SampleSet {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let d = space.dim();

    // One permutation of strata per dimension.
    let mut strata: Vec<Vec<usize>> = Vec::with_capacity(d);
    for _ in 0..d {
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut rng);
        strata.push(order);
    }

    let mut samples = Vec::with_capacity(n);
    for i in 0..n {
        let mut unit = Vec::with_capacity(d);
        for dim_order in strata.iter() {
            let stratum = dim_order[i];
            let jitter: f64 = rng.gen();
            unit.push((stratum as f64 + jitter) / n as f64);
        }
        samples.push(space.from_unit(&Sample::new(unit)));
    }
    SampleSet::from_samples(samples)
}
