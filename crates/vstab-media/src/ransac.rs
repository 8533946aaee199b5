//! Generic consensus-based robust fitting.
//!
//! Implement [`Estimator`] for a model and call [`ransac`]. The loop draws
//! minimal samples, scores each candidate by its consensus set, tightens the
//! iteration bound from the best inlier ratio seen so far, and finally refits
//! the winner on its consensus set once.
//!
//! Sampling is driven by a seeded `StdRng`, so a fixed seed reproduces the
//! exact consensus set.

use rand::prelude::IndexedRandom;
use rand::{rngs::StdRng, SeedableRng};

/// Parameters of one consensus run.
#[derive(Debug, Clone)]
pub struct RansacOptions {
    /// Hard cap on sampling iterations.
    pub max_iterations: usize,
    /// Residual at or below which a datum joins the consensus set.
    pub threshold: f64,
    /// Desired probability of drawing at least one all-inlier sample.
    pub confidence: f64,
    /// RNG seed.
    pub seed: u64,
}

impl Default for RansacOptions {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            threshold: 2.0,
            confidence: 0.99,
            seed: 0,
        }
    }
}

/// Output of a consensus run.
#[derive(Debug, Clone)]
pub struct RansacResult<M> {
    /// Best model, `None` if no sample produced one.
    pub model: Option<M>,
    /// Indices of the consensus set, ascending.
    pub inliers: Vec<usize>,
    /// Sampling iterations performed.
    pub iterations: usize,
}

impl<M> Default for RansacResult<M> {
    fn default() -> Self {
        Self {
            model: None,
            inliers: Vec::new(),
            iterations: 0,
        }
    }
}

/// A model that can be fitted from a minimal sample.
pub trait Estimator {
    type Datum;
    type Model;

    /// Minimal number of data needed to determine a model.
    const MIN_SAMPLES: usize;

    /// Fit from the data at `sample`. `None` if the sample is degenerate.
    fn fit(data: &[Self::Datum], sample: &[usize]) -> Option<Self::Model>;

    /// Non-negative error of `datum` under `model`, in threshold units.
    fn residual(model: &Self::Model, datum: &Self::Datum) -> f64;

    /// Refit on a full consensus set. Default: keep the sampled model.
    fn refit(_data: &[Self::Datum], _inliers: &[usize]) -> Option<Self::Model> {
        None
    }
}

/// Iterations needed to hit `confidence` at the given inlier ratio.
pub fn required_iterations(
    confidence: f64,
    inlier_ratio: f64,
    min_samples: usize,
    done: usize,
    max_iterations: usize,
) -> usize {
    if confidence <= 0.0 || inlier_ratio <= 0.0 {
        return max_iterations;
    }
    if inlier_ratio >= 1.0 {
        return done.clamp(1, max_iterations);
    }
    let denom = (1.0 - inlier_ratio.powi(min_samples as i32)).max(1e-12).ln();
    if denom >= 0.0 {
        return max_iterations;
    }
    let needed = ((1.0 - confidence).ln() / denom).ceil() as usize;
    needed.clamp(done, max_iterations)
}

fn consensus<E: Estimator>(model: &E::Model, data: &[E::Datum], threshold: f64) -> (Vec<usize>, f64) {
    let mut inliers = Vec::new();
    let mut sum_sq = 0.0;
    for (i, datum) in data.iter().enumerate() {
        let r = E::residual(model, datum);
        if r <= threshold {
            inliers.push(i);
            sum_sq += r * r;
        }
    }
    (inliers, sum_sq)
}

/// Run the consensus loop. Data shorter than `E::MIN_SAMPLES` yields an
/// empty result without sampling.
pub fn ransac<E: Estimator>(data: &[E::Datum], opts: &RansacOptions) -> RansacResult<E::Model> {
    let mut best: RansacResult<E::Model> = RansacResult::default();
    if data.len() < E::MIN_SAMPLES || E::MIN_SAMPLES == 0 {
        return best;
    }

    let all_indices: Vec<usize> = (0..data.len()).collect();
    let mut sample = vec![0usize; E::MIN_SAMPLES];
    let mut rng = StdRng::seed_from_u64(opts.seed);
    let mut best_sum_sq = f64::INFINITY;
    let mut bound = opts.max_iterations;
    let mut iterations = 0;

    while iterations < bound {
        iterations += 1;
        all_indices
            .as_slice()
            .choose_multiple(&mut rng, E::MIN_SAMPLES)
            .enumerate()
            .for_each(|(k, &idx)| sample[k] = idx);

        let Some(model) = E::fit(data, &sample) else {
            continue;
        };
        let (inliers, sum_sq) = consensus::<E>(&model, data, opts.threshold);

        let better = best.model.is_none()
            || inliers.len() > best.inliers.len()
            || (inliers.len() == best.inliers.len() && sum_sq < best_sum_sq);
        if better {
            let ratio = inliers.len() as f64 / data.len() as f64;
            best.model = Some(model);
            best.inliers = inliers;
            best_sum_sq = sum_sq;
            bound = required_iterations(
                opts.confidence,
                ratio,
                E::MIN_SAMPLES,
                iterations,
                opts.max_iterations,
            );
        }
    }
    best.iterations = iterations;

    if best.inliers.len() >= E::MIN_SAMPLES {
        if let Some(refined) = E::refit(data, &best.inliers) {
            let (inliers, _) = consensus::<E>(&refined, data, opts.threshold);
            if inliers.len() >= best.inliers.len() {
                best.model = Some(refined);
                best.inliers = inliers;
            }
        }
    }

    best
}
