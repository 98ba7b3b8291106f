//! Deterministic data generators used by the tests and examples.

use std::f32::consts::PI;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

fn next_gaussian(mean: f32, scale: f32, rng: &mut ChaCha20Rng) -> f32 {
    let mut r = f64::sqrt(-2.0 * f64::ln(rng.gen::<f64>())) as f32;
    // discard the rare infinity from ln of a tiny draw
    while r.is_infinite() {
        r = f64::sqrt(-2.0 * f64::ln(rng.gen::<f64>())) as f32;
    }
    let angle: f32 = 2.0 * PI * rng.gen::<f32>();
    if rng.gen::<f32>() < 0.5 {
        mean + scale * r * angle.cos()
    } else {
        mean + scale * r * angle.sin()
    }
}

/// `num` points of dimension `dimensions` drawn from a standard normal.
pub fn normal(num: usize, dimensions: usize, seed: u64) -> Vec<Vec<f32>> {
    mixture(
        num,
        &[vec![0.0; dimensions]],
        &[vec![1.0; dimensions]],
        &[1.0],
        seed,
    )
}

/// A mixture of axis-aligned Gaussians with the given means, scales and
/// mixing weights.
pub fn mixture(
    num: usize,
    means: &[Vec<f32>],
    scales: &[Vec<f32>],
    weights: &[f32],
    seed: u64,
) -> Vec<Vec<f32>> {
    assert!(!means.is_empty(), "at least one component is required");
    assert_eq!(means.len(), scales.len(), "means and scales must pair up");
    assert_eq!(means.len(), weights.len(), "means and weights must pair up");
    let dimensions = means[0].len();
    for (mean, scale) in means.iter().zip(scales) {
        assert_eq!(mean.len(), dimensions, "components must share a dimension");
        assert_eq!(scale.len(), dimensions, "components must share a dimension");
    }
    let weight_sum: f32 = weights.iter().sum();

    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let mut data = Vec::with_capacity(num);
    for _ in 0..num {
        let mut pick = weight_sum * rng.gen::<f32>();
        let mut component = 0;
        while component + 1 < weights.len() && pick > weights[component] {
            pick -= weights[component];
            component += 1;
        }
        let point = (0..dimensions)
            .map(|i| next_gaussian(means[component][i], scales[component][i], &mut rng))
            .collect();
        data.push(point);
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_is_deterministic() {
        assert_eq!(normal(10, 3, 5), normal(10, 3, 5));
    }

    #[test]
    fn mixture_centers_components() {
        let data = mixture(
            2000,
            &[vec![8.0], vec![-8.0]],
            &[vec![0.1], vec![0.1]],
            &[0.5, 0.5],
            7,
        );
        let positive = data.iter().filter(|p| p[0] > 0.0).count();
        assert!(positive > 700 && positive < 1300);
        for p in &data {
            assert!((p[0].abs() - 8.0).abs() < 2.0);
        }
    }
}
