use serde::{Deserialize, Serialize};

use crate::bounding_box::BoundingBox;
use crate::divector::DiVector;

/// Directional density estimate accumulated during traversal: a measure
/// vector (score-weighted cut probabilities), the distances by which the
/// query missed the boxes, the raw probability mass, and the number of
/// samples that voted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DensityOutput {
    pub measure: DiVector,
    pub distance: DiVector,
    pub probability_mass: DiVector,
    pub sample_size: f64,
}

impl DensityOutput {
    pub fn empty(dimensions: usize, sample_size: f64) -> Self {
        DensityOutput {
            measure: DiVector::empty(dimensions),
            distance: DiVector::empty(dimensions),
            probability_mass: DiVector::empty(dimensions),
            sample_size,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.measure.dimensions()
    }

    pub fn add_to(&self, other: &mut DensityOutput) {
        self.measure.add_to(&mut other.measure);
        self.distance.add_to(&mut other.distance);
        self.probability_mass.add_to(&mut other.probability_mass);
        other.sample_size += self.sample_size;
    }

    pub fn scale(&mut self, factor: f64) {
        self.measure.scale(factor);
        self.distance.scale(factor);
        self.probability_mass.scale(factor);
    }

    pub fn divide(&mut self, count: usize) {
        self.scale(1.0 / count as f64);
        self.sample_size /= count as f64;
    }

    /// Absorbs one node of the descent: discounts everything accumulated so
    /// far by the survival probability of the node's box and credits the
    /// directions in which the query escapes it, weighted by `value`.
    /// Returns the probability of a separating cut at this node.
    pub fn update(&mut self, point: &[f32], bounding_box: &BoundingBox, value: f64) -> f64 {
        let gap = bounding_box.outside_gap(point);
        if gap == 0.0 {
            return 0.0;
        }
        let new_range = gap + bounding_box.range_sum();
        let probability = gap / new_range;
        self.scale(1.0 - probability);
        let min_values = bounding_box.min_values();
        let max_values = bounding_box.max_values();
        for i in 0..point.len() {
            if point[i] > max_values[i] {
                let t = (point[i] - max_values[i]) as f64 / new_range;
                self.distance.high[i] += t * (point[i] - min_values[i]) as f64;
                self.probability_mass.high[i] += t;
                self.measure.high[i] += value * t;
            } else if point[i] < min_values[i] {
                let t = (min_values[i] - point[i]) as f64 / new_range;
                self.distance.low[i] += t * (max_values[i] - point[i]) as f64;
                self.probability_mass.low[i] += t;
                self.measure.low[i] += value * t;
            }
        }
        probability
    }

    /// Scales the accumulated measure by an inverse volume element derived
    /// from the observed distances, treating the data as `manifold_dimension`
    /// dimensional; `threshold` bounds the estimate for degenerate geometry.
    pub fn directional_measure(&self, threshold: f64, manifold_dimension: f64) -> DiVector {
        if self.sample_size <= 0.0 || self.measure.total() <= 0.0 {
            return DiVector::empty(self.measure.dimensions());
        }
        let mut sum_of_factors = 0.0;
        for i in 0..self.measure.dimensions() {
            let mass = self.probability_mass.high_low_sum(i);
            let mut t = if mass > 0.0 {
                self.distance.high_low_sum(i) / mass
            } else {
                0.0
            };
            if t > 0.0 {
                t = f64::exp(f64::ln(t) * manifold_dimension) * mass;
            }
            sum_of_factors += t;
        }
        let density_factor = 1.0 / (threshold + sum_of_factors);
        let mut answer = self.measure.clone();
        answer.scale(density_factor);
        answer
    }

    pub fn directional_density(&self) -> DiVector {
        self.directional_measure(1e-3, self.measure.dimensions() as f64)
    }

    pub fn density(&self) -> f64 {
        self.directional_density().total()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_returns_the_cut_probability() {
        let b = BoundingBox::new(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
        let mut output = DensityOutput::empty(2, 10.0);
        assert_eq!(output.update(&[0.5, 0.5], &b, 1.0), 0.0);
        let p = output.update(&[3.0, 0.5], &b, 1.0);
        assert!((p - 0.5).abs() < 1e-12);
        assert!(output.measure.high[0] > 0.0);
        assert_eq!(output.measure.low[0], 0.0);
        assert_eq!(output.measure.high_low_sum(1), 0.0);
    }

    #[test]
    fn closer_geometry_reads_denser() {
        let near_box = BoundingBox::new(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
        let mut near = DensityOutput::empty(2, 10.0);
        near.update(&[1.2, 0.5], &near_box, 0.5);

        let mut far = DensityOutput::empty(2, 10.0);
        far.update(&[50.0, 0.5], &near_box, 0.5);

        assert!(near.density() > far.density());
    }

    #[test]
    fn accumulation_is_additive() {
        let b = BoundingBox::new(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
        let mut a = DensityOutput::empty(2, 5.0);
        a.update(&[2.0, 0.5], &b, 1.0);
        let mut total = DensityOutput::empty(2, 0.0);
        a.add_to(&mut total);
        a.add_to(&mut total);
        assert_eq!(total.sample_size, 10.0);
        assert!((total.measure.total() - 2.0 * a.measure.total()).abs() < 1e-12);
        total.divide(2);
        assert_eq!(total.sample_size, 5.0);
    }
}
