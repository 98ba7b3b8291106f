use serde::{Deserialize, Serialize};

use crate::bounding_box::BoundingBox;

/// Directional vector: per-coordinate contributions split into a high part
/// (the query exceeds the model on that coordinate) and a low part (the
/// query falls short). Attribution and density results are reported in this
/// shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiVector {
    pub high: Vec<f64>,
    pub low: Vec<f64>,
}

impl DiVector {
    pub fn empty(dimensions: usize) -> Self {
        DiVector {
            high: vec![0.0; dimensions],
            low: vec![0.0; dimensions],
        }
    }

    pub fn dimensions(&self) -> usize {
        self.high.len()
    }

    /// Overwrites this vector with the directional decomposition of the
    /// probability that a random cut separates `point` from `bounding_box`.
    /// The components sum to `BoundingBox::probability_of_cut`.
    pub fn set_to_probability_of_cut(&mut self, bounding_box: &BoundingBox, point: &[f32]) {
        let below: f64 = self
            .low
            .iter_mut()
            .zip(bounding_box.min_values())
            .zip(point)
            .map(|((slot, &lo), &v)| {
                *slot = if lo - v > 0.0 { (lo - v) as f64 } else { 0.0 };
                *slot
            })
            .sum();
        let above: f64 = self
            .high
            .iter_mut()
            .zip(point)
            .zip(bounding_box.max_values())
            .map(|((slot, &v), &hi)| {
                *slot = if v - hi > 0.0 { (v - hi) as f64 } else { 0.0 };
                *slot
            })
            .sum();
        let gap = below + above;
        if gap != 0.0 {
            self.scale(1.0 / (bounding_box.range_sum() + gap));
        }
    }

    pub fn add_to(&self, other: &mut DiVector) {
        self.add_to_scaled(other, 1.0);
    }

    pub fn add_to_scaled(&self, other: &mut DiVector, factor: f64) {
        for (x, &y) in other.high.iter_mut().zip(&self.high) {
            *x += y * factor;
        }
        for (x, &y) in other.low.iter_mut().zip(&self.low) {
            *x += y * factor;
        }
    }

    pub fn add_from(&mut self, other: &DiVector, factor: f64) {
        other.add_to_scaled(self, factor);
    }

    pub fn scale(&mut self, factor: f64) {
        for x in self.high.iter_mut() {
            *x *= factor;
        }
        for x in self.low.iter_mut() {
            *x *= factor;
        }
    }

    pub fn divide(&mut self, count: usize) {
        self.scale(1.0 / count as f64);
    }

    pub fn total(&self) -> f64 {
        self.high.iter().sum::<f64>() + self.low.iter().sum::<f64>()
    }

    /// Rescales so the components sum to `value`. A vector with no mass is
    /// spread uniformly.
    pub fn normalize(&mut self, value: f64) {
        let current = self.total();
        if current <= 0.0 {
            let v = value / (2.0 * self.high.len() as f64);
            for x in self.high.iter_mut() {
                *x = v;
            }
            for x in self.low.iter_mut() {
                *x = v;
            }
        } else {
            self.scale(value / current);
        }
    }

    pub fn high_low_sum(&self, index: usize) -> f64 {
        self.high[index] + self.low[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probability_components_sum_to_scalar_probability() {
        let b = BoundingBox::new(&[0.0, 0.0], &[1.0, 2.0]).unwrap();
        let point = [3.0, -1.0];
        let mut v = DiVector::empty(2);
        v.set_to_probability_of_cut(&b, &point);
        assert!((v.total() - b.probability_of_cut(&point)).abs() < 1e-12);
        assert!(v.high[0] > 0.0 && v.low[1] > 0.0);
        assert_eq!(v.low[0], 0.0);
        assert_eq!(v.high[1], 0.0);
    }

    #[test]
    fn normalize_spreads_empty_vector() {
        let mut v = DiVector::empty(2);
        v.normalize(1.0);
        assert_eq!(v.high, vec![0.25, 0.25]);
        assert_eq!(v.low, vec![0.25, 0.25]);

        let mut w = DiVector::empty(2);
        w.high[0] = 3.0;
        w.normalize(1.0);
        assert!((w.total() - 1.0).abs() < 1e-12);
        assert_eq!(w.high[0], 1.0);
    }
}
