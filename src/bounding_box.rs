use crate::error::Result;
use crate::util::check_argument;

/// Axis-aligned bounding box over single-precision coordinates.
///
/// The range sum is kept in double precision; it appears in the denominator
/// of every cut probability and accumulating it in f32 loses too much for
/// wide boxes.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundingBox {
    min_values: Vec<f32>,
    max_values: Vec<f32>,
    range_sum: f64,
}

impl BoundingBox {
    pub fn new(first: &[f32], second: &[f32]) -> Result<Self> {
        check_argument(first.len() == second.len(), "mismatched lengths")?;
        let min_values: Vec<f32> = first
            .iter()
            .zip(second)
            .map(|(&x, &y)| if x < y { x } else { y })
            .collect();
        let max_values: Vec<f32> = first
            .iter()
            .zip(second)
            .map(|(&x, &y)| if x > y { x } else { y })
            .collect();
        let range_sum = min_values
            .iter()
            .zip(&max_values)
            .map(|(&x, &y)| (y - x) as f64)
            .sum();
        Ok(BoundingBox {
            min_values,
            max_values,
            range_sum,
        })
    }

    pub fn from_point(point: &[f32]) -> Self {
        BoundingBox {
            min_values: point.to_vec(),
            max_values: point.to_vec(),
            range_sum: 0.0,
        }
    }

    /// Reassembles a box from already-ordered bounds and their cached range
    /// sum; the caller guarantees consistency.
    pub(crate) fn from_parts(min_values: &[f32], max_values: &[f32], range_sum: f64) -> Self {
        BoundingBox {
            min_values: min_values.to_vec(),
            max_values: max_values.to_vec(),
            range_sum,
        }
    }

    /// Grows the box to cover `point`. Returns true if the box changed.
    pub fn add_point(&mut self, point: &[f32]) -> bool {
        self.add_ranges(point, point)
    }

    pub fn add_box(&mut self, other: &BoundingBox) -> bool {
        self.add_ranges(&other.min_values, &other.max_values)
    }

    pub(crate) fn add_ranges(&mut self, low: &[f32], high: &[f32]) -> bool {
        let old_sum = self.range_sum;
        for (x, &y) in self.min_values.iter_mut().zip(low) {
            if y < *x {
                *x = y;
            }
        }
        for (x, &y) in self.max_values.iter_mut().zip(high) {
            if y > *x {
                *x = y;
            }
        }
        self.range_sum = self
            .min_values
            .iter()
            .zip(&self.max_values)
            .map(|(&x, &y)| (y - x) as f64)
            .sum();
        old_sum != self.range_sum
    }

    pub fn range_sum(&self) -> f64 {
        self.range_sum
    }

    pub fn min_values(&self) -> &[f32] {
        &self.min_values
    }

    pub fn max_values(&self) -> &[f32] {
        &self.max_values
    }

    pub fn dimensions(&self) -> usize {
        self.min_values.len()
    }

    pub fn contains(&self, point: &[f32]) -> bool {
        self.min_values
            .iter()
            .zip(&self.max_values)
            .zip(point)
            .all(|((&lo, &hi), &v)| lo <= v && v <= hi)
    }

    /// Sum of the gaps by which `point` falls outside the box.
    pub fn outside_gap(&self, point: &[f32]) -> f64 {
        let below: f32 = self
            .min_values
            .iter()
            .zip(point)
            .map(|(&lo, &v)| if lo - v > 0.0 { lo - v } else { 0.0 })
            .sum();
        let above: f32 = point
            .iter()
            .zip(&self.max_values)
            .map(|(&v, &hi)| if v - hi > 0.0 { v - hi } else { 0.0 })
            .sum();
        (below + above) as f64
    }

    /// Probability that a random cut of the box grown by `point` separates
    /// the point from the box. This formula is the scoring contract.
    pub fn probability_of_cut(&self, point: &[f32]) -> f64 {
        let gap = self.outside_gap(point);
        if gap == 0.0 {
            0.0
        } else if self.range_sum == 0.0 {
            1.0
        } else {
            gap / (self.range_sum + gap)
        }
    }

    /// `probability_of_cut` restricted to coordinates the query actually
    /// carries; masked coordinates contribute no gap.
    pub fn probability_of_cut_with_missing(&self, point: &[f32], missing: &[bool]) -> f64 {
        let below: f32 = self
            .min_values
            .iter()
            .zip(point)
            .zip(missing)
            .map(|((&lo, &v), &m)| if !m && lo - v > 0.0 { lo - v } else { 0.0 })
            .sum();
        let above: f32 = point
            .iter()
            .zip(&self.max_values)
            .zip(missing)
            .map(|((&v, &hi), &m)| if !m && v - hi > 0.0 { v - hi } else { 0.0 })
            .sum();
        let gap = (below + above) as f64;
        if gap == 0.0 {
            0.0
        } else if self.range_sum == 0.0 {
            1.0
        } else {
            gap / (self.range_sum + gap)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_tracks_range_sum() {
        let mut b = BoundingBox::from_point(&[0.0, 0.0]);
        assert_eq!(b.range_sum(), 0.0);
        assert!(b.add_point(&[2.0, -1.0]));
        assert_eq!(b.range_sum(), 3.0);
        assert!(!b.add_point(&[1.0, 0.0]));

        let other = BoundingBox::new(&[-1.0, 0.0], &[1.0, 4.0]).unwrap();
        assert!(b.add_box(&other));
        assert_eq!(b.min_values(), &[-1.0, -1.0]);
        assert_eq!(b.max_values(), &[2.0, 4.0]);
        assert_eq!(b.range_sum(), 8.0);
    }

    #[test]
    fn probability_of_cut_interior_and_degenerate() {
        let b = BoundingBox::new(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
        assert_eq!(b.probability_of_cut(&[0.5, 0.5]), 0.0);
        // gap 1 on each coordinate against a range sum of 2
        let p = b.probability_of_cut(&[2.0, -1.0]);
        assert!((p - 0.5).abs() < 1e-12);

        let degenerate = BoundingBox::from_point(&[1.0, 1.0]);
        assert_eq!(degenerate.probability_of_cut(&[3.0, 1.0]), 1.0);
        assert_eq!(degenerate.probability_of_cut(&[1.0, 1.0]), 0.0);
    }

    #[test]
    fn contains_is_inclusive() {
        let b = BoundingBox::new(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
        assert!(b.contains(&[0.0, 1.0]));
        assert!(!b.contains(&[1.00001, 0.5]));
    }
}
