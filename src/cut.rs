use crate::bounding_box::BoundingBox;

/// A candidate split: the coordinate being cut and the cut position.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Cut {
    pub dimension: usize,
    pub value: f32,
}

impl Cut {
    pub fn new(dimension: usize, value: f32) -> Self {
        Cut { dimension, value }
    }

    pub fn none() -> Self {
        Cut {
            dimension: usize::MAX,
            value: 0.0,
        }
    }

    pub fn is_none(&self) -> bool {
        self.dimension == usize::MAX
    }

    /// Draws the cut that the offline construction would draw on
    /// `bounding_box` grown by `point`: a coordinate proportional to the
    /// merged extent and a position uniform within it, both derived from the
    /// single uniform `factor`. Also reports whether the cut separates
    /// `point` from the box. When the point lies inside the box no new cut
    /// region exists and `(Cut::none(), false)` is returned.
    pub fn random_cut_and_separation(
        bounding_box: &BoundingBox,
        factor: f64,
        point: &[f32],
    ) -> (Cut, bool) {
        let gap = bounding_box.outside_gap(point);
        if gap == 0.0 {
            return (Cut::none(), false);
        }
        let mut remaining = (gap + bounding_box.range_sum()) * factor;

        let min_values = bounding_box.min_values();
        let max_values = bounding_box.max_values();
        let mut chosen = usize::MAX;
        let mut cut_value = 0.0f32;
        let mut fallback = usize::MAX;
        for dim in 0..point.len() {
            let low = if point[dim] < min_values[dim] {
                point[dim]
            } else {
                min_values[dim]
            };
            let high = if point[dim] > max_values[dim] {
                point[dim]
            } else {
                max_values[dim]
            };
            let extent = (high - low) as f64;
            if extent <= 0.0 {
                continue;
            }
            fallback = dim;
            if remaining <= extent {
                chosen = dim;
                cut_value = low + remaining as f32;
                if cut_value <= low || cut_value >= high {
                    // rounding pushed the cut onto a face; pull it back
                    cut_value = low;
                }
                break;
            }
            remaining -= extent;
        }
        if chosen == usize::MAX {
            // rounding overshot the cumulative extents; land in the last
            // coordinate that had any width
            chosen = fallback;
            cut_value = if point[chosen] < min_values[chosen] {
                point[chosen]
            } else {
                min_values[chosen]
            };
        }

        let separation = (point[chosen] <= cut_value && cut_value < min_values[chosen])
            || (max_values[chosen] <= cut_value && cut_value < point[chosen]);
        (Cut::new(chosen, cut_value), separation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interior_point_yields_no_cut() {
        let b = BoundingBox::new(&[0.0, 0.0], &[2.0, 2.0]).unwrap();
        let (cut, separation) = Cut::random_cut_and_separation(&b, 0.3, &[1.0, 1.0]);
        assert!(cut.is_none());
        assert!(!separation);
    }

    #[test]
    fn point_box_always_separates() {
        // against a degenerate box every drawn cut must isolate the point
        let b = BoundingBox::from_point(&[0.0, 0.0]);
        for i in 1..100 {
            let factor = i as f64 / 100.0;
            let (cut, separation) = Cut::random_cut_and_separation(&b, factor, &[4.0, 0.0]);
            assert!(separation);
            assert_eq!(cut.dimension, 0);
            assert!(cut.value >= 0.0 && cut.value < 4.0);
        }
    }

    #[test]
    fn cut_lands_in_merged_extent() {
        let b = BoundingBox::new(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
        let point = [3.0, 0.5];
        for i in 1..50 {
            let factor = i as f64 / 50.0;
            let (cut, _) = Cut::random_cut_and_separation(&b, factor, &point);
            match cut.dimension {
                0 => assert!(cut.value >= 0.0 && cut.value < 3.0),
                1 => assert!(cut.value >= 0.0 && cut.value < 1.0),
                d => panic!("unexpected dimension {}", d),
            }
        }
    }
}
