use num::abs;

use crate::divector::DiVector;
use crate::visitor::{NodeView, Visitor, VisitorInfo};

/// The anomaly score split into per-coordinate directional contributions.
/// Follows the same recurrence as the scalar score, with the probability of
/// a separating cut decomposed coordinate-wise into a `DiVector`. When the
/// query duplicates a sampled point the geometry switches to the shadow box
/// so the directions reflect the rest of the sample.
pub struct AttributionVisitor {
    info: VisitorInfo,
    tree_mass: usize,
    score: f64,
    converged: bool,
    hit_duplicate: bool,
    shadow: bool,
    attribution: DiVector,
    probability: DiVector,
}

impl AttributionVisitor {
    pub fn new(tree_mass: usize, dimensions: usize, info: VisitorInfo) -> Self {
        AttributionVisitor {
            info,
            tree_mass,
            score: 0.0,
            converged: false,
            hit_duplicate: false,
            shadow: false,
            attribution: DiVector::empty(dimensions),
            probability: DiVector::empty(dimensions),
        }
    }
}

impl Visitor for AttributionVisitor {
    type Output = DiVector;

    fn accept_leaf(&mut self, point: &[f32], view: &NodeView) {
        let mass = view.mass();
        if view.is_duplicate() {
            self.score = (self.info.damp)(mass, self.tree_mass)
                * (self.info.score_seen)(view.depth(), mass);
            self.hit_duplicate = true;
            self.shadow = true;
        } else {
            self.score = (self.info.score_unseen)(view.depth(), mass);
            view.assign_probability_of_cut(&mut self.probability, point);
            debug_assert!(abs(self.probability.total() - 1.0) < 1e-6);
            self.attribution.add_from(&self.probability, self.score);
        }
    }

    fn accept(&mut self, point: &[f32], view: &NodeView) {
        if self.converged {
            return;
        }
        if self.shadow {
            view.assign_shadow_probability_of_cut(&mut self.probability, point);
        } else {
            view.assign_probability_of_cut(&mut self.probability, point);
        }
        let probability = self.probability.total();
        if probability == 0.0 {
            self.converged = true;
        } else {
            let new_value = (self.info.score_unseen)(view.depth(), view.mass());
            if !self.hit_duplicate {
                self.score = (1.0 - probability) * self.score + probability * new_value;
            }
            self.attribution.scale(1.0 - probability);
            self.attribution.add_from(&self.probability, new_value);
        }
    }

    fn is_converged(&self) -> bool {
        self.converged
    }

    fn wants_shadow_box(&self) -> bool {
        self.shadow
    }

    fn result(&self) -> DiVector {
        let normalized = (self.info.normalizer)(self.score, self.tree_mass);
        let mut answer = self.attribution.clone();
        answer.normalize(normalized);
        answer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounding_box::BoundingBox;
    use crate::visitor::ScoreVisitor;

    #[test]
    fn attribution_totals_match_the_scalar_score() {
        let query = [5.0, 0.5];
        let leaf_view = NodeView::at_leaf(4, 1, 64, 0, vec![0.2, 0.4], false);
        let boxes = [
            BoundingBox::new(&[0.0, 0.0], &[0.5, 0.6]).unwrap(),
            BoundingBox::new(&[0.0, 0.0], &[1.0, 1.0]).unwrap(),
            BoundingBox::new(&[-1.0, -1.0], &[1.0, 1.0]).unwrap(),
            BoundingBox::new(&[-1.0, -1.0], &[1.5, 1.2]).unwrap(),
        ];

        let mut attribution = AttributionVisitor::new(64, 2, VisitorInfo::default());
        let mut score = ScoreVisitor::new(64, VisitorInfo::default());
        attribution.accept_leaf(&query, &leaf_view);
        score.accept_leaf(&query, &leaf_view);
        for (depth, b) in boxes.iter().enumerate().rev() {
            let view = NodeView::internal(depth, 8 * (4 - depth), 64, b.clone());
            attribution.accept(&query, &view);
            score.accept(&query, &view);
        }
        // the scalar path accumulates gaps in f32, so agreement is at
        // single precision
        let total = attribution.result().total();
        assert!((total - score.result()).abs() < 1e-4 * score.result().abs());
    }

    #[test]
    fn direction_follows_the_displacement() {
        // the query exceeds the model only on the first coordinate's high side
        let query = [5.0, 0.5];
        let leaf_view = NodeView::at_leaf(2, 1, 64, 0, vec![0.2, 0.4], false);
        let mut visitor = AttributionVisitor::new(64, 2, VisitorInfo::default());
        visitor.accept_leaf(&query, &leaf_view);
        for depth in (0..2).rev() {
            let b = BoundingBox::new(&[-1.0, -1.0], &[1.0, 1.0]).unwrap();
            let view = NodeView::internal(depth, 32, 64, b);
            visitor.accept(&query, &view);
        }
        let result = visitor.result();
        assert!(result.high[0] > 10.0 * result.low[0]);
        assert!(result.high[0] > 5.0 * (result.high[1] + result.low[1]));
    }
}
