use crate::visitor::{NodeView, Visitor, VisitorInfo};

/// The anomaly score of one tree: a leaf contribution mixed toward the
/// unseen score at every ancestor by the probability that a random cut
/// would have separated the query there.
pub struct ScoreVisitor {
    info: VisitorInfo,
    tree_mass: usize,
    score: f64,
    converged: bool,
}

impl ScoreVisitor {
    pub fn new(tree_mass: usize, info: VisitorInfo) -> Self {
        ScoreVisitor {
            info,
            tree_mass,
            score: 0.0,
            converged: false,
        }
    }
}

impl Visitor for ScoreVisitor {
    type Output = f64;

    fn accept_leaf(&mut self, _point: &[f32], view: &NodeView) {
        let mass = view.mass();
        if view.is_duplicate() {
            // the query is one of the sampled points; the score is settled
            self.score = (self.info.damp)(mass, self.tree_mass)
                * (self.info.score_seen)(view.depth(), mass);
            self.converged = true;
        } else {
            self.score = (self.info.score_unseen)(view.depth(), mass);
        }
    }

    fn accept(&mut self, point: &[f32], view: &NodeView) {
        if self.converged {
            return;
        }
        let probability = view.probability_of_cut(point);
        if probability == 0.0 {
            self.converged = true;
        } else {
            self.score = (1.0 - probability) * self.score
                + probability * (self.info.score_unseen)(view.depth(), view.mass());
        }
    }

    fn is_converged(&self) -> bool {
        self.converged
    }

    fn result(&self) -> f64 {
        (self.info.normalizer)(self.score, self.tree_mass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounding_box::BoundingBox;

    #[test]
    fn duplicate_leaf_settles_the_score() {
        let mut visitor = ScoreVisitor::new(100, VisitorInfo::default());
        let view = NodeView::at_leaf(5, 4, 100, 0, vec![1.0, 1.0], true);
        visitor.accept_leaf(&[1.0, 1.0], &view);
        assert!(visitor.is_converged());
        let expected = (1.0 - 4.0 / 200.0) * (1.0 / (5.0 + f64::log2(5.0)))
            * f64::log2(101.0);
        assert!((visitor.result() - expected).abs() < 1e-12);
    }

    #[test]
    fn interior_ancestors_do_not_change_the_score() {
        let mut visitor = ScoreVisitor::new(100, VisitorInfo::default());
        let leaf_view = NodeView::at_leaf(3, 1, 100, 0, vec![0.0, 0.0], false);
        visitor.accept_leaf(&[0.5, 0.5], &leaf_view);
        let before = visitor.result();

        // an ancestor whose box already contains the query contributes
        // nothing and stops the ascent
        let b = BoundingBox::new(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
        let view = NodeView::internal(2, 10, 100, b);
        visitor.accept(&[0.5, 0.5], &view);
        assert!(visitor.is_converged());
        assert_eq!(visitor.result(), before);
    }

    #[test]
    fn distant_query_approaches_the_unseen_root_score() {
        let mut visitor = ScoreVisitor::new(255, VisitorInfo::default());
        let leaf_view = NodeView::at_leaf(8, 1, 255, 0, vec![0.0, 0.0], false);
        let query = [1000.0, 1000.0];
        visitor.accept_leaf(&query, &leaf_view);
        for depth in (0..8).rev() {
            let b = BoundingBox::new(&[-1.0, -1.0], &[1.0, 1.0]).unwrap();
            let view = NodeView::internal(depth, 255, 255, b);
            visitor.accept(&query, &view);
        }
        // nearly every level separates the query, so the normalized score
        // sits near log2(256)
        assert!(visitor.result() > 0.9 * f64::log2(256.0));
    }
}
