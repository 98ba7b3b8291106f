use crate::density::DensityOutput;
use crate::visitor::{NodeView, Visitor, VisitorInfo};

/// Accumulates a `DensityOutput` along the descent path, crediting each
/// level's escape directions with an inverse-mass weight. A duplicate leaf
/// switches to the shadow geometry so the estimate reflects the sample
/// around the query rather than the query itself.
pub struct DensityVisitor {
    info: VisitorInfo,
    tree_mass: usize,
    score: f64,
    converged: bool,
    hit_duplicate: bool,
    shadow: bool,
    output: DensityOutput,
}

impl DensityVisitor {
    pub fn new(tree_mass: usize, dimensions: usize) -> Self {
        DensityVisitor {
            info: VisitorInfo::density(),
            tree_mass,
            score: 0.0,
            converged: false,
            hit_duplicate: false,
            shadow: false,
            output: DensityOutput::empty(dimensions, tree_mass as f64),
        }
    }
}

impl Visitor for DensityVisitor {
    type Output = DensityOutput;

    fn accept_leaf(&mut self, point: &[f32], view: &NodeView) {
        let mass = view.mass();
        if view.is_duplicate() {
            self.score = (self.info.damp)(mass, self.tree_mass)
                * (self.info.score_seen)(view.depth(), mass);
            self.hit_duplicate = true;
            self.shadow = true;
        } else {
            let value = (self.info.score_unseen)(view.depth(), mass);
            self.score = value;
            self.output.update(point, view.bounding_box(), value);
        }
    }

    fn accept(&mut self, point: &[f32], view: &NodeView) {
        if self.converged {
            return;
        }
        let bounding_box = if self.shadow {
            view.shadow_box().unwrap_or_else(|| view.bounding_box())
        } else {
            view.bounding_box()
        };
        let value = (self.info.score_unseen)(view.depth(), view.mass());
        let probability = self.output.update(point, bounding_box, value);
        if probability == 0.0 {
            self.converged = true;
        } else if !self.hit_duplicate {
            self.score = (1.0 - probability) * self.score + probability * value;
        }
    }

    fn is_converged(&self) -> bool {
        self.converged
    }

    fn wants_shadow_box(&self) -> bool {
        self.shadow
    }

    fn result(&self) -> DensityOutput {
        self.output.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounding_box::BoundingBox;

    #[test]
    fn outlier_accumulates_distance_mass() {
        let query = [10.0, 0.0];
        let leaf_view = NodeView::at_leaf(3, 1, 64, 0, vec![0.5, 0.2], false);
        let mut visitor = DensityVisitor::new(64, 2);
        visitor.accept_leaf(&query, &leaf_view);
        for depth in (0..3).rev() {
            let b = BoundingBox::new(&[-1.0, -1.0], &[1.0, 1.0]).unwrap();
            let view = NodeView::internal(depth, 16, 64, b);
            visitor.accept(&query, &view);
        }
        let output = visitor.result();
        assert!(output.probability_mass.high[0] > 0.0);
        assert_eq!(output.probability_mass.low[0], 0.0);
        assert!(output.distance.high[0] > 0.0);
        assert_eq!(output.sample_size, 64.0);
    }

    #[test]
    fn interior_query_converges_without_mass() {
        let query = [0.0, 0.0];
        let leaf_view = NodeView::at_leaf(2, 1, 64, 0, vec![0.5, 0.2], false);
        let mut visitor = DensityVisitor::new(64, 2);
        visitor.accept_leaf(&query, &leaf_view);
        let b = BoundingBox::new(&[-1.0, -1.0], &[1.0, 1.0]).unwrap();
        let view = NodeView::internal(1, 16, 64, b);
        visitor.accept(&query, &view);
        assert!(visitor.is_converged());
    }
}
