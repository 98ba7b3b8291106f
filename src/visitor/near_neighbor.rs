use crate::util::l1_distance;
use crate::visitor::{NodeView, Visitor};

/// Reports the leaf the query descends to, together with its L1 distance.
/// The ascent carries no further information, so the visitor converges as
/// soon as the leaf is seen.
pub struct NearNeighborVisitor {
    found: Option<(usize, f64)>,
}

impl NearNeighborVisitor {
    pub fn new() -> Self {
        NearNeighborVisitor { found: None }
    }
}

impl Default for NearNeighborVisitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Visitor for NearNeighborVisitor {
    type Output = Option<(usize, f64)>;

    fn accept_leaf(&mut self, point: &[f32], view: &NodeView) {
        self.found = Some((view.leaf_index(), l1_distance(point, view.leaf_point())));
    }

    fn accept(&mut self, _point: &[f32], _view: &NodeView) {}

    fn is_converged(&self) -> bool {
        self.found.is_some()
    }

    fn result(&self) -> Option<(usize, f64)> {
        self.found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_distance_is_reported() {
        let mut visitor = NearNeighborVisitor::new();
        let view = NodeView::at_leaf(3, 1, 10, 4, vec![1.0, 2.0], false);
        visitor.accept_leaf(&[0.0, 0.0], &view);
        assert!(visitor.is_converged());
        assert_eq!(visitor.result(), Some((4, 3.0)));
    }
}
