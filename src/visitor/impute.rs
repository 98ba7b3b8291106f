use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::util::l1_distance;
use crate::visitor::{MultiVisitor, NodeView, Visitor, VisitorInfo};

/// One candidate completion: the leaf that proposed it, how anomalous the
/// completed point looked on the way down, and its distance to the query on
/// the known coordinates.
#[derive(Clone, Copy, Debug)]
struct Candidate {
    converged: bool,
    score: f64,
    random: f32,
    leaf_index: usize,
    distance: f64,
}

/// Resolves queries with missing coordinates. Every leaf reached by the
/// two-branch descent proposes its own coordinates for the missing
/// positions; when branches rejoin, the candidate whose blended score is
/// lower (more central, with `centrality` trading score against a uniform
/// draw) survives.
pub struct ImputeVisitor {
    info: VisitorInfo,
    tree_mass: usize,
    centrality: f64,
    missing: Vec<bool>,
    rng: ChaCha20Rng,
    stack: Vec<Candidate>,
}

impl ImputeVisitor {
    pub fn new(tree_mass: usize, centrality: f64, missing: Vec<bool>, seed: u64) -> Self {
        ImputeVisitor {
            info: VisitorInfo::default(),
            tree_mass,
            centrality,
            missing,
            rng: ChaCha20Rng::seed_from_u64(seed),
            stack: Vec::new(),
        }
    }

    /// Blends the anomaly score with the candidate's uniform draw; at
    /// centrality one the choice is purely score driven, at zero purely
    /// random.
    fn adjusted_score(&self, candidate: &Candidate) -> f64 {
        self.centrality * (self.info.normalizer)(candidate.score, self.tree_mass)
            + (1.0 - self.centrality) * candidate.random as f64
    }
}

impl Visitor for ImputeVisitor {
    type Output = Option<(f64, usize, f64)>;

    fn accept_leaf(&mut self, point: &[f32], view: &NodeView) {
        let mass = view.mass();
        let leaf_point = view.leaf_point();
        let completed: Vec<f32> = point
            .iter()
            .zip(leaf_point)
            .zip(&self.missing)
            .map(|((&q, &l), &m)| if m { l } else { q })
            .collect();

        let mut converged = false;
        let score = if view.is_duplicate() {
            converged = true;
            (self.info.damp)(mass, self.tree_mass) * (self.info.score_seen)(view.depth(), mass)
        } else {
            (self.info.score_unseen)(view.depth(), mass)
        };
        let distance = l1_distance(&completed, leaf_point);
        self.stack.push(Candidate {
            converged,
            score,
            random: self.rng.gen::<f32>(),
            leaf_index: view.leaf_index(),
            distance,
        });
    }

    fn accept(&mut self, point: &[f32], view: &NodeView) {
        let mut top = match self.stack.pop() {
            Some(c) => c,
            None => return,
        };
        if !top.converged {
            let probability = view
                .bounding_box()
                .probability_of_cut_with_missing(point, &self.missing);
            if probability == 0.0 {
                top.converged = true;
            } else {
                top.score = (1.0 - probability) * top.score
                    + probability * (self.info.score_unseen)(view.depth(), view.mass());
            }
        }
        self.stack.push(top);
    }

    fn is_converged(&self) -> bool {
        self.stack.last().map_or(false, |c| c.converged)
    }

    fn result(&self) -> Option<(f64, usize, f64)> {
        debug_assert!(self.stack.len() <= 1, "unmerged candidate branches");
        self.stack.last().map(|c| {
            (
                (self.info.normalizer)(c.score, self.tree_mass),
                c.leaf_index,
                c.distance,
            )
        })
    }
}

impl MultiVisitor for ImputeVisitor {
    fn combine_branches(&mut self, _point: &[f32], _view: &NodeView) {
        debug_assert!(self.stack.len() >= 2, "branch fold without two candidates");
        let first = match self.stack.pop() {
            Some(c) => c,
            None => return,
        };
        let second = match self.stack.pop() {
            Some(c) => c,
            None => {
                self.stack.push(first);
                return;
            }
        };
        let mut kept = if self.adjusted_score(&first) < self.adjusted_score(&second) {
            first
        } else {
            second
        };
        kept.converged = first.converged || second.converged;
        self.stack.push(kept);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_fold_toward_the_lower_score() {
        let mut visitor = ImputeVisitor::new(64, 1.0, vec![true, false], 0);
        let near = NodeView::at_leaf(4, 8, 64, 1, vec![0.1, 0.5], false);
        let far = NodeView::at_leaf(1, 1, 64, 2, vec![9.0, 0.5], false);
        // the shallow leaf carries the larger unseen score
        visitor.accept_leaf(&[0.0, 0.5], &near);
        visitor.accept_leaf(&[0.0, 0.5], &far);
        let view = NodeView::internal(
            0,
            9,
            64,
            crate::bounding_box::BoundingBox::new(&[0.0, 0.0], &[9.0, 1.0]).unwrap(),
        );
        visitor.combine_branches(&[0.0, 0.5], &view);
        let (_, leaf, _) = visitor.result().unwrap();
        assert_eq!(leaf, 1);
    }

    #[test]
    fn missing_coordinates_do_not_count_toward_distance() {
        let mut visitor = ImputeVisitor::new(64, 1.0, vec![true, false], 0);
        let view = NodeView::at_leaf(3, 1, 64, 7, vec![100.0, 0.5], false);
        visitor.accept_leaf(&[0.0, 0.75], &view);
        let (_, leaf, distance) = visitor.result().unwrap();
        assert_eq!(leaf, 7);
        assert!((distance - 0.25).abs() < 1e-6);
    }
}
