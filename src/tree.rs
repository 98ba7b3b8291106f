use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_core::RngCore;

use crate::bounding_box::BoundingBox;
use crate::cut::Cut;
use crate::error::Result;
use crate::node_store::{NodeStore, NULL_NODE};
use crate::point_store::PointStore;
use crate::util::check_state;
use crate::visitor::{MultiVisitor, NodeView, Visitor};

/// A binary tree of random axis-aligned cuts over the points its paired
/// sampler currently retains.
///
/// The randomness is an evolving seed: every insertion reseeds a fresh
/// generator and stores the successor seed, so the tree's entire random
/// state round-trips through a single integer.
pub(crate) struct RandomCutTree {
    dimensions: usize,
    root: usize,
    tree_mass: usize,
    random_seed: u64,
    store: NodeStore,
}

impl RandomCutTree {
    pub fn new(
        dimensions: usize,
        capacity: usize,
        bounding_box_cache_fraction: f64,
        store_sequence_indexes: bool,
        center_of_mass: bool,
        random_seed: u64,
    ) -> Self {
        RandomCutTree {
            dimensions,
            root: NULL_NODE,
            tree_mass: 0,
            random_seed,
            store: NodeStore::new(
                capacity,
                dimensions,
                bounding_box_cache_fraction,
                store_sequence_indexes,
                center_of_mass,
            ),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root == NULL_NODE
    }

    pub fn mass(&self) -> usize {
        self.tree_mass
    }

    /// Inserts one occurrence of the point behind `point_index`. Returns the
    /// handle the tree actually references, which is the handle of an
    /// existing leaf when the coordinates coincide.
    pub fn add(
        &mut self,
        point_index: usize,
        sequence_index: u64,
        point_store: &PointStore,
    ) -> Result<usize> {
        if self.root == NULL_NODE {
            self.root = self.store.leaf_node(point_index);
            self.tree_mass = 1;
            self.store.add_leaf_sequence(point_index, sequence_index);
            return Ok(point_index);
        }

        let point = point_store.get(point_index)?;
        let mut path = self.store.leaf_path(self.root, point);
        let (leaf_node, leaf_sibling) = path.pop().expect("descent path is never empty");
        let leaf_point_index = self.store.point_of(leaf_node);

        self.tree_mass += 1;
        if point_store.is_equal(point, leaf_point_index)? {
            self.store.increase_leaf_mass(leaf_point_index);
            self.store.add_leaf_sequence(leaf_point_index, sequence_index);
            self.store.finish_insertion(&mut path, point, true);
            return Ok(leaf_point_index);
        }

        // Walk back up from the leaf, growing the subtree box as siblings
        // join, and at each level draw the cut the offline construction
        // would draw on box-plus-point. The deepest level whose draw still
        // separates the point wins; everything above it must have failed,
        // which reproduces the top-down acceptance probabilities.
        let old_point = point_store.get(leaf_point_index)?;
        let mut rng = ChaCha20Rng::seed_from_u64(self.random_seed);
        self.random_seed = rng.next_u64();

        let mut node = leaf_node;
        let mut sibling = leaf_sibling;
        let mut parent = path.last().map(|&(n, _)| n).unwrap_or(NULL_NODE);
        let mut current_box = BoundingBox::from_point(old_point);
        let mut saved_box = current_box.clone();
        let mut saved_node = node;
        let mut saved_parent = parent;
        let mut saved_cut = Cut::none();
        let mut rejected_path: Vec<(usize, usize)> = Vec::new();

        loop {
            let factor: f64 = rng.gen();
            let (cut, separation) = Cut::random_cut_and_separation(&current_box, factor, point);
            if separation {
                saved_cut = cut;
                saved_parent = parent;
                saved_node = node;
                saved_box = current_box.clone();
                rejected_path.clear();
            } else {
                rejected_path.push((node, sibling));
            }
            check_state(!saved_cut.is_none(), "no separating cut exists")?;

            if parent == NULL_NODE {
                break;
            }
            self.store
                .extend_with_subtree(&mut current_box, sibling, point_store)?;
            let (n, s) = path.pop().expect("parent was observed on the path");
            node = n;
            sibling = s;
            parent = path.last().map(|&(x, _)| x).unwrap_or(NULL_NODE);
        }

        if saved_parent != NULL_NODE {
            // restore the rejected levels so the path again ends at the
            // parent of the insertion site
            while let Some(pair) = rejected_path.pop() {
                path.push(pair);
            }
            check_state(
                path.last().map(|&(n, _)| n) == Some(saved_parent),
                "reconstructed path does not reach the insertion site",
            )?;
        } else {
            check_state(path.is_empty(), "dangling ancestors above the root")?;
        }

        let merged = self.store.add_internal(
            saved_parent,
            saved_node,
            point_index,
            point,
            saved_cut,
            &saved_box,
            point_store,
        )?;
        self.store.add_leaf_sequence(point_index, sequence_index);

        if saved_parent != NULL_NODE {
            self.store.finish_insertion(&mut path, point, false);
        } else {
            self.root = merged;
        }
        Ok(point_index)
    }

    /// Removes one occurrence of the point behind `point_index`; the leaf is
    /// spliced out when its last occurrence goes. Returns the handle the
    /// removed occupancy referenced.
    pub fn delete(
        &mut self,
        point_index: usize,
        sequence_index: u64,
        point_store: &PointStore,
    ) -> Result<usize> {
        check_state(self.root != NULL_NODE, "deleting from an empty tree")?;
        self.tree_mass -= 1;

        let point = point_store.get(point_index)?;
        let mut path = self.store.leaf_path(self.root, point);
        let (leaf_node, leaf_sibling) = path.pop().expect("descent path is never empty");
        let leaf_point_index = self.store.point_of(leaf_node);
        if leaf_point_index != point_index {
            check_state(
                point_store.is_equal(point, leaf_point_index)?,
                "deletion reached a leaf with different coordinates",
            )?;
        }
        self.store
            .remove_leaf_sequence(leaf_point_index, sequence_index)?;

        if self.store.decrease_leaf_mass(leaf_point_index) == 0 {
            if path.is_empty() {
                self.root = NULL_NODE;
            } else {
                let (parent, _) = path.pop().expect("leaf had a parent");
                let grandparent = path.last().map(|&(n, _)| n).unwrap_or(NULL_NODE);
                if grandparent == NULL_NODE {
                    self.root = leaf_sibling;
                } else {
                    self.store.replace_child(grandparent, parent, leaf_sibling)?;
                    self.store
                        .finish_deletion(&mut path, point, true, point_store)?;
                }
                self.store.release_internal(parent);
            }
        } else {
            self.store
                .finish_deletion(&mut path, point, false, point_store)?;
        }
        Ok(leaf_point_index)
    }

    /// Root-to-leaf traversal guided by the query, with the visitor called
    /// at the leaf and then at every ancestor on the way back up.
    pub fn traverse<V: Visitor>(
        &self,
        point: &[f32],
        visitor: &mut V,
        point_store: &PointStore,
    ) -> Result<()> {
        check_state(self.root != NULL_NODE, "traversing an empty tree")?;
        let path = self.store.leaf_path(self.root, point);
        let &(leaf_node, _) = path.last().expect("descent path is never empty");
        let leaf_point_index = self.store.point_of(leaf_node);
        let leaf_point = point_store.copy(leaf_point_index)?;
        let duplicate = leaf_point.as_slice() == point;

        let mut view = NodeView::at_leaf(
            path.len() - 1,
            self.store.mass(leaf_node),
            self.tree_mass,
            leaf_point_index,
            leaf_point,
            duplicate,
        );
        visitor.accept_leaf(point, &view);
        let maintain_shadow = visitor.wants_shadow_box();

        for i in (0..path.len() - 1).rev() {
            if visitor.is_converged() {
                return Ok(());
            }
            let (node, _) = path[i];
            let sibling = path[i + 1].1;
            self.store
                .extend_with_subtree(view.bounding_box_mut(), sibling, point_store)?;
            if maintain_shadow {
                if view.has_shadow() {
                    let shadow = view.shadow_box_mut().expect("shadow was just observed");
                    self.store.extend_with_subtree(shadow, sibling, point_store)?;
                } else {
                    let shadow = self.store.subtree_box(sibling, point_store)?;
                    view.set_shadow(shadow);
                }
            }
            view.set_position(i, self.store.mass(node));
            visitor.accept(point, &view);
        }
        Ok(())
    }

    /// Traversal for queries with missing coordinates: a cut on a missing
    /// coordinate explores both children and asks the visitor to fold the
    /// two candidate branches.
    pub fn traverse_missing<V: MultiVisitor>(
        &self,
        point: &[f32],
        missing: &[bool],
        visitor: &mut V,
        point_store: &PointStore,
    ) -> Result<()> {
        check_state(self.root != NULL_NODE, "traversing an empty tree")?;
        self.missing_recurse(self.root, 0, point, missing, visitor, point_store)
    }

    fn missing_recurse<V: MultiVisitor>(
        &self,
        node: usize,
        depth: usize,
        point: &[f32],
        missing: &[bool],
        visitor: &mut V,
        point_store: &PointStore,
    ) -> Result<()> {
        if self.store.is_leaf(node) {
            let leaf_point_index = self.store.point_of(node);
            let leaf_point = point_store.copy(leaf_point_index)?;
            let duplicate = leaf_point
                .iter()
                .zip(point)
                .zip(missing)
                .all(|((&a, &b), &m)| m || a == b);
            let view = NodeView::at_leaf(
                depth,
                self.store.mass(node),
                self.tree_mass,
                leaf_point_index,
                leaf_point,
                duplicate,
            );
            visitor.accept_leaf(point, &view);
            return Ok(());
        }

        if missing[self.store.cut_dimension(node)] {
            self.missing_recurse(
                self.store.left(node),
                depth + 1,
                point,
                missing,
                visitor,
                point_store,
            )?;
            self.missing_recurse(
                self.store.right(node),
                depth + 1,
                point,
                missing,
                visitor,
                point_store,
            )?;
            let view = self.internal_view(node, depth, point_store)?;
            visitor.combine_branches(point, &view);
            if !visitor.is_converged() {
                visitor.accept(point, &view);
            }
        } else {
            let child = if point[self.store.cut_dimension(node)] <= self.store.cut_value(node) {
                self.store.left(node)
            } else {
                self.store.right(node)
            };
            self.missing_recurse(child, depth + 1, point, missing, visitor, point_store)?;
            if !visitor.is_converged() {
                let view = self.internal_view(node, depth, point_store)?;
                visitor.accept(point, &view);
            }
        }
        Ok(())
    }

    fn internal_view(
        &self,
        node: usize,
        depth: usize,
        point_store: &PointStore,
    ) -> Result<NodeView> {
        Ok(NodeView::internal(
            depth,
            self.store.mass(node),
            self.tree_mass,
            self.store.subtree_box(node, point_store)?,
        ))
    }

    pub fn center_of_mass(&self, point_store: &PointStore) -> Result<Vec<f32>> {
        if self.root == NULL_NODE {
            return Ok(vec![0.0; self.dimensions]);
        }
        self.store.center_of_mass(self.root, point_store)
    }

    pub fn root(&self) -> usize {
        self.root
    }

    pub fn random_seed(&self) -> u64 {
        self.random_seed
    }

    pub fn node_store(&self) -> &NodeStore {
        &self.store
    }

    pub fn restore(
        dimensions: usize,
        root: usize,
        tree_mass: usize,
        random_seed: u64,
        store: NodeStore,
    ) -> Self {
        RandomCutTree {
            dimensions,
            root,
            tree_mass,
            random_seed,
            store,
        }
    }

    pub fn rebuild_derived(&mut self, point_store: &PointStore) -> Result<()> {
        if self.root == NULL_NODE {
            return Ok(());
        }
        self.store.rebuild_derived(self.root, point_store)
    }

    #[cfg(test)]
    pub fn validate(&self, point_store: &PointStore) -> Result<()> {
        if self.root == NULL_NODE {
            check_state(self.tree_mass == 0, "empty tree with nonzero mass")?;
            return Ok(());
        }
        let (mass, _) = self.store.validate_subtree(self.root, point_store)?;
        check_state(mass == self.tree_mass, "root mass disagrees with tree mass")
    }
}
