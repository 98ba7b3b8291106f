use std::collections::HashMap;

use crate::bounding_box::BoundingBox;
use crate::cut::Cut;
use crate::error::Result;
use crate::point_store::PointStore;
use crate::util::check_state;

/// Arena for one tree's nodes.
///
/// A tree over at most `capacity` leaves has at most `capacity - 1` internal
/// nodes; slots `0..capacity` hold internal nodes in parallel arrays and a
/// leaf is encoded as `capacity + point_index`, so leaves occupy no storage
/// beyond their point handle. There are no parent pointers: every mutation
/// and traversal works from the explicit descent path.
///
/// Internal nodes with slot index below `box_cache_limit` keep their subtree
/// bounding box materialized. The rule is a function of the persisted slot
/// index alone, so the same nodes carry caches before and after a state
/// round-trip. Boxes of uncached nodes are recomputed from descendants on
/// demand.
pub(crate) struct NodeStore {
    capacity: usize,
    dimensions: usize,
    left: Vec<usize>,
    right: Vec<usize>,
    cut_dimension: Vec<usize>,
    cut_value: Vec<f32>,
    mass: Vec<usize>,
    free_nodes: Vec<usize>,
    leaf_mass: HashMap<usize, usize>,
    leaf_sequences: Option<HashMap<usize, Vec<u64>>>,
    point_sum: Option<Vec<f32>>,
    box_cache_limit: usize,
    box_min: Vec<f32>,
    box_max: Vec<f32>,
    box_range_sum: Vec<f64>,
}

pub(crate) const NULL_NODE: usize = usize::MAX;

impl NodeStore {
    pub fn new(
        capacity: usize,
        dimensions: usize,
        bounding_box_cache_fraction: f64,
        store_sequence_indexes: bool,
        center_of_mass: bool,
    ) -> Self {
        let box_cache_limit = (bounding_box_cache_fraction * capacity as f64).ceil() as usize;
        let box_cache_limit = box_cache_limit.min(capacity);
        NodeStore {
            capacity,
            dimensions,
            left: vec![NULL_NODE; capacity],
            right: vec![NULL_NODE; capacity],
            cut_dimension: vec![usize::MAX; capacity],
            cut_value: vec![0.0; capacity],
            mass: vec![0; capacity],
            free_nodes: (0..capacity).rev().collect(),
            leaf_mass: HashMap::new(),
            leaf_sequences: if store_sequence_indexes {
                Some(HashMap::new())
            } else {
                None
            },
            point_sum: if center_of_mass {
                Some(vec![0.0; capacity * dimensions])
            } else {
                None
            },
            box_cache_limit,
            box_min: vec![0.0; box_cache_limit * dimensions],
            box_max: vec![0.0; box_cache_limit * dimensions],
            box_range_sum: vec![0.0; box_cache_limit],
        }
    }

    pub fn is_leaf(&self, node: usize) -> bool {
        node != NULL_NODE && node >= self.capacity
    }

    pub fn leaf_node(&self, point_index: usize) -> usize {
        self.capacity + point_index
    }

    pub fn point_of(&self, node: usize) -> usize {
        debug_assert!(self.is_leaf(node));
        node - self.capacity
    }

    pub fn left(&self, node: usize) -> usize {
        self.left[node]
    }

    pub fn right(&self, node: usize) -> usize {
        self.right[node]
    }

    pub fn cut_dimension(&self, node: usize) -> usize {
        self.cut_dimension[node]
    }

    pub fn cut_value(&self, node: usize) -> f32 {
        self.cut_value[node]
    }

    pub fn mass(&self, node: usize) -> usize {
        if self.is_leaf(node) {
            *self.leaf_mass.get(&self.point_of(node)).unwrap_or(&1)
        } else {
            self.mass[node]
        }
    }

    // ---- path management -------------------------------------------------

    /// Descends from `root` guided by the cuts and returns the visited
    /// (node, sibling) pairs, root first (with a null sibling), leaf last.
    pub fn leaf_path(&self, root: usize, point: &[f32]) -> Vec<(usize, usize)> {
        let mut path = Vec::new();
        let mut node = root;
        let mut sibling = NULL_NODE;
        loop {
            path.push((node, sibling));
            if self.is_leaf(node) {
                return path;
            }
            if point[self.cut_dimension[node]] <= self.cut_value[node] {
                sibling = self.right[node];
                node = self.left[node];
            } else {
                sibling = self.left[node];
                node = self.right[node];
            }
        }
    }

    // ---- leaf bookkeeping ------------------------------------------------

    pub fn increase_leaf_mass(&mut self, point_index: usize) -> usize {
        let entry = self.leaf_mass.entry(point_index).or_insert(1);
        *entry += 1;
        *entry
    }

    /// Returns the remaining mass; at zero the leaf no longer exists.
    pub fn decrease_leaf_mass(&mut self, point_index: usize) -> usize {
        match self.leaf_mass.get_mut(&point_index) {
            Some(m) if *m > 2 => {
                *m -= 1;
                *m
            }
            Some(_) => {
                self.leaf_mass.remove(&point_index);
                1
            }
            None => 0,
        }
    }

    pub fn add_leaf_sequence(&mut self, point_index: usize, sequence_index: u64) {
        if let Some(map) = self.leaf_sequences.as_mut() {
            map.entry(point_index).or_default().push(sequence_index);
        }
    }

    pub fn remove_leaf_sequence(&mut self, point_index: usize, sequence_index: u64) -> Result<()> {
        if let Some(map) = self.leaf_sequences.as_mut() {
            let list = map.get_mut(&point_index);
            let found = list.as_ref().map_or(false, |l| l.contains(&sequence_index));
            check_state(found, "sequence index missing at leaf")?;
            let list = list.expect("checked above");
            let at = list
                .iter()
                .position(|&s| s == sequence_index)
                .expect("checked above");
            list.swap_remove(at);
            if list.is_empty() {
                map.remove(&point_index);
            }
        }
        Ok(())
    }

    pub fn leaf_sequences(&self, point_index: usize) -> Option<&[u64]> {
        self.leaf_sequences
            .as_ref()
            .and_then(|m| m.get(&point_index))
            .map(|v| v.as_slice())
    }

    // ---- structural mutation --------------------------------------------

    /// Creates the internal node that splits a fresh leaf for `point_index`
    /// off the subtree `displaced`, whose bounding box is `displaced_box`.
    /// Rewires `parent` (when present) and returns the new node.
    pub fn add_internal(
        &mut self,
        parent: usize,
        displaced: usize,
        point_index: usize,
        point: &[f32],
        cut: Cut,
        displaced_box: &BoundingBox,
        point_store: &PointStore,
    ) -> Result<usize> {
        let node = match self.free_nodes.pop() {
            Some(n) => n,
            None => {
                return Err(crate::error::RcfError::Invariant {
                    msg: "node arena exhausted",
                })
            }
        };
        let leaf = self.leaf_node(point_index);
        let (left, right) = if point[cut.dimension] <= cut.value {
            (leaf, displaced)
        } else {
            (displaced, leaf)
        };
        self.left[node] = left;
        self.right[node] = right;
        self.cut_dimension[node] = cut.dimension;
        self.cut_value[node] = cut.value;
        self.mass[node] = self.mass(displaced) + 1;
        if node < self.box_cache_limit {
            let mut merged = displaced_box.clone();
            merged.add_point(point);
            self.write_cached_box(node, &merged);
        }
        self.recompute_point_sum(node, point_store)?;
        if parent != NULL_NODE {
            self.replace_child(parent, displaced, node)?;
        }
        Ok(node)
    }

    pub fn replace_child(&mut self, parent: usize, old: usize, new: usize) -> Result<()> {
        if self.left[parent] == old {
            self.left[parent] = new;
        } else {
            check_state(self.right[parent] == old, "node is not a child of parent")?;
            self.right[parent] = new;
        }
        Ok(())
    }

    pub fn release_internal(&mut self, node: usize) {
        self.left[node] = NULL_NODE;
        self.right[node] = NULL_NODE;
        self.cut_dimension[node] = usize::MAX;
        self.cut_value[node] = 0.0;
        self.mass[node] = 0;
        if let Some(sums) = self.point_sum.as_mut() {
            sums[node * self.dimensions..(node + 1) * self.dimensions].fill(0.0);
        }
        self.free_nodes.push(node);
    }

    /// Walks the remaining path upward after an insertion: masses grow by
    /// one, center-of-mass sums absorb the point, and cached boxes grow
    /// unless the point was a duplicate already inside every box.
    pub fn finish_insertion(
        &mut self,
        path: &mut Vec<(usize, usize)>,
        point: &[f32],
        duplicate: bool,
    ) {
        while let Some((node, _)) = path.pop() {
            self.mass[node] += 1;
            self.add_to_point_sum(node, point, 1.0);
            if !duplicate && node < self.box_cache_limit {
                let offset = node * self.dimensions;
                let mut changed = false;
                for (i, &v) in point.iter().enumerate() {
                    if v < self.box_min[offset + i] {
                        self.box_min[offset + i] = v;
                        changed = true;
                    }
                    if v > self.box_max[offset + i] {
                        self.box_max[offset + i] = v;
                        changed = true;
                    }
                }
                if changed {
                    self.refresh_range_sum(node);
                }
            }
        }
    }

    /// Walks the remaining path upward after a deletion: masses shrink by
    /// one, sums give the point back, and a cached box is recomputed from
    /// the children when the removed point sat on its boundary. `spliced`
    /// is false when the deletion only lowered a duplicate leaf's mass, in
    /// which case no box can change.
    pub fn finish_deletion(
        &mut self,
        path: &mut Vec<(usize, usize)>,
        point: &[f32],
        spliced: bool,
        point_store: &PointStore,
    ) -> Result<()> {
        while let Some((node, _)) = path.pop() {
            self.mass[node] -= 1;
            self.add_to_point_sum(node, point, -1.0);
            if spliced && node < self.box_cache_limit {
                let offset = node * self.dimensions;
                let interior = point.iter().enumerate().all(|(i, &v)| {
                    self.box_min[offset + i] < v && v < self.box_max[offset + i]
                });
                if !interior {
                    let refreshed = self.merged_child_box(node, point_store)?;
                    self.write_cached_box(node, &refreshed);
                }
            }
        }
        Ok(())
    }

    // ---- bounding boxes --------------------------------------------------

    fn write_cached_box(&mut self, node: usize, bounding_box: &BoundingBox) {
        let offset = node * self.dimensions;
        self.box_min[offset..offset + self.dimensions].copy_from_slice(bounding_box.min_values());
        self.box_max[offset..offset + self.dimensions].copy_from_slice(bounding_box.max_values());
        self.box_range_sum[node] = bounding_box.range_sum();
    }

    fn refresh_range_sum(&mut self, node: usize) {
        let offset = node * self.dimensions;
        self.box_range_sum[node] = (0..self.dimensions)
            .map(|i| (self.box_max[offset + i] - self.box_min[offset + i]) as f64)
            .sum();
    }

    fn merged_child_box(&self, node: usize, point_store: &PointStore) -> Result<BoundingBox> {
        let mut merged = self.subtree_box(self.left[node], point_store)?;
        self.extend_with_subtree(&mut merged, self.right[node], point_store)?;
        Ok(merged)
    }

    /// The bounding box of the subtree under `node`, from the cache when the
    /// slot carries one and from the descendants otherwise.
    pub fn subtree_box(&self, node: usize, point_store: &PointStore) -> Result<BoundingBox> {
        if self.is_leaf(node) {
            return Ok(BoundingBox::from_point(point_store.get(self.point_of(node))?));
        }
        if node < self.box_cache_limit {
            let offset = node * self.dimensions;
            return Ok(BoundingBox::from_parts(
                &self.box_min[offset..offset + self.dimensions],
                &self.box_max[offset..offset + self.dimensions],
                self.box_range_sum[node],
            ));
        }
        self.merged_child_box(node, point_store)
    }

    /// Grows `bounding_box` by the subtree under `node` without cloning
    /// cached boxes.
    pub fn extend_with_subtree(
        &self,
        bounding_box: &mut BoundingBox,
        node: usize,
        point_store: &PointStore,
    ) -> Result<()> {
        if self.is_leaf(node) {
            bounding_box.add_point(point_store.get(self.point_of(node))?);
            return Ok(());
        }
        if node < self.box_cache_limit {
            let offset = node * self.dimensions;
            bounding_box.add_ranges(
                &self.box_min[offset..offset + self.dimensions],
                &self.box_max[offset..offset + self.dimensions],
            );
            return Ok(());
        }
        self.extend_with_subtree(bounding_box, self.left[node], point_store)?;
        self.extend_with_subtree(bounding_box, self.right[node], point_store)
    }

    /// Recomputes every cached box from the structure; used after a state
    /// import, where only the arrays are persisted.
    pub fn rebuild_box_caches(&mut self, root: usize, point_store: &PointStore) -> Result<()> {
        if root == NULL_NODE || self.is_leaf(root) {
            return Ok(());
        }
        self.rebuild_box_caches(self.left[root], point_store)?;
        self.rebuild_box_caches(self.right[root], point_store)?;
        if root < self.box_cache_limit {
            let merged = self.merged_child_box(root, point_store)?;
            self.write_cached_box(root, &merged);
        }
        Ok(())
    }

    // ---- center of mass --------------------------------------------------

    fn add_to_point_sum(&mut self, node: usize, point: &[f32], sign: f32) {
        if let Some(sums) = self.point_sum.as_mut() {
            let offset = node * self.dimensions;
            for (i, &v) in point.iter().enumerate() {
                sums[offset + i] += sign * v;
            }
        }
    }

    fn recompute_point_sum(&mut self, node: usize, point_store: &PointStore) -> Result<()> {
        if self.point_sum.is_none() {
            return Ok(());
        }
        let mut acc = vec![0.0f32; self.dimensions];
        self.subtree_point_sum(self.left[node], point_store, &mut acc)?;
        self.subtree_point_sum(self.right[node], point_store, &mut acc)?;
        let sums = self.point_sum.as_mut().expect("checked above");
        let offset = node * self.dimensions;
        sums[offset..offset + self.dimensions].copy_from_slice(&acc);
        Ok(())
    }

    fn subtree_point_sum(
        &self,
        node: usize,
        point_store: &PointStore,
        acc: &mut [f32],
    ) -> Result<()> {
        if self.is_leaf(node) {
            let point_index = self.point_of(node);
            let weight = self.mass(node) as f32;
            for (slot, &v) in acc.iter_mut().zip(point_store.get(point_index)?) {
                *slot += weight * v;
            }
            return Ok(());
        }
        let sums = self.point_sum.as_ref().expect("center of mass disabled");
        let offset = node * self.dimensions;
        for (slot, &v) in acc.iter_mut().zip(&sums[offset..offset + self.dimensions]) {
            *slot += v;
        }
        Ok(())
    }

    pub fn center_of_mass(&self, node: usize, point_store: &PointStore) -> Result<Vec<f32>> {
        check_state(self.point_sum.is_some(), "center of mass is not enabled")?;
        if self.is_leaf(node) {
            return point_store.copy(self.point_of(node));
        }
        let sums = self.point_sum.as_ref().expect("checked above");
        let offset = node * self.dimensions;
        let mass = self.mass[node] as f32;
        Ok(sums[offset..offset + self.dimensions]
            .iter()
            .map(|&v| v / mass)
            .collect())
    }

    // ---- persistence hooks ----------------------------------------------

    #[allow(clippy::type_complexity)]
    pub fn digest(
        &self,
    ) -> (
        Vec<usize>,
        Vec<usize>,
        Vec<usize>,
        Vec<f32>,
        Vec<usize>,
        Vec<usize>,
        Vec<(usize, usize)>,
        Option<Vec<(usize, Vec<u64>)>>,
    ) {
        let mut leaf_mass: Vec<(usize, usize)> = self.leaf_mass.iter().map(|(&k, &v)| (k, v)).collect();
        leaf_mass.sort_unstable();
        let leaf_sequences = self.leaf_sequences.as_ref().map(|m| {
            let mut v: Vec<(usize, Vec<u64>)> =
                m.iter().map(|(&k, s)| (k, s.clone())).collect();
            v.sort_unstable();
            v
        });
        (
            self.left.clone(),
            self.right.clone(),
            self.cut_dimension.clone(),
            self.cut_value.clone(),
            self.mass.clone(),
            self.free_nodes.clone(),
            leaf_mass,
            leaf_sequences,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        capacity: usize,
        dimensions: usize,
        bounding_box_cache_fraction: f64,
        center_of_mass: bool,
        left: Vec<usize>,
        right: Vec<usize>,
        cut_dimension: Vec<usize>,
        cut_value: Vec<f32>,
        mass: Vec<usize>,
        free_nodes: Vec<usize>,
        leaf_mass: Vec<(usize, usize)>,
        leaf_sequences: Option<Vec<(usize, Vec<u64>)>>,
    ) -> Result<Self> {
        check_state(
            left.len() == capacity
                && right.len() == capacity
                && cut_dimension.len() == capacity
                && cut_value.len() == capacity
                && mass.len() == capacity,
            "node arrays do not match capacity",
        )?;
        let mut store = NodeStore::new(
            capacity,
            dimensions,
            bounding_box_cache_fraction,
            leaf_sequences.is_some(),
            center_of_mass,
        );
        store.left = left;
        store.right = right;
        store.cut_dimension = cut_dimension;
        store.cut_value = cut_value;
        store.mass = mass;
        store.free_nodes = free_nodes;
        store.leaf_mass = leaf_mass.into_iter().collect();
        if let Some(seqs) = leaf_sequences {
            store.leaf_sequences = Some(seqs.into_iter().collect());
        }
        Ok(store)
    }

    /// Restores center-of-mass sums and box caches after the arrays have
    /// been imported.
    pub fn rebuild_derived(&mut self, root: usize, point_store: &PointStore) -> Result<()> {
        self.rebuild_point_sums(root, point_store)?;
        self.rebuild_box_caches(root, point_store)
    }

    fn rebuild_point_sums(&mut self, node: usize, point_store: &PointStore) -> Result<()> {
        if self.point_sum.is_none() || node == NULL_NODE || self.is_leaf(node) {
            return Ok(());
        }
        self.rebuild_point_sums(self.left[node], point_store)?;
        self.rebuild_point_sums(self.right[node], point_store)?;
        self.recompute_point_sum(node, point_store)
    }

    // ---- validation ------------------------------------------------------

    /// Verifies mass additivity and box nesting under `node`; returns the
    /// subtree mass and box. Test support.
    #[cfg(test)]
    pub fn validate_subtree(
        &self,
        node: usize,
        point_store: &PointStore,
    ) -> Result<(usize, BoundingBox)> {
        if self.is_leaf(node) {
            let point = point_store.get(self.point_of(node))?;
            return Ok((self.mass(node), BoundingBox::from_point(point)));
        }
        let (left_mass, left_box) = self.validate_subtree(self.left[node], point_store)?;
        let (right_mass, right_box) = self.validate_subtree(self.right[node], point_store)?;
        check_state(
            self.mass[node] == left_mass + right_mass,
            "mass is not additive",
        )?;
        let mut merged = left_box.clone();
        merged.add_box(&right_box);
        let cut_dim = self.cut_dimension[node];
        check_state(
            left_box.max_values()[cut_dim] <= self.cut_value[node]
                && self.cut_value[node] < right_box.min_values()[cut_dim],
            "children are not separated by the cut",
        )?;
        if node < self.box_cache_limit {
            let cached = self.subtree_box(node, point_store)?;
            check_state(cached == merged, "cached box is stale")?;
        }
        Ok((left_mass + right_mass, merged))
    }
}
