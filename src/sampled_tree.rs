use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rand_core::RngCore;

use crate::error::Result;
use crate::point_store::PointStore;
use crate::sampler::{Acceptance, StreamSampler};
use crate::tree::RandomCutTree;
use crate::visitor::{MultiVisitor, Visitor};

/// A sampler paired with the tree that materializes its reservoir. The two
/// always reference the same multiset of handles; every accepted entry first
/// deletes the sampler's eviction from the tree and then inserts the new
/// point, possibly coalescing onto an existing leaf's handle.
pub(crate) struct SampledTree {
    sampler: StreamSampler,
    tree: RandomCutTree,
}

/// The reference-count consequences of one accepted update.
pub(crate) type TreeUpdate = (usize, Option<usize>);

impl SampledTree {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dimensions: usize,
        sample_size: usize,
        time_decay: f64,
        initial_accept_fraction: f64,
        bounding_box_cache_fraction: f64,
        store_sequence_indexes: bool,
        center_of_mass: bool,
        random_seed: u64,
    ) -> Self {
        let mut rng = ChaCha20Rng::seed_from_u64(random_seed);
        let sampler_seed = rng.next_u64();
        let tree_seed = rng.next_u64();
        SampledTree {
            sampler: StreamSampler::new(
                sample_size,
                time_decay,
                initial_accept_fraction,
                sampler_seed,
            ),
            tree: RandomCutTree::new(
                dimensions,
                sample_size,
                bounding_box_cache_fraction,
                store_sequence_indexes,
                center_of_mass,
                tree_seed,
            ),
        }
    }

    /// Offers the stream entry to the sampler and applies the consequences
    /// to the tree. Returns the (added, evicted) handles when the entry was
    /// accepted so the forest can settle reference counts afterwards.
    pub fn update(
        &mut self,
        point_index: usize,
        sequence_index: u64,
        point_store: &PointStore,
    ) -> Result<Option<TreeUpdate>> {
        match self.sampler.accept(sequence_index) {
            Acceptance::Reject => Ok(None),
            Acceptance::Accept { weight, evicted } => {
                let deleted = match evicted {
                    Some(entry) => Some(self.tree.delete(
                        entry.point_index,
                        entry.sequence_index,
                        point_store,
                    )?),
                    None => None,
                };
                let added = self.tree.add(point_index, sequence_index, point_store)?;
                self.sampler.insert(added, weight, sequence_index);
                Ok(Some((added, deleted)))
            }
        }
    }

    /// Runs one visitor over the tree; `None` for an empty tree.
    pub fn traverse<V, R>(
        &self,
        point: &[f32],
        point_store: &PointStore,
        factory: impl FnOnce(usize) -> V,
    ) -> Result<Option<R>>
    where
        V: Visitor<Output = R>,
    {
        if self.tree.is_empty() {
            return Ok(None);
        }
        let mut visitor = factory(self.tree.mass());
        self.tree.traverse(point, &mut visitor, point_store)?;
        Ok(Some(visitor.result()))
    }

    pub fn traverse_missing<V, R>(
        &self,
        point: &[f32],
        missing: &[bool],
        point_store: &PointStore,
        factory: impl FnOnce(usize) -> V,
    ) -> Result<Option<R>>
    where
        V: MultiVisitor<Output = R>,
    {
        if self.tree.is_empty() {
            return Ok(None);
        }
        let mut visitor = factory(self.tree.mass());
        self.tree
            .traverse_missing(point, missing, &mut visitor, point_store)?;
        Ok(Some(visitor.result()))
    }

    pub fn sampler(&self) -> &StreamSampler {
        &self.sampler
    }

    pub fn tree(&self) -> &RandomCutTree {
        &self.tree
    }

    pub fn restore(sampler: StreamSampler, tree: RandomCutTree) -> Self {
        SampledTree { sampler, tree }
    }
}
