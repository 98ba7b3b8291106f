//! Capture and restore of a forest's complete state.
//!
//! The state model is a plain serde-derived value: the option set, the point
//! store arrays, and per tree the node arrays plus the sampler entries and
//! both evolving random seeds. Box caches and center-of-mass sums are
//! derived data and are rebuilt on restore, so a round-trip reproduces the
//! original forest exactly, including the continuation of the stream.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ForestOptions;
use crate::error::Result;
use crate::forest::RandomCutForest;
use crate::node_store::NodeStore;
use crate::point_store::PointStore;
use crate::sampled_tree::SampledTree;
use crate::sampler::{SampleEntry, StreamSampler};
use crate::shingle::ShingleBuilder;
use crate::tree::RandomCutTree;
use crate::util::check_state;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PointStoreState {
    pub coordinates: Vec<f32>,
    pub reference_counts: Vec<u32>,
    pub free_slots: Vec<usize>,
    pub next_fresh: usize,
    pub capacity: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SampleEntryState {
    pub point_index: usize,
    pub weight: f32,
    pub sequence_index: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SamplerState {
    pub entries: Vec<SampleEntryState>,
    pub entries_seen: u64,
    pub random_seed: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TreeState {
    pub root: usize,
    pub tree_mass: usize,
    pub random_seed: u64,
    pub left: Vec<usize>,
    pub right: Vec<usize>,
    pub cut_dimension: Vec<usize>,
    pub cut_value: Vec<f32>,
    pub mass: Vec<usize>,
    pub free_nodes: Vec<usize>,
    pub leaf_mass: Vec<(usize, usize)>,
    pub leaf_sequences: Option<Vec<(usize, Vec<u64>)>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SampledTreeState {
    pub sampler: SamplerState,
    pub tree: TreeState,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShingleState {
    pub buffer: Vec<f32>,
    pub consumed: u64,
}

/// Everything needed to reconstruct a forest.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ForestState {
    pub options: ForestOptions,
    pub total_updates: u64,
    pub point_store: PointStoreState,
    pub trees: Vec<SampledTreeState>,
    pub shingle: Option<ShingleState>,
}

impl RandomCutForest {
    pub fn to_state(&self) -> ForestState {
        let (coordinates, reference_counts, free_slots, next_fresh) =
            self.point_store().snapshot();
        let trees = self
            .trees()
            .iter()
            .map(|sampled| {
                let sampler = sampled.sampler();
                let tree = sampled.tree();
                let (left, right, cut_dimension, cut_value, mass, free_nodes, leaf_mass, leaf_sequences) =
                    tree.node_store().digest();
                SampledTreeState {
                    sampler: SamplerState {
                        entries: sampler
                            .entries()
                            .map(|e| SampleEntryState {
                                point_index: e.point_index,
                                weight: e.weight,
                                sequence_index: e.sequence_index,
                            })
                            .collect(),
                        entries_seen: sampler.entries_seen(),
                        random_seed: sampler.random_seed(),
                    },
                    tree: TreeState {
                        root: tree.root(),
                        tree_mass: tree.mass(),
                        random_seed: tree.random_seed(),
                        left,
                        right,
                        cut_dimension,
                        cut_value,
                        mass,
                        free_nodes,
                        leaf_mass,
                        leaf_sequences,
                    },
                }
            })
            .collect();
        debug!(
            total_updates = self.total_updates(),
            trees = self.number_of_trees(),
            "captured forest state"
        );
        ForestState {
            options: self.options().clone(),
            total_updates: self.total_updates(),
            point_store: PointStoreState {
                coordinates,
                reference_counts,
                free_slots,
                next_fresh,
                capacity: self.point_store().capacity(),
            },
            trees,
            shingle: self.shingle().map(|builder| ShingleState {
                buffer: builder.buffer().to_vec(),
                consumed: builder.consumed(),
            }),
        }
    }

    pub fn from_state(state: &ForestState) -> Result<Self> {
        let options = state.options.clone();
        options.validate()?;
        check_state(
            state.trees.len() == options.number_of_trees,
            "tree count disagrees with the options",
        )?;

        let point_store = PointStore::restore(
            options.dimensions,
            state.point_store.capacity,
            state.point_store.coordinates.clone(),
            state.point_store.reference_counts.clone(),
            state.point_store.free_slots.clone(),
            state.point_store.next_fresh,
        )?;

        let mut trees = Vec::with_capacity(state.trees.len());
        for tree_state in &state.trees {
            let entries: Vec<SampleEntry> = tree_state
                .sampler
                .entries
                .iter()
                .map(|e| SampleEntry {
                    point_index: e.point_index,
                    weight: e.weight,
                    sequence_index: e.sequence_index,
                })
                .collect();
            let sampler = StreamSampler::restore(
                options.sample_size,
                options.time_decay,
                options.initial_accept_fraction,
                &entries,
                tree_state.sampler.entries_seen,
                tree_state.sampler.random_seed,
            )?;

            let node_store = NodeStore::restore(
                options.sample_size,
                options.dimensions,
                options.bounding_box_cache_fraction,
                options.center_of_mass_enabled,
                tree_state.tree.left.clone(),
                tree_state.tree.right.clone(),
                tree_state.tree.cut_dimension.clone(),
                tree_state.tree.cut_value.clone(),
                tree_state.tree.mass.clone(),
                tree_state.tree.free_nodes.clone(),
                tree_state.tree.leaf_mass.clone(),
                tree_state.tree.leaf_sequences.clone(),
            )?;
            let mut tree = RandomCutTree::restore(
                options.dimensions,
                tree_state.tree.root,
                tree_state.tree.tree_mass,
                tree_state.tree.random_seed,
                node_store,
            );
            check_state(
                tree.mass() == sampler.size(),
                "tree mass disagrees with sampler size",
            )?;
            tree.rebuild_derived(&point_store)?;
            trees.push(SampledTree::restore(sampler, tree));
        }

        let shingle = match (&state.shingle, options.internal_shingling_enabled) {
            (Some(shingle_state), true) => Some(ShingleBuilder::restore(
                options.base_dimensions(),
                options.shingle_size,
                options.shingle_cyclic,
                shingle_state.buffer.clone(),
                shingle_state.consumed,
            )?),
            (None, false) => None,
            _ => {
                return Err(crate::error::RcfError::Invariant {
                    msg: "shingle state disagrees with the options",
                })
            }
        };

        debug!(
            total_updates = state.total_updates,
            trees = state.trees.len(),
            "restored forest state"
        );
        RandomCutForest::assemble(options, point_store, trees, shingle, state.total_updates)
    }
}
