use std::collections::HashMap;

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rand_core::RngCore;
use rayon::prelude::*;
use tracing::debug;

use crate::accumulator::ConvergingAccumulator;
use crate::config::ForestOptions;
use crate::density::DensityOutput;
use crate::divector::DiVector;
use crate::error::{RcfError, Result};
use crate::point_store::PointStore;
use crate::sampled_tree::{SampledTree, TreeUpdate};
use crate::shingle::ShingleBuilder;
use crate::util::check_argument;
use crate::visitor::{
    AttributionVisitor, DensityVisitor, ImputeVisitor, NearNeighborVisitor, ScoreVisitor, Visitor,
    VisitorInfo,
};

/// A forest of random cut trees over a shared point store.
///
/// Updates take `&mut self` and queries take `&self`, so the exclusion of
/// concurrent updates and queries is enforced by the borrow rules; the
/// internal per-tree fan-out may still run on a worker pool when parallel
/// execution is enabled.
pub struct RandomCutForest {
    options: ForestOptions,
    point_store: PointStore,
    trees: Vec<SampledTree>,
    shingle: Option<ShingleBuilder>,
    thread_pool: Option<rayon::ThreadPool>,
    total_updates: u64,
}

fn build_pool(options: &ForestOptions) -> Result<Option<rayon::ThreadPool>> {
    if options.parallel_execution_enabled {
        if let Some(threads) = options.thread_pool_size {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .map_err(|_| RcfError::InvalidConfig {
                    msg: "could not build the worker pool",
                })?;
            return Ok(Some(pool));
        }
    }
    Ok(None)
}

impl RandomCutForest {
    pub(crate) fn from_options(options: ForestOptions) -> Result<Self> {
        options.validate()?;
        let store_capacity =
            (options.sample_size * options.number_of_trees + 1).max(2 * options.sample_size);
        let point_store = PointStore::new(
            options.dimensions,
            store_capacity,
            2 * options.sample_size,
        );

        let mut rng = ChaCha20Rng::seed_from_u64(options.random_seed);
        let _ = rng.next_u64();
        let trees: Vec<SampledTree> = (0..options.number_of_trees)
            .map(|_| {
                SampledTree::new(
                    options.dimensions,
                    options.sample_size,
                    options.time_decay,
                    options.initial_accept_fraction,
                    options.bounding_box_cache_fraction,
                    options.store_sequence_indexes_enabled,
                    options.center_of_mass_enabled,
                    rng.next_u64(),
                )
            })
            .collect();

        let shingle = if options.internal_shingling_enabled {
            Some(ShingleBuilder::new(
                options.base_dimensions(),
                options.shingle_size,
                options.shingle_cyclic,
            )?)
        } else {
            None
        };
        let thread_pool = build_pool(&options)?;
        debug!(
            dimensions = options.dimensions,
            number_of_trees = options.number_of_trees,
            sample_size = options.sample_size,
            "constructed forest"
        );
        Ok(RandomCutForest {
            options,
            point_store,
            trees,
            shingle,
            thread_pool,
            total_updates: 0,
        })
    }

    pub(crate) fn assemble(
        options: ForestOptions,
        point_store: PointStore,
        trees: Vec<SampledTree>,
        shingle: Option<ShingleBuilder>,
        total_updates: u64,
    ) -> Result<Self> {
        options.validate()?;
        let thread_pool = build_pool(&options)?;
        Ok(RandomCutForest {
            options,
            point_store,
            trees,
            shingle,
            thread_pool,
            total_updates,
        })
    }

    pub fn options(&self) -> &ForestOptions {
        &self.options
    }

    pub fn dimensions(&self) -> usize {
        self.options.dimensions
    }

    pub fn number_of_trees(&self) -> usize {
        self.options.number_of_trees
    }

    pub fn total_updates(&self) -> u64 {
        self.total_updates
    }

    /// Queries return their neutral value until this is true.
    pub fn is_output_ready(&self) -> bool {
        self.total_updates >= self.options.output_after as u64
    }

    // ---- update path -----------------------------------------------------

    /// Feeds one point to every tree. Internally shingling forests take the
    /// base point; otherwise the full (externally shingled) input.
    pub fn update(&mut self, point: &[f32]) -> Result<()> {
        let expected = self
            .shingle
            .as_ref()
            .map_or(self.options.dimensions, |b| b.base_dimensions());
        check_argument(point.len() == expected, "incorrect point length")?;

        self.total_updates += 1;
        let shingled;
        let input: &[f32] = if let Some(builder) = self.shingle.as_mut() {
            builder.push(point)?;
            if !builder.is_full() {
                return Ok(());
            }
            shingled = builder.shingled_point();
            &shingled
        } else {
            point
        };

        let handle = self.point_store.add(input)?;
        let sequence_index = self.total_updates;
        let results = self.update_trees(handle, sequence_index)?;
        self.point_store.adjust_counts(results.iter().flatten())?;
        self.point_store.dec(handle)?;
        Ok(())
    }

    fn update_trees(
        &mut self,
        handle: usize,
        sequence_index: u64,
    ) -> Result<Vec<Option<TreeUpdate>>> {
        let point_store = &self.point_store;
        let trees = &mut self.trees;
        if self.options.parallel_execution_enabled {
            let run = |t: &mut SampledTree| t.update(handle, sequence_index, point_store);
            match self.thread_pool.as_ref() {
                Some(pool) => pool.install(|| trees.par_iter_mut().map(run).collect()),
                None => trees.par_iter_mut().map(run).collect(),
            }
        } else {
            trees
                .iter_mut()
                .map(|t| t.update(handle, sequence_index, point_store))
                .collect()
        }
    }

    // ---- query path ------------------------------------------------------

    fn prepared_query(&self, point: &[f32]) -> Result<Vec<f32>> {
        if let Some(builder) = &self.shingle {
            if point.len() == builder.base_dimensions() {
                return builder.shingled_with(point);
            }
        }
        check_argument(
            point.len() == self.options.dimensions,
            "incorrect point length",
        )?;
        Ok(point.to_vec())
    }

    fn collect_results<V, R>(
        &self,
        point: &[f32],
        factory: impl Fn(usize) -> V + Sync,
    ) -> Result<Vec<Option<R>>>
    where
        V: Visitor<Output = R>,
        R: Send,
    {
        let point_store = &self.point_store;
        if self.options.parallel_execution_enabled {
            let run = |t: &SampledTree| t.traverse(point, point_store, &factory);
            match self.thread_pool.as_ref() {
                Some(pool) => pool.install(|| self.trees.par_iter().map(run).collect()),
                None => self.trees.par_iter().map(run).collect(),
            }
        } else {
            self.trees
                .iter()
                .map(|t| t.traverse(point, point_store, &factory))
                .collect()
        }
    }

    /// The averaged anomaly score; values above `log2(sample_size)` flag the
    /// query as anomalous.
    pub fn score(&self, point: &[f32]) -> Result<f64> {
        self.generic_score(point, VisitorInfo::default())
    }

    pub fn displacement_score(&self, point: &[f32]) -> Result<f64> {
        self.generic_score(point, VisitorInfo::displacement())
    }

    pub fn generic_score(&self, point: &[f32], info: VisitorInfo) -> Result<f64> {
        let query = self.prepared_query(point)?;
        if !self.is_output_ready() {
            return Ok(0.0);
        }
        let results = self.collect_results(&query, move |tree_mass| {
            ScoreVisitor::new(tree_mass, info)
        })?;
        let total: f64 = results.iter().flatten().sum();
        Ok(total / self.trees.len() as f64)
    }

    /// Sequentially folds per-tree scores and stops once the accumulator
    /// converges; the result is scaled as if every tree had voted.
    pub fn converging_score(
        &self,
        point: &[f32],
        precision: f64,
        min_values_accepted: usize,
        max_values_accepted: usize,
    ) -> Result<f64> {
        let query = self.prepared_query(point)?;
        if !self.is_output_ready() {
            return Ok(0.0);
        }
        let mut accumulator =
            ConvergingAccumulator::new(precision, min_values_accepted, max_values_accepted)?;
        let info = VisitorInfo::default();
        for tree in &self.trees {
            if accumulator.is_converged() {
                break;
            }
            let result =
                tree.traverse(&query, &self.point_store, |m| ScoreVisitor::new(m, info))?;
            accumulator.accept(result.unwrap_or(0.0));
        }
        Ok(accumulator.scaled_total(self.trees.len()) / self.trees.len() as f64)
    }

    /// Per-coordinate directional decomposition of the anomaly score.
    pub fn attribution(&self, point: &[f32]) -> Result<DiVector> {
        let dimensions = self.options.dimensions;
        let query = self.prepared_query(point)?;
        if !self.is_output_ready() {
            return Ok(DiVector::empty(dimensions));
        }
        let info = VisitorInfo::default();
        let results = self.collect_results(&query, move |tree_mass| {
            AttributionVisitor::new(tree_mass, dimensions, info)
        })?;
        let mut answer = DiVector::empty(dimensions);
        for r in results.iter().flatten() {
            r.add_to(&mut answer);
        }
        answer.divide(self.trees.len());
        Ok(answer)
    }

    /// Interpolated density around the query, averaged across trees.
    pub fn simple_density(&self, point: &[f32]) -> Result<DensityOutput> {
        let dimensions = self.options.dimensions;
        let query = self.prepared_query(point)?;
        if !self.is_output_ready() {
            return Ok(DensityOutput::empty(dimensions, 0.0));
        }
        let results = self.collect_results(&query, move |tree_mass| {
            DensityVisitor::new(tree_mass, dimensions)
        })?;
        let mut answer = DensityOutput::empty(dimensions, 0.0);
        for r in results.iter().flatten() {
            r.add_to(&mut answer);
        }
        answer.divide(self.trees.len());
        Ok(answer)
    }

    pub fn density(&self, point: &[f32]) -> Result<f64> {
        self.simple_density(point).map(|output| output.density())
    }

    pub fn directional_density(&self, point: &[f32]) -> Result<DiVector> {
        self.simple_density(point)
            .map(|output| output.directional_density())
    }

    /// Fills the coordinates listed in `missing_indexes` with the
    /// coordinate-wise median of the per-tree proposals. An internally
    /// shingling forest accepts the base point with indexes into it;
    /// otherwise the point and indexes address the full dimensionality.
    pub fn impute_missing_values(
        &self,
        point: &[f32],
        missing_indexes: &[usize],
    ) -> Result<Vec<f32>> {
        check_argument(!missing_indexes.is_empty(), "nothing to impute")?;
        let dimensions = self.options.dimensions;

        let base_form = self
            .shingle
            .as_ref()
            .map_or(false, |b| point.len() == b.base_dimensions());
        let (query, mapped) = if base_form {
            let builder = self.shingle.as_ref().expect("base form implies shingling");
            (
                builder.shingled_with(point)?,
                builder.map_next_indices(missing_indexes)?,
            )
        } else {
            check_argument(point.len() == dimensions, "incorrect point length")?;
            for &i in missing_indexes {
                check_argument(i < dimensions, "missing index out of range")?;
            }
            (point.to_vec(), missing_indexes.to_vec())
        };

        let mut completed = query.clone();
        if !self.is_output_ready() {
            for &i in &mapped {
                completed[i] = 0.0;
            }
            return Ok(self.project_imputed(point, &completed, &mapped, missing_indexes, base_form));
        }

        let mut missing_mask = vec![false; dimensions];
        for &i in &mapped {
            missing_mask[i] = true;
        }

        let point_store = &self.point_store;
        let seed_base = self.options.random_seed ^ self.total_updates;
        let run = |(index, tree): (usize, &SampledTree)| {
            let seed = seed_base ^ ((index as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
            let mask = missing_mask.clone();
            tree.traverse_missing(&query, &missing_mask, point_store, move |tree_mass| {
                ImputeVisitor::new(tree_mass, 1.0, mask, seed)
            })
            .map(|result| result.flatten())
        };
        let results: Vec<Option<(f64, usize, f64)>> = if self.options.parallel_execution_enabled {
            match self.thread_pool.as_ref() {
                Some(pool) => pool.install(|| {
                    self.trees
                        .par_iter()
                        .enumerate()
                        .map(run)
                        .collect::<Result<Vec<_>>>()
                })?,
                None => self
                    .trees
                    .par_iter()
                    .enumerate()
                    .map(run)
                    .collect::<Result<Vec<_>>>()?,
            }
        } else {
            self.trees
                .iter()
                .enumerate()
                .map(run)
                .collect::<Result<Vec<_>>>()?
        };

        let proposals: Vec<Vec<f32>> = results
            .iter()
            .flatten()
            .map(|&(_, leaf_index, _)| self.point_store.copy(leaf_index))
            .collect::<Result<Vec<_>>>()?;
        check_argument(!proposals.is_empty(), "no trees are ready to vote")?;

        for &i in &mapped {
            let mut values: Vec<f32> = proposals.iter().map(|p| p[i]).collect();
            values.sort_by(|a, b| a.partial_cmp(b).expect("coordinates are finite"));
            let mid = values.len() / 2;
            completed[i] = if values.len() % 2 == 1 {
                values[mid]
            } else {
                (values[mid - 1] + values[mid]) / 2.0
            };
        }
        Ok(self.project_imputed(point, &completed, &mapped, missing_indexes, base_form))
    }

    fn project_imputed(
        &self,
        point: &[f32],
        completed: &[f32],
        mapped: &[usize],
        missing_indexes: &[usize],
        base_form: bool,
    ) -> Vec<f32> {
        if !base_form {
            return completed.to_vec();
        }
        let mut answer = point.to_vec();
        for (&slot, &full) in missing_indexes.iter().zip(mapped) {
            answer[slot] = completed[full];
        }
        answer
    }

    /// Sampled points whose paths the query shares, within `distance_bound`
    /// in L1, closest first.
    pub fn near_neighbors(
        &self,
        point: &[f32],
        distance_bound: f64,
    ) -> Result<Vec<(Vec<f32>, f64)>> {
        let query = self.prepared_query(point)?;
        if !self.is_output_ready() {
            return Ok(Vec::new());
        }
        let results = self.collect_results(&query, |_| NearNeighborVisitor::new())?;
        let mut best: HashMap<usize, f64> = HashMap::new();
        for &(leaf_index, distance) in results.iter().flatten().flatten() {
            if distance <= distance_bound {
                let entry = best.entry(leaf_index).or_insert(distance);
                if distance < *entry {
                    *entry = distance;
                }
            }
        }
        let mut answer = Vec::with_capacity(best.len());
        for (leaf_index, distance) in best {
            answer.push((self.point_store.copy(leaf_index)?, distance));
        }
        answer.sort_by(|a, b| a.1.partial_cmp(&b.1).expect("distances are finite"));
        Ok(answer)
    }

    /// Per-tree centers of mass of the current samples; requires the option.
    pub fn centers_of_mass(&self) -> Result<Vec<Vec<f32>>> {
        check_argument(
            self.options.center_of_mass_enabled,
            "center of mass is not enabled",
        )?;
        self.trees
            .iter()
            .map(|t| t.tree().center_of_mass(&self.point_store))
            .collect()
    }

    // ---- internal accessors (state capture, tests) -----------------------

    pub(crate) fn trees(&self) -> &[SampledTree] {
        &self.trees
    }

    pub(crate) fn point_store(&self) -> &PointStore {
        &self.point_store
    }

    pub(crate) fn shingle(&self) -> Option<&ShingleBuilder> {
        self.shingle.as_ref()
    }
}
