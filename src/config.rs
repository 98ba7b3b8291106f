use serde::{Deserialize, Serialize};

use crate::error::{RcfError, Result};
use crate::forest::RandomCutForest;

/// Precision of stored coordinates. This build keeps points in single
/// precision and performs score arithmetic in double precision; requesting
/// double-precision storage is rejected at build time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Precision {
    Single,
    Double,
}

/// The full option set of a forest. Options are compile-time fields; the
/// builder supplies the defaults and `validate` rejects inconsistent
/// combinations before any state is allocated.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ForestOptions {
    pub dimensions: usize,
    pub number_of_trees: usize,
    pub sample_size: usize,
    pub time_decay: f64,
    pub output_after: usize,
    pub shingle_size: usize,
    pub shingle_cyclic: bool,
    pub random_seed: u64,
    pub parallel_execution_enabled: bool,
    pub thread_pool_size: Option<usize>,
    pub store_sequence_indexes_enabled: bool,
    pub center_of_mass_enabled: bool,
    pub bounding_box_cache_fraction: f64,
    pub precision: Precision,
    pub internal_shingling_enabled: bool,
    pub initial_accept_fraction: f64,
}

fn check_config(test: bool, msg: &'static str) -> Result<()> {
    if test {
        Ok(())
    } else {
        Err(RcfError::InvalidConfig { msg })
    }
}

impl ForestOptions {
    pub fn validate(&self) -> Result<()> {
        check_config(self.dimensions >= 1, "dimensions must be at least one")?;
        check_config(
            self.number_of_trees >= 1,
            "number of trees must be at least one",
        )?;
        check_config(self.sample_size >= 1, "sample size must be at least one")?;
        check_config(self.shingle_size >= 1, "shingle size must be at least one")?;
        check_config(
            self.dimensions % self.shingle_size == 0,
            "shingle size must divide dimensions",
        )?;
        check_config(self.time_decay >= 0.0, "time decay cannot be negative")?;
        check_config(
            (0.0..=1.0).contains(&self.bounding_box_cache_fraction),
            "bounding box cache fraction must lie in [0, 1]",
        )?;
        check_config(
            self.initial_accept_fraction > 0.0 && self.initial_accept_fraction <= 1.0,
            "initial accept fraction must lie in (0, 1]",
        )?;
        check_config(self.output_after >= 1, "output after must be at least one")?;
        check_config(
            self.thread_pool_size != Some(0),
            "thread pool size cannot be zero",
        )?;
        check_config(
            self.precision == Precision::Single,
            "points are stored in single precision in this build",
        )?;
        if self.internal_shingling_enabled {
            check_config(
                self.shingle_size > 1,
                "internal shingling requires a shingle size above one",
            )?;
        } else {
            check_config(
                !self.shingle_cyclic,
                "cyclic shingles require internal shingling",
            )?;
        }
        Ok(())
    }

    pub fn base_dimensions(&self) -> usize {
        self.dimensions / self.shingle_size
    }
}

/// Builder for `RandomCutForest`; only the dimensionality is required.
///
/// ```
/// use rcforest::ForestBuilder;
///
/// let forest = ForestBuilder::new(2)
///     .number_of_trees(30)
///     .sample_size(128)
///     .random_seed(42)
///     .build()
///     .unwrap();
/// assert_eq!(forest.dimensions(), 2);
/// ```
#[derive(Clone, Debug)]
pub struct ForestBuilder {
    options: ForestOptions,
    output_after: Option<usize>,
}

impl ForestBuilder {
    pub fn new(dimensions: usize) -> Self {
        ForestBuilder {
            options: ForestOptions {
                dimensions,
                number_of_trees: 50,
                sample_size: 256,
                time_decay: 0.0,
                output_after: 0,
                shingle_size: 1,
                shingle_cyclic: false,
                random_seed: 0,
                parallel_execution_enabled: false,
                thread_pool_size: None,
                store_sequence_indexes_enabled: false,
                center_of_mass_enabled: false,
                bounding_box_cache_fraction: 1.0,
                precision: Precision::Single,
                internal_shingling_enabled: false,
                initial_accept_fraction: 0.125,
            },
            output_after: None,
        }
    }

    pub fn number_of_trees(mut self, number_of_trees: usize) -> Self {
        self.options.number_of_trees = number_of_trees;
        self
    }

    pub fn sample_size(mut self, sample_size: usize) -> Self {
        self.options.sample_size = sample_size;
        self
    }

    pub fn time_decay(mut self, time_decay: f64) -> Self {
        self.options.time_decay = time_decay;
        self
    }

    pub fn output_after(mut self, output_after: usize) -> Self {
        self.output_after = Some(output_after);
        self
    }

    pub fn shingle_size(mut self, shingle_size: usize) -> Self {
        self.options.shingle_size = shingle_size;
        self
    }

    pub fn shingle_cyclic(mut self, cyclic: bool) -> Self {
        self.options.shingle_cyclic = cyclic;
        self
    }

    pub fn random_seed(mut self, random_seed: u64) -> Self {
        self.options.random_seed = random_seed;
        self
    }

    pub fn parallel_execution(mut self, enabled: bool) -> Self {
        self.options.parallel_execution_enabled = enabled;
        self
    }

    pub fn thread_pool_size(mut self, size: usize) -> Self {
        self.options.thread_pool_size = Some(size);
        self
    }

    pub fn store_sequence_indexes(mut self, enabled: bool) -> Self {
        self.options.store_sequence_indexes_enabled = enabled;
        self
    }

    pub fn center_of_mass(mut self, enabled: bool) -> Self {
        self.options.center_of_mass_enabled = enabled;
        self
    }

    pub fn bounding_box_cache_fraction(mut self, fraction: f64) -> Self {
        self.options.bounding_box_cache_fraction = fraction;
        self
    }

    pub fn precision(mut self, precision: Precision) -> Self {
        self.options.precision = precision;
        self
    }

    pub fn internal_shingling(mut self, enabled: bool) -> Self {
        self.options.internal_shingling_enabled = enabled;
        self
    }

    pub fn initial_accept_fraction(mut self, fraction: f64) -> Self {
        self.options.initial_accept_fraction = fraction;
        self
    }

    pub fn build(mut self) -> Result<RandomCutForest> {
        self.options.output_after = self
            .output_after
            .unwrap_or_else(|| (self.options.sample_size / 4).max(1));
        self.options.validate()?;
        RandomCutForest::from_options(self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_the_documented_values() {
        let forest = ForestBuilder::new(4).build().unwrap();
        let options = forest.options();
        assert_eq!(options.number_of_trees, 50);
        assert_eq!(options.sample_size, 256);
        assert_eq!(options.output_after, 64);
        assert_eq!(options.shingle_size, 1);
        assert_eq!(options.time_decay, 0.0);
        assert_eq!(options.bounding_box_cache_fraction, 1.0);
    }

    #[test]
    fn invalid_combinations_are_rejected() {
        assert!(matches!(
            ForestBuilder::new(0).build(),
            Err(RcfError::InvalidConfig { .. })
        ));
        assert!(matches!(
            ForestBuilder::new(3).shingle_size(2).build(),
            Err(RcfError::InvalidConfig { .. })
        ));
        assert!(matches!(
            ForestBuilder::new(2).time_decay(-1.0).build(),
            Err(RcfError::InvalidConfig { .. })
        ));
        assert!(matches!(
            ForestBuilder::new(2).bounding_box_cache_fraction(1.5).build(),
            Err(RcfError::InvalidConfig { .. })
        ));
        assert!(matches!(
            ForestBuilder::new(2).precision(Precision::Double).build(),
            Err(RcfError::InvalidConfig { .. })
        ));
        assert!(matches!(
            ForestBuilder::new(2).shingle_cyclic(true).build(),
            Err(RcfError::InvalidConfig { .. })
        ));
        assert!(matches!(
            ForestBuilder::new(4)
                .shingle_size(2)
                .internal_shingling(false)
                .shingle_cyclic(true)
                .build(),
            Err(RcfError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn internal_shingling_requires_window() {
        assert!(ForestBuilder::new(4)
            .shingle_size(4)
            .internal_shingling(true)
            .build()
            .is_ok());
        assert!(matches!(
            ForestBuilder::new(4)
                .shingle_size(1)
                .internal_shingling(true)
                .build(),
            Err(RcfError::InvalidConfig { .. })
        ));
    }
}
