//! Streaming random cut forests.
//!
//! A random cut forest maintains an ensemble of randomized space
//! partitioning trees over a time-decayed sample of a numeric stream and
//! answers anomaly-score, attribution, density, imputation and
//! near-neighbour queries from it. The model is unsupervised and updates
//! and queries interleave freely at the API level.
//!
//! ```
//! use rcforest::ForestBuilder;
//!
//! let mut forest = ForestBuilder::new(2)
//!     .number_of_trees(20)
//!     .sample_size(64)
//!     .random_seed(42)
//!     .build()
//!     .unwrap();
//!
//! // train on a blob around the origin
//! for p in rcforest::datagen::normal(1000, 2, 7) {
//!     forest.update(&p).unwrap();
//! }
//!
//! // a far-away point scores much higher than the blob's center
//! let inlier = forest.score(&[0.0, 0.0]).unwrap();
//! let outlier = forest.score(&[25.0, 25.0]).unwrap();
//! assert!(outlier > inlier);
//! ```
//!
//! ### References
//!
//! Sudipto Guha, Nina Mishra, Gourav Roy, and Okke Schrijvers. *"Robust
//! random cut forest based anomaly detection on streams."* International
//! Conference on Machine Learning, pp. 2712-2721. PMLR, 2016.

pub mod accumulator;
pub mod bounding_box;
pub mod config;
pub mod datagen;
pub mod density;
pub mod divector;
pub mod error;
pub mod forest;
pub mod point_store;
pub mod sampler;
pub mod shingle;
pub mod state;
pub mod visitor;

mod cut;
mod node_store;
mod sampled_tree;
mod tree;
mod util;

pub use accumulator::ConvergingAccumulator;
pub use config::{ForestBuilder, ForestOptions, Precision};
pub use density::DensityOutput;
pub use divector::DiVector;
pub use error::{RcfError, Result};
pub use forest::RandomCutForest;
pub use shingle::ShingleBuilder;
pub use state::ForestState;
pub use util::l1_distance;
