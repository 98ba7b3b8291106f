//! End-to-end behavior of a trained forest: scoring, attribution, density,
//! imputation, neighbours, convergence and shingling.

use rcforest::{datagen, ForestBuilder, RandomCutForest};

fn train(mut forest: RandomCutForest, data: &[Vec<f32>]) -> RandomCutForest {
    for p in data {
        forest.update(p).unwrap();
    }
    forest
}

#[test]
fn outliers_score_far_above_the_bulk() {
    let forest = ForestBuilder::new(2)
        .number_of_trees(10)
        .sample_size(64)
        .time_decay(0.0)
        .random_seed(42)
        .build()
        .unwrap();
    let forest = train(forest, &datagen::normal(10_000, 2, 42));

    let inlier = forest.score(&[0.0, 0.0]).unwrap();
    let outlier = forest.score(&[100.0, 100.0]).unwrap();

    assert!(inlier < 3.0, "inlier scored {}", inlier);
    assert!(outlier > 5.0, "outlier scored {}", outlier);
    assert!(outlier > 4.0 * inlier);
}

#[test]
fn attribution_points_at_the_displaced_coordinate() {
    let forest = ForestBuilder::new(2)
        .number_of_trees(20)
        .sample_size(128)
        .random_seed(17)
        .build()
        .unwrap();
    let data = datagen::mixture(
        4000,
        &[vec![0.0, 0.0]],
        &[vec![0.5, 0.5]],
        &[1.0],
        19,
    );
    let forest = train(forest, &data);

    let query = [5.0, 0.0];
    let attribution = forest.attribution(&query).unwrap();
    let score = forest.score(&query).unwrap();

    // componentwise decomposition reassembles the scalar score up to the
    // single-precision gap accumulation
    assert!((attribution.total() - score).abs() < 1e-3 * score.max(1.0));
    // the anomaly is entirely "x too high"
    assert!(attribution.high[0] > 10.0 * attribution.low[0]);
    assert!(attribution.high[0] > 5.0 * (attribution.high[1] + attribution.low[1]));
}

#[test]
fn density_falls_off_away_from_the_data() {
    let forest = ForestBuilder::new(2)
        .number_of_trees(15)
        .sample_size(64)
        .random_seed(5)
        .build()
        .unwrap();
    let forest = train(forest, &datagen::normal(3000, 2, 71));

    let center = forest.density(&[0.0, 0.0]).unwrap();
    let fringe = forest.density(&[4.0, 4.0]).unwrap();
    let far = forest.density(&[100.0, 100.0]).unwrap();
    assert!(center > fringe, "center {} fringe {}", center, fringe);
    assert!(fringe > far, "fringe {} far {}", fringe, far);

    let directional = forest.directional_density(&[100.0, 0.0]).unwrap();
    assert!(directional.high[0] >= directional.total() * 0.9);
}

#[test]
fn imputation_recovers_a_correlated_coordinate() {
    let forest = ForestBuilder::new(2)
        .number_of_trees(20)
        .sample_size(128)
        .random_seed(31)
        .build()
        .unwrap();
    // y tracks x tightly
    let data: Vec<Vec<f32>> = datagen::normal(4000, 1, 37)
        .into_iter()
        .map(|p| vec![p[0], p[0]])
        .collect();
    let forest = train(forest, &data);

    let completed = forest.impute_missing_values(&[1.5, 0.0], &[1]).unwrap();
    assert_eq!(completed[0], 1.5);
    assert!(
        (completed[1] - 1.5).abs() < 0.75,
        "imputed {}",
        completed[1]
    );
}

#[test]
fn near_neighbors_respect_the_distance_bound() {
    let forest = ForestBuilder::new(2)
        .number_of_trees(10)
        .sample_size(64)
        .random_seed(3)
        .build()
        .unwrap();
    let forest = train(forest, &datagen::normal(2000, 2, 47));

    let neighbors = forest.near_neighbors(&[0.0, 0.0], 3.0).unwrap();
    assert!(!neighbors.is_empty());
    for window in neighbors.windows(2) {
        assert!(window[0].1 <= window[1].1);
    }
    for (point, distance) in &neighbors {
        assert!(*distance <= 3.0);
        assert_eq!(point.len(), 2);
    }

    let none = forest.near_neighbors(&[100.0, 100.0], 5.0).unwrap();
    assert!(none.is_empty());
}

#[test]
fn converging_scores_match_the_full_fanout() {
    let forest = ForestBuilder::new(2)
        .number_of_trees(100)
        .sample_size(64)
        .random_seed(13)
        .build()
        .unwrap();
    let forest = train(forest, &datagen::normal(3000, 2, 83));

    for probe in datagen::normal(10, 2, 89) {
        let full = forest.score(&probe).unwrap();
        // zero precision forbids the early stop entirely
        let exact = forest.converging_score(&probe, 0.0, 1, 100).unwrap();
        assert!((full - exact).abs() < 1e-12);
        // the documented parameters stay within their advertised precision
        let early = forest.converging_score(&probe, 0.1, 5, 100).unwrap();
        assert!(
            (early - full).abs() <= 0.15 * full.max(1.0),
            "early {} full {}",
            early,
            full
        );
    }
}

#[test]
fn internal_shingling_matches_external_windows() {
    let base: Vec<Vec<f32>> = datagen::normal(500, 1, 97);

    let mut internal = ForestBuilder::new(4)
        .number_of_trees(10)
        .sample_size(32)
        .shingle_size(4)
        .internal_shingling(true)
        .output_after(1)
        .random_seed(7)
        .build()
        .unwrap();
    for p in &base {
        internal.update(p).unwrap();
    }

    let mut external = ForestBuilder::new(4)
        .number_of_trees(10)
        .sample_size(32)
        .shingle_size(4)
        .output_after(1)
        .random_seed(7)
        .build()
        .unwrap();
    let mut builder = rcforest::ShingleBuilder::new(1, 4, false).unwrap();
    for p in &base {
        builder.push(p).unwrap();
        if builder.is_full() {
            external.update(&builder.shingled_point()).unwrap();
        }
    }

    // with zero decay the two ingestion styles see identical inputs in the
    // same order, so the models coincide
    for probe in datagen::normal(10, 4, 101) {
        assert_eq!(
            internal.score(&probe).unwrap(),
            external.score(&probe).unwrap()
        );
    }
    // the internally shingling forest also answers base-point queries
    let score = internal.score(&[0.0]).unwrap();
    assert!(score.is_finite() && score > 0.0);
}

#[test]
fn wrong_input_lengths_are_rejected_without_mutation() {
    let mut forest = ForestBuilder::new(3)
        .number_of_trees(4)
        .sample_size(16)
        .random_seed(1)
        .build()
        .unwrap();
    assert!(forest.update(&[1.0, 2.0]).is_err());
    assert!(forest.score(&[1.0]).is_err());
    assert!(forest.impute_missing_values(&[1.0, 2.0, 3.0], &[7]).is_err());
    assert!(forest
        .impute_missing_values(&[1.0, 2.0, 3.0], &[])
        .is_err());
    assert_eq!(forest.total_updates(), 0);
}
