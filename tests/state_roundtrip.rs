//! Serialization round-trip of a trained forest: restored models answer the
//! same queries and continue the stream in lockstep with the original.

use rcforest::{datagen, ForestBuilder, ForestState, RandomCutForest};

#[test]
fn serialized_forests_reproduce_scores_on_held_out_points() {
    let mut forest = ForestBuilder::new(4)
        .number_of_trees(50)
        .sample_size(256)
        .random_seed(271)
        .build()
        .unwrap();
    for p in datagen::normal(3000, 4, 137) {
        forest.update(&p).unwrap();
    }

    let encoded = serde_json::to_string(&forest.to_state()).unwrap();
    let decoded: ForestState = serde_json::from_str(&encoded).unwrap();
    let restored = RandomCutForest::from_state(&decoded).unwrap();

    // the state captures the model exactly, so the restored scores agree far
    // inside the 0.05 * log2(sample_size) envelope
    let tolerance = 0.05 * f64::log2(256.0);
    let mut disagreements = 0;
    for probe in datagen::normal(100, 4, 139) {
        let a = forest.score(&probe).unwrap();
        let b = restored.score(&probe).unwrap();
        assert!((a - b).abs() < 1e-9, "scores diverged: {} vs {}", a, b);
        if (a - b).abs() > tolerance {
            disagreements += 1;
        }
    }
    assert_eq!(disagreements, 0);
}

#[test]
fn restored_forests_accept_further_updates() {
    let mut original = ForestBuilder::new(2)
        .number_of_trees(10)
        .sample_size(64)
        .time_decay(0.0005)
        .store_sequence_indexes(true)
        .random_seed(997)
        .build()
        .unwrap();
    for p in datagen::normal(800, 2, 149) {
        original.update(&p).unwrap();
    }

    let encoded = serde_json::to_vec(&original.to_state()).unwrap();
    let decoded: ForestState = serde_json::from_slice(&encoded).unwrap();
    let mut restored = RandomCutForest::from_state(&decoded).unwrap();

    for p in datagen::normal(200, 2, 151) {
        original.update(&p).unwrap();
        restored.update(&p).unwrap();
    }
    for probe in datagen::normal(25, 2, 157) {
        assert_eq!(
            original.score(&probe).unwrap(),
            restored.score(&probe).unwrap()
        );
        assert_eq!(
            original.attribution(&probe).unwrap(),
            restored.attribution(&probe).unwrap()
        );
    }
}
