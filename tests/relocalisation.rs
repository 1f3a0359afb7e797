//! Crate-level integration tests driving the public API end to end: forest
//! file I/O from disk, configuration loading from disk, and the full
//! predict-then-relocalise pipeline through a forest built from scratch
//! rather than through the unit-level `merge_leaf_predictions` shortcut.

use std::io::Write;
use std::sync::atomic::AtomicBool;

use nalgebra::{Matrix3, Rotation3, Vector3};

use scoreforest_reloc::config::RelocaliserConfig;
use scoreforest_reloc::errors::{exit_code_for, ForestLoadError, RelocError, RelocFail};
use scoreforest_reloc::forest::mode::Mode;
use scoreforest_reloc::forest::node::{Tree, TreeNode};
use scoreforest_reloc::keypoint::{DescriptorsImage, Keypoint, KeypointsImage};
use scoreforest_reloc::{Forest, Relocaliser};

/// A single tree with four leaves selected by `descriptor[0] == k as f32`,
/// verified by hand: node 0 splits at 1.5 into `{0,1}` vs `{2,3}`, nodes 1
/// and 2 split each half at 0.5 and 2.5 respectively, and nodes 3-6 are the
/// four leaves in order.
fn four_leaf_tree(means: [Vector3<f64>; 4]) -> Tree {
    let nodes = vec![
        TreeNode {
            left_child: 1,
            right_child: 2,
            feature_index: 0,
            threshold: 1.5,
        },
        TreeNode {
            left_child: 3,
            right_child: 4,
            feature_index: 0,
            threshold: 0.5,
        },
        TreeNode {
            left_child: 5,
            right_child: 6,
            feature_index: 0,
            threshold: 2.5,
        },
        TreeNode {
            left_child: -1,
            right_child: 0,
            feature_index: 0,
            threshold: 0.0,
        },
        TreeNode {
            left_child: -1,
            right_child: 1,
            feature_index: 0,
            threshold: 0.0,
        },
        TreeNode {
            left_child: -1,
            right_child: 2,
            feature_index: 0,
            threshold: 0.0,
        },
        TreeNode {
            left_child: -1,
            right_child: 3,
            feature_index: 0,
            threshold: 0.0,
        },
    ];
    let leaves = means
        .into_iter()
        .map(|mean| {
            vec![Mode {
                mean,
                inv_cov: Matrix3::identity(),
                log_det_cov: 0.0,
                n: 1,
                colour_mean: None,
            }]
        })
        .collect();
    Tree { nodes, leaves }
}

fn scene(rotation: Rotation3<f64>, translation: Vector3<f64>) -> (KeypointsImage, DescriptorsImage, Forest) {
    let x_cams = [
        Vector3::new(0.2, 0.1, 1.0),
        Vector3::new(-0.3, 0.4, 1.2),
        Vector3::new(0.1, -0.5, 0.9),
        Vector3::new(-0.2, -0.1, 1.4),
    ];
    let mut keypoints = KeypointsImage::new(4, 1, Keypoint::invalid());
    let mut descriptors = DescriptorsImage::new(4, 1, Vec::new());
    let mut means = [Vector3::zeros(); 4];
    for (i, x) in x_cams.iter().enumerate() {
        keypoints.set(i, 0, Keypoint::new(*x, [0, 0, 0]));
        descriptors.set(i, 0, vec![i as f32]);
        means[i] = rotation * x + translation;
    }
    let forest = Forest {
        trees: vec![four_leaf_tree(means)],
        max_modes_per_leaf: 1,
        feature_count: 1,
    };
    (keypoints, descriptors, forest)
}

#[test]
fn predict_then_relocalise_recovers_known_pose_through_the_public_api() {
    let translation = Vector3::new(1.0, -2.0, 0.5);
    let rotation = Rotation3::from_euler_angles(0.0, 0.0, 0.4);
    let (keypoints, descriptors, forest) = scene(rotation, translation);

    let config = RelocaliserConfig {
        m_max: 64,
        thread_pool_size: 0,
        max_rounds: 8,
        ..RelocaliserConfig::default()
    };
    let reloc = Relocaliser::new(forest, config);

    let predictions = reloc.predict(&keypoints, &descriptors).unwrap();
    let cancel = AtomicBool::new(false);
    let pose = reloc.relocalise(&keypoints, &predictions, &cancel).unwrap();

    assert!((pose.rotation.matrix() - rotation.matrix()).norm() < 1e-3);
    assert!((pose.translation - translation).norm() < 1e-3);
}

#[test]
fn forest_round_trips_through_a_real_file() {
    let (_, _, forest) = scene(Rotation3::identity(), Vector3::zeros());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("forest.bin");
    {
        let mut file = std::fs::File::create(&path).unwrap();
        forest.save(&mut file).unwrap();
    }

    let config = RelocaliserConfig {
        m_max: 4,
        thread_pool_size: 0,
        ..RelocaliserConfig::default()
    };
    let reloc = Relocaliser::load(&path, config).unwrap();
    assert_eq!(reloc.config().m_max, 4);
}

#[test]
fn loading_a_missing_forest_file_is_a_construction_error() {
    let err = Relocaliser::load("/nonexistent/forest.bin", RelocaliserConfig::default()).unwrap_err();
    assert!(matches!(err, ForestLoadError::Io(_)));
}

#[test]
fn config_file_overrides_apply_and_leave_other_fields_default() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    {
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "B = 17\nrng_seed = 99").unwrap();
    }

    let text = std::fs::read_to_string(&path).unwrap();
    let config = RelocaliserConfig::from_toml_str(&text).unwrap();
    assert_eq!(config.b, 17);
    assert_eq!(config.rng_seed, 99);
    assert_eq!(config.k, RelocaliserConfig::default().k);
}

#[test]
fn cli_exit_code_contract_covers_all_three_error_families() {
    assert_eq!(
        exit_code_for(&RelocError::Forest(ForestLoadError::Format { reason: "bad" })),
        2
    );
    assert_eq!(
        exit_code_for(&RelocError::Fail(RelocFail::EmptyCandidatePool)),
        3
    );
    assert_eq!(exit_code_for(&RelocError::Fail(RelocFail::Cancelled)), 3);
}
