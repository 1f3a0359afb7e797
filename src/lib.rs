//! A SCoRe-Forest evaluator and preemptive-RANSAC camera relocaliser.
//!
//! Given a frozen scene-coordinate regression forest and a frame's keypoint
//! and descriptor images, [`Relocaliser`] predicts per-keypoint scene-space
//! Gaussian-mixture modes, then recovers the camera pose that best explains
//! them via preemptive RANSAC over randomly generated three-point pose
//! hypotheses, refined in closed form (weighted Kabsch) and by
//! Levenberg-Marquardt.
//!
//! ```ignore
//! use scoreforest_reloc::{Relocaliser, RelocaliserConfig};
//! use std::sync::atomic::AtomicBool;
//!
//! let reloc = Relocaliser::load("forest.bin", RelocaliserConfig::default())?;
//! let predictions = reloc.predict(&keypoints, &descriptors)?;
//! let cancel = AtomicBool::new(false);
//! let pose = reloc.relocalise(&keypoints, &predictions, &cancel)?;
//! ```
//!
//! ### References
//!
//! Jamie Shotton et al. *"Scene Coordinate Regression Forests for Camera
//! Relocalization in RGB-D Images."* CVPR 2013.
//!
//! David Nistér. *"Preemptive RANSAC for live structure and motion
//! estimation."* ICCV 2003.

pub mod candidate;
pub mod config;
pub mod dispatch;
pub mod energy;
pub mod errors;
pub mod forest;
pub mod frame_io;
pub mod inlier;
pub mod kabsch;
pub mod keypoint;
pub mod lm;
pub mod pose;
pub mod prediction;
pub mod relocaliser;
pub mod rng;

pub use config::RelocaliserConfig;
pub use errors::{ForestLoadError, RelocError, RelocFail, ShapeMismatch};
pub use forest::Forest;
pub use keypoint::{DescriptorsImage, Image, Keypoint, KeypointsImage};
pub use pose::Pose;
pub use prediction::ScorePrediction;
pub use relocaliser::Relocaliser;
