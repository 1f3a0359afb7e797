use thiserror::Error;

/// Errors raised while loading a frozen forest file.
///
/// These are the only errors that can occur at [`crate::Relocaliser::new`];
/// they never occur on the per-frame path.
#[derive(Debug, Error)]
pub enum ForestLoadError {
    #[error("failed to read forest file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed forest file: {reason}")]
    Format { reason: &'static str },

    #[error("unsupported forest file version {found} (expected 1)")]
    Version { found: u32 },
}

/// Raised when an image pair passed to [`crate::Relocaliser::predict`] does not
/// share dimensions, or does not match the dimensionality the forest was
/// trained on.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum ShapeMismatch {
    #[error("keypoints image is {kw}x{kh} but descriptors image is {dw}x{dh}")]
    KeypointsVsDescriptors {
        kw: usize,
        kh: usize,
        dw: usize,
        dh: usize,
    },

    #[error("descriptor has {found} features, forest expects {expected}")]
    FeatureCount { found: usize, expected: usize },
}

/// Terminal outcomes of [`crate::Relocaliser::relocalise`] other than success.
///
/// These are the only variants a caller is expected to branch on; every other
/// failure mode inside the preemptive loop is local (§7: a demoted candidate
/// or a dropped generator slot) and never reaches this type.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum RelocFail {
    #[error("candidate pool became empty before a single pose survived")]
    EmptyCandidatePool,

    #[error("frame budget exhausted before the preemptive loop converged")]
    Timeout,

    #[error("relocalisation was cancelled")]
    Cancelled,
}

/// Umbrella error used by the CLI binary, which must report all three error
/// families through one exit path. The library API never returns this type
/// directly: `Relocaliser::new` returns [`ForestLoadError`], `predict` returns
/// [`ShapeMismatch`], and `relocalise` returns [`RelocFail`].
#[derive(Debug, Error)]
pub enum RelocError {
    #[error(transparent)]
    Forest(#[from] ForestLoadError),
    #[error(transparent)]
    Shape(#[from] ShapeMismatch),
    #[error(transparent)]
    Fail(#[from] RelocFail),
}

/// Maps an error to the CLI exit code it should produce (§6: `0/2/3`).
pub fn exit_code_for(err: &RelocError) -> i32 {
    match err {
        RelocError::Forest(_) | RelocError::Shape(_) => 2,
        RelocError::Fail(_) => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_cli_contract() {
        assert_eq!(
            exit_code_for(&RelocError::Forest(ForestLoadError::Version { found: 9 })),
            2
        );
        assert_eq!(
            exit_code_for(&RelocError::Shape(ShapeMismatch::FeatureCount {
                found: 1,
                expected: 2
            })),
            2
        );
        assert_eq!(exit_code_for(&RelocError::Fail(RelocFail::Timeout)), 3);
    }
}
