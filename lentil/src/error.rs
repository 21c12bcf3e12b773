use thiserror::Error;

/// Errors raised while building a network.
///
/// Contract violations (list lengths, feature dimensions) are reported
/// when a layer is built, never deferred to the numeric kernels.
#[derive(Error, Debug)]
pub enum LayerError {
    #[error("number of layers ({layers}) and inputs ({inputs}) not the same")]
    LengthMismatch { layers: usize, inputs: usize },

    #[error("branches carry different numbers of replicas: {expected} vs {found}")]
    ReplicaMismatch { expected: usize, found: usize },

    #[error("replica {replica}: expected feature dimension {expected}, got {found}")]
    FeatureDimMismatch {
        replica: usize,
        expected: usize,
        found: usize,
    },

    #[error("replica {replica}: expected a rank-{expected} tensor, got shape {shape:?}")]
    RankMismatch {
        replica: usize,
        expected: usize,
        shape: Vec<usize>,
    },

    #[error("shape mismatch: expected {expected:?}, got {found:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("empty {0}")]
    EmptySamples(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}

pub type Result<T> = std::result::Result<T, LayerError>;
