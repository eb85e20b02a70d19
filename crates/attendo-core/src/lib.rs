//! attendo-core — Face descriptors, matching, and the face encoder.
//!
//! Descriptors are 128-float embeddings. Matching is a linear
//! nearest-neighbour scan under a Euclidean distance threshold. The ONNX
//! encoder runs SCRFD detection followed by a 128-d recognition model.

pub mod alignment;
pub mod detector;
pub mod encoder;
pub mod recognizer;
pub mod types;

use std::path::PathBuf;

pub use encoder::{EncodeError, FaceEncoder, OnnxFaceEncoder};
pub use types::{
    decode_gallery, Descriptor, DescriptorError, EuclideanMatcher, FaceRow, Identity,
    MatchResult, Matcher, DEFAULT_MATCH_THRESHOLD, DESCRIPTOR_DIM,
};

/// Model directory used when none is configured: `$XDG_DATA_HOME/attendo/models`.
pub fn default_model_dir() -> PathBuf {
    data_dir().join("models")
}

/// Per-user data directory for attendo (`$XDG_DATA_HOME/attendo`).
pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("attendo")
}
