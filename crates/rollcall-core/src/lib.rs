//! rollcall-core: face matching and the embedding oracle.
//!
//! Faces are detected with SCRFD and embedded with ArcFace on ONNX Runtime;
//! probes are matched against the registry by Euclidean distance.

pub mod alignment;
pub mod detector;
pub mod matcher;
pub mod oracle;
pub mod recognizer;
pub mod types;

use std::path::PathBuf;

pub use matcher::{EuclideanMatcher, MatchOutcome, Matcher};
pub use oracle::{EmbeddingOracle, OnnxOracle, OracleError};
pub use types::{BoundingBox, DetectedFace, Embedding, Identity, IdentityError, RegistryEntry};

/// File name of the SCRFD detection model inside the model directory.
pub const DETECTOR_MODEL: &str = "det_10g.onnx";
/// File name of the ArcFace recognition model inside the model directory.
pub const RECOGNIZER_MODEL: &str = "w600k_r50.onnx";

/// Default model directory: `$XDG_DATA_HOME/rollcall/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
        .join("models")
}
