//! The face-embedding capability the rest of the workspace depends on.
//!
//! Matching, registry loading and the session loop only ever see
//! [`EmbeddingOracle`]; the detector/recognizer pair behind [`OnnxOracle`] can
//! be swapped without touching them.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::DetectedFace;
use image::GrayImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Produces one embedding per face found in an image.
pub trait EmbeddingOracle {
    /// Detect faces and embed each one, most confident face first.
    ///
    /// An image with no faces yields an empty vector, not an error.
    fn detect_faces(&mut self, image: &GrayImage) -> Result<Vec<DetectedFace>, OracleError>;
}

/// SCRFD detection + ArcFace embedding, both on ONNX Runtime.
pub struct OnnxOracle {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxOracle {
    pub fn load(detector_path: &str, recognizer_path: &str) -> Result<Self, OracleError> {
        let detector = FaceDetector::load(detector_path)?;
        let recognizer = FaceRecognizer::load(recognizer_path)?;
        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl EmbeddingOracle for OnnxOracle {
    fn detect_faces(&mut self, image: &GrayImage) -> Result<Vec<DetectedFace>, OracleError> {
        let boxes = self.detector.detect(image)?;
        let mut faces = Vec::with_capacity(boxes.len());

        for bbox in boxes {
            if bbox.landmarks.is_none() {
                tracing::debug!(confidence = bbox.confidence, "face without landmarks skipped");
                continue;
            }
            let embedding = self.recognizer.extract(image, &bbox)?;
            faces.push(DetectedFace { bbox, embedding });
        }

        Ok(faces)
    }
}
