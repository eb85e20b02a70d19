//! Image bytes in, one face descriptor out.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::Descriptor;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default detection model file name inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// Default recognition model file name inside the model directory.
pub const RECOGNIZER_MODEL_FILE: &str = "face_recognition_sface.onnx";

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("image could not be decoded: {0}")]
    Decode(#[from] image::ImageError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Turns an encoded image into a face descriptor.
///
/// `Ok(None)` means the image decoded fine but contains no face.
pub trait FaceEncoder {
    fn encode(&mut self, image: &[u8]) -> Result<Option<Descriptor>, EncodeError>;
}

/// Detection plus recognition on ONNX Runtime.
///
/// Only the highest-confidence face in the image is encoded.
pub struct OnnxFaceEncoder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceEncoder {
    pub fn load(detector_path: &str, recognizer_path: &str) -> Result<Self, EncodeError> {
        let detector = FaceDetector::load(detector_path)?;
        let recognizer = FaceRecognizer::load(recognizer_path)?;
        Ok(Self { detector, recognizer })
    }

    /// Load both models from their default file names under `model_dir`.
    pub fn load_dir(model_dir: &Path) -> Result<Self, EncodeError> {
        let (det, rec) = model_paths(model_dir);
        Self::load(&det.to_string_lossy(), &rec.to_string_lossy())
    }
}

impl FaceEncoder for OnnxFaceEncoder {
    fn encode(&mut self, image: &[u8]) -> Result<Option<Descriptor>, EncodeError> {
        let rgb = image::load_from_memory(image)?.to_rgb8();
        tracing::debug!(width = rgb.width(), height = rgb.height(), "decoded image");

        let faces = self.detector.detect(&rgb)?;
        let Some(face) = faces.first() else {
            return Ok(None);
        };
        tracing::debug!(
            confidence = face.confidence,
            candidates = faces.len(),
            "selected face"
        );

        Ok(Some(self.recognizer.extract(&rgb, face)?))
    }
}

/// Detection and recognition model paths under `model_dir`.
pub fn model_paths(model_dir: &Path) -> (PathBuf, PathBuf) {
    (
        model_dir.join(DETECTOR_MODEL_FILE),
        model_dir.join(RECOGNIZER_MODEL_FILE),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_paths_join_dir() {
        let (det, rec) = model_paths(Path::new("/opt/models"));
        assert_eq!(det, PathBuf::from("/opt/models/det_10g.onnx"));
        assert_eq!(rec, PathBuf::from("/opt/models/face_recognition_sface.onnx"));
    }

    #[test]
    fn test_load_missing_models_fails_fast() {
        let dir = std::env::temp_dir().join("attendo-no-models-here");
        match OnnxFaceEncoder::load_dir(&dir) {
            Err(EncodeError::Detector(DetectorError::ModelNotFound(path))) => {
                assert!(path.ends_with(DETECTOR_MODEL_FILE));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("models should not exist"),
        }
    }
}
