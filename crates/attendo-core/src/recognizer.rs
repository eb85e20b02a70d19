//! 128-dimensional face recognizer via ONNX Runtime.
//!
//! Extracts face descriptors from aligned 112×112 RGB crops using an
//! SFace-style model (raw 0–255 RGB input, 128-float output).

use crate::alignment;
use crate::types::{BoundingBox, Descriptor, DescriptorError, DESCRIPTOR_DIM};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const RECOGNIZER_INPUT_SIZE: usize = 112;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0} — place the 128-d recognition model in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks — detector must return landmarks for alignment")]
    NoLandmarks,
    #[error("recognizer produced an unusable descriptor: {0}")]
    Descriptor(#[from] DescriptorError),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Descriptor extractor.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the recognition ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded recognition model"
        );

        Ok(Self { session })
    }

    /// Extract an L2-normalized descriptor for a detected face.
    pub fn extract(
        &mut self,
        image: &RgbImage,
        face: &BoundingBox,
    ) -> Result<Descriptor, RecognizerError> {
        let landmarks = face.landmarks.as_ref().ok_or(RecognizerError::NoLandmarks)?;

        let aligned = alignment::align_face(image, landmarks);
        let input = Self::preprocess(&aligned);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("descriptor extraction: {e}")))?;

        if raw_data.len() != DESCRIPTOR_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {DESCRIPTOR_DIM}-dim descriptor, got {}",
                raw_data.len()
            )));
        }

        Ok(Descriptor::try_from(l2_normalize(raw_data))?)
    }

    /// Convert a 112×112 aligned RGB crop into a NCHW float tensor of raw pixel values.
    fn preprocess(aligned_face: &RgbImage) -> Array4<f32> {
        let size = RECOGNIZER_INPUT_SIZE;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for (x, y, pixel) in aligned_face.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            if x >= size || y >= size {
                continue;
            }
            for c in 0..3 {
                tensor[[0, c, y, x]] = pixel[c] as f32;
            }
        }

        tensor
    }
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_preprocess_output_shape() {
        let aligned = RgbImage::from_pixel(112, 112, Rgb([1, 2, 3]));
        let tensor = FaceRecognizer::preprocess(&aligned);
        assert_eq!(tensor.shape(), &[1, 3, RECOGNIZER_INPUT_SIZE, RECOGNIZER_INPUT_SIZE]);
    }

    #[test]
    fn test_preprocess_keeps_channel_order() {
        let aligned = RgbImage::from_pixel(112, 112, Rgb([10, 20, 30]));
        let tensor = FaceRecognizer::preprocess(&aligned);
        assert_eq!(tensor[[0, 0, 5, 7]], 10.0);
        assert_eq!(tensor[[0, 1, 5, 7]], 20.0);
        assert_eq!(tensor[[0, 2, 5, 7]], 30.0);
    }

    #[test]
    fn test_l2_normalize_unit_length() {
        let v = l2_normalize(&[3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector_unchanged() {
        assert_eq!(l2_normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }
}
