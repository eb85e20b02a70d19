use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of components in a face descriptor.
pub const DESCRIPTOR_DIM: usize = 128;

/// Euclidean distance below which two descriptors are the same person.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("descriptor is not a numeric array: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("descriptor has {actual} components, expected {expected}")]
    WrongLength { expected: usize, actual: usize },
    #[error("descriptor component {index} is not a finite f32")]
    NonFinite { index: usize },
}

/// Fixed-length face embedding.
///
/// Only constructible through [`Descriptor::decode`] or `TryFrom<Vec<f32>>`,
/// both of which enforce the dimensionality, so any `Descriptor` in hand is
/// eligible for matching.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Descriptor([f32; DESCRIPTOR_DIM]);

impl Descriptor {
    /// Decode the JSON-array text form stored in the `faces` table.
    pub fn decode(text: &str) -> Result<Self, DescriptorError> {
        let raw: Vec<f64> = serde_json::from_str(text)?;
        if raw.len() != DESCRIPTOR_DIM {
            return Err(DescriptorError::WrongLength {
                expected: DESCRIPTOR_DIM,
                actual: raw.len(),
            });
        }

        let mut values = [0.0f32; DESCRIPTOR_DIM];
        for (index, (slot, v)) in values.iter_mut().zip(raw).enumerate() {
            if !v.is_finite() || v.abs() > f64::from(f32::MAX) {
                return Err(DescriptorError::NonFinite { index });
            }
            *slot = v as f32;
        }
        Ok(Self(values))
    }

    /// Encode as a JSON array of numbers.
    pub fn encode(&self) -> Result<String, DescriptorError> {
        Ok(serde_json::to_string(&self.0[..])?)
    }

    pub fn values(&self) -> &[f32; DESCRIPTOR_DIM] {
        &self.0
    }

    /// Euclidean distance between two descriptors.
    pub fn distance(&self, other: &Descriptor) -> f32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

impl TryFrom<Vec<f32>> for Descriptor {
    type Error = DescriptorError;

    fn try_from(raw: Vec<f32>) -> Result<Self, Self::Error> {
        if let Some(index) = raw.iter().position(|v| !v.is_finite()) {
            return Err(DescriptorError::NonFinite { index });
        }
        let actual = raw.len();
        let values: [f32; DESCRIPTOR_DIM] =
            raw.try_into().map_err(|_| DescriptorError::WrongLength {
                expected: DESCRIPTOR_DIM,
                actual,
            })?;
        Ok(Self(values))
    }
}

/// A `faces` row as read from storage, before descriptor validation.
#[derive(Debug, Clone)]
pub struct FaceRow {
    pub face_id: i64,
    pub name: String,
    pub details: String,
    pub descriptor: Option<String>,
}

/// An enrolled person with a validated descriptor.
#[derive(Debug, Clone)]
pub struct Identity {
    pub id: i64,
    pub name: String,
    pub details: String,
    pub descriptor: Descriptor,
}

/// Decode every row's descriptor, dropping rows that fail validation.
pub fn decode_gallery(rows: impl IntoIterator<Item = FaceRow>) -> Vec<Identity> {
    rows.into_iter()
        .filter_map(|row| {
            let Some(text) = row.descriptor.as_deref() else {
                tracing::warn!(face_id = row.face_id, "face has no descriptor; skipping");
                return None;
            };
            match Descriptor::decode(text) {
                Ok(descriptor) => Some(Identity {
                    id: row.face_id,
                    name: row.name,
                    details: row.details,
                    descriptor,
                }),
                Err(err) => {
                    tracing::warn!(face_id = row.face_id, error = %err, "invalid descriptor; skipping");
                    None
                }
            }
        })
        .collect()
}

/// Result of matching a query descriptor against a gallery.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub matched: bool,
    /// Distance to the closest gallery entry (infinite for an empty gallery).
    pub distance: f32,
    /// ID of the matched identity (if any).
    pub face_id: Option<i64>,
    /// Name of the matched identity (if any).
    pub name: Option<String>,
}

/// Strategy for comparing a query descriptor against a gallery of enrolled faces.
pub trait Matcher {
    fn find(&self, query: &Descriptor, gallery: &[Identity], threshold: f32) -> MatchResult;
}

/// Linear nearest-neighbour scan by Euclidean distance.
///
/// A match requires the closest distance to be strictly below the threshold.
/// Ties go to the entry seen first.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn find(&self, query: &Descriptor, gallery: &[Identity], threshold: f32) -> MatchResult {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, identity) in gallery.iter().enumerate() {
            let dist = query.distance(&identity.descriptor);
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_dist < threshold => MatchResult {
                matched: true,
                distance: best_dist,
                face_id: Some(gallery[idx].id),
                name: Some(gallery[idx].name.clone()),
            },
            _ => MatchResult {
                matched: false,
                distance: best_dist,
                face_id: None,
                name: None,
            },
        }
    }
}
