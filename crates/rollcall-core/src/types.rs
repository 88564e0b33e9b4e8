use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("identity name is empty")]
    Empty,
    #[error("identity name {0:?} is reserved")]
    Reserved(String),
    #[error("identity name {name:?} contains forbidden character {ch:?}")]
    ForbiddenChar { name: String, ch: char },
}

/// Name of a registered person.
///
/// Doubles as a registry directory name and a ledger key, so it can never be
/// empty, `.`/`..`, or contain path separators, commas, or control characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    pub fn new(name: impl AsRef<str>) -> Result<Self, IdentityError> {
        let name = name.as_ref().trim();
        if name.is_empty() {
            return Err(IdentityError::Empty);
        }
        if name == "." || name == ".." {
            return Err(IdentityError::Reserved(name.to_string()));
        }
        if let Some(ch) = name
            .chars()
            .find(|c| matches!(c, '/' | '\\' | ',') || c.is_control())
        {
            return Err(IdentityError::ForbiddenChar {
                name: name.to_string(),
                ch,
            });
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Identity {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Identity> for String {
    fn from(id: Identity) -> Self {
        id.0
    }
}

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Euclidean distance between two embeddings. Lower = more similar.
    ///
    /// Embeddings of different lengths come from different models and are
    /// infinitely far apart.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One face reported by an [`EmbeddingOracle`](crate::EmbeddingOracle).
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// A reference embedding loaded from the registry for one identity.
///
/// Several entries may share an identity (one per reference image).
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub identity: Identity,
    pub embedding: Embedding,
}

impl RegistryEntry {
    pub fn new(identity: Identity, embedding: Embedding) -> Self {
        Self {
            identity,
            embedding,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_trims_whitespace() {
        let id = Identity::new("  alice ").unwrap();
        assert_eq!(id.as_str(), "alice");
    }

    #[test]
    fn test_identity_allows_spaces_and_unicode() {
        assert!(Identity::new("Ana María").is_ok());
    }

    #[test]
    fn test_identity_rejects_empty() {
        assert_eq!(Identity::new("   "), Err(IdentityError::Empty));
    }

    #[test]
    fn test_identity_rejects_traversal() {
        assert!(matches!(Identity::new(".."), Err(IdentityError::Reserved(_))));
        assert!(matches!(
            Identity::new("../etc"),
            Err(IdentityError::ForbiddenChar { ch: '/', .. })
        ));
        assert!(matches!(
            Identity::new("a\\b"),
            Err(IdentityError::ForbiddenChar { ch: '\\', .. })
        ));
    }

    #[test]
    fn test_identity_rejects_ledger_separator() {
        assert!(matches!(
            Identity::new("doe, john"),
            Err(IdentityError::ForbiddenChar { ch: ',', .. })
        ));
    }

    #[test]
    fn test_identity_deserialize_validates() {
        let ok: Identity = serde_json::from_str("\"bob\"").unwrap();
        assert_eq!(ok.as_str(), "bob");
        assert!(serde_json::from_str::<Identity>("\"a/b\"").is_err());
    }

    #[test]
    fn test_euclidean_distance() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
        assert_eq!(a.euclidean_distance(&a), 0.0);
    }

    #[test]
    fn test_euclidean_distance_length_mismatch_is_infinite() {
        let probe = Embedding::new(vec![0.6, 0.8]);
        assert_eq!(probe.euclidean_distance(&Embedding::new(vec![])), f32::INFINITY);
        assert_eq!(probe.euclidean_distance(&Embedding::new(vec![0.6])), f32::INFINITY);
    }
}
