//! Probe-vs-registry matching.

use crate::types::{Embedding, Identity, RegistryEntry};

/// Result of matching a probe embedding against the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Matched {
        identity: Identity,
        distance: f32,
        /// Position of the winning entry in the registry.
        index: usize,
    },
    Unknown {
        /// Distance to the closest entry; `None` when the registry is empty.
        closest: Option<f32>,
    },
}

impl MatchOutcome {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            MatchOutcome::Matched { identity, .. } => Some(identity),
            MatchOutcome::Unknown { .. } => None,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, MatchOutcome::Matched { .. })
    }
}

/// Strategy for comparing a probe embedding against the registered faces.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, registry: &[RegistryEntry], threshold: f32)
        -> MatchOutcome;
}

/// Nearest-neighbour matcher over Euclidean distance.
///
/// The winner is the globally closest entry (first one on ties). Acceptance is
/// gated on that entry's own `distance <= threshold` test only: a farther
/// entry that happens to pass never wins over a closer one that fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(
        &self,
        probe: &Embedding,
        registry: &[RegistryEntry],
        threshold: f32,
    ) -> MatchOutcome {
        let mut best: Option<(usize, f32, bool)> = None;

        // Every entry is scored; no early exit.
        for (i, entry) in registry.iter().enumerate() {
            let distance = probe.euclidean_distance(&entry.embedding);
            let within = distance <= threshold;
            let closer = match best {
                None => true,
                Some((_, best_distance, _)) => distance < best_distance,
            };
            if closer {
                best = Some((i, distance, within));
            }
        }

        match best {
            Some((index, distance, true)) => MatchOutcome::Matched {
                identity: registry[index].identity.clone(),
                distance,
                index,
            },
            Some((_, distance, false)) => MatchOutcome::Unknown {
                closest: Some(distance),
            },
            None => MatchOutcome::Unknown { closest: None },
        }
    }
}
