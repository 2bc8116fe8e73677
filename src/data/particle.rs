//! Particle records and per-direction outgoing batches.

use crate::topology::direction::Direction;
use std::collections::BTreeMap;

/// One macro-particle.
///
/// `id` is a tracking number; `0` means untracked and is exempt from the
/// duplicate-delivery check.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Particle {
    pub position: [f64; 3],
    pub momentum: [f64; 3],
    pub weight: f64,
    pub charge: f64,
    pub species: u16,
    pub id: u64,
}

impl Particle {
    /// A unit-weight, unit-charge particle of species 0 at rest.
    pub fn at(position: [f64; 3], id: u64) -> Self {
        Self {
            position,
            momentum: [0.0; 3],
            weight: 1.0,
            charge: 1.0,
            species: 0,
            id,
        }
    }
}

/// Particles that left a patch, keyed by the direction of their destination.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OutgoingParticles {
    by_direction: BTreeMap<Direction, Vec<Particle>>,
}

impl OutgoingParticles {
    pub fn push(&mut self, dir: Direction, particle: Particle) {
        self.by_direction.entry(dir).or_default().push(particle);
    }

    /// Particles bound for `dir` (empty slice if none).
    pub fn toward(&self, dir: Direction) -> &[Particle] {
        self.by_direction.get(&dir).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Total number of outgoing particles.
    pub fn len(&self) -> usize {
        self.by_direction.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_direction.values().all(Vec::is_empty)
    }

    pub fn directions(&self) -> impl Iterator<Item = Direction> + '_ {
        self.by_direction.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Direction, &[Particle])> {
        self.by_direction.iter().map(|(d, v)| (*d, v.as_slice()))
    }
}

impl IntoIterator for OutgoingParticles {
    type Item = (Direction, Vec<Particle>);
    type IntoIter = std::collections::btree_map::IntoIter<Direction, Vec<Particle>>;

    fn into_iter(self) -> Self::IntoIter {
        self.by_direction.into_iter()
    }
}
