//! Fixed, little-endian wire types for exchange messages.
//!
//! All multi-byte integers in these structs are **little-endian** on the wire.
//! We store them pre-LE with `.to_le()` and decode with `.from_le()`; floats
//! travel as their IEEE-754 bit patterns. Records are decoded with
//! `pod_read_unaligned` because received byte vectors carry no alignment
//! guarantee.

use crate::data::particle::Particle;
use crate::topology::patch_id::PatchId;
use bytemuck::{Pod, Zeroable};
use std::mem::{align_of, size_of};

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn expect_exact_len(actual: usize, expected: usize) -> Result<(), String> {
    if actual == expected {
        Ok(())
    } else {
        Err(format!("expected {expected} bytes, got {actual}"))
    }
}

#[inline]
fn f64_to_le(x: f64) -> u64 {
    x.to_bits().to_le()
}

#[inline]
fn f64_from_le(v: u64) -> f64 {
    f64::from_bits(u64::from_le(v))
}

/// Append `values` to `out` as little-endian f64.
pub fn encode_f64s(values: &[f64], out: &mut Vec<u8>) {
    out.reserve(values.len() * size_of::<f64>());
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

/// Decode a buffer of little-endian f64 values.
pub fn decode_f64s(bytes: &[u8]) -> Result<Vec<f64>, String> {
    if bytes.len() % size_of::<f64>() != 0 {
        return Err(format!(
            "{} bytes is not a whole number of f64 values",
            bytes.len()
        ));
    }
    Ok(bytes
        .chunks_exact(size_of::<f64>())
        .map(|c| f64_from_le(bytemuck::pod_read_unaligned::<u64>(c)))
        .collect())
}

/// Decode `n` consecutive records of `T` from the front of `bytes`.
pub fn decode_records<T: Pod>(bytes: &[u8], n: usize) -> Result<Vec<T>, String> {
    let need = n * size_of::<T>();
    if bytes.len() < need {
        return Err(format!("expected at least {need} bytes, got {}", bytes.len()));
    }
    Ok(bytes[..need]
        .chunks_exact(size_of::<T>())
        .map(bytemuck::pod_read_unaligned::<T>)
        .collect())
}

// ===== Common records ======================================================

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u64, // count of following records or bytes
}

impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u64).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u64::from_le(self.n_le) as usize
    }
}

// ===== Particle migration ==================================================

/// One particle bound for `dest` on the receiving rank.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireParticle {
    pub position_le: [u64; 3],
    pub momentum_le: [u64; 3],
    pub weight_le: u64,
    pub charge_le: u64,
    pub id_le: u64,
    pub dest_le: u32,
    pub species_le: u16,
    pub reserved_le: u16, // keep zero
}

impl WireParticle {
    pub fn new(dest: PatchId, p: &Particle) -> Self {
        Self {
            position_le: p.position.map(f64_to_le),
            momentum_le: p.momentum.map(f64_to_le),
            weight_le: f64_to_le(p.weight),
            charge_le: f64_to_le(p.charge),
            id_le: p.id.to_le(),
            dest_le: dest.get().to_le(),
            species_le: p.species.to_le(),
            reserved_le: 0,
        }
    }

    pub fn dest(&self) -> PatchId {
        PatchId::new(u32::from_le(self.dest_le))
    }

    pub fn particle(&self) -> Particle {
        Particle {
            position: self.position_le.map(f64_from_le),
            momentum: self.momentum_le.map(f64_from_le),
            weight: f64_from_le(self.weight_le),
            charge: f64_from_le(self.charge_le),
            species: u16::from_le(self.species_le),
            id: u64::from_le(self.id_le),
        }
    }
}

/// A tracked particle id and the patch holding it, for the delivery check.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireTrackedId {
    pub id_le: u64,
    pub patch_le: u32,
    pub _pad: u32,
}

impl WireTrackedId {
    pub fn new(id: u64, patch: PatchId) -> Self {
        Self {
            id_le: id.to_le(),
            patch_le: patch.get().to_le(),
            _pad: 0,
        }
    }
    pub fn id(&self) -> u64 {
        u64::from_le(self.id_le)
    }
    pub fn patch(&self) -> PatchId {
        PatchId::new(u32::from_le(self.patch_le))
    }
}

// ===== Rebalance and window shift =========================================

/// Precedes one patch's field values and particles in a rebalance or window
/// shift message.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WirePatchHeader {
    pub patch_le: u32,
    pub n_fields_le: u32,
    pub n_values_le: u64,    // f64 values across all fields
    pub n_particles_le: u64, // WireParticle records after the values
}

impl WirePatchHeader {
    pub fn new(patch: PatchId, n_fields: usize, n_values: usize, n_particles: usize) -> Self {
        Self {
            patch_le: patch.get().to_le(),
            n_fields_le: (n_fields as u32).to_le(),
            n_values_le: (n_values as u64).to_le(),
            n_particles_le: (n_particles as u64).to_le(),
        }
    }
    pub fn patch(&self) -> PatchId {
        PatchId::new(u32::from_le(self.patch_le))
    }
    pub fn n_fields(&self) -> usize {
        u32::from_le(self.n_fields_le) as usize
    }
    pub fn n_values(&self) -> usize {
        u64::from_le(self.n_values_le) as usize
    }
    pub fn n_particles(&self) -> usize {
        u64::from_le(self.n_particles_le) as usize
    }
}

// Layout guards: a change here changes the wire format.
static_assertions::const_assert_eq!(size_of::<WireCount>(), 8);
static_assertions::const_assert_eq!(size_of::<WireParticle>(), 80);
static_assertions::const_assert_eq!(align_of::<WireParticle>(), 8);
static_assertions::const_assert_eq!(size_of::<WireTrackedId>(), 16);
static_assertions::const_assert_eq!(size_of::<WirePatchHeader>(), 24);
