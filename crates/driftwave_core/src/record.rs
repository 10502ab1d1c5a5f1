use crate::Device;
use foldhash::fast::FixedState;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fmt;
use std::hash::BuildHasher;

/// Tensor extents. Four dimensions cover every signal path without heap
/// allocation.
pub type Shape = SmallVec<[usize; 4]>;

/// Pin-name to record mapping for one side of a module's wiring.
pub type RecordMap = HashMap<String, Record>;

// Locale hashes must be stable across rebuilds and processes, so they use
// a fixed-seed hasher rather than the randomized std state.
fn stable_hash(parts: &[&str]) -> u64 {
    FixedState::default().hash_one(parts)
}

/// Stable identity of a tensor port: the block, sub-module and pin it
/// belongs to.
///
/// [`Locale::hash`] identifies the physical port; [`Locale::shash`]
/// identifies only the owning module. An input record carries the locale of
/// the port that produced it, which is what makes dependency edges
/// recoverable from wiring alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Locale {
    pub block_id: String,
    pub sub_id: String,
    pub pin_id: String,
}

impl Locale {
    /// Locale of a block itself (no sub-module, no pin).
    pub fn block(block_id: impl Into<String>) -> Self {
        Locale {
            block_id: block_id.into(),
            sub_id: String::new(),
            pin_id: String::new(),
        }
    }

    /// The same module locale pointing at one of its pins.
    pub fn pin(&self, pin_id: impl Into<String>) -> Self {
        Locale {
            block_id: self.block_id.clone(),
            sub_id: self.sub_id.clone(),
            pin_id: pin_id.into(),
        }
    }

    /// Port identity: covers block, sub and pin.
    pub fn hash(&self) -> u64 {
        stable_hash(&[&self.block_id, &self.sub_id, &self.pin_id])
    }

    /// Module identity: covers block and sub only, so every pin of one
    /// module maps to the same value.
    pub fn shash(&self) -> u64 {
        stable_hash(&[&self.block_id, &self.sub_id])
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.block_id)?;
        if !self.sub_id.is_empty() {
            write!(f, "-{}", self.sub_id)?;
        }
        if !self.pin_id.is_empty() {
            write!(f, ".{}", self.pin_id)?;
        }
        Ok(())
    }
}

/// Immutable descriptor of one tensor port, produced by a module's wiring
/// declaration.
///
/// The scheduler never dereferences `data_ptr` or interprets `data_type`;
/// a port is the triple `(hash, locale.hash(), device)` as far as graph
/// construction is concerned.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Opaque element-type tag.
    pub data_type: String,
    pub shape: Shape,
    pub device: Device,
    /// Buffer address, carried for logging and equality only.
    pub data_ptr: usize,
    /// Content identity of the logical tensor. Ports sharing this hash are
    /// aliases of the same buffer, possibly viewed from different locales.
    pub hash: u64,
    /// The port this record was created at.
    pub locale: Locale,
}

impl Record {
    /// Identity of the producing port; dependency edges follow this value.
    pub fn locale_hash(&self) -> u64 {
        self.locale.hash()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:?} @ {} ({:#018x})",
            self.data_type, self.shape, self.device, self.hash
        )
    }
}
