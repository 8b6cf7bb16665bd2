//! Consistent-hash ring mapping keys to shard names.
//!
//! A fixed-size array of `R` slots. Adding a member claims its primary
//! slot (`hash(name) % R`) and then walks backwards filling empty slots
//! until it hits another member's primary slot, giving each member a
//! contiguous arc of the ring ending at its own primary slot. A new
//! member only ever steals the empty tail between itself and its
//! counter-clockwise neighbor, which is what makes placement stable as
//! members are added.

use crc::{Crc, CRC_64_GO_ISO};

use crate::error::{Error, Result};

/// CRC-64 with the ISO polynomial, matching Go's `hash/crc64.ISO` table.
const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_GO_ISO);

/// First byte that, if present on a member name, rejects the name: it
/// also marks a slot as "primary for its occupant" in the backing array.
pub const PRIMARY_MARKER: u8 = b'$';

pub const DEFAULT_RING_SIZE: usize = 1024;

#[derive(Clone, Debug)]
enum Slot {
    /// This slot is the primary slot for the contained member.
    Primary(String),
    /// This slot was backward-filled to point at the contained member.
    Fallback(String),
}

impl Slot {
    fn member(&self) -> &str {
        match self {
            Slot::Primary(name) | Slot::Fallback(name) => name,
        }
    }
}

/// A consistent-hash ring over a fixed number of slots.
pub struct Ring {
    slots: Vec<Option<Slot>>,
    members: std::collections::HashSet<String>,
}

fn hash(bytes: &[u8]) -> u64 {
    CRC64.checksum(bytes)
}

impl Ring {
    pub fn new(size: usize) -> Self {
        Ring { slots: vec![None; size], members: std::collections::HashSet::new() }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    fn slot_for(&self, key: &[u8]) -> usize {
        (hash(key) % self.slots.len() as u64) as usize
    }

    /// Registers `name` as a ring member, claiming its primary slot and
    /// backward-filling any empty slots behind it.
    pub fn add_member(&mut self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if name.is_empty() || name.as_bytes()[0] == PRIMARY_MARKER {
            return Err(Error::InvalidMember(format!(
                "can't have empty member or member starting with '{}'",
                PRIMARY_MARKER as char
            )));
        }
        if self.members.len() + 1 > self.slots.len() {
            return Err(Error::RingFull);
        }
        if self.members.contains(&name) {
            return Err(Error::DuplicateMember(name));
        }

        let size = self.slots.len();
        let primary = self.slot_for(name.as_bytes());
        self.slots[primary] = Some(Slot::Primary(name.clone()));

        let mut i = primary;
        loop {
            i = if i == 0 { size - 1 } else { i - 1 };
            match &self.slots[i] {
                Some(Slot::Primary(_)) => break,
                _ => self.slots[i] = Some(Slot::Fallback(name.clone())),
            }
        }

        self.members.insert(name);
        Ok(())
    }

    /// Returns the member owning `key`'s slot, or `None` if that slot was
    /// never claimed (only possible when the ring has no members at all).
    pub fn get_member_for_key(&self, key: &str) -> Option<&str> {
        let idx = self.slot_for(key.as_bytes());
        self.slots[idx].as_ref().map(Slot::member)
    }
}
