use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of distinct sequence numbers (`0..=25600`).
pub const MODULUS: u32 = 25601;

/// A sequence or acknowledgment number, always reduced modulo [`MODULUS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub struct SeqNum(u16);

impl SeqNum {
    pub const ZERO: SeqNum = SeqNum(0);

    pub fn new(raw: u32) -> Self {
        Self((raw % MODULUS) as u16)
    }

    /// Returns `None` when `raw` lies outside the sequence space.
    pub fn checked(raw: u16) -> Option<Self> {
        ((raw as u32) < MODULUS).then_some(Self(raw))
    }

    pub fn raw(self) -> u16 {
        self.0
    }

    pub fn wrapping_add(self, len: u32) -> Self {
        Self(((self.0 as u64 + len as u64) % MODULUS as u64) as u16)
    }

    /// Forward distance from `self` to `later`, walking up the ring.
    pub fn distance_to(self, later: SeqNum) -> u32 {
        (later.0 as u32 + MODULUS - self.0 as u32) % MODULUS
    }
}

impl From<u16> for SeqNum {
    fn from(raw: u16) -> Self {
        Self::new(raw as u32)
    }
}

impl From<SeqNum> for u16 {
    fn from(seq: SeqNum) -> Self {
        seq.0
    }
}

impl fmt::Display for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
