//! Guard patterns and the descriptor checksum fold.
//!
//! Every tracked memory block is bracketed by two guard regions:
//! - A 32-byte head guard immediately before the payload
//! - A 32-byte tail guard immediately after the payload
//!
//! The reference patterns are deterministic (head byte `i` is `i + 1`, tail
//! byte `i` is `32 - i`) so a corruption test can reproduce the exact bytes
//! it expects to find around a block.

/// Size of each guard region in bytes.
pub const GUARD_SIZE: usize = 32;

/// Total guard overhead per block (head + tail).
pub const TOTAL_GUARD_OVERHEAD: usize = GUARD_SIZE * 2;

/// A 32-byte reference pattern written adjacent to a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GuardPattern {
    /// Pattern bytes as written into the region.
    pub bytes: [u8; GUARD_SIZE],
}

impl GuardPattern {
    /// Reference pattern placed before the payload.
    #[must_use]
    pub const fn head() -> Self {
        let mut bytes = [0u8; GUARD_SIZE];
        let mut i = 0;
        while i < GUARD_SIZE {
            bytes[i] = (i + 1) as u8;
            i += 1;
        }
        Self { bytes }
    }

    /// Reference pattern placed after the payload.
    #[must_use]
    pub const fn tail() -> Self {
        let mut bytes = [0u8; GUARD_SIZE];
        let mut i = 0;
        while i < GUARD_SIZE {
            bytes[i] = (GUARD_SIZE - i) as u8;
            i += 1;
        }
        Self { bytes }
    }

    /// Check whether the observed bytes still match this pattern.
    #[must_use]
    pub fn verify(&self, observed: &[u8]) -> bool {
        observed == self.bytes.as_slice()
    }
}

/// Running checksum over a descriptor's canonical byte image.
///
/// Each byte is folded as `chk = ((chk ^ b) << 1) ^ (top bit clear ? 1 : 0)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChecksumFold {
    state: u32,
}

impl ChecksumFold {
    /// Start a fresh fold.
    #[must_use]
    pub const fn new() -> Self {
        Self { state: 0 }
    }

    /// Fold a single byte.
    #[inline]
    pub fn byte(&mut self, b: u8) {
        let carry = u32::from(self.state & (1 << 31) == 0);
        self.state = ((self.state ^ u32::from(b)) << 1) ^ carry;
    }

    /// Fold a byte slice.
    pub fn bytes(&mut self, data: &[u8]) {
        for &b in data {
            self.byte(b);
        }
    }

    /// Fold a little-endian `u64`.
    pub fn u64(&mut self, value: u64) {
        self.bytes(&value.to_le_bytes());
    }

    /// Fold a length-prefixed string so adjacent fields cannot alias.
    pub fn str(&mut self, value: &str) {
        self.u64(value.len() as u64);
        self.bytes(value.as_bytes());
    }

    /// Final checksum value.
    #[must_use]
    pub const fn finish(self) -> u32 {
        self.state
    }
}
