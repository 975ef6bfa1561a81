//! State hashing for determinism checks.

use crate::state::GameState;

/// A simple deterministic hash of game state for comparing runs.
///
/// Uses FNV-1a (64-bit) over the canonical JSON encoding. All maps in the
/// state are ordered, so equal states always hash equal. Not cryptographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateHash(pub u64);

impl StateHash {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    pub fn new() -> Self {
        Self(Self::FNV_OFFSET)
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u64;
            self.0 = self.0.wrapping_mul(Self::FNV_PRIME);
        }
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write(&v.to_le_bytes());
    }

    pub fn finish(self) -> u64 {
        self.0
    }

    /// Hash a whole game state. The revision counter is excluded.
    pub fn of(state: &GameState) -> u64 {
        let mut h = Self::new();
        // Encoding a state of plain maps and numbers cannot fail.
        if let Ok(bytes) = serde_json::to_vec(state) {
            h.write(&bytes);
        }
        h.finish()
    }
}

impl Default for StateHash {
    fn default() -> Self {
        Self::new()
    }
}
