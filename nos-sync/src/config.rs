//! Lock configuration
//!
//! The initial spin count passed to a critical section doubles as a flag
//! word: the low 24 bits are the spin hint, the top bit asks for the wait
//! object to be created up front instead of on first contention.

/// Bits of the initial spin count that hold the actual spin hint
pub const SPIN_COUNT_MASK: u32 = 0x00FF_FFFF;

/// Initial-spin-count flag: create the wait object during initialization
pub const PREALLOCATE_WAIT_OBJECT: u32 = 0x8000_0000;

/// Spin count used by `CriticalSection::new`
pub const DEFAULT_SPIN_COUNT: u32 = 0;

/// Decoded initialization parameters of a critical section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockConfig {
    /// Busy-wait iterations before blocking
    pub spin_count: u32,
    /// Create the wait object eagerly
    pub preallocate: bool,
}

impl LockConfig {
    /// Splits a raw initial spin count into hint and flags
    pub const fn from_raw(raw: u32) -> Self {
        Self {
            spin_count: raw & SPIN_COUNT_MASK,
            preallocate: raw & PREALLOCATE_WAIT_OBJECT != 0,
        }
    }

    /// Encodes the configuration back into a raw initial spin count
    pub const fn to_raw(self) -> u32 {
        let flags = if self.preallocate { PREALLOCATE_WAIT_OBJECT } else { 0 };
        (self.spin_count & SPIN_COUNT_MASK) | flags
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self::from_raw(DEFAULT_SPIN_COUNT)
    }
}
