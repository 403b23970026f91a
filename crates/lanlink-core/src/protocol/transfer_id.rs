//! Allocator for file-transfer ids.
//!
//! # What does a transfer id encode?
//!
//! A transfer id is a `u32` built from two parts:
//!
//! ```text
//! [counter:24][owner_slot:8]
//! ```
//!
//! The counter increases with every transfer this process starts, and the low
//! byte is the slot id of the member that started it.  Two members can both be
//! on their fifth transfer at the same time, but their ids still differ
//! because the owner byte differs, so a receiver can key sessions by id alone.
//!
//! # Thread safety
//!
//! The counter uses `AtomicU32`, so an allocator can sit behind a shared
//! reference without a lock.

use std::sync::atomic::{AtomicU32, Ordering};

/// Monotonic, per-process source of transfer ids.
///
/// # Examples
///
/// ```rust
/// use lanlink_core::protocol::TransferIdAllocator;
///
/// let ids = TransferIdAllocator::new();
/// let a = ids.next(3);
/// let b = ids.next(3);
/// assert_ne!(a, b);
/// assert_eq!(TransferIdAllocator::owner_of(a), 3);
/// ```
pub struct TransferIdAllocator {
    counter: AtomicU32,
}

impl TransferIdAllocator {
    /// Creates an allocator whose first id uses counter value 1.
    pub fn new() -> Self {
        Self {
            counter: AtomicU32::new(1),
        }
    }

    /// Returns a fresh id owned by `owner_slot`.
    ///
    /// The 24-bit counter wraps to 1 (never 0) after 16,777,215 transfers.
    pub fn next(&self, owner_slot: u8) -> u32 {
        let raw = self.counter.fetch_add(1, Ordering::Relaxed);
        let counter = match raw & 0x00FF_FFFF {
            0 => 1,
            n => n,
        };
        (counter << 8) | u32::from(owner_slot)
    }

    /// Extracts the owning slot id from a transfer id.
    pub fn owner_of(id: u32) -> u8 {
        (id & 0xFF) as u8
    }
}

impl Default for TransferIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_packs_owner_into_low_byte() {
        let ids = TransferIdAllocator::new();
        let id = ids.next(5);
        assert_eq!(id & 0xFF, 5);
        assert_eq!(id >> 8, 1);
    }

    #[test]
    fn test_ids_are_unique_across_owners_with_equal_counters() {
        let a = TransferIdAllocator::new().next(1);
        let b = TransferIdAllocator::new().next(2);
        assert_ne!(a, b);
    }

    #[test]
    fn test_counter_wraps_without_producing_zero() {
        // Arrange: position the counter at the last 24-bit value
        let ids = TransferIdAllocator {
            counter: AtomicU32::new(0x00FF_FFFF),
        };

        // Act
        let last = ids.next(0);
        let wrapped = ids.next(0);

        // Assert
        assert_eq!(last >> 8, 0x00FF_FFFF);
        assert_eq!(wrapped >> 8, 1);
    }

    #[test]
    fn test_owner_of_round_trips() {
        let ids = TransferIdAllocator::new();
        for slot in 0..8u8 {
            assert_eq!(TransferIdAllocator::owner_of(ids.next(slot)), slot);
        }
    }
}
