//! Sequence number and TEID allocation
//!
//! Process-wide atomic pools. Sequence numbers are the engine's transaction
//! ids, 24 bits with wraparound; TEIDs identify the local tunnel endpoint.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::GTP2_SQN_MAX;

/// Monotonic 24-bit sequence number allocator with wraparound
#[derive(Debug, Default)]
pub struct SequencePool {
    next: AtomicU32,
}

impl SequencePool {
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(0),
        }
    }

    /// Start allocation at a given value (useful in tests)
    pub fn starting_at(value: u32) -> Self {
        Self {
            next: AtomicU32::new(value & GTP2_SQN_MAX),
        }
    }

    /// Allocate the next sequence number
    pub fn next_sqn(&self) -> u32 {
        self.next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                Some((v + 1) & GTP2_SQN_MAX)
            })
            .unwrap_or(0)
    }
}

/// TEID allocator; zero is reserved for initial messages and never handed out
#[derive(Debug)]
pub struct TeidPool {
    next: AtomicU32,
}

impl TeidPool {
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    /// Allocate the next local TEID
    pub fn next_teid(&self) -> u32 {
        self.next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                Some(if v == u32::MAX { 1 } else { v + 1 })
            })
            .unwrap_or(1)
    }
}

impl Default for TeidPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_increments() {
        let pool = SequencePool::new();
        let a = pool.next_sqn();
        let b = pool.next_sqn();
        assert_eq!(b, a + 1);
    }

    #[test]
    fn test_sequence_wraps_at_24_bits() {
        let pool = SequencePool::starting_at(GTP2_SQN_MAX);
        assert_eq!(pool.next_sqn(), GTP2_SQN_MAX);
        assert_eq!(pool.next_sqn(), 0);
    }

    #[test]
    fn test_teid_never_zero() {
        let pool = TeidPool::new();
        for _ in 0..100 {
            assert_ne!(pool.next_teid(), 0);
        }
    }
}
