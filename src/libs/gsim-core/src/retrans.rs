//! Retransmission timer (T3/N3)
//!
//! Logical deadline state machine for one outstanding request. The owning
//! session task services the deadline with `tokio::time::sleep_until`; the
//! timer itself never spawns anything, which keeps the state transitions
//! exact and testable.
//!
//! `Armed` -> (expiry, retries < N3) -> retransmit, re-arm at +T3
//! `Armed` -> (expiry, retries == N3) -> `Exhausted`
//! `Armed` -> (matching response)     -> `Cancelled`

use std::time::Duration;

use tokio::time::Instant;

/// Timer lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetransState {
    /// Counting down to the next retransmission
    Armed,
    /// Matching response arrived; terminal
    Cancelled,
    /// N3 retries spent without an answer; terminal
    Exhausted,
}

/// What the owner must do after an expiry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetransAction {
    /// Send the identical bytes again and keep waiting
    Retransmit,
    /// Give up; the request timed out
    Exhausted,
}

/// Countdown for one outstanding request
#[derive(Debug)]
pub struct RetransTimer {
    state: RetransState,
    deadline: Instant,
    interval: Duration,
    retries: u32,
    max_retries: u32,
}

impl RetransTimer {
    /// Arm a fresh timer: first expiry at now + T3, up to N3 retransmissions
    pub fn arm(t3: Duration, n3: u32) -> Self {
        Self {
            state: RetransState::Armed,
            deadline: Instant::now() + t3,
            interval: t3,
            retries: 0,
            max_retries: n3,
        }
    }

    pub fn state(&self) -> RetransState {
        self.state
    }

    pub fn is_armed(&self) -> bool {
        self.state == RetransState::Armed
    }

    /// Retransmissions performed so far
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Deadline of the next expiry; meaningless unless armed
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Drive the state machine after the deadline passed
    pub fn on_expiry(&mut self) -> RetransAction {
        debug_assert_eq!(self.state, RetransState::Armed);
        if self.retries < self.max_retries {
            self.retries += 1;
            self.deadline += self.interval;
            RetransAction::Retransmit
        } else {
            self.state = RetransState::Exhausted;
            RetransAction::Exhausted
        }
    }

    /// Matching response arrived. Returns true on the transition to
    /// `Cancelled`; repeated or late cancels are no-ops.
    pub fn cancel(&mut self) -> bool {
        if self.state == RetransState::Armed {
            self.state = RetransState::Cancelled;
            true
        } else {
            false
        }
    }
}
