//! Process-wide statistics registry
//!
//! One shared instance is created at startup and handed to every component;
//! there is no ambient global. All counters are monotonically increasing and
//! updated with atomics, so concurrent sessions never lose an increment.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Per-job message counters, accumulated locally by a session and folded
/// into the registry exactly once when the session retires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MsgCounters {
    /// Transmissions, including retransmissions
    pub sent: u64,
    /// First arrivals of an expected message
    pub received: u64,
    /// Retransmissions of our own outstanding requests
    pub send_retransmits: u64,
    /// Duplicate arrivals of an already-accepted message
    pub receive_retransmits: u64,
    /// Requests whose retries exhausted without an answer
    pub timeouts: u64,
    /// Well-formed arrivals matching no expectation
    pub unexpected: u64,
}

impl MsgCounters {
    pub fn merge(&mut self, other: &MsgCounters) {
        self.sent += other.sent;
        self.received += other.received;
        self.send_retransmits += other.send_retransmits;
        self.receive_retransmits += other.receive_retransmits;
        self.timeouts += other.timeouts;
        self.unexpected += other.unexpected;
    }
}

/// Shared statistics registry (thread-safe)
#[derive(Debug)]
pub struct StatsRegistry {
    sessions_created: AtomicU64,
    sessions_completed: AtomicU64,
    sessions_failed: AtomicU64,
    dead_calls: AtomicU64,

    msg_sent: AtomicU64,
    msg_received: AtomicU64,
    send_retransmits: AtomicU64,
    receive_retransmits: AtomicU64,
    timeouts: AtomicU64,
    unexpected: AtomicU64,
    malformed: AtomicU64,

    /// Same counters broken down by message name, for per-message reporting
    per_message: Mutex<HashMap<String, MsgCounters>>,

    start_time: Instant,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self {
            sessions_created: AtomicU64::new(0),
            sessions_completed: AtomicU64::new(0),
            sessions_failed: AtomicU64::new(0),
            dead_calls: AtomicU64::new(0),
            msg_sent: AtomicU64::new(0),
            msg_received: AtomicU64::new(0),
            send_retransmits: AtomicU64::new(0),
            receive_retransmits: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            unexpected: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            per_message: Mutex::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    pub fn incr_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_completed(&self) {
        self.sessions_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_failed(&self) {
        self.sessions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_dead_call(&self) {
        self.dead_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Duplicate of a transaction that already completed (no owning job left)
    pub fn incr_receive_retransmit(&self) {
        self.receive_retransmits.fetch_add(1, Ordering::Relaxed);
    }

    /// Well-formed inbound matching no awaited transaction
    pub fn incr_unexpected(&self) {
        self.unexpected.fetch_add(1, Ordering::Relaxed);
    }

    /// Inbound that failed to decode; dropped without touching any session
    pub fn incr_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
        self.unexpected.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold a retired session's accumulated job counters
    pub fn apply(&self, c: &MsgCounters) {
        self.msg_sent.fetch_add(c.sent, Ordering::Relaxed);
        self.msg_received.fetch_add(c.received, Ordering::Relaxed);
        self.send_retransmits
            .fetch_add(c.send_retransmits, Ordering::Relaxed);
        self.receive_retransmits
            .fetch_add(c.receive_retransmits, Ordering::Relaxed);
        self.timeouts.fetch_add(c.timeouts, Ordering::Relaxed);
        self.unexpected.fetch_add(c.unexpected, Ordering::Relaxed);
    }

    /// Fold one job's counters under its message name; the process totals
    /// are folded at the same time so they never disagree with the rows.
    pub fn apply_message(&self, name: &str, c: &MsgCounters) {
        self.apply(c);
        if let Ok(mut per_message) = self.per_message.lock() {
            per_message.entry(name.to_string()).or_default().merge(c);
        }
    }

    /// Per-message counter rows sorted by name, for reporting
    pub fn message_snapshot(&self) -> Vec<(String, MsgCounters)> {
        let mut rows: Vec<(String, MsgCounters)> = match self.per_message.lock() {
            Ok(per_message) => per_message.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            Err(_) => Vec::new(),
        };
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }

    /// Consistent-enough view for reporting
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            elapsed: self.start_time.elapsed(),
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
            sessions_failed: self.sessions_failed.load(Ordering::Relaxed),
            dead_calls: self.dead_calls.load(Ordering::Relaxed),
            msg_sent: self.msg_sent.load(Ordering::Relaxed),
            msg_received: self.msg_received.load(Ordering::Relaxed),
            send_retransmits: self.send_retransmits.load(Ordering::Relaxed),
            receive_retransmits: self.receive_retransmits.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            unexpected: self.unexpected.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}

impl Default for StatsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of every counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub elapsed: Duration,
    pub sessions_created: u64,
    pub sessions_completed: u64,
    pub sessions_failed: u64,
    pub dead_calls: u64,
    pub msg_sent: u64,
    pub msg_received: u64,
    pub send_retransmits: u64,
    pub receive_retransmits: u64,
    pub timeouts: u64,
    pub unexpected: u64,
    pub malformed: u64,
}

impl StatsSnapshot {
    /// Sessions that reached a terminal state
    pub fn sessions_retired(&self) -> u64 {
        self.sessions_completed + self.sessions_failed + self.dead_calls
    }
}
