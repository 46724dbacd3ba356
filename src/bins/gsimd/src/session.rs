//! Session execution engine
//!
//! A session is one instantiation of the scenario. Its task walks the
//! procedures in order and drives one job at a time, so a session never runs
//! two of its own jobs concurrently; separate sessions run fully in parallel.
//!
//! Every request opens a fresh transaction: it draws a new sequence number,
//! registers it with the dispatcher, and only an answer carrying that exact
//! number completes it. Inbound-initiated transactions adopt the peer's
//! number instead. All transaction ids a session used stay routed to it
//! until retirement, so late duplicates from earlier exchanges land here and
//! are counted as receive retransmissions, never as answers.
//!
//! A send job paired with a receive job forms an outstanding request: the
//! encoded bytes are retransmitted on every T3 expiry until the matching
//! response arrives or N3 retries exhaust. Exhaustion fails the procedure
//! and the session. Cumulative inbound silence beyond the dead-call
//! threshold retires the session as a dead call no matter which job is
//! pending.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};

use gsim_core::{MsgCounters, RetransAction, RetransTimer, StatsRegistry, Transport};
use gsim_gtp::{Gtp2Message, Gtp2MessageType, SequencePool};

use crate::dispatch::Dispatcher;
use crate::scenario::{JobSpec, Scenario};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Completed,
    Failed,
    DeadCall,
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Every procedure ran to completion
    Completed,
    /// A request exhausted its retries
    Failed,
    /// Peer inactivity exceeded the dead-call threshold
    DeadCall,
    /// Shutdown arrived first; counters flushed as they stood, no outcome
    /// counter is touched
    Aborted,
}

/// Per-session timing/addressing parameters, fixed at creation
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Retransmission interval T3
    pub t3: Duration,
    /// Maximum retransmissions N3
    pub n3: u32,
    /// Inactivity threshold for dead-call detection
    pub dead_call_wait: Duration,
    /// Peer address all initiating messages go to
    pub remote: SocketAddr,
}

/// One job instantiated from the template, with its own counters
struct JobInstance {
    spec: JobSpec,
    counters: MsgCounters,
}

/// Result of driving one job (or fused send/receive pair)
enum Step {
    Done,
    Failed,
    DeadCall,
    Shutdown,
}

pub struct Session {
    id: u64,
    /// Local tunnel endpoint id, part of the session identity
    teid: u32,
    /// Transaction id of the current exchange; fresh per request, adopted
    /// from the peer for inbound-initiated transactions
    sqn: u32,
    /// An interest for the next inbound request is already queued with the
    /// dispatcher
    interest_pending: bool,
    state: SessionState,
    cursor: (usize, usize),
    cfg: SessionConfig,
    scenario: Arc<Scenario>,
    seq: Arc<SequencePool>,
    transport: Arc<dyn Transport>,
    dispatch: Arc<Dispatcher>,
    stats: Arc<StatsRegistry>,
    /// Sender side of our own inbound queue, handed to the dispatcher for
    /// every transaction we open
    inbox: mpsc::Sender<Gtp2Message>,
    last_activity: Instant,
    /// Message types accepted once already; duplicates of these are
    /// receive retransmissions, not unexpected traffic
    accepted: Vec<Gtp2MessageType>,
    /// Every transaction id this session opened or served, and whether the
    /// exchange was answered
    transactions: Vec<(u32, bool)>,
    /// Job counters accumulated per message name, folded into the registry
    /// exactly once at retirement
    per_message: Vec<(&'static str, MsgCounters)>,
    /// Catch-all for inbound classified while no receive job owns it
    stray: MsgCounters,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        teid: u32,
        awaiting_first: bool,
        cfg: SessionConfig,
        scenario: Arc<Scenario>,
        seq: Arc<SequencePool>,
        transport: Arc<dyn Transport>,
        dispatch: Arc<Dispatcher>,
        stats: Arc<StatsRegistry>,
        inbox: mpsc::Sender<Gtp2Message>,
    ) -> Self {
        Self {
            id,
            teid,
            sqn: 0,
            interest_pending: awaiting_first,
            state: SessionState::Active,
            cursor: (0, 0),
            cfg,
            scenario,
            seq,
            transport,
            dispatch,
            stats,
            inbox,
            last_activity: Instant::now(),
            accepted: Vec::new(),
            transactions: Vec::new(),
            per_message: Vec::new(),
            stray: MsgCounters::default(),
        }
    }

    /// Drive the session to a terminal state and fold its counters into the
    /// registry. Consumes the session; its transaction ids are freed.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<Gtp2Message>,
        mut shutdown: watch::Receiver<bool>,
    ) -> SessionOutcome {
        let outcome = self.drive(&mut rx, &mut shutdown).await;

        self.state = match outcome {
            SessionOutcome::Completed => {
                self.stats.incr_completed();
                SessionState::Completed
            }
            SessionOutcome::Failed => {
                self.stats.incr_failed();
                SessionState::Failed
            }
            SessionOutcome::DeadCall => {
                self.stats.incr_dead_call();
                SessionState::DeadCall
            }
            SessionOutcome::Aborted => SessionState::Active,
        };

        for (sqn, answered) in &self.transactions {
            self.dispatch.unregister(*sqn, *answered);
        }
        for (name, counters) in &self.per_message {
            self.stats.apply_message(name, counters);
        }
        self.stats.apply(&self.stray);

        log::debug!(
            "session {} teid={} retired as {:?} at cursor {:?}",
            self.id,
            self.teid,
            self.state,
            self.cursor
        );
        outcome
    }

    async fn drive(
        &mut self,
        rx: &mut mpsc::Receiver<Gtp2Message>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionOutcome {
        for idx in 0..self.scenario.procedures().len() {
            self.cursor.0 = idx;
            match self.run_procedure(idx, rx, shutdown).await {
                Step::Done => {}
                Step::Failed => return SessionOutcome::Failed,
                Step::DeadCall => return SessionOutcome::DeadCall,
                Step::Shutdown => return SessionOutcome::Aborted,
            }
        }
        SessionOutcome::Completed
    }

    /// Run every job of one procedure strictly in order. The procedure
    /// completes only when each job reached a terminal per-job state.
    async fn run_procedure(
        &mut self,
        idx: usize,
        rx: &mut mpsc::Receiver<Gtp2Message>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Step {
        let proc = self.scenario.procedures()[idx].clone();
        let mut jobs: Vec<JobInstance> = proc
            .jobs
            .into_iter()
            .map(|spec| JobInstance {
                spec,
                counters: MsgCounters::default(),
            })
            .collect();

        let mut j = 0;
        let mut result = Step::Done;
        while j < jobs.len() {
            self.cursor.1 = j;

            // Only a request arms the T3/N3 timer against the following
            // receive; a triggered reply is sent once and any receive after
            // it is passive.
            let paired_receive = match (&jobs[j].spec, jobs.get(j + 1).map(|n| &n.spec)) {
                (JobSpec::Send(req), Some(JobSpec::Receive(expected))) if req.is_request() => {
                    Some(*expected)
                }
                _ => None,
            };

            let spec = jobs[j].spec.clone();
            let (step, consumed) = match spec {
                JobSpec::Send(req) => {
                    if let Some(expected) = paired_receive {
                        let (head, tail) = jobs.split_at_mut(j + 1);
                        let step = self
                            .run_request(
                                req,
                                expected,
                                &mut head[j].counters,
                                &mut tail[0].counters,
                                rx,
                                shutdown,
                            )
                            .await;
                        (step, 2)
                    } else {
                        (self.run_reply_send(req, &mut jobs[j].counters).await, 1)
                    }
                }
                JobSpec::Receive(expected) => (
                    self.run_passive_receive(expected, &mut jobs[j].counters, rx, shutdown)
                        .await,
                    1,
                ),
                JobSpec::Wait(duration) => {
                    (self.run_wait(duration, rx, shutdown).await, 1)
                }
            };

            match step {
                Step::Done => j += consumed,
                other => {
                    result = other;
                    break;
                }
            }
        }

        for job in &jobs {
            let name = match &job.spec {
                JobSpec::Send(t) | JobSpec::Receive(t) => t.name(),
                JobSpec::Wait(_) => continue,
            };
            if let Some(entry) = self.per_message.iter_mut().find(|(n, _)| *n == name) {
                entry.1.merge(&job.counters);
            } else {
                self.per_message.push((name, job.counters));
            }
        }
        result
    }

    /// Fused outstanding request: open a fresh transaction, send, arm T3/N3,
    /// await the answer bearing the same transaction id. Retransmits
    /// identical bytes on each expiry.
    async fn run_request(
        &mut self,
        req: Gtp2MessageType,
        expected: Gtp2MessageType,
        send_c: &mut MsgCounters,
        recv_c: &mut MsgCounters,
        rx: &mut mpsc::Receiver<Gtp2Message>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Step {
        let sqn = self.seq.next_sqn();
        self.sqn = sqn;
        self.dispatch.register(sqn, self.inbox.clone());
        self.transactions.push((sqn, false));

        let wire = match self.build_outgoing(req) {
            Some(wire) => wire,
            None => return Step::Failed,
        };

        self.send_wire(&wire).await;
        send_c.sent += 1;
        let mut timer = RetransTimer::arm(self.cfg.t3, self.cfg.n3);
        log::debug!(
            "session {}: sent {} sqn={}, awaiting {} (T3={:?} N3={})",
            self.id,
            req,
            sqn,
            expected,
            self.cfg.t3,
            self.cfg.n3
        );

        loop {
            if *shutdown.borrow() {
                timer.cancel();
                return Step::Shutdown;
            }
            let retry_at = timer.deadline();
            let dead_at = self.dead_deadline();
            tokio::select! {
                _ = shutdown.changed() => {
                    timer.cancel();
                    return Step::Shutdown;
                }
                inbound = rx.recv() => match inbound {
                    None => {
                        timer.cancel();
                        return Step::Shutdown;
                    }
                    Some(msg) => {
                        self.touch();
                        if msg.msg_type == expected && msg.sqn == sqn {
                            recv_c.received += 1;
                            self.accepted.push(expected);
                            self.mark_answered(sqn);
                            timer.cancel();
                            log::debug!(
                                "session {}: {} answered by {}",
                                self.id, req, expected
                            );
                            return Step::Done;
                        } else if self.accepted.contains(&msg.msg_type) {
                            // Late duplicate from an earlier transaction of
                            // this session
                            recv_c.receive_retransmits += 1;
                        } else {
                            log::debug!(
                                "session {}: unexpected {} while awaiting {}",
                                self.id, msg.msg_type, expected
                            );
                            recv_c.unexpected += 1;
                        }
                    }
                },
                _ = sleep_until(retry_at) => match timer.on_expiry() {
                    RetransAction::Retransmit => {
                        self.send_wire(&wire).await;
                        send_c.sent += 1;
                        send_c.send_retransmits += 1;
                        log::debug!(
                            "session {}: retransmit #{} of {} sqn={}",
                            self.id, timer.retries(), req, sqn
                        );
                    }
                    RetransAction::Exhausted => {
                        send_c.timeouts += 1;
                        log::warn!(
                            "session {}: {} sqn={} unanswered after {} retransmits",
                            self.id, req, sqn, self.cfg.n3
                        );
                        return Step::Failed;
                    }
                },
                _ = sleep_until(dead_at) => {
                    timer.cancel();
                    return Step::DeadCall;
                }
            }
        }
    }

    /// Terminal send with no paired receive (a triggered reply): transmit
    /// once under the transaction id of the request it answers; delivery
    /// assurance is the peer's problem, a lost reply shows up as a
    /// retransmitted request.
    async fn run_reply_send(&mut self, msg_type: Gtp2MessageType, c: &mut MsgCounters) -> Step {
        let wire = match self.build_outgoing(msg_type) {
            Some(wire) => wire,
            None => return Step::Failed,
        };
        self.send_wire(&wire).await;
        c.sent += 1;
        log::debug!("session {}: sent {} sqn={}", self.id, msg_type, self.sqn);
        Step::Done
    }

    /// Passive receive: no timer of its own. Non-arrival surfaces either
    /// through the peer's retransmissions or through dead-call detection.
    /// A request type opens a new peer-initiated transaction, so an interest
    /// is queued with the dispatcher unless one is pending already.
    async fn run_passive_receive(
        &mut self,
        expected: Gtp2MessageType,
        c: &mut MsgCounters,
        rx: &mut mpsc::Receiver<Gtp2Message>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Step {
        if expected.is_request() && !self.interest_pending {
            self.dispatch.register_interest(expected, self.inbox.clone());
            self.interest_pending = true;
        }
        loop {
            if *shutdown.borrow() {
                return Step::Shutdown;
            }
            let dead_at = self.dead_deadline();
            tokio::select! {
                _ = shutdown.changed() => return Step::Shutdown,
                inbound = rx.recv() => match inbound {
                    None => return Step::Shutdown,
                    Some(msg) => {
                        self.touch();
                        let known = self.transactions.iter().any(|(s, _)| *s == msg.sqn);
                        if msg.msg_type == expected && !known {
                            // New transaction: adopt the peer's id so the
                            // reply answers it.
                            self.sqn = msg.sqn;
                            self.transactions.push((msg.sqn, true));
                            self.interest_pending = false;
                            c.received += 1;
                            self.accepted.push(expected);
                            log::debug!(
                                "session {}: received {} sqn={}",
                                self.id, expected, msg.sqn
                            );
                            return Step::Done;
                        } else if self.accepted.contains(&msg.msg_type) {
                            c.receive_retransmits += 1;
                        } else {
                            c.unexpected += 1;
                        }
                    }
                },
                _ = sleep_until(dead_at) => return Step::DeadCall,
            }
        }
    }

    /// Timed wait. Inbound traffic during the wait is classified into the
    /// session-level catch-all; it keeps the dead-call clock fresh but never
    /// completes or fails anything.
    async fn run_wait(
        &mut self,
        duration: Duration,
        rx: &mut mpsc::Receiver<Gtp2Message>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Step {
        let wait_until = Instant::now() + duration;
        loop {
            if *shutdown.borrow() {
                return Step::Shutdown;
            }
            let dead_at = self.dead_deadline();
            tokio::select! {
                _ = shutdown.changed() => return Step::Shutdown,
                inbound = rx.recv() => match inbound {
                    None => return Step::Shutdown,
                    Some(msg) => {
                        self.touch();
                        if self.accepted.contains(&msg.msg_type) {
                            self.stray.receive_retransmits += 1;
                        } else {
                            self.stray.unexpected += 1;
                        }
                    }
                },
                _ = sleep_until(wait_until) => return Step::Done,
                _ = sleep_until(dead_at) => return Step::DeadCall,
            }
        }
    }

    fn mark_answered(&mut self, sqn: u32) {
        if let Some(txn) = self.transactions.iter_mut().find(|(s, _)| *s == sqn) {
            txn.1 = true;
        }
    }

    fn build_outgoing(&self, msg_type: Gtp2MessageType) -> Option<Bytes> {
        let msg = Gtp2Message::with_template(msg_type, 0, self.sqn);
        match msg.encode() {
            Ok(wire) => Some(wire),
            Err(e) => {
                log::error!("session {}: cannot encode {}: {e}", self.id, msg_type);
                None
            }
        }
    }

    /// Transmit; a transport error is treated exactly like a lost datagram,
    /// the retransmission timer is the recovery path.
    async fn send_wire(&self, wire: &Bytes) {
        if let Err(e) = self.transport.send(wire, self.cfg.remote).await {
            log::warn!("session {}: send failed: {e}", self.id);
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    fn dead_deadline(&self) -> Instant {
        self.last_activity + self.cfg.dead_call_wait
    }
}
