//! Inbound message dispatch
//!
//! A single task owns the receive side of the transport and routes each
//! decoded message to the session that owns its transaction id (sequence
//! number). Traffic that cannot be attributed to a live session is
//! classified here: duplicates of transactions that already completed count
//! as receive retransmissions, everything else as unexpected. Malformed
//! datagrams are dropped without touching any session.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use gsim_core::{StatsRegistry, Transport, TransportError};
use gsim_gtp::{Gtp2Message, Gtp2MessageType};

/// Depth of each session's inbound queue
pub const SESSION_CHANNEL_DEPTH: usize = 32;

/// How many retired transaction ids we remember for duplicate detection
const COMPLETED_RING_CAP: usize = 4096;

/// Bounded memory of successfully answered transactions
#[derive(Debug, Default)]
struct CompletedRing {
    order: VecDeque<u32>,
    set: HashSet<u32>,
}

impl CompletedRing {
    fn insert(&mut self, sqn: u32) {
        if self.set.insert(sqn) {
            self.order.push_back(sqn);
            if self.order.len() > COMPLETED_RING_CAP {
                if let Some(evicted) = self.order.pop_front() {
                    self.set.remove(&evicted);
                }
            }
        }
    }

    fn contains(&self, sqn: u32) -> bool {
        self.set.contains(&sqn)
    }
}

/// Demultiplexer from the transport to session inbound queues
pub struct Dispatcher {
    stats: Arc<StatsRegistry>,
    /// Live transactions: sequence number -> owning session's queue
    routes: Mutex<HashMap<u32, mpsc::Sender<Gtp2Message>>>,
    /// Responder sessions waiting for their first request, by message type
    interests: Mutex<HashMap<Gtp2MessageType, VecDeque<mpsc::Sender<Gtp2Message>>>>,
    completed: Mutex<CompletedRing>,
}

impl Dispatcher {
    pub fn new(stats: Arc<StatsRegistry>) -> Arc<Self> {
        Arc::new(Self {
            stats,
            routes: Mutex::new(HashMap::new()),
            interests: Mutex::new(HashMap::new()),
            completed: Mutex::new(CompletedRing::default()),
        })
    }

    /// Bind a transaction id to a session's inbound queue
    pub fn register(&self, sqn: u32, tx: mpsc::Sender<Gtp2Message>) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.insert(sqn, tx);
        }
    }

    /// Release a transaction id when its session retires. `answered` marks
    /// transactions whose response was accepted, so that late duplicates can
    /// still be told apart from stray traffic.
    pub fn unregister(&self, sqn: u32, answered: bool) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.remove(&sqn);
        }
        if answered {
            if let Ok(mut completed) = self.completed.lock() {
                completed.insert(sqn);
            }
        }
    }

    /// Queue a responder session for the next inbound request of `msg_type`
    pub fn register_interest(&self, msg_type: Gtp2MessageType, tx: mpsc::Sender<Gtp2Message>) {
        if let Ok(mut interests) = self.interests.lock() {
            interests.entry(msg_type).or_default().push_back(tx);
        }
    }

    /// Receive loop; runs until shutdown or the transport closes
    pub async fn run(
        self: Arc<Self>,
        transport: Arc<dyn Transport>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                result = transport.recv() => match result {
                    Ok((raw, _src)) => self.dispatch(raw),
                    Err(TransportError::Closed) => break,
                    Err(e) => {
                        // Receive-side errors recover exactly like lost
                        // datagrams: the sender's timer retransmits.
                        log::warn!("transport receive error: {e}");
                    }
                },
            }
        }
        log::debug!("dispatcher stopped");
    }

    /// Decode and route one datagram; public so tests can inject traffic
    pub fn dispatch(&self, raw: Bytes) {
        let msg = match Gtp2Message::decode(raw) {
            Ok(msg) => msg,
            Err(e) => {
                log::debug!("dropping malformed datagram: {e}");
                self.stats.incr_malformed();
                return;
            }
        };

        let sqn = msg.sqn;
        let msg_type = msg.msg_type;

        // Live transaction?
        let mut msg = msg;
        {
            let Ok(mut routes) = self.routes.lock() else {
                return;
            };
            if let Some(tx) = routes.get(&sqn).cloned() {
                match tx.try_send(msg) {
                    Ok(()) => return,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        log::warn!("session queue full, dropping {msg_type} sqn={sqn}");
                        self.stats.incr_unexpected();
                        return;
                    }
                    Err(mpsc::error::TrySendError::Closed(returned)) => {
                        routes.remove(&sqn);
                        msg = returned;
                    }
                }
            }
        }

        // Duplicate of a transaction that already completed?
        if let Ok(completed) = self.completed.lock() {
            if completed.contains(sqn) {
                log::debug!("duplicate {msg_type} for completed transaction sqn={sqn}");
                self.stats.incr_receive_retransmit();
                return;
            }
        }

        // First request for a waiting responder session?
        if msg_type.is_request() {
            if let Some(tx) = self.take_interest(msg_type) {
                self.register(sqn, tx.clone());
                if tx.try_send(msg).is_ok() {
                    return;
                }
                self.unregister(sqn, false);
            }
        }

        log::debug!("unexpected {msg_type} sqn={sqn}, dropped");
        self.stats.incr_unexpected();
    }

    /// Pop the oldest live waiter for `msg_type`, skipping retired ones
    fn take_interest(&self, msg_type: Gtp2MessageType) -> Option<mpsc::Sender<Gtp2Message>> {
        let mut interests = self.interests.lock().ok()?;
        let queue = interests.get_mut(&msg_type)?;
        while let Some(tx) = queue.pop_front() {
            if !tx.is_closed() {
                return Some(tx);
            }
        }
        None
    }
}
