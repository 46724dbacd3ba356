//! Session admission and pacing
//!
//! The scheduler owns session creation: it allocates transaction identities,
//! wires each new session into the dispatcher, and spaces admissions so that
//! at most `session_rate` sessions start per rate period. Finished session
//! tasks are reaped as it goes; on shutdown it stops admitting and waits for
//! the survivors to flush their counters.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use gsim_core::{StatsRegistry, Transport};
use gsim_gtp::{SequencePool, TeidPool};

use crate::dispatch::{Dispatcher, SESSION_CHANNEL_DEPTH};
use crate::scenario::Scenario;
use crate::session::{Session, SessionConfig, SessionOutcome};

/// Shared, runtime-adjustable admission rate: `rate` sessions per period
#[derive(Debug)]
pub struct RateControl {
    rate: AtomicU32,
    period_ms: AtomicU64,
}

impl RateControl {
    pub fn new(rate: u32, period: Duration) -> Self {
        Self {
            rate: AtomicU32::new(rate.max(1)),
            period_ms: AtomicU64::new((period.as_millis() as u64).max(1)),
        }
    }

    pub fn rate(&self) -> u32 {
        self.rate.load(Ordering::Relaxed)
    }

    pub fn set_rate(&self, rate: u32) {
        self.rate.store(rate.max(1), Ordering::Relaxed);
    }

    pub fn incr(&self) {
        self.rate.fetch_add(1, Ordering::Relaxed);
    }

    /// Lower the rate, never below one session per period
    pub fn decr(&self) {
        let _ = self
            .rate
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |r| {
                (r > 1).then_some(r - 1)
            });
    }

    /// Gap between consecutive admissions at the current rate
    pub fn admission_gap(&self) -> Duration {
        let period = self.period_ms.load(Ordering::Relaxed);
        let rate = u64::from(self.rate()).max(1);
        Duration::from_millis((period / rate).max(1))
    }
}

pub struct SessionScheduler {
    max_sessions: u64,
    session_cfg: SessionConfig,
    scenario: Arc<Scenario>,
    transport: Arc<dyn Transport>,
    dispatch: Arc<Dispatcher>,
    stats: Arc<StatsRegistry>,
    rate: Arc<RateControl>,
    seq: Arc<SequencePool>,
    teid_pool: TeidPool,
    next_id: u64,
}

/// Apply one runtime rate command: `+` raises the rate by one, `-` lowers
/// it, a bare number sets it. Returns false for anything unrecognized.
pub fn apply_rate_command(rate: &RateControl, cmd: &str) -> bool {
    match cmd.trim() {
        "+" => {
            rate.incr();
            true
        }
        "-" => {
            rate.decr();
            true
        }
        other => match other.parse::<u32>() {
            Ok(n) => {
                rate.set_rate(n);
                true
            }
            Err(_) => false,
        },
    }
}

impl SessionScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        max_sessions: u64,
        session_cfg: SessionConfig,
        scenario: Arc<Scenario>,
        transport: Arc<dyn Transport>,
        dispatch: Arc<Dispatcher>,
        stats: Arc<StatsRegistry>,
        rate: Arc<RateControl>,
    ) -> Self {
        Self {
            max_sessions,
            session_cfg,
            scenario,
            transport,
            dispatch,
            stats,
            rate,
            seq: Arc::new(SequencePool::new()),
            teid_pool: TeidPool::new(),
            next_id: 1,
        }
    }

    /// Admit up to `max_sessions` paced sessions, then wait for all of them
    /// to retire. Returns once every admitted session has folded its
    /// counters into the registry.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut join_set: JoinSet<SessionOutcome> = JoinSet::new();
        let mut admitted: u64 = 0;

        while admitted < self.max_sessions {
            if *shutdown.borrow() {
                break;
            }
            self.admit(&mut join_set, &shutdown);
            admitted += 1;

            // Reap without blocking so the set does not grow unbounded on
            // long runs.
            while let Some(result) = join_set.try_join_next() {
                Self::log_reaped(result);
            }

            if admitted >= self.max_sessions {
                break;
            }
            let gap = self.rate.admission_gap();
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(gap) => {}
            }
        }

        log::info!("admission finished: {admitted} sessions started, draining");
        while let Some(result) = join_set.join_next().await {
            Self::log_reaped(result);
        }
    }

    fn admit(&mut self, join_set: &mut JoinSet<SessionOutcome>, shutdown: &watch::Receiver<bool>) {
        let id = self.next_id;
        self.next_id += 1;

        let (tx, rx) = mpsc::channel(SESSION_CHANNEL_DEPTH);
        // Responder scenarios wait for the first matching request and adopt
        // its transaction id; initiators draw fresh ids as they send.
        let awaiting_first = match self.scenario.initial_receive() {
            Some(first) => {
                self.dispatch.register_interest(first, tx.clone());
                true
            }
            None => false,
        };
        let teid = self.teid_pool.next_teid();

        let session = Session::new(
            id,
            teid,
            awaiting_first,
            self.session_cfg,
            Arc::clone(&self.scenario),
            Arc::clone(&self.seq),
            Arc::clone(&self.transport),
            Arc::clone(&self.dispatch),
            Arc::clone(&self.stats),
            tx,
        );
        self.stats.incr_created();
        log::debug!("admitted session {id} teid={teid}");
        join_set.spawn(session.run(rx, shutdown.clone()));
    }

    fn log_reaped(result: Result<SessionOutcome, tokio::task::JoinError>) {
        if let Err(e) = result {
            log::error!("session task failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    use gsim_core::ChannelTransport;
    use gsim_gtp::GTPV2_C_UDP_PORT;

    use crate::scenario::wait;

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 2], GTPV2_C_UDP_PORT))
    }

    fn wait_scenario(ms: u64) -> Arc<Scenario> {
        Arc::new(
            Scenario::from_procedures("idle", vec![wait(Duration::from_millis(ms))]).unwrap(),
        )
    }

    fn session_cfg() -> SessionConfig {
        SessionConfig {
            t3: Duration::from_secs(3),
            n3: 3,
            dead_call_wait: Duration::from_secs(600),
            remote: peer(),
        }
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_rate_control_gap_and_clamping() {
        let rate = RateControl::new(5, Duration::from_secs(1));
        assert_eq!(rate.admission_gap(), Duration::from_millis(200));

        rate.set_rate(0);
        assert_eq!(rate.rate(), 1);
        rate.decr();
        assert_eq!(rate.rate(), 1);
        rate.incr();
        assert_eq!(rate.rate(), 2);
        assert_eq!(rate.admission_gap(), Duration::from_millis(500));
    }

    #[test]
    fn test_rate_commands() {
        let rate = RateControl::new(4, Duration::from_secs(1));
        assert!(apply_rate_command(&rate, "+"));
        assert_eq!(rate.rate(), 5);
        assert!(apply_rate_command(&rate, "-"));
        assert_eq!(rate.rate(), 4);
        assert!(apply_rate_command(&rate, " 25 "));
        assert_eq!(rate.rate(), 25);
        assert!(!apply_rate_command(&rate, "faster"));
        assert_eq!(rate.rate(), 25);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admission_is_paced() {
        let stats = Arc::new(StatsRegistry::new());
        let dispatch = Dispatcher::new(Arc::clone(&stats));
        let (transport, _far) = ChannelTransport::pair();
        let rate = Arc::new(RateControl::new(2, Duration::from_secs(1)));

        let scheduler = SessionScheduler::new(
            3,
            session_cfg(),
            wait_scenario(60_000),
            transport,
            dispatch,
            Arc::clone(&stats),
            rate,
        );
        let (_tx, shutdown) = watch::channel(false);
        tokio::spawn(scheduler.run(shutdown));

        settle().await;
        assert_eq!(stats.snapshot().sessions_created, 1);

        tokio::time::advance(Duration::from_millis(499)).await;
        settle().await;
        assert_eq!(stats.snapshot().sessions_created, 1);

        tokio::time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(stats.snapshot().sessions_created, 2);

        tokio::time::advance(Duration::from_millis(500)).await;
        settle().await;
        assert_eq!(stats.snapshot().sessions_created, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_exactly_max_sessions_to_retirement() {
        let stats = Arc::new(StatsRegistry::new());
        let dispatch = Dispatcher::new(Arc::clone(&stats));
        let (transport, _far) = ChannelTransport::pair();
        let rate = Arc::new(RateControl::new(100, Duration::from_secs(1)));

        let scheduler = SessionScheduler::new(
            4,
            session_cfg(),
            wait_scenario(5),
            transport,
            dispatch,
            Arc::clone(&stats),
            rate,
        );
        let (_tx, shutdown) = watch::channel(false);
        scheduler.run(shutdown).await;

        let snap = stats.snapshot();
        assert_eq!(snap.sessions_created, 4);
        assert_eq!(snap.sessions_completed, 4);
        assert_eq!(snap.sessions_retired(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_admission() {
        let stats = Arc::new(StatsRegistry::new());
        let dispatch = Dispatcher::new(Arc::clone(&stats));
        let (transport, _far) = ChannelTransport::pair();
        let rate = Arc::new(RateControl::new(1, Duration::from_secs(1)));

        let scheduler = SessionScheduler::new(
            1000,
            session_cfg(),
            wait_scenario(60_000),
            transport,
            dispatch,
            Arc::clone(&stats),
            rate,
        );
        let (tx, shutdown) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(shutdown));

        settle().await;
        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        let before = stats.snapshot().sessions_created;
        assert!(before >= 1);

        tx.send(true).unwrap();
        handle.await.unwrap();

        let snap = stats.snapshot();
        assert_eq!(snap.sessions_created, before);
        // Aborted sessions retire without an outcome counter.
        assert_eq!(snap.sessions_retired(), 0);
    }
}
