//! Periodic statistics reporting
//!
//! A single task renders a counter snapshot every display interval, either
//! as a full table on the screen or rewritten into a file for external
//! watchers. The one-line summary form is meant for piping into logs.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::Duration;

use gsim_core::{MsgCounters, StatsRegistry, StatsSnapshot};

use crate::config::DisplayTarget;
use crate::scheduler::RateControl;

#[derive(Clone)]
pub struct Display {
    stats: Arc<StatsRegistry>,
    rate: Arc<RateControl>,
    interval: Duration,
    target: DisplayTarget,
    file: Option<PathBuf>,
    summary: bool,
}

impl Display {
    pub fn new(
        stats: Arc<StatsRegistry>,
        rate: Arc<RateControl>,
        interval: Duration,
        target: DisplayTarget,
        file: Option<PathBuf>,
        summary: bool,
    ) -> Self {
        Self {
            stats,
            rate,
            interval,
            target,
            file,
            summary,
        }
    }

    /// Render on every interval tick until shutdown
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => self.emit(),
            }
        }
    }

    /// One last render after the run ends, always to the screen
    pub fn print_final(&self) {
        let snap = self.stats.snapshot();
        let per_msg = self.stats.message_snapshot();
        println!("{}", render_table(&snap, &per_msg, self.rate.rate()));
    }

    fn emit(&self) {
        let snap = self.stats.snapshot();
        let text = if self.summary {
            render_summary(&snap)
        } else {
            render_table(&snap, &self.stats.message_snapshot(), self.rate.rate())
        };
        match self.target {
            DisplayTarget::Screen => println!("{text}"),
            DisplayTarget::File => {
                if let Some(path) = &self.file {
                    // Rewritten whole each tick so watchers always see one
                    // consistent report.
                    if let Err(e) = std::fs::write(path, format!("{text}\n")) {
                        log::warn!("cannot write display file {}: {e}", path.display());
                    }
                }
            }
        }
    }
}

fn render_table(snap: &StatsSnapshot, per_msg: &[(String, MsgCounters)], rate: u32) -> String {
    let mut out = String::with_capacity(512);
    out.push_str(&format!(
        "---- elapsed {:>6.1}s  rate {} sessions/period ----\n",
        snap.elapsed.as_secs_f64(),
        rate
    ));
    out.push_str("sessions\n");
    out.push_str(&format!(
        "  created {:>10}  active {:>10}\n",
        snap.sessions_created,
        snap.sessions_created.saturating_sub(snap.sessions_retired())
    ));
    out.push_str(&format!(
        "  completed {:>8}  failed {:>10}  dead calls {:>6}\n",
        snap.sessions_completed, snap.sessions_failed, snap.dead_calls
    ));
    out.push_str("messages\n");
    out.push_str(&format!(
        "  sent {:>13}  received {:>8}\n",
        snap.msg_sent, snap.msg_received
    ));
    out.push_str(&format!(
        "  send rtx {:>9}  recv rtx {:>8}  timeouts {:>8}\n",
        snap.send_retransmits, snap.receive_retransmits, snap.timeouts
    ));
    out.push_str(&format!(
        "  unexpected {:>7}  malformed {:>7}",
        snap.unexpected, snap.malformed
    ));
    if !per_msg.is_empty() {
        out.push_str("\nper message (sent/recv/srtx/rrtx/to/unexp)\n");
        for (name, c) in per_msg {
            out.push_str(&format!(
                "  {:<36} {:>6} {:>6} {:>5} {:>5} {:>5} {:>5}\n",
                name,
                c.sent,
                c.received,
                c.send_retransmits,
                c.receive_retransmits,
                c.timeouts,
                c.unexpected
            ));
        }
        out.pop();
    }
    out
}

fn render_summary(snap: &StatsSnapshot) -> String {
    format!(
        "t={:.1}s sess={}/{}/{}/{} msg={}/{} rtx={}/{} to={} unexp={} malf={}",
        snap.elapsed.as_secs_f64(),
        snap.sessions_created,
        snap.sessions_completed,
        snap.sessions_failed,
        snap.dead_calls,
        snap.msg_sent,
        snap.msg_received,
        snap.send_retransmits,
        snap.receive_retransmits,
        snap.timeouts,
        snap.unexpected,
        snap.malformed,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> StatsSnapshot {
        StatsSnapshot {
            elapsed: Duration::from_secs(12),
            sessions_created: 10,
            sessions_completed: 7,
            sessions_failed: 1,
            dead_calls: 1,
            msg_sent: 25,
            msg_received: 20,
            send_retransmits: 5,
            receive_retransmits: 2,
            timeouts: 1,
            unexpected: 3,
            malformed: 1,
        }
    }

    #[test]
    fn test_table_carries_every_counter() {
        let text = render_table(&snapshot(), &[], 4);
        for needle in [
            "created", "completed", "failed", "dead calls", "sent", "received", "send rtx",
            "recv rtx", "timeouts", "unexpected", "malformed",
        ] {
            assert!(text.contains(needle), "missing {needle} in:\n{text}");
        }
        // 10 created, 9 retired, 1 still active
        let active_line = text.lines().find(|l| l.contains("active")).unwrap();
        assert!(active_line.trim_end().ends_with('1'));
        // No per-message section without rows
        assert!(!text.contains("per message"));
    }

    #[test]
    fn test_table_renders_per_message_rows() {
        let rows = vec![
            (
                "create-session-request".to_string(),
                MsgCounters {
                    sent: 12,
                    send_retransmits: 2,
                    timeouts: 1,
                    ..Default::default()
                },
            ),
            (
                "create-session-response".to_string(),
                MsgCounters {
                    received: 9,
                    receive_retransmits: 1,
                    ..Default::default()
                },
            ),
        ];
        let text = render_table(&snapshot(), &rows, 4);
        assert!(text.contains("per message"));
        let req_line = text
            .lines()
            .find(|l| l.contains("create-session-request"))
            .unwrap();
        assert!(req_line.contains("12"));
        let resp_line = text
            .lines()
            .find(|l| l.contains("create-session-response"))
            .unwrap();
        assert!(resp_line.contains('9'));
    }

    #[test]
    fn test_summary_is_single_line() {
        let text = render_summary(&snapshot());
        assert!(!text.contains('\n'));
        assert!(text.contains("sess=10/7/1/1"));
        assert!(text.contains("to=1"));
    }
}
