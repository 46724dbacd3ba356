//! gsimd: GTPv2-C session load and conformance simulator
//!
//! Impersonates one side of an EPC control-plane interface (S11 or S5/S8)
//! and drives a configurable number of concurrent GTPv2-C sessions against a
//! real or simulated peer, with exact retransmission and outcome accounting.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tokio::sync::watch;

use gsim_core::{StatsRegistry, Transport, UdpTransport};
use gsim_gtp::{Gtp2MessageType, GTPV2_C_UDP_PORT};

mod config;
mod dispatch;
mod display;
mod scenario;
mod scheduler;
mod session;


use config::{
    write_pid_file, IfType, SimConfig, DFLT_DEAD_CALL_WAIT_MS, DFLT_DISP_TIMER_MS,
    DFLT_N3_REQUESTS, DFLT_NUM_SESSIONS, DFLT_RATE_PERIOD_MS, DFLT_SESSION_RATE,
    DFLT_T3_TIMER_MS,
};
use dispatch::Dispatcher;
use display::Display;
use scenario::{request_response, JobSpec, Procedure, ProcedureKind, Scenario, ScenarioError};
use scheduler::{apply_rate_command, RateControl, SessionScheduler};
use session::SessionConfig;

#[derive(Parser, Debug)]
#[command(name = "gsimd", version, about = "GTPv2-C session simulator")]
pub struct Args {
    /// Node role to impersonate: mme, sgw or pgw
    #[arg(long, default_value = "mme")]
    pub node: String,

    /// Interface side: s11mme, s11sgw, s5s8sgw or s5s8pgw
    #[arg(long, default_value = "s11mme")]
    pub iftype: String,

    /// Total number of sessions to run
    #[arg(long, default_value_t = DFLT_NUM_SESSIONS)]
    pub num_sessions: u64,

    /// Sessions admitted per rate period
    #[arg(long, default_value_t = DFLT_SESSION_RATE)]
    pub session_rate: u32,

    /// Rate period in milliseconds
    #[arg(long, default_value_t = DFLT_RATE_PERIOD_MS)]
    pub rate_period: u64,

    /// Local GTP-C bind address
    #[arg(long, default_value = "127.0.0.1")]
    pub local_ip: IpAddr,

    /// Local GTP-C port
    #[arg(long, default_value_t = GTPV2_C_UDP_PORT)]
    pub local_port: u16,

    /// Peer GTP-C address
    #[arg(long, default_value = "127.0.0.1")]
    pub remote_ip: IpAddr,

    /// Peer GTP-C port
    #[arg(long, default_value_t = GTPV2_C_UDP_PORT)]
    pub remote_port: u16,

    /// Retransmission interval T3 in milliseconds
    #[arg(long, default_value_t = DFLT_T3_TIMER_MS)]
    pub t3_timer: u64,

    /// Maximum retransmissions N3 per outstanding request
    #[arg(long, default_value_t = DFLT_N3_REQUESTS)]
    pub n3_requests: u32,

    /// Inactivity threshold for dead-call detection, milliseconds
    #[arg(long, default_value_t = DFLT_DEAD_CALL_WAIT_MS)]
    pub dead_call_wait: u64,

    /// Statistics display interval in milliseconds
    #[arg(long, default_value_t = DFLT_DISP_TIMER_MS)]
    pub disp_timer: u64,

    /// Display target: screen or file
    #[arg(long, default_value = "screen")]
    pub disp_target: String,

    /// File the display is rewritten into when the target is file
    #[arg(long)]
    pub disp_target_file: Option<PathBuf>,

    /// One-line summary instead of the full table
    #[arg(long)]
    pub disp_summary: bool,

    /// Write the process id to this file at startup
    #[arg(long)]
    pub pid_file: Option<PathBuf>,

    /// Append log output to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Log level: error, warn, info, debug or trace
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Scenario YAML file; omit to use the built-in scenario for the
    /// selected interface side
    #[arg(long)]
    pub scenario: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    let cfg = SimConfig::from_args(&args).context("invalid configuration")?;
    if let Some(path) = &cfg.pid_file {
        write_pid_file(path)
            .with_context(|| format!("cannot write pid file {}", path.display()))?;
    }

    let scenario = match &cfg.scenario_file {
        Some(path) => Scenario::load(path)
            .with_context(|| format!("cannot load scenario {}", path.display()))?,
        None => builtin_scenario(cfg.iftype).context("built-in scenario")?,
    };
    log::info!(
        "{} on {} as {}: {} sessions at {}/{}ms, scenario {:?}",
        env!("CARGO_PKG_NAME"),
        cfg.iftype,
        cfg.node,
        cfg.num_sessions,
        cfg.session_rate,
        cfg.rate_period.as_millis(),
        scenario.name(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        log::info!("interrupt received, shutting down");
        let _ = shutdown_tx.send(true);
    })
    .context("cannot install signal handler")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("cannot start runtime")?;
    runtime.block_on(run(cfg, Arc::new(scenario), shutdown_rx))
}

async fn run(
    cfg: SimConfig,
    scenario: Arc<Scenario>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let stats = Arc::new(StatsRegistry::new());
    let transport: Arc<dyn Transport> = Arc::new(
        UdpTransport::bind(cfg.local)
            .await
            .with_context(|| format!("cannot bind {}", cfg.local))?,
    );
    let dispatch = Dispatcher::new(Arc::clone(&stats));
    let rate = Arc::new(RateControl::new(cfg.session_rate, cfg.rate_period));
    let display = Display::new(
        Arc::clone(&stats),
        Arc::clone(&rate),
        cfg.disp_timer,
        cfg.disp_target,
        cfg.disp_file.clone(),
        cfg.disp_summary,
    );

    let dispatcher_task = tokio::spawn(
        Arc::clone(&dispatch).run(Arc::clone(&transport), shutdown.clone()),
    );
    let display_task = tokio::spawn(display.clone().run(shutdown.clone()));
    let rate_task = tokio::spawn(rate_command_loop(Arc::clone(&rate), shutdown.clone()));

    let scheduler = SessionScheduler::new(
        cfg.num_sessions,
        SessionConfig {
            t3: cfg.t3,
            n3: cfg.n3,
            dead_call_wait: cfg.dead_call_wait,
            remote: cfg.remote,
        },
        scenario,
        transport,
        dispatch,
        Arc::clone(&stats),
        rate,
    );
    scheduler.run(shutdown).await;

    dispatcher_task.abort();
    display_task.abort();
    rate_task.abort();
    display.print_final();
    Ok(())
}

/// Adjust the admission rate from stdin while the run is in progress:
/// `+` and `-` step it by one, a bare number sets it outright.
async fn rate_command_loop(rate: Arc<RateControl>, mut shutdown: watch::Receiver<bool>) {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if apply_rate_command(&rate, &line) {
                        log::info!("session rate set to {}/period", rate.rate());
                    } else {
                        log::warn!("unrecognized rate command: {}", line.trim());
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    log::warn!("stdin read failed: {e}");
                    return;
                }
            },
        }
    }
}

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level: log::LevelFilter = args
        .log_level
        .parse()
        .map_err(|_| anyhow::anyhow!("unknown log level: {}", args.log_level))?;
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    if let Some(path) = &args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("cannot open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

/// Canonical session lifecycle for the selected interface side: setup,
/// a short hold, teardown. Initiator sides drive the exchanges; responder
/// sides mirror them.
fn builtin_scenario(iftype: IfType) -> Result<Scenario, ScenarioError> {
    let hold = Duration::from_secs(5);
    let procedures = if iftype.is_initiator() {
        vec![
            request_response(
                Gtp2MessageType::CreateSessionRequest,
                Gtp2MessageType::CreateSessionResponse,
            ),
            request_response(
                Gtp2MessageType::ModifyBearerRequest,
                Gtp2MessageType::ModifyBearerResponse,
            ),
            scenario::wait(hold),
            request_response(
                Gtp2MessageType::DeleteSessionRequest,
                Gtp2MessageType::DeleteSessionResponse,
            ),
        ]
    } else {
        vec![
            responder(
                Gtp2MessageType::CreateSessionRequest,
                Gtp2MessageType::CreateSessionResponse,
            ),
            responder(
                Gtp2MessageType::ModifyBearerRequest,
                Gtp2MessageType::ModifyBearerResponse,
            ),
            scenario::wait(hold),
            responder(
                Gtp2MessageType::DeleteSessionRequest,
                Gtp2MessageType::DeleteSessionResponse,
            ),
        ]
    };
    Scenario::from_procedures(format!("builtin-{iftype}"), procedures)
}

fn responder(recv: Gtp2MessageType, send: Gtp2MessageType) -> Procedure {
    Procedure {
        kind: ProcedureKind::RequestResponse,
        jobs: vec![JobSpec::Receive(recv), JobSpec::Send(send)],
    }
}
