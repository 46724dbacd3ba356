//! Runtime configuration
//!
//! Everything is resolved and validated here, before the first session is
//! admitted; a bad option is fatal at startup, never mid-run.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub const DFLT_NUM_SESSIONS: u64 = 1;
pub const DFLT_SESSION_RATE: u32 = 1;
pub const DFLT_RATE_PERIOD_MS: u64 = 1000;
pub const DFLT_T3_TIMER_MS: u64 = 3000;
pub const DFLT_N3_REQUESTS: u32 = 3;
pub const DFLT_DEAD_CALL_WAIT_MS: u64 = 20_000;
pub const DFLT_DISP_TIMER_MS: u64 = 2000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown node type: {0}")]
    BadNode(String),
    #[error("unknown interface type: {0}")]
    BadIfType(String),
    #[error("interface {iftype} does not belong to a {node} node")]
    NodeIfMismatch { node: NodeType, iftype: IfType },
    #[error("unknown display target: {0}")]
    BadDisplayTarget(String),
    #[error("{name} must be greater than zero")]
    ZeroValue { name: &'static str },
    #[error("display target is file but no display file was given")]
    MissingDisplayFile,
}

/// EPC node role the simulator impersonates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Mme,
    Sgw,
    Pgw,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mme => f.write_str("mme"),
            Self::Sgw => f.write_str("sgw"),
            Self::Pgw => f.write_str("pgw"),
        }
    }
}

impl FromStr for NodeType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mme" => Ok(Self::Mme),
            "sgw" => Ok(Self::Sgw),
            "pgw" => Ok(Self::Pgw),
            _ => Err(ConfigError::BadNode(s.to_string())),
        }
    }
}

/// Which side of which GTPv2-C reference point we simulate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfType {
    /// MME side of S11
    S11Mme,
    /// SGW side of S11
    S11Sgw,
    /// SGW side of S5/S8
    S5S8Sgw,
    /// PGW side of S5/S8
    S5S8Pgw,
}

impl IfType {
    /// Node role this interface side belongs to
    pub fn node(self) -> NodeType {
        match self {
            Self::S11Mme => NodeType::Mme,
            Self::S11Sgw | Self::S5S8Sgw => NodeType::Sgw,
            Self::S5S8Pgw => NodeType::Pgw,
        }
    }

    /// Interfaces where the simulated node initiates session setup
    pub fn is_initiator(self) -> bool {
        matches!(self, Self::S11Mme | Self::S5S8Sgw)
    }
}

impl fmt::Display for IfType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::S11Mme => f.write_str("s11mme"),
            Self::S11Sgw => f.write_str("s11sgw"),
            Self::S5S8Sgw => f.write_str("s5s8sgw"),
            Self::S5S8Pgw => f.write_str("s5s8pgw"),
        }
    }
}

impl FromStr for IfType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "s11mme" => Ok(Self::S11Mme),
            "s11sgw" => Ok(Self::S11Sgw),
            "s5s8sgw" => Ok(Self::S5S8Sgw),
            "s5s8pgw" => Ok(Self::S5S8Pgw),
            _ => Err(ConfigError::BadIfType(s.to_string())),
        }
    }
}

/// Where the periodic report goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayTarget {
    Screen,
    File,
}

impl FromStr for DisplayTarget {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "screen" => Ok(Self::Screen),
            "file" => Ok(Self::File),
            _ => Err(ConfigError::BadDisplayTarget(s.to_string())),
        }
    }
}

/// Fully resolved configuration, immutable once built
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub node: NodeType,
    pub iftype: IfType,
    pub num_sessions: u64,
    pub session_rate: u32,
    pub rate_period: Duration,
    pub local: SocketAddr,
    pub remote: SocketAddr,
    pub t3: Duration,
    pub n3: u32,
    pub dead_call_wait: Duration,
    pub disp_timer: Duration,
    pub disp_target: DisplayTarget,
    pub disp_file: Option<PathBuf>,
    pub disp_summary: bool,
    pub pid_file: Option<PathBuf>,
    pub scenario_file: Option<PathBuf>,
}

impl SimConfig {
    pub fn from_args(args: &crate::Args) -> Result<Self, ConfigError> {
        let node: NodeType = args.node.parse()?;
        let iftype: IfType = args.iftype.parse()?;
        if iftype.node() != node {
            return Err(ConfigError::NodeIfMismatch { node, iftype });
        }

        let disp_target: DisplayTarget = args.disp_target.parse()?;
        if disp_target == DisplayTarget::File && args.disp_target_file.is_none() {
            return Err(ConfigError::MissingDisplayFile);
        }

        nonzero(args.num_sessions, "num-sessions")?;
        nonzero(u64::from(args.session_rate), "session-rate")?;
        nonzero(args.rate_period, "rate-period")?;
        nonzero(args.t3_timer, "t3-timer")?;
        nonzero(args.disp_timer, "disp-timer")?;
        nonzero(args.dead_call_wait, "dead-call-wait")?;

        Ok(Self {
            node,
            iftype,
            num_sessions: args.num_sessions,
            session_rate: args.session_rate,
            rate_period: Duration::from_millis(args.rate_period),
            local: SocketAddr::new(args.local_ip, args.local_port),
            remote: SocketAddr::new(args.remote_ip, args.remote_port),
            t3: Duration::from_millis(args.t3_timer),
            n3: args.n3_requests,
            dead_call_wait: Duration::from_millis(args.dead_call_wait),
            disp_timer: Duration::from_millis(args.disp_timer),
            disp_target,
            disp_file: args.disp_target_file.clone(),
            disp_summary: args.disp_summary,
            pid_file: args.pid_file.clone(),
            scenario_file: args.scenario.clone(),
        })
    }
}

fn nonzero(value: u64, name: &'static str) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::ZeroValue { name })
    } else {
        Ok(())
    }
}

/// Record our pid so wrapper scripts can signal the process
pub fn write_pid_file(path: &std::path::Path) -> std::io::Result<()> {
    std::fs::write(path, format!("{}\n", std::process::id()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iftype_node_mapping() {
        assert_eq!(IfType::S11Mme.node(), NodeType::Mme);
        assert_eq!(IfType::S11Sgw.node(), NodeType::Sgw);
        assert_eq!(IfType::S5S8Sgw.node(), NodeType::Sgw);
        assert_eq!(IfType::S5S8Pgw.node(), NodeType::Pgw);
    }

    #[test]
    fn test_iftype_initiator_sides() {
        assert!(IfType::S11Mme.is_initiator());
        assert!(IfType::S5S8Sgw.is_initiator());
        assert!(!IfType::S11Sgw.is_initiator());
        assert!(!IfType::S5S8Pgw.is_initiator());
    }

    #[test]
    fn test_parse_round_trips() {
        for s in ["s11mme", "s11sgw", "s5s8sgw", "s5s8pgw"] {
            let ift: IfType = s.parse().unwrap();
            assert_eq!(ift.to_string(), s);
        }
        assert!("s1u".parse::<IfType>().is_err());
        assert!("hss".parse::<NodeType>().is_err());
        assert!("printer".parse::<DisplayTarget>().is_err());
    }
}
