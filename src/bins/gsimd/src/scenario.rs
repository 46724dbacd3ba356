//! Scenario templates
//!
//! A scenario is the ordered, immutable procedure list every session runs.
//! It is loaded once from a YAML file, validated, and then shared read-only
//! across all sessions. Procedures have a fixed arity per kind; the job
//! order inside a procedure never changes.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use gsim_gtp::Gtp2MessageType;

/// Scenario loading/validation errors; all fatal at startup
#[derive(Error, Debug)]
pub enum ScenarioError {
    #[error("cannot read scenario file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("scenario parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unknown message name: {0}")]
    UnknownMessage(String),
    #[error("scenario has no procedures")]
    Empty,
    #[error("{kind} procedure must have {expected} jobs, found {actual}")]
    Arity {
        kind: ProcedureKind,
        expected: usize,
        actual: usize,
    },
    #[error("invalid job order in {kind} procedure")]
    BadShape { kind: ProcedureKind },
}

/// Procedure kind; fixes the number and shape of its jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcedureKind {
    /// A single timed wait
    Wait,
    /// One request/response exchange
    RequestResponse,
    /// Request, triggered message, reply to the trigger
    RequestTriggerReply,
}

impl ProcedureKind {
    pub fn arity(self) -> usize {
        match self {
            Self::Wait => 1,
            Self::RequestResponse => 2,
            Self::RequestTriggerReply => 3,
        }
    }
}

impl fmt::Display for ProcedureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wait => f.write_str("wait"),
            Self::RequestResponse => f.write_str("request-response"),
            Self::RequestTriggerReply => f.write_str("request-trigger-reply"),
        }
    }
}

/// One unit of work inside a procedure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSpec {
    /// Transmit a message of this type
    Send(Gtp2MessageType),
    /// Await a message of this type
    Receive(Gtp2MessageType),
    /// Elapse a fixed duration with no message exchange
    Wait(Duration),
}

/// Validated procedure: kind plus its jobs in fixed order
#[derive(Debug, Clone)]
pub struct Procedure {
    pub kind: ProcedureKind,
    pub jobs: Vec<JobSpec>,
}

/// The immutable procedure template every session executes
#[derive(Debug, Clone)]
pub struct Scenario {
    name: String,
    procedures: Vec<Procedure>,
}

// On-disk YAML shape
#[derive(Debug, Serialize, Deserialize)]
struct ScenarioFile {
    name: Option<String>,
    procedures: Vec<ProcedureFile>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProcedureFile {
    kind: ProcedureKind,
    jobs: Vec<JobFile>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
enum JobFile {
    Send { message: String },
    Receive { message: String },
    Wait {
        #[serde(rename = "duration-ms")]
        duration_ms: u64,
    },
}

impl Scenario {
    /// Load and validate a scenario from a YAML file
    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let text = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Parse and validate a scenario from YAML text
    pub fn parse(yaml: &str) -> Result<Self, ScenarioError> {
        let file: ScenarioFile = serde_yaml::from_str(yaml)?;
        let mut procedures = Vec::with_capacity(file.procedures.len());
        for proc in file.procedures {
            let mut jobs = Vec::with_capacity(proc.jobs.len());
            for job in proc.jobs {
                jobs.push(match job {
                    JobFile::Send { message } => JobSpec::Send(parse_message(&message)?),
                    JobFile::Receive { message } => JobSpec::Receive(parse_message(&message)?),
                    JobFile::Wait { duration_ms } => {
                        JobSpec::Wait(Duration::from_millis(duration_ms))
                    }
                });
            }
            procedures.push(Procedure {
                kind: proc.kind,
                jobs,
            });
        }
        Self::from_procedures(file.name.unwrap_or_else(|| "scenario".into()), procedures)
    }

    /// Build a scenario from already-constructed procedures (tests, embedding)
    pub fn from_procedures(
        name: impl Into<String>,
        procedures: Vec<Procedure>,
    ) -> Result<Self, ScenarioError> {
        let scenario = Self {
            name: name.into(),
            procedures,
        };
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn procedures(&self) -> &[Procedure] {
        &self.procedures
    }

    /// Expected type of the leading passive receive, for responder scenarios
    pub fn initial_receive(&self) -> Option<Gtp2MessageType> {
        match self.procedures.first().and_then(|p| p.jobs.first()) {
            Some(JobSpec::Receive(t)) => Some(*t),
            _ => None,
        }
    }

    fn validate(&self) -> Result<(), ScenarioError> {
        if self.procedures.is_empty() {
            return Err(ScenarioError::Empty);
        }
        for proc in &self.procedures {
            let expected = proc.kind.arity();
            if proc.jobs.len() != expected {
                return Err(ScenarioError::Arity {
                    kind: proc.kind,
                    expected,
                    actual: proc.jobs.len(),
                });
            }
            let ok = match proc.kind {
                ProcedureKind::Wait => matches!(proc.jobs[0], JobSpec::Wait(_)),
                ProcedureKind::RequestResponse => matches!(
                    (&proc.jobs[0], &proc.jobs[1]),
                    (JobSpec::Send(_), JobSpec::Receive(_))
                        | (JobSpec::Receive(_), JobSpec::Send(_))
                ),
                ProcedureKind::RequestTriggerReply => matches!(
                    (&proc.jobs[0], &proc.jobs[1], &proc.jobs[2]),
                    (JobSpec::Send(_), JobSpec::Receive(_), JobSpec::Send(_))
                        | (JobSpec::Receive(_), JobSpec::Send(_), JobSpec::Receive(_))
                ),
            };
            if !ok {
                return Err(ScenarioError::BadShape { kind: proc.kind });
            }
        }
        Ok(())
    }
}

fn parse_message(name: &str) -> Result<Gtp2MessageType, ScenarioError> {
    name.parse()
        .map_err(|_| ScenarioError::UnknownMessage(name.to_string()))
}

/// Request/response procedure initiated by us; the usual building block
pub fn request_response(send: Gtp2MessageType, recv: Gtp2MessageType) -> Procedure {
    Procedure {
        kind: ProcedureKind::RequestResponse,
        jobs: vec![JobSpec::Send(send), JobSpec::Receive(recv)],
    }
}

/// Timed-wait procedure
pub fn wait(duration: Duration) -> Procedure {
    Procedure {
        kind: ProcedureKind::Wait,
        jobs: vec![JobSpec::Wait(duration)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
name: s11-session-setup
procedures:
  - kind: request-response
    jobs:
      - action: send
        message: create-session-request
      - action: receive
        message: create-session-response
  - kind: wait
    jobs:
      - action: wait
        duration-ms: 5000
  - kind: request-response
    jobs:
      - action: send
        message: delete-session-request
      - action: receive
        message: delete-session-response
"#;

    #[test]
    fn test_parse_sample_scenario() {
        let scenario = Scenario::parse(SAMPLE).unwrap();
        assert_eq!(scenario.name(), "s11-session-setup");
        assert_eq!(scenario.procedures().len(), 3);
        assert_eq!(
            scenario.procedures()[0].jobs[0],
            JobSpec::Send(Gtp2MessageType::CreateSessionRequest)
        );
        assert_eq!(
            scenario.procedures()[1].jobs[0],
            JobSpec::Wait(Duration::from_millis(5000))
        );
        assert!(scenario.initial_receive().is_none());
    }

    #[test]
    fn test_wait_duration_key_is_kebab_case() {
        let yaml = r#"
procedures:
  - kind: wait
    jobs:
      - action: wait
        duration-ms: 250
"#;
        let scenario = Scenario::parse(yaml).unwrap();
        assert_eq!(
            scenario.procedures()[0].jobs[0],
            JobSpec::Wait(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_responder_scenario_initial_receive() {
        let scenario = Scenario::from_procedures(
            "sgw-side",
            vec![Procedure {
                kind: ProcedureKind::RequestResponse,
                jobs: vec![
                    JobSpec::Receive(Gtp2MessageType::CreateSessionRequest),
                    JobSpec::Send(Gtp2MessageType::CreateSessionResponse),
                ],
            }],
        )
        .unwrap();
        assert_eq!(
            scenario.initial_receive(),
            Some(Gtp2MessageType::CreateSessionRequest)
        );
    }

    #[test]
    fn test_rejects_empty_scenario() {
        assert!(matches!(
            Scenario::from_procedures("empty", vec![]),
            Err(ScenarioError::Empty)
        ));
    }

    #[test]
    fn test_rejects_wrong_arity() {
        let bad = Procedure {
            kind: ProcedureKind::RequestResponse,
            jobs: vec![JobSpec::Send(Gtp2MessageType::EchoRequest)],
        };
        assert!(matches!(
            Scenario::from_procedures("bad", vec![bad]),
            Err(ScenarioError::Arity { expected: 2, actual: 1, .. })
        ));
    }

    #[test]
    fn test_rejects_bad_shape() {
        let bad = Procedure {
            kind: ProcedureKind::Wait,
            jobs: vec![JobSpec::Send(Gtp2MessageType::EchoRequest)],
        };
        assert!(matches!(
            Scenario::from_procedures("bad", vec![bad]),
            Err(ScenarioError::BadShape { .. })
        ));
    }

    #[test]
    fn test_rejects_unknown_message_name() {
        let yaml = r#"
procedures:
  - kind: request-response
    jobs:
      - action: send
        message: no-such-thing
      - action: receive
        message: create-session-response
"#;
        assert!(matches!(
            Scenario::parse(yaml),
            Err(ScenarioError::UnknownMessage(_))
        ));
    }

    #[test]
    fn test_trigger_reply_shapes() {
        let initiator = Procedure {
            kind: ProcedureKind::RequestTriggerReply,
            jobs: vec![
                JobSpec::Send(Gtp2MessageType::DeleteSessionRequest),
                JobSpec::Receive(Gtp2MessageType::DeleteSessionResponse),
                JobSpec::Send(Gtp2MessageType::ReleaseAccessBearersRequest),
            ],
        };
        assert!(Scenario::from_procedures("ok", vec![initiator]).is_ok());

        let responder = Procedure {
            kind: ProcedureKind::RequestTriggerReply,
            jobs: vec![
                JobSpec::Receive(Gtp2MessageType::DownlinkDataNotification),
                JobSpec::Send(Gtp2MessageType::DownlinkDataNotificationAcknowledge),
                JobSpec::Receive(Gtp2MessageType::DeleteBearerRequest),
            ],
        };
        assert!(Scenario::from_procedures("ok", vec![responder]).is_ok());
    }
}
