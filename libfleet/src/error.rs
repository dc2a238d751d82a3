//! Per-host faults and their reduction to an `(code, message)` pair.
//!
//! Nothing in here ever escapes a host job: every [`HostError`] is turned into
//! an [`Outcome::Failure`](crate::executor::Outcome::Failure) with
//! [`extract_fault`] before it reaches the orchestrator.

use std::fmt;
use std::io;

use thiserror::Error;

/// SSH disconnect reason `HOST_KEY_NOT_VERIFIABLE`.
pub const HOST_KEY_NOT_VERIFIABLE: i64 = 9;
/// SSH disconnect reason `NO_MORE_AUTH_METHODS_AVAILABLE`.
pub const NO_MORE_AUTH_METHODS_AVAILABLE: i64 = 14;

/// Code reported when a fault carries no structured code of its own.
pub const UNSTRUCTURED_FAULT_CODE: i64 = -1;

#[derive(Error, Debug)]
pub enum HostError {
    #[error("{}", connection_message(.0))]
    Connection(#[source] io::Error),
    #[error("permission denied for {username}")]
    Auth { username: String },
    #[error("host key for {host}:{port} not verifiable: {reason}")]
    HostKey {
        host: String,
        port: u16,
        reason: String,
    },
    #[error("command '{command}' exited with status {exit_status}")]
    Command {
        command: String,
        exit_status: u32,
        /// Stdout of every command that completed before this one.
        partial: Vec<String>,
    },
    #[error("unknown jump host: {0}")]
    UnknownJumpHost(String),
    #[error("ssh protocol error: {0}")]
    Protocol(String),
    #[error("{0}")]
    Unclassified(String),
}

fn connection_message(err: &io::Error) -> String {
    match err.kind() {
        io::ErrorKind::TimedOut => "timeout".to_string(),
        _ => err.to_string(),
    }
}

impl HostError {
    pub fn timeout() -> Self {
        HostError::Connection(io::Error::new(io::ErrorKind::TimedOut, "timeout"))
    }

    /// The arguments this fault carries, in the order a reporter reads them.
    /// Structured faults lead with a numeric code.
    pub fn args(&self) -> Vec<FaultArg> {
        match self {
            HostError::Connection(err) => match err.raw_os_error() {
                Some(errno) => vec![
                    FaultArg::Code(errno as i64),
                    FaultArg::Text(connection_message(err)),
                ],
                None => vec![FaultArg::Text(connection_message(err))],
            },
            HostError::Auth { .. } => vec![
                FaultArg::Code(NO_MORE_AUTH_METHODS_AVAILABLE),
                FaultArg::Text(self.to_string()),
            ],
            HostError::HostKey { .. } => vec![
                FaultArg::Code(HOST_KEY_NOT_VERIFIABLE),
                FaultArg::Text(self.to_string()),
            ],
            HostError::Command { exit_status, .. } => vec![
                FaultArg::Code(*exit_status as i64),
                FaultArg::Text(self.to_string()),
            ],
            HostError::UnknownJumpHost(_) | HostError::Protocol(_) | HostError::Unclassified(_) => {
                vec![FaultArg::Text(self.to_string())]
            }
        }
    }

    /// Shorthand for `extract_fault(&self.args())`.
    pub fn code_and_message(&self) -> (i64, String) {
        extract_fault(&self.args())
    }
}

impl From<thrussh::Error> for HostError {
    fn from(err: thrussh::Error) -> Self {
        match err {
            thrussh::Error::IO(err) => HostError::Connection(err),
            other => HostError::Protocol(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultArg {
    Code(i64),
    Text(String),
}

impl FaultArg {
    fn as_code(&self) -> i64 {
        match self {
            FaultArg::Code(code) => *code,
            FaultArg::Text(text) => text.trim().parse().unwrap_or(UNSTRUCTURED_FAULT_CODE),
        }
    }
}

impl fmt::Display for FaultArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultArg::Code(code) => write!(f, "{code}"),
            FaultArg::Text(text) => f.write_str(text),
        }
    }
}

/// Reduce fault arguments to `(code, message)`. With two or more arguments
/// the first is the code and the second the message; otherwise the code is
/// `-1` and the message is the sole argument, if any.
pub fn extract_fault(args: &[FaultArg]) -> (i64, String) {
    match args {
        [code, message, ..] => (code.as_code(), message.to_string()),
        [message] => (UNSTRUCTURED_FAULT_CODE, message.to_string()),
        [] => (UNSTRUCTURED_FAULT_CODE, String::new()),
    }
}
