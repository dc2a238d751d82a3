use std::time::Duration;

use async_trait::async_trait;
use derive_getters::Getters;
use serde::Serialize;

use crate::error::HostError;
use crate::inventory::Port;

pub mod fanout;
pub mod job;
pub mod runner;
pub mod sink;

/// The terminal result of one host job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "result", rename_all = "snake_case")]
pub enum Outcome {
    /// Stdout of every command, in order.
    Success(Vec<String>),
    Failure {
        code: i64,
        message: String,
        /// Stdout of the commands that completed before a command failed.
        partial: Vec<String>,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// `0` on success, the extracted fault code otherwise.
    pub fn code(&self) -> i64 {
        match self {
            Outcome::Success(_) => 0,
            Outcome::Failure { code, .. } => *code,
        }
    }
}

impl From<HostError> for Outcome {
    fn from(err: HostError) -> Self {
        let (code, message) = err.code_and_message();
        let partial = match err {
            HostError::Command { partial, .. } => partial,
            _ => vec![],
        };
        Outcome::Failure {
            code,
            message,
            partial,
        }
    }
}

/// An [`Outcome`] tagged with the descriptor it came from. `index` is the
/// descriptor's position in the input, so repeated hosts stay distinguishable.
#[derive(Getters, Debug, Clone, Serialize)]
pub struct HostReport {
    index: usize,
    host: String,
    port: Port,
    outcome: Outcome,
    elapsed: Duration,
}

impl HostReport {
    pub fn new<S: Into<String>>(
        index: usize,
        host: S,
        port: Port,
        outcome: Outcome,
        elapsed: Duration,
    ) -> Self {
        Self {
            index,
            host: host.into(),
            port,
            outcome,
            elapsed,
        }
    }
}

/// Emitted once per finished host job.
#[derive(Getters, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    completed: usize,
    total: usize,
}

impl Progress {
    pub fn new(completed: usize, total: usize) -> Self {
        Self { completed, total }
    }

    pub fn is_done(&self) -> bool {
        self.completed >= self.total
    }
}

/// Somewhere to record finished host jobs.
#[async_trait]
pub trait OutcomeSink: std::fmt::Debug + Send {
    async fn record(&mut self, report: &HostReport) -> Result<(), sink::SinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_fault_keeps_partial_output() {
        let outcome = Outcome::from(HostError::Command {
            command: "cmd2".into(),
            exit_status: 2,
            partial: vec!["one\n".into()],
        });
        assert_eq!(
            Outcome::Failure {
                code: 2,
                message: "command 'cmd2' exited with status 2".into(),
                partial: vec!["one\n".into()],
            },
            outcome
        );
        assert_eq!(2, outcome.code());
        assert!(!outcome.is_success());
    }

    #[test]
    fn test_success_code_is_zero() {
        let outcome = Outcome::Success(vec!["admin\n".into()]);
        assert_eq!(0, outcome.code());
        assert!(outcome.is_success());
    }

    #[test]
    fn test_outcome_serializes_tagged() -> color_eyre::eyre::Result<()> {
        let outcome = Outcome::from(HostError::Unclassified("boom".into()));
        let json = serde_json::to_value(&outcome)?;
        assert_eq!("failure", json["status"]);
        assert_eq!(-1, json["result"]["code"]);
        assert_eq!("boom", json["result"]["message"]);
        Ok(())
    }
}
