//! A scripted in-memory transport for exercising the engine without a network.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use derive_getters::Getters;

use crate::error::HostError;
use crate::inventory::{Endpoint, HostKeyPolicy};
use crate::ssh::{ExecOutput, RemoteSession, SshTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectFailure {
    Refuse,
    Auth,
    HostKey,
}

/// How a scripted host behaves.
#[derive(Debug, Clone, Default)]
pub(crate) struct Script {
    connect_delay: Duration,
    command_delay: Duration,
    failure: Option<ConnectFailure>,
    responses: HashMap<String, (u32, String)>,
}

impl Script {
    pub fn refuse() -> Self {
        Self {
            failure: Some(ConnectFailure::Refuse),
            ..Self::default()
        }
    }

    pub fn fail_auth() -> Self {
        Self {
            failure: Some(ConnectFailure::Auth),
            ..Self::default()
        }
    }

    /// Rejects the server key whenever the client checks it.
    pub fn reject_host_key() -> Self {
        Self {
            failure: Some(ConnectFailure::HostKey),
            ..Self::default()
        }
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn with_command_delay(mut self, delay: Duration) -> Self {
        self.command_delay = delay;
        self
    }

    pub fn respond<S: Into<String>>(mut self, command: S, exit_status: u32, stdout: S) -> Self {
        self.responses
            .insert(command.into(), (exit_status, stdout.into()));
        self
    }
}

#[derive(Debug, Default)]
struct Ledger {
    attempts: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
    peak: AtomicUsize,
    executed: Mutex<Vec<(String, String)>>,
}

impl Ledger {
    fn open(&self) {
        let opened = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        let live = opened - self.closed.load(Ordering::SeqCst);
        self.peak.fetch_max(live, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub(crate) struct MockTransport {
    scripts: HashMap<String, Script>,
    ledger: Arc<Ledger>,
}

impl MockTransport {
    pub fn script<S: Into<String>>(mut self, host: S, script: Script) -> Self {
        self.scripts.insert(host.into(), script);
        self
    }

    /// Connection attempts, successful or not.
    pub fn attempts(&self) -> usize {
        self.ledger.attempts.load(Ordering::SeqCst)
    }

    /// Sessions successfully opened so far.
    pub fn opened(&self) -> usize {
        self.ledger.opened.load(Ordering::SeqCst)
    }

    /// Sessions opened and not yet closed.
    pub fn open_now(&self) -> usize {
        self.opened() - self.ledger.closed.load(Ordering::SeqCst)
    }

    /// Most sessions ever open at the same time.
    pub fn peak(&self) -> usize {
        self.ledger.peak.load(Ordering::SeqCst)
    }

    /// Every `(host, command)` executed, in execution order.
    pub fn executed(&self) -> Vec<(String, String)> {
        self.ledger.executed.lock().unwrap().clone()
    }

    async fn open(
        &self,
        endpoint: &Endpoint,
        policy: &HostKeyPolicy,
        via: Option<String>,
    ) -> Result<MockSession, HostError> {
        self.ledger.attempts.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts.get(endpoint.host()).cloned().unwrap_or_default();
        tokio::time::sleep(script.connect_delay).await;
        match script.failure {
            Some(ConnectFailure::Refuse) => {
                return Err(HostError::Connection(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "connection refused",
                )))
            }
            Some(ConnectFailure::Auth) => {
                return Err(HostError::Auth {
                    username: endpoint.username().clone(),
                })
            }
            Some(ConnectFailure::HostKey) if *policy != HostKeyPolicy::AcceptAny => {
                return Err(HostError::HostKey {
                    host: endpoint.host().clone(),
                    port: *endpoint.port(),
                    reason: "key mismatch".into(),
                })
            }
            _ => {}
        }
        self.ledger.open();
        Ok(MockSession {
            endpoint: endpoint.clone(),
            via,
            script,
            ledger: self.ledger.clone(),
            closed: false,
        })
    }
}

#[async_trait]
impl SshTransport for MockTransport {
    type Session = MockSession;

    async fn connect(
        &self,
        endpoint: &Endpoint,
        policy: &HostKeyPolicy,
    ) -> Result<MockSession, HostError> {
        self.open(endpoint, policy, None).await
    }

    async fn connect_via(
        &self,
        via: &mut MockSession,
        endpoint: &Endpoint,
        policy: &HostKeyPolicy,
    ) -> Result<MockSession, HostError> {
        assert!(!via.closed, "tunnelling through a closed session");
        self.open(endpoint, policy, Some(via.endpoint.host().clone()))
            .await
    }
}

#[derive(Getters, Debug)]
pub(crate) struct MockSession {
    endpoint: Endpoint,
    via: Option<String>,
    #[getter(skip)]
    script: Script,
    #[getter(skip)]
    ledger: Arc<Ledger>,
    #[getter(skip)]
    closed: bool,
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn exec(&mut self, command: &str) -> Result<ExecOutput, HostError> {
        assert!(!self.closed, "exec on a closed session");
        tokio::time::sleep(self.script.command_delay).await;
        self.ledger
            .executed
            .lock()
            .unwrap()
            .push((self.endpoint.host().clone(), command.to_string()));
        let output = match self.script.responses.get(command) {
            Some((exit_status, stdout)) => ExecOutput::new(*exit_status, stdout.clone()),
            None if command == "whoami" => {
                ExecOutput::new(0, format!("{}\n", self.endpoint.username()))
            }
            None => ExecOutput::new(0, format!("{command}\n")),
        };
        Ok(output)
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.ledger.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
