//! Session establishment, direct or through a jump host.
//!
//! The protocol itself lives behind [`SshTransport`]; this module only
//! composes legs and makes sure every leg it opened gets closed again.

use std::time::Duration;

use async_trait::async_trait;
use derive_getters::Getters;

use crate::error::HostError;
use crate::inventory::{Endpoint, HostKeyPolicy, JumpHostMap, ResolvedHost};
use crate::log::*;

pub mod client;

pub use client::ThrusshTransport;

/// Exit status and captured stdout of one remote command.
#[derive(Getters, Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    exit_status: u32,
    stdout: String,
}

impl ExecOutput {
    pub fn new<S: Into<String>>(exit_status: u32, stdout: S) -> Self {
        Self {
            exit_status,
            stdout: stdout.into(),
        }
    }
}

/// One authenticated SSH connection.
#[async_trait]
pub trait RemoteSession: Send + std::fmt::Debug {
    /// Run a single command to completion.
    async fn exec(&mut self, command: &str) -> Result<ExecOutput, HostError>;

    /// Tear the connection down. Errors are logged, not returned: there is
    /// nothing a caller could do about them.
    async fn close(&mut self);
}

/// The secure-shell capability the engine is built on.
#[async_trait]
pub trait SshTransport: Send + Sync + std::fmt::Debug {
    type Session: RemoteSession + 'static;

    /// Open an authenticated session straight to `endpoint`.
    async fn connect(
        &self,
        endpoint: &Endpoint,
        policy: &HostKeyPolicy,
    ) -> Result<Self::Session, HostError>;

    /// Open an authenticated session to `endpoint`, tunnelled through `via`.
    async fn connect_via(
        &self,
        via: &mut Self::Session,
        endpoint: &Endpoint,
        policy: &HostKeyPolicy,
    ) -> Result<Self::Session, HostError>;
}

/// A live session to a target host, possibly wrapped in a jump-host leg.
#[derive(Debug)]
pub enum Session<S: RemoteSession> {
    Direct(S),
    Tunneled { jump: S, target: S },
}

impl<S: RemoteSession> Session<S> {
    /// The session commands run on.
    pub fn target(&mut self) -> &mut S {
        match self {
            Session::Direct(session) => session,
            Session::Tunneled { target, .. } => target,
        }
    }

    /// Close every leg, innermost first.
    pub async fn close(mut self) {
        match &mut self {
            Session::Direct(session) => session.close().await,
            Session::Tunneled { jump, target } => {
                target.close().await;
                jump.close().await;
            }
        }
    }
}

async fn with_timeout<T, F>(timeout: Option<Duration>, fut: F) -> Result<T, HostError>
where
    F: std::future::Future<Output = Result<T, HostError>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| HostError::timeout())?,
        None => fut.await,
    }
}

/// Open a session for `host`, through its jump host when it names one.
#[tracing::instrument(skip(transport, host, jumphosts), fields(endpoint = %host.endpoint()))]
pub async fn establish<T: SshTransport>(
    transport: &T,
    host: &ResolvedHost,
    jumphosts: &JumpHostMap,
    connect_timeout: Option<Duration>,
) -> Result<Session<T::Session>, HostError> {
    let Some(name) = host.jumphost() else {
        debug!("connecting directly");
        let session = with_timeout(
            connect_timeout,
            transport.connect(host.endpoint(), host.policy()),
        )
        .await?;
        return Ok(Session::Direct(session));
    };

    let jump_host = jumphosts
        .get(name)
        .ok_or_else(|| HostError::UnknownJumpHost(name.clone()))?;
    let jump_endpoint = jump_host.endpoint();
    debug!("connecting to jump host {}", &jump_endpoint);
    // Jump hosts are reached on first contact; their keys are not checked.
    let mut jump = with_timeout(
        connect_timeout,
        transport.connect(&jump_endpoint, &HostKeyPolicy::AcceptAny),
    )
    .await?;

    debug!("tunnelling through {}", name);
    let target = with_timeout(
        connect_timeout,
        transport.connect_via(&mut jump, host.endpoint(), host.policy()),
    )
    .await;
    match target {
        Ok(target) => Ok(Session::Tunneled { jump, target }),
        Err(err) => {
            jump.close().await;
            Err(err)
        }
    }
}
