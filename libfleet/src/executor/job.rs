//! One inventory entry in, exactly one [`Outcome`] out.

use super::runner;
use super::Outcome;
use crate::config::RunSettings;
use crate::error::HostError;
use crate::inventory::{HostDescriptor, JumpHostMap, ResolvedHost};
use crate::log::*;
use crate::ssh::{self, SshTransport};

/// Connect, run the commands, disconnect. Never fails: every fault becomes an
/// [`Outcome::Failure`].
#[tracing::instrument(
    skip_all,
    fields(host = %descriptor.display_host(), port = descriptor.display_port())
)]
pub async fn execute<T: SshTransport>(
    transport: &T,
    descriptor: &HostDescriptor,
    jumphosts: &JumpHostMap,
    settings: &RunSettings,
) -> Outcome {
    let host = descriptor.resolve();
    let (name, port) = (host.endpoint().host(), host.endpoint().port());
    info!("connecting: {}:{}", name, port);

    let outcome = match run_on_host(transport, &host, jumphosts, settings).await {
        Ok(results) => Outcome::Success(results),
        Err(err) => Outcome::from(err),
    };
    match &outcome {
        Outcome::Success(results) => {
            info!("finished: {}:{}, code: 0, results: {:?}", name, port, results)
        }
        Outcome::Failure { code, message, .. } => {
            info!("finished: {}:{}, code: {}, message: {}", name, port, code, message)
        }
    }
    outcome
}

async fn run_on_host<T: SshTransport>(
    transport: &T,
    host: &ResolvedHost,
    jumphosts: &JumpHostMap,
    settings: &RunSettings,
) -> Result<Vec<String>, HostError> {
    let mut session =
        ssh::establish(transport, host, jumphosts, settings.connect_timeout()).await?;
    let results = runner::run_commands(session.target(), host.commands()).await;
    session.close().await;
    results
}
