//! Running a `;`-delimited command list on one session.

use crate::error::HostError;
use crate::log::*;
use crate::ssh::RemoteSession;

/// Split on `;` exactly. Segments are not trimmed and empty ones are kept.
pub fn split_commands(commands: &str) -> Vec<&str> {
    commands.split(';').collect()
}

/// Run each command in order, one at a time, collecting stdout. The first
/// non-zero exit status stops the run.
#[tracing::instrument(skip(session))]
pub async fn run_commands<S>(session: &mut S, commands: &str) -> Result<Vec<String>, HostError>
where
    S: RemoteSession + ?Sized,
{
    let mut results = vec![];
    for command in split_commands(commands) {
        let output = session.exec(command).await?;
        debug!("'{}' exited with status {}", command, output.exit_status());
        if *output.exit_status() != 0 {
            return Err(HostError::Command {
                command: command.to_string(),
                exit_status: *output.exit_status(),
                partial: results,
            });
        }
        results.push(output.stdout().clone());
    }
    Ok(results)
}
