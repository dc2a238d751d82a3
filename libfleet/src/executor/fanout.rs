//! Launch a host job per descriptor and report them as they finish.

use std::time::Instant;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::{mpsc, Semaphore};

use super::sink::TracingSink;
use super::{job, HostReport, OutcomeSink, Progress};
use crate::config::RunSettings;
use crate::inventory::{HostDescriptor, JumpHostMap};
use crate::log::*;
use crate::ssh::SshTransport;

pub type ProgressTx = mpsc::UnboundedSender<Progress>;
pub type ProgressRx = mpsc::UnboundedReceiver<Progress>;

/// Drives a whole run. Jobs are polled together on the calling task, so a
/// run needs no `Send` futures and shares the jump host map by reference.
#[derive(Debug)]
pub struct Fanout<T: SshTransport> {
    transport: T,
    settings: RunSettings,
    sink: Box<dyn OutcomeSink>,
    progress: Option<ProgressTx>,
}

impl<T: SshTransport> Fanout<T> {
    pub fn new(transport: T, settings: RunSettings) -> Self {
        Self {
            transport,
            settings,
            sink: Box::new(TracingSink),
            progress: None,
        }
    }

    pub fn with_sink<S: OutcomeSink + 'static>(mut self, sink: S) -> Self {
        self.sink = Box::new(sink);
        self
    }

    /// Emit a [`Progress`] after every finished job.
    pub fn with_progress(mut self, tx: ProgressTx) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Run every descriptor and return one report per descriptor, in the
    /// order the jobs finished.
    #[tracing::instrument(skip_all, fields(total = descriptors.len()))]
    pub async fn run_all(
        &mut self,
        descriptors: &[HostDescriptor],
        jumphosts: &JumpHostMap,
    ) -> Vec<HostReport> {
        let Fanout {
            transport,
            settings,
            sink,
            progress,
        } = self;
        let (transport, settings) = (&*transport, &*settings);
        let total = descriptors.len();
        let semaphore = settings.max_concurrency().map(Semaphore::new);
        let limiter = semaphore.as_ref();
        info!(
            "launching {} host jobs ({})",
            total,
            match settings.max_concurrency() {
                Some(limit) => format!("at most {limit} at once"),
                None => "unbounded".to_string(),
            }
        );

        let mut running: FuturesUnordered<_> = descriptors
            .iter()
            .enumerate()
            .map(|(index, descriptor)| {
                launch(
                    transport,
                    settings,
                    limiter,
                    index,
                    descriptor,
                    jumphosts,
                )
            })
            .collect();

        let mut reports = Vec::with_capacity(total);
        while let Some(report) = running.next().await {
            if let Err(err) = sink.record(&report).await {
                error!("recording outcome for {}: {}", report.host(), err);
            }
            reports.push(report);
            if let Some(tx) = progress.as_ref() {
                if tx.send(Progress::new(reports.len(), total)).is_err() {
                    trace!("progress receiver dropped");
                }
            }
        }
        info!("all {} host jobs finished", total);
        reports
    }
}

async fn launch<T: SshTransport>(
    transport: &T,
    settings: &RunSettings,
    limiter: Option<&Semaphore>,
    index: usize,
    descriptor: &HostDescriptor,
    jumphosts: &JumpHostMap,
) -> HostReport {
    // The semaphore is never closed, so acquiring only ever waits.
    let _permit = match limiter {
        Some(limiter) => limiter.acquire().await.ok(),
        None => None,
    };
    let started = Instant::now();
    let outcome = job::execute(transport, descriptor, jumphosts, settings).await;
    HostReport::new(
        index,
        descriptor.display_host(),
        descriptor.display_port(),
        outcome,
        started.elapsed(),
    )
}
