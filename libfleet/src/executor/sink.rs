use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{HostReport, Outcome, OutcomeSink};
use crate::log::*;

pub type ReportTx = mpsc::Sender<HostReport>;
pub type ReportRx = mpsc::Receiver<HostReport>;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("report receiver went away")]
    Closed,
}

/// Writes every report to the tracing subscriber.
#[derive(Debug, Default, Clone)]
pub struct TracingSink;

#[async_trait]
impl OutcomeSink for TracingSink {
    async fn record(&mut self, report: &HostReport) -> Result<(), SinkError> {
        match report.outcome() {
            Outcome::Success(results) => info!(
                host = %report.host(),
                port = report.port(),
                code = 0,
                "{}:{} succeeded: {:?}",
                report.host(),
                report.port(),
                results
            ),
            Outcome::Failure { code, message, .. } => warn!(
                host = %report.host(),
                port = report.port(),
                code = code,
                "{}:{} failed: {}",
                report.host(),
                report.port(),
                message
            ),
        }
        Ok(())
    }
}

/// Forwards reports over a channel, for whoever is reading the other end.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: ReportTx,
}

impl ChannelSink {
    pub fn new(tx: ReportTx) -> Self {
        Self { tx }
    }

    /// A sink and the [`ReportSource`] that reads from it.
    pub fn pair(buffer: usize) -> (Self, ReportSource) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(tx), ReportSource::new(rx))
    }
}

#[async_trait]
impl OutcomeSink for ChannelSink {
    #[tracing::instrument(skip(self, report), fields(host = %report.host()))]
    async fn record(&mut self, report: &HostReport) -> Result<(), SinkError> {
        self.tx
            .send(report.clone())
            .await
            .map_err(|_| SinkError::Closed)
    }
}

#[derive(Debug)]
pub struct ReportSource {
    rx: ReportRx,
}

impl ReportSource {
    pub fn new(rx: ReportRx) -> Self {
        Self { rx }
    }

    /// The next report, or `None` once every sink has been dropped.
    pub async fn source(&mut self) -> Option<HostReport> {
        self.rx.recv().await
    }

    pub fn into_stream(self) -> ReceiverStream<HostReport> {
        ReceiverStream::new(self.rx)
    }
}
