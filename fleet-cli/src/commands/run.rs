use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::ArgMatches;
use color_eyre::eyre::{Result, WrapErr};
use indicatif::{ProgressBar, ProgressStyle};
use libfleet::executor::fanout::ProgressRx;
use libfleet::executor::sink::{SinkError, TracingSink};
use libfleet::executor::{HostReport, Outcome, OutcomeSink, Progress};
use libfleet::inventory::JumpHostMap;
use libfleet::log::*;
use libfleet::ssh::ThrusshTransport;
use libfleet::{Fanout, RunSettings};
use tokio::sync::mpsc;

use super::{existing_file, ArgumentReader, CliContext};
use crate::inventory;

pub struct RunCommand;

impl RunCommand {
    fn settings(&self, matches: &ArgMatches) -> RunSettings {
        let mut settings = RunSettings::default();
        if let Some(limit) = matches.get_one::<usize>("concurrency") {
            settings = settings.with_max_concurrency(*limit);
        }
        if let Some(secs) = matches.get_one::<u64>("connect-timeout") {
            settings = settings.with_connect_timeout(Duration::from_secs(*secs));
        }
        settings
    }

    async fn do_run(&self, matches: &ArgMatches) -> Result<()> {
        let hosts_file =
            self.read_argument_with_validator(matches, "hosts", &mut existing_file("hosts"))?;
        let jumphosts_file = self.read_optional_argument_with_validator(
            matches,
            "jumphosts",
            &mut existing_file("jumphosts"),
        )?;

        let descriptors = inventory::read_hosts(Path::new(&hosts_file)).await?;
        let jumphosts: Arc<JumpHostMap> = Arc::new(match jumphosts_file {
            Some(path) => inventory::read_jumphosts(Path::new(&path)).await?,
            None => JumpHostMap::new(),
        });

        let progress_bar = ProgressBar::new(descriptors.len() as u64);
        progress_bar.set_style(progress_style()?);
        progress_bar.set_prefix("Connect SSH");

        let (tx, rx) = mpsc::unbounded_channel();
        let progress_task = tokio::spawn(drive_progress(progress_bar.clone(), rx));

        let sink = ConsoleSink::new(progress_bar.clone(), matches.get_flag("json"));
        let mut fanout = Fanout::new(ThrusshTransport::default(), self.settings(matches))
            .with_sink(sink)
            .with_progress(tx);

        println!("Starting, use <Ctrl-C> to stop");
        let reports = tokio::select! {
            reports = fanout.run_all(&descriptors, &jumphosts) => Some(reports),
            _ = tokio::signal::ctrl_c() => None,
        };
        // Dropping the fan-out closes the progress channel.
        drop(fanout);
        progress_task.await.wrap_err("progress display task failed")?;

        match reports {
            Some(reports) => {
                let summary = Summary::of(&reports);
                info!("done: {} succeeded, {} failed", summary.succeeded, summary.failed);
                println!(
                    "* {} hosts: {} succeeded, {} failed",
                    reports.len(),
                    summary.succeeded,
                    summary.failed
                );
            }
            None => {
                warn!("interrupted; outstanding host jobs abandoned");
                println!("* interrupted");
            }
        }
        Ok(())
    }
}

fn progress_style() -> Result<ProgressStyle> {
    ProgressStyle::default_bar()
        .template("{prefix}: {percent:>3}%|{bar:40.cyan/blue}| {pos}/{len} [{elapsed_precise}]")
        .wrap_err("building progress bar template")
}

async fn drive_progress(bar: ProgressBar, mut rx: ProgressRx) {
    while let Some(progress) = rx.recv().await {
        bar.set_position(*progress.completed() as u64);
        if progress.is_done() {
            break;
        }
    }
    bar.finish();
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Summary {
    succeeded: usize,
    failed: usize,
}

impl Summary {
    fn of(reports: &[HostReport]) -> Self {
        let succeeded = reports.iter().filter(|r| r.outcome().is_success()).count();
        Self {
            succeeded,
            failed: reports.len() - succeeded,
        }
    }
}

/// Logs each report and prints it above the progress bar.
struct ConsoleSink {
    bar: ProgressBar,
    json: bool,
    log: TracingSink,
}

impl std::fmt::Debug for ConsoleSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleSink")
            .field("json", &self.json)
            .finish_non_exhaustive()
    }
}

impl ConsoleSink {
    fn new(bar: ProgressBar, json: bool) -> Self {
        Self {
            bar,
            json,
            log: TracingSink,
        }
    }

    fn render(&self, report: &HostReport) -> String {
        if self.json {
            return serde_json::to_string(report)
                .unwrap_or_else(|err| format!("{{\"error\": \"{err}\"}}"));
        }
        match report.outcome() {
            Outcome::Success(results) => format!(
                "ok   {}:{} ({} commands)",
                report.host(),
                report.port(),
                results.len()
            ),
            Outcome::Failure { code, message, .. } => format!(
                "fail {}:{} errcode: {}, errmsg: {}",
                report.host(),
                report.port(),
                code,
                message
            ),
        }
    }
}

#[async_trait]
impl OutcomeSink for ConsoleSink {
    async fn record(&mut self, report: &HostReport) -> Result<(), SinkError> {
        self.log.record(report).await?;
        self.bar.println(self.render(report));
        Ok(())
    }
}

#[async_trait]
impl<'a> super::Command<'a> for RunCommand {
    fn new() -> Self
    where
        Self: Sized,
    {
        Self {}
    }

    async fn run(&self, context: &'a CliContext) -> Result<()> {
        self.do_run(context.matches).await
    }
}

impl<'a> ArgumentReader<'a> for RunCommand {}
