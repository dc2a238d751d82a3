//! Console and per-run file logging.
//!
//! The console follows `-v`/`-q`. When a log directory is given every run
//! also gets its own `fleet_<timestamp>.log` at INFO and above, which is
//! where per-host outcomes end up.

use std::path::Path;

use color_eyre::eyre::{Result, WrapErr};
use time::macros::format_description;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, Layer};

/// Map `-q` and the `-v` count to a console level.
pub fn console_level(quiet: bool, verbose: usize) -> LevelFilter {
    if quiet && verbose == 0 {
        LevelFilter::ERROR
    } else if verbose > 0 {
        match verbose {
            1 => LevelFilter::WARN,
            2 => LevelFilter::INFO,
            3 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    } else {
        LevelFilter::ERROR
    }
}

pub fn log_file_name() -> Result<String> {
    let stamp = time::OffsetDateTime::now_utc()
        .format(format_description!(
            "[year]-[month]-[day]_[hour]-[minute]-[second]"
        ))
        .wrap_err("formatting log file timestamp")?;
    Ok(format!("fleet_{stamp}.log"))
}

/// Install the global subscriber. Keep the returned guard alive for the
/// whole run; dropping it flushes the log file.
pub fn init_logging(
    quiet: bool,
    verbose: usize,
    log_dir: Option<&str>,
) -> Result<Option<WorkerGuard>> {
    let console = fmt::layer()
        .with_timer(UtcTime::new(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        )))
        .with_span_events(fmt::format::FmtSpan::NONE)
        .with_writer(std::io::stderr)
        .compact()
        .with_filter(console_level(quiet, verbose));

    let (file, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .wrap_err_with(|| format!("creating log directory {}", dir))?;
            let appender = tracing_appender::rolling::never(Path::new(dir), log_file_name()?);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
                .with_filter(LevelFilter::INFO);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .wrap_err("installing tracing subscriber")?;

    Ok(guard)
}
