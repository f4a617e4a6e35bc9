use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub const DEFAULT_LOG_FILTER: &str = "bili_ingest=info,ingest_cli=info";
const VERBOSE_LOG_FILTER: &str = "bili_ingest=debug,ingest_cli=debug";

pub struct LogOptions<'a> {
    pub verbose: bool,
    pub quiet: bool,
    pub json: bool,
    pub dir: Option<&'a Path>,
}

fn build_filter(verbose: bool, quiet: bool) -> EnvFilter {
    if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new(VERBOSE_LOG_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    }
}

/// Install the global subscriber. Console output goes to stderr so stdout
/// stays clean for JSON results.
///
/// Keep the returned guard alive for the life of the process when a log
/// directory is configured.
pub fn init_logging(opts: &LogOptions<'_>) -> Result<Option<WorkerGuard>> {
    let (plain, json) = if opts.json {
        (
            None,
            Some(fmt::layer().json().with_writer(std::io::stderr)),
        )
    } else {
        (
            Some(fmt::layer().with_target(opts.verbose).with_writer(std::io::stderr)),
            None,
        )
    };

    let (file, guard) = match opts.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "bingest.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(non_blocking).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(build_filter(opts.verbose, opts.quiet))
        .with(plain)
        .with(json)
        .with(file)
        .try_init()
        .context("failed to set global default subscriber")?;

    Ok(guard)
}
