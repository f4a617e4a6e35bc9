mod cli;
mod commands;
mod config;
mod logging;

use std::process;

use anyhow::Result;
use clap::Parser;
use tracing::error;

use crate::cli::{Args, Commands};
use crate::commands::Context;
use crate::config::AppConfig;
use crate::logging::LogOptions;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("{e:#}");
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let _log_guard = logging::init_logging(&LogOptions {
        verbose: args.verbose,
        quiet: args.quiet,
        json: args.json_logs,
        dir: args.log_dir.as_deref(),
    })?;

    let config_path = AppConfig::resolve_path(args.config.as_deref())?;
    let file_config = AppConfig::load(Some(&config_path))?;

    // Command line and environment take precedence over the file, but are
    // never written back to it.
    let mut config = file_config.clone();
    if let Some(cookies) = args.cookies {
        config.cookies = Some(cookies);
    }
    if let Some(proxy) = args.proxy {
        config.ingest.client.proxy = Some(proxy);
    }
    if let Some(api_base) = args.api_base {
        config.ingest.client.api_base = api_base;
    }

    match args.command {
        Commands::Config { show, init, force } => {
            commands::config(&config, config_path, show, init, force)
        }
        Commands::Credentials { action } => {
            commands::credentials(file_config, &config_path, action)
        }
        Commands::Sync {
            creators,
            max_items,
            mode,
            output,
        } => {
            let ctx = Context::new(config)?;
            commands::sync(&ctx, &creators, max_items, mode.into(), output.as_deref()).await
        }
        Commands::Profile { mid } => commands::profile(&Context::new(config)?, mid).await,
        Commands::Videos {
            mid,
            max_items,
            page_size,
        } => commands::videos(&Context::new(config)?, mid, max_items, page_size).await,
        Commands::Video { bvid } => commands::video(&Context::new(config)?, &bvid).await,
        Commands::Search {
            keyword,
            page,
            page_size,
        } => commands::search(&Context::new(config)?, &keyword, page, page_size).await,
        Commands::Ranking { region, days } => {
            commands::ranking(&Context::new(config)?, region, days).await
        }
    }
}
