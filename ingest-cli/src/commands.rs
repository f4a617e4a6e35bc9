use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use async_trait::async_trait;
use bili_ingest::{
    BiliApi, CredentialPool, DiscardSink, RosterEntry, SinkReport, SyncMode, SyncOrchestrator,
    SyncSink, VideoItem,
};
use serde::Serialize;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cli::CredentialAction;
use crate::config::{AppConfig, parse_roster_args};

/// Everything a network command needs.
pub struct Context {
    pub config: AppConfig,
    pub pool: Arc<CredentialPool>,
    pub api: Arc<BiliApi>,
}

impl Context {
    pub fn new(config: AppConfig) -> Result<Self> {
        let pool = Arc::new(config.build_pool()?);
        let fallback = config.fallback_credential()?;
        let api = config
            .ingest
            .build_api(pool.clone(), fallback)
            .context("failed to build HTTP client")?;
        info!(
            credentials = pool.len(),
            active = pool.active_count(),
            api_base = %config.ingest.client.api_base,
            "Client ready"
        );
        Ok(Self {
            config,
            pool,
            api: Arc::new(api),
        })
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct Record<'a> {
    creator_id: &'a str,
    creator_name: &'a str,
    #[serde(flatten)]
    video: &'a VideoItem,
}

/// Appends every stored item as one JSON line.
struct JsonlSink {
    out: Mutex<BufWriter<tokio::fs::File>>,
}

impl JsonlSink {
    async fn open(path: &Path) -> Result<Self> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("failed to open output file {}", path.display()))?;
        Ok(Self {
            out: Mutex::new(BufWriter::new(file)),
        })
    }
}

#[async_trait]
impl SyncSink for JsonlSink {
    async fn store(&self, creator: &RosterEntry, items: &[VideoItem]) -> SinkReport {
        let mut out = self.out.lock().await;
        let mut report = SinkReport::default();
        for video in items {
            let record = Record {
                creator_id: &creator.id,
                creator_name: &creator.name,
                video,
            };
            let written = match serde_json::to_vec(&record) {
                Ok(mut line) => {
                    line.push(b'\n');
                    out.write_all(&line).await.map_err(anyhow::Error::from)
                }
                Err(e) => Err(e.into()),
            };
            match written {
                Ok(()) => report.accepted += 1,
                Err(e) => {
                    warn!(creator_id = %creator.id, video_id = %video.video_id, error = %e, "Failed to write item");
                    report.rejected += 1;
                }
            }
        }
        if let Err(e) = out.flush().await {
            warn!(error = %e, "Failed to flush output file");
        }
        report
    }
}

pub async fn sync(
    ctx: &Context,
    creators: &[String],
    max_items: Option<usize>,
    mode: SyncMode,
    output: Option<&Path>,
) -> Result<()> {
    let roster = if creators.is_empty() {
        ctx.config.roster.clone()
    } else {
        parse_roster_args(creators)?
    };
    if roster.is_empty() {
        bail!("no creators given; pass --creator or add [[roster]] entries to the config file");
    }

    let sink: Arc<dyn SyncSink> = match output {
        Some(path) => Arc::new(JsonlSink::open(path).await?),
        None => Arc::new(DiscardSink),
    };
    let orchestrator = SyncOrchestrator::new(
        ctx.api.clone(),
        sink,
        ctx.pool.clone(),
        ctx.config.ingest.sync.clone(),
    );

    let max_items = max_items.unwrap_or(ctx.config.ingest.sync.max_items_per_creator);
    let handle = orchestrator.start_run(roster, max_items, mode)?;

    let interrupt = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; stopping after the current creator");
                if let Err(e) = orchestrator.cancel_run() {
                    debug!(error = %e, "Nothing to cancel");
                }
            }
        })
    };

    let run = handle.await.context("sync run task failed")?;
    interrupt.abort();
    print_json(&run)
}

pub async fn profile(ctx: &Context, mid: u64) -> Result<()> {
    #[derive(Serialize)]
    struct Out {
        profile: bili_ingest::CreatorProfile,
        stat: bili_ingest::CreatorStat,
    }

    let profile = ctx.api.creator_profile(mid).await?;
    let stat = ctx.api.creator_stat(mid).await?;
    print_json(&Out { profile, stat })
}

pub async fn videos(ctx: &Context, mid: u64, max_items: usize, page_size: Option<u32>) -> Result<()> {
    let page_size = page_size.unwrap_or(ctx.config.ingest.api.page_size);
    let fetch = ctx.api.creator_videos_all(mid, max_items, page_size).await?;
    print_json(&fetch)
}

pub async fn video(ctx: &Context, bvid: &str) -> Result<()> {
    print_json(&ctx.api.video_detail(bvid).await?)
}

pub async fn search(ctx: &Context, keyword: &str, page: u32, page_size: u32) -> Result<()> {
    print_json(&ctx.api.search_videos(keyword, page, page_size).await?)
}

pub async fn ranking(ctx: &Context, region: u32, days: u32) -> Result<()> {
    print_json(&ctx.api.region_ranking(region, days).await?)
}

pub fn credentials(mut config: AppConfig, path: &Path, action: CredentialAction) -> Result<()> {
    match action {
        CredentialAction::List => {
            let pool = config.build_pool()?;
            return print_json(&pool.list_status());
        }
        CredentialAction::Add { id, name, cookies } => {
            config.add_credential(id.clone(), name, cookies)?;
            println!("✓ Added credential {id}");
        }
        CredentialAction::Remove { id } => {
            config.remove_credential(&id)?;
            println!("✓ Removed credential {id}");
        }
        CredentialAction::Enable { id } => {
            config.set_credential_active(&id, true)?;
            println!("✓ Enabled credential {id}");
        }
        CredentialAction::Disable { id } => {
            config.set_credential_active(&id, false)?;
            println!("✓ Disabled credential {id}");
        }
    }
    config.save(path)
}

pub fn config(config: &AppConfig, path: PathBuf, show: bool, init: bool, force: bool) -> Result<()> {
    if init {
        if path.exists() && !force {
            bail!("{} already exists; use --force to overwrite", path.display());
        }
        AppConfig::default().save(&path)?;
        println!("✓ Wrote default configuration to {}", path.display());
    } else if show {
        println!("# {}", path.display());
        println!("{}", config.show()?);
    } else {
        println!("Use --show to display the current configuration or --init to create one");
    }
    Ok(())
}
