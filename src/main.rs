use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use thumbcache::media::{FsMediaIndex, MediaFilter, MediaIndex};
use thumbcache::{ThumbnailConfig, ThumbnailService};

/// Inspect a media tree and warm its thumbnail cache
#[derive(Parser, Debug)]
#[command(name = "thumbcache", version, about)]
struct Cli {
    /// JSON config file; defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List folders under a media root
    Folders { root: PathBuf },
    /// List media in one folder
    List { root: PathBuf, folder: String },
    /// Generate thumbnails for every folder (or just one)
    Warm {
        root: PathBuf,
        #[arg(long)]
        folder: Option<String>,
        #[arg(long, default_value_t = 256)]
        width: u32,
        #[arg(long, default_value_t = 256)]
        height: u32,
    },
    /// Trim the disk cache back under its budget
    Trim,
}

/// Result of a warm-up run
#[derive(Debug, Default)]
struct WarmResult {
    generated: usize,
    failed: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("thumbcache={}", cli.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match &cli.config {
        Some(path) => ThumbnailConfig::load(path)?,
        None => ThumbnailConfig::default(),
    };

    match cli.command {
        Command::Folders { root } => {
            let index = FsMediaIndex::new(root);
            for folder in index.list_folders()? {
                println!("{}  {:>6}  {}", folder.id, folder.count, folder.path.display());
            }
        }
        Command::List { root, folder } => {
            let index = FsMediaIndex::new(root);
            for record in index.list_media(&folder, &MediaFilter::default())? {
                println!(
                    "{}  {}x{}  {:>10}  {}",
                    record.date_added.format("%Y-%m-%d %H:%M"),
                    record.width,
                    record.height,
                    record.size,
                    record.path.display()
                );
            }
        }
        Command::Warm {
            root,
            folder,
            width,
            height,
        } => {
            let service = ThumbnailService::filesystem(config)?;
            let index = FsMediaIndex::new(root);
            let started = Instant::now();
            let result = warm(&service, &index, folder.as_deref(), width, height).await?;
            info!(
                "Warm-up complete: {} generated, {} failed in {:.1?}",
                result.generated,
                result.failed,
                started.elapsed()
            );
            println!("{:?}", service);
        }
        Command::Trim => {
            let service = ThumbnailService::filesystem(config)?;
            let report = service.trim_disk().await?;
            println!(
                "Removed {} entries: {} -> {} bytes",
                report.removed, report.bytes_before, report.bytes_after
            );
        }
    }

    Ok(())
}

/// Request thumbnails for every matching record through the batch path
async fn warm(
    service: &ThumbnailService,
    index: &dyn MediaIndex,
    only_folder: Option<&str>,
    width: u32,
    height: u32,
) -> std::io::Result<WarmResult> {
    let mut result = WarmResult::default();
    let filter = MediaFilter::default();

    for folder in index.list_folders()? {
        if only_folder.is_some_and(|id| id != folder.id) {
            continue;
        }
        let handles: Vec<_> = index
            .list_media(&folder.id, &filter)?
            .into_iter()
            .map(|record| record.handle)
            .collect();
        info!("Warming {} ({} items)", folder.name, handles.len());

        let thumbnails = service.get_thumbnail_batch(&handles, width, height).await;
        for thumbnail in thumbnails.values() {
            match thumbnail {
                Some(_) => result.generated += 1,
                None => result.failed += 1,
            }
        }
    }
    Ok(result)
}
