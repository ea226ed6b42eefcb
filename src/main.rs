use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};

use wordcatch::adapters::ffmpeg::FfmpegEngine;
use wordcatch::adapters::local::FsCheckpointStorage;
use wordcatch::adapters::youtube::YoutubeCatalog;
use wordcatch::adapters::ytdlp::YtDlpSource;
use wordcatch::application::checkpoint::CheckpointStore;
use wordcatch::application::reducer::ReduceOutcome;
use wordcatch::application::video_unit::{UnitSettings, VideoWorkUnit};
use wordcatch::{channel_stats, logging, CatchConfig, Orchestrator};

#[derive(Parser)]
#[command(
    name = "wordcatch",
    version,
    about = "Cut every utterance of a word on a YouTube channel into one video"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Read variables from this file instead of ./.env
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Overrides WORDCATCH_CHANNEL_NAME
    #[arg(long, global = true)]
    channel: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Download, cut and merge
    Catch {
        /// Overrides WORDCATCH_WORD_TO_EXTRACT
        #[arg(long)]
        word: Option<String>,
    },

    /// Summarise the cached occurrence data
    Stats,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.env_file {
        Some(path) => CatchConfig::from_env_file(path),
        None => CatchConfig::from_env(),
    }
    .context("Failed to load configuration")?;
    if let Some(channel) = cli.channel {
        config.channel_name = channel;
    }

    let store = CheckpointStore::new(FsCheckpointStorage::new(&config.data_dir))
        .with_output_data(config.output_data);

    match cli.command {
        Commands::Stats => {
            print!("{}", channel_stats(&store).await);
            Ok(())
        }
        Commands::Catch { word } => {
            if let Some(word) = word {
                config.word_to_extract = word;
            }
            config.validate()?;
            catch(config, store).await
        }
    }
}

async fn catch(config: CatchConfig, store: CheckpointStore<FsCheckpointStorage>) -> Result<()> {
    let source = YtDlpSource::new(&config.download_dir)?;
    let engine = FfmpegEngine::new(config.resolution, config.max_encode_threads)?;
    let catalog = YoutubeCatalog::new(config.api_key.clone())?;
    let settings = UnitSettings::from_config(&config)?;

    info!(
        "Catching '{}' on '{}' with {} workers",
        config.word_to_extract, config.channel_name, config.max_workers
    );
    let unit = VideoWorkUnit::new(store, source, engine, settings);
    let report = Orchestrator::new(config, catalog, unit).run().await?;

    println!("{}", report);
    if let Some(ReduceOutcome::FinalizeFailed { artifact, target, reason }) = &report.output {
        anyhow::bail!(
            "merged video left at {} (could not move it to {}: {})",
            artifact.display(),
            target.display(),
            reason
        );
    }
    Ok(())
}
