//! Renders the illustrations for a scene file.
//!
//!   scene_images scenes/scenes_20250101_120000.json
//!   scene_images scenes.json --scene 7 --image-quality hd

use std::path::PathBuf;
use std::time::Duration;

use adtoon::cli::ImageOptions;
use adtoon::config::setup_logging;
use adtoon::constants::{DEFAULT_MAX_RETRIES, DEFAULT_RATE_LIMIT_DELAY, OUTPUT_DIR};
use adtoon::openai::OpenAiClient;
use adtoon::pipeline::{BatchOptions, generate_all_scenes, generate_scene_image};
use adtoon::scenes::{SceneIndex, SceneSet};
use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "scene_images")]
#[command(about = "Generate webtoon illustrations for a scene file")]
struct Args {
    /// Scene JSON file written by scene_writer or the web front-end
    scenes_file: PathBuf,

    /// Only render this scene (1-18)
    #[arg(long)]
    scene: Option<usize>,

    /// OpenAI API key
    #[arg(required = true, long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: String,

    #[command(flatten)]
    image: ImageOptions,

    /// Where the PNGs and the report go
    #[arg(long, default_value_os_t = OUTPUT_DIR.clone(), env = "ADTOON_OUTPUT_DIR")]
    output_dir: PathBuf,

    /// Seconds between consecutive image calls
    #[arg(
        long,
        default_value_t = DEFAULT_RATE_LIMIT_DELAY.as_secs(),
        env = "ADTOON_RATE_LIMIT_SECONDS"
    )]
    rate_limit_seconds: u64,

    /// Retry rounds over failed scenes
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES, env = "ADTOON_MAX_RETRIES")]
    max_retries: usize,

    /// Skip the retry pass
    #[arg(long)]
    no_retry: bool,

    /// Don't write generation_report.json
    #[arg(long)]
    no_report: bool,

    /// Keep raw API responses in this directory
    #[arg(long, env = "ADTOON_API_DEBUG_DIR")]
    api_debug_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, env = "ADTOON_DEBUG")]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    setup_logging(args.debug).map_err(|err| anyhow::anyhow!(err))?;

    let settings = args.image.settings();
    settings.validate()?;
    let scenes = SceneSet::load(&args.scenes_file)
        .await
        .with_context(|| format!("Failed to load {}", args.scenes_file.display()))?;

    let mut client = OpenAiClient::new(&args.openai_api_key)?;
    if let Some(dir) = args.api_debug_dir {
        client = client.with_debug_dir(dir);
    }

    if let Some(scene) = args.scene {
        let index = SceneIndex::new(scene)?;
        let path = generate_scene_image(&client, &scenes, index, &settings, &args.output_dir)
            .await
            .with_context(|| format!("Scene {index} failed"))?;
        println!("{}", path.display());
        return Ok(());
    }

    let options = BatchOptions {
        delay: Duration::from_secs(args.rate_limit_seconds),
        max_retries: if args.no_retry { 0 } else { args.max_retries },
        write_report: !args.no_report,
    };
    let batch = generate_all_scenes(
        &client,
        &scenes,
        &settings,
        &args.output_dir,
        &options,
        |progress| {
            let outcome = if progress.succeeded { "done" } else { "failed" };
            info!(
                "[{}/{}] scene {} {outcome}",
                progress.done, progress.total, progress.index
            );
        },
    )
    .await?;

    if !batch.retry.recovered.is_empty() {
        info!(
            "Recovered scenes {:?} in {} retry rounds",
            batch.retry.recovered, batch.retry.rounds
        );
    }
    if let Some(report) = &batch.report_path {
        info!("Report: {}", report.display());
    }
    info!(
        "{} of {} scenes rendered into {}",
        batch.results.success_count(),
        batch.results.len(),
        args.output_dir.display()
    );

    let failed = batch.results.failed();
    if !failed.is_empty() {
        warn!("Scenes without an image: {failed:?}");
        bail!("{} scenes failed", failed.len());
    }
    Ok(())
}
