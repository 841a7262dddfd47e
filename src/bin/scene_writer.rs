//! Turns an advertising narrative into an 18-scene JSON file.
//!
//!   scene_writer story.txt
//!   cat story.txt | scene_writer --model gpt-4o

use std::io::Read;
use std::path::PathBuf;

use adtoon::config::{setup_logging, validate_scene_model};
use adtoon::constants::{SCENE_MODELS, SCENES_DIR};
use adtoon::openai::{OpenAiClient, SceneWriter};
use adtoon::util::scenes_filename;
use anyhow::{Context, Result, bail};
use chrono::Local;
use clap::Parser;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "scene_writer")]
#[command(about = "Split an advertising narrative into 18 webtoon scenes")]
struct Args {
    /// Narrative text file, `-` or nothing to read stdin
    input: Option<PathBuf>,

    /// OpenAI API key
    #[arg(required = true, long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: String,

    /// Scene-writing model
    #[arg(long, default_value = SCENE_MODELS[0], env = "ADTOON_SCENE_MODEL")]
    model: String,

    /// Directory for the timestamped scene file
    #[arg(long, default_value_os_t = SCENES_DIR.clone(), env = "ADTOON_SCENES_DIR")]
    scenes_dir: PathBuf,

    /// Exact output path, overrides --scenes-dir
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Keep raw API responses in this directory
    #[arg(long, env = "ADTOON_API_DEBUG_DIR")]
    api_debug_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, env = "ADTOON_DEBUG")]
    debug: bool,
}

fn read_narrative(input: Option<&PathBuf>) -> Result<String> {
    match input {
        Some(path) if path.as_os_str() != "-" => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        _ => {
            let mut narrative = String::new();
            std::io::stdin()
                .read_to_string(&mut narrative)
                .context("Failed to read stdin")?;
            Ok(narrative)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    setup_logging(args.debug).map_err(|err| anyhow::anyhow!(err))?;

    validate_scene_model(&args.model)?;
    let narrative = read_narrative(args.input.as_ref())?;
    if narrative.trim().is_empty() {
        bail!("The narrative is empty");
    }

    let mut client = OpenAiClient::new(&args.openai_api_key)?;
    if let Some(dir) = args.api_debug_dir {
        client = client.with_debug_dir(dir);
    }

    info!("Writing scenes with {}", args.model);
    let scenes = client
        .write_scenes(narrative.trim(), &args.model)
        .await
        .context("Scene generation failed")?;

    let path = args
        .output
        .unwrap_or_else(|| args.scenes_dir.join(scenes_filename(Local::now())));
    scenes
        .save(&path)
        .await
        .with_context(|| format!("Failed to save {}", path.display()))?;
    for (index, scene) in scenes.iter() {
        info!("Scene {index}: {} [{}]", scene.script, scene.main_keyword);
    }
    println!("{}", path.display());
    Ok(())
}
