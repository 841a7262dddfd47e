//! CLI parser
use clap::Parser;
use std::num::NonZeroU16;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{AppConfig, ImageSettings};
use crate::constants::{
    DEFAULT_MAX_RETRIES, DEFAULT_RATE_LIMIT_DELAY, IMAGE_MODELS, IMAGE_QUALITIES, IMAGE_SIZES,
    IMAGE_STYLES, OUTPUT_DIR, SCENE_MODELS, SCENES_DIR,
};

#[derive(Parser, Debug)]
/// CLI Options
pub struct CliOptions {
    #[clap(long, help = "Enable debug logging", env = "ADTOON_DEBUG")]
    /// Enable debug logging. Env: ADTOON_DEBUG
    pub debug: bool,
    #[clap(long, short, default_value = "8501", env = "ADTOON_PORT")]
    /// http listener, defaults to `8501`.
    /// Env: ADTOON_PORT
    pub port: NonZeroU16,
    #[clap(
        long,
        short,
        default_value = "127.0.0.1",
        env = "ADTOON_LISTEN_ADDRESS"
    )]
    /// Listen address, defaults to `127.0.0.1`.
    /// Env: ADTOON_LISTEN_ADDRESS
    pub listen_address: String,

    #[clap(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    /// OpenAI API key. Env: OPENAI_API_KEY
    pub openai_api_key: String,

    #[clap(long, default_value_os_t = OUTPUT_DIR.clone(), env = "ADTOON_OUTPUT_DIR")]
    /// Where images and the generation report are written.
    /// Env: ADTOON_OUTPUT_DIR
    pub output_dir: PathBuf,

    #[clap(long, default_value_os_t = SCENES_DIR.clone(), env = "ADTOON_SCENES_DIR")]
    /// Where scene files are written. Env: ADTOON_SCENES_DIR
    pub scenes_dir: PathBuf,

    #[clap(long, default_value = SCENE_MODELS[0], env = "ADTOON_SCENE_MODEL")]
    /// Default scene-writing model. Env: ADTOON_SCENE_MODEL
    pub scene_model: String,

    #[clap(flatten)]
    /// Image rendering options
    pub image: ImageOptions,

    #[clap(
        long,
        default_value_t = DEFAULT_RATE_LIMIT_DELAY.as_secs(),
        env = "ADTOON_RATE_LIMIT_SECONDS"
    )]
    /// Seconds between consecutive image calls. Env: ADTOON_RATE_LIMIT_SECONDS
    pub rate_limit_seconds: u64,

    #[clap(long, default_value_t = DEFAULT_MAX_RETRIES, env = "ADTOON_MAX_RETRIES")]
    /// Retry rounds over failed scenes. Env: ADTOON_MAX_RETRIES
    pub max_retries: usize,
}

impl CliOptions {
    /// Runtime configuration for the web server.
    pub fn app_config(&self) -> AppConfig {
        AppConfig {
            output_dir: self.output_dir.clone(),
            scenes_dir: self.scenes_dir.clone(),
            scene_model: self.scene_model.clone(),
            image: self.image.settings(),
            rate_limit_delay: Duration::from_secs(self.rate_limit_seconds),
            max_retries: self.max_retries,
        }
    }
}

#[derive(clap::Args, Debug, Clone)]
/// Image rendering options shared by the server and `scene_images`
pub struct ImageOptions {
    #[clap(long, default_value = IMAGE_MODELS[0], env = "ADTOON_IMAGE_MODEL")]
    /// Image model. Env: ADTOON_IMAGE_MODEL
    pub image_model: String,
    #[clap(long, default_value = IMAGE_SIZES[0], env = "ADTOON_IMAGE_SIZE")]
    /// Image size. Env: ADTOON_IMAGE_SIZE
    pub image_size: String,
    #[clap(long, default_value = IMAGE_QUALITIES[0], env = "ADTOON_IMAGE_QUALITY")]
    /// `standard` or `hd`. Env: ADTOON_IMAGE_QUALITY
    pub image_quality: String,
    #[clap(long, default_value = IMAGE_STYLES[0], env = "ADTOON_IMAGE_STYLE")]
    /// `vivid` or `natural`. Env: ADTOON_IMAGE_STYLE
    pub image_style: String,
}

impl ImageOptions {
    /// As [`ImageSettings`].
    pub fn settings(&self) -> ImageSettings {
        ImageSettings {
            model: self.image_model.clone(),
            size: self.image_size.clone(),
            quality: self.image_quality.clone(),
            style: self.image_style.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_defaults() {
        let cli = CliOptions::try_parse_from(["adtoon", "--openai-api-key", "sk-test"])
            .expect("parse");
        let config = cli.app_config();
        assert_eq!(config.rate_limit_delay, DEFAULT_RATE_LIMIT_DELAY);
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.output_dir, *OUTPUT_DIR);
        assert_eq!(config.scenes_dir, *SCENES_DIR);
        assert_eq!(config.scene_model, SCENE_MODELS[0]);
        assert_eq!(config.image, ImageSettings::default());
        assert_eq!(cli.port.get(), 8501);
    }

    #[test]
    fn overrides_image_options() {
        let cli = CliOptions::try_parse_from([
            "adtoon",
            "--openai-api-key",
            "sk-test",
            "--image-model",
            "dall-e-2",
            "--rate-limit-seconds",
            "0",
        ])
        .expect("parse");
        let config = cli.app_config();
        assert_eq!(config.image.model, "dall-e-2");
        assert!(config.rate_limit_delay.is_zero());
    }
}
