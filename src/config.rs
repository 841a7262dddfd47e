//! Config handling

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::log::LevelFilter;

use crate::constants::{
    DEFAULT_MAX_RETRIES, DEFAULT_RATE_LIMIT_DELAY, IMAGE_MODELS, IMAGE_QUALITIES, IMAGE_SIZES,
    IMAGE_STYLES, OUTPUT_DIR, SCENE_MODELS, SCENES_DIR,
};
use crate::error::AdtoonError;

/// Sets up logging based on the debug flag
pub fn setup_logging(debug: bool) -> Result<(), Box<std::io::Error>> {
    let level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let mut logger = simple_logger::SimpleLogger::new().with_level(level);
    if !debug {
        logger = logger
            .with_module_level("tracing", LevelFilter::Warn)
            .with_module_level("rustls", LevelFilter::Info)
            .with_module_level("hyper_util", LevelFilter::Info)
            .with_module_level("reqwest", LevelFilter::Info)
            .with_module_level("h2", LevelFilter::Info);
    }
    logger.init().map_err(|err| {
        eprintln!("Failed to initialize logger: {}", err);
        Box::new(std::io::Error::other(err))
    })
}

/// How the image API should render each scene.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ImageSettings {
    /// Image model, eg `dall-e-3`
    pub model: String,
    /// `WIDTHxHEIGHT`
    pub size: String,
    /// `standard` or `hd`
    pub quality: String,
    /// `vivid` or `natural`
    pub style: String,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            model: IMAGE_MODELS[0].to_string(),
            size: IMAGE_SIZES[0].to_string(),
            quality: IMAGE_QUALITIES[0].to_string(),
            style: IMAGE_STYLES[0].to_string(),
        }
    }
}

impl ImageSettings {
    /// Rejects values the image API doesn't accept. `gpt-image-*` models are
    /// allowed alongside the listed DALL-E models.
    pub fn validate(&self) -> Result<(), AdtoonError> {
        let model_ok =
            IMAGE_MODELS.contains(&self.model.as_str()) || self.model.starts_with("gpt-image");
        if !model_ok {
            return Err(AdtoonError::BadRequest(format!(
                "unknown image model {}",
                self.model
            )));
        }
        check_allowed("size", &self.size, &IMAGE_SIZES)?;
        check_allowed("quality", &self.quality, &IMAGE_QUALITIES)?;
        check_allowed("style", &self.style, &IMAGE_STYLES)?;
        Ok(())
    }
}

fn check_allowed(field: &str, value: &str, allowed: &[&str]) -> Result<(), AdtoonError> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(AdtoonError::BadRequest(format!(
            "{field} must be one of {}, got {value}",
            allowed.join(", ")
        )))
    }
}

/// Checks a scene-writing model against the offered list.
pub fn validate_scene_model(model: &str) -> Result<(), AdtoonError> {
    check_allowed("scene model", model, &SCENE_MODELS)
}

/// Runtime settings for the web front-end.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Where images and the generation report go
    pub output_dir: PathBuf,
    /// Where generated scene files go
    pub scenes_dir: PathBuf,
    /// Default scene-writing model
    pub scene_model: String,
    /// Default image settings
    pub image: ImageSettings,
    /// Pause between consecutive image calls
    pub rate_limit_delay: Duration,
    /// Retry rounds after a batch
    pub max_retries: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: OUTPUT_DIR.clone(),
            scenes_dir: SCENES_DIR.clone(),
            scene_model: SCENE_MODELS[0].to_string(),
            image: ImageSettings::default(),
            rate_limit_delay: DEFAULT_RATE_LIMIT_DELAY,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_image_settings_are_valid() {
        assert!(ImageSettings::default().validate().is_ok());
    }

    #[test]
    fn rejects_unknown_values() {
        let mut settings = ImageSettings {
            size: "512x512".to_string(),
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        settings.size = "1792x1024".to_string();
        settings.style = "noir".to_string();
        assert!(settings.validate().is_err());

        settings.style = "natural".to_string();
        settings.model = "gpt-image-1".to_string();
        assert!(settings.validate().is_ok());

        settings.model = "midjourney".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn scene_models() {
        assert!(validate_scene_model("gpt-4o").is_ok());
        assert!(validate_scene_model("llama").is_err());
    }

    #[test]
    fn default_config_uses_twelve_second_delay() {
        let config = AppConfig::default();
        assert_eq!(config.rate_limit_delay, Duration::from_secs(12));
        assert_eq!(config.max_retries, 3);
    }
}
