use std::sync::Arc;

use adtoon::config::{setup_logging, validate_scene_model};
use adtoon::openai::OpenAiClient;
use clap::Parser;
use tracing::error;

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    // a missing .env is fine
    let _ = dotenvy::dotenv();
    let cli = adtoon::cli::CliOptions::parse();

    if setup_logging(cli.debug).is_err() {
        return;
    }

    let config = cli.app_config();
    if let Err(err) = config
        .image
        .validate()
        .and_then(|()| validate_scene_model(&config.scene_model))
    {
        error!("Invalid configuration: {err}");
        return;
    }

    let client = match OpenAiClient::new(&cli.openai_api_key) {
        Ok(client) => Arc::new(client),
        Err(err) => {
            error!("Failed to build OpenAI client: {err}");
            return;
        }
    };

    if let Err(err) = adtoon::web::setup_server(
        &cli.listen_address,
        cli.port,
        config,
        client.clone(),
        client,
    )
    .await
    {
        error!("Application error: {err}");
    }
}
