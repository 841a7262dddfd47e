//! Runs every row of a Google Sheet through an LLM and writes the answers
//! into a new column.
//!
//!   sheet_analyzer --sheet-url https://docs.google.com/spreadsheets/d/<id>/edit \
//!       --sheet-name Sheet1 --columns name,review --new-column summary \
//!       --system-prompt "Summarise the review in one sentence."

use std::path::PathBuf;
use std::sync::Arc;

use adtoon::config::setup_logging;
use adtoon::constants::{DEFAULT_ANALYSIS_MODEL, DEFAULT_ROW_CONCURRENCY};
use adtoon::sheets::{ChatAnalyst, RowAnalyst, SheetJob, SheetsClient};
use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "sheet_analyzer")]
#[command(about = "Analyze spreadsheet rows with an LLM and write the results back")]
struct Args {
    /// Spreadsheet URL
    #[arg(long, env = "ADTOON_SHEET_URL")]
    sheet_url: String,

    /// Worksheet (tab) name
    #[arg(long, env = "ADTOON_SHEET_NAME")]
    sheet_name: String,

    /// Columns sent to the model, comma separated
    #[arg(long, value_delimiter = ',', required = true)]
    columns: Vec<String>,

    /// Header of the column the answers go in
    #[arg(long)]
    new_column: String,

    /// System prompt given with every row
    #[arg(long, conflicts_with = "system_prompt_file")]
    system_prompt: Option<String>,

    /// Read the system prompt from a file
    #[arg(long)]
    system_prompt_file: Option<PathBuf>,

    /// `gemini*` models use Gemini, anything else OpenAI
    #[arg(long, default_value = DEFAULT_ANALYSIS_MODEL, env = "ADTOON_ANALYSIS_MODEL")]
    model: String,

    /// Rows analyzed at the same time
    #[arg(long, default_value_t = DEFAULT_ROW_CONCURRENCY, env = "ADTOON_ROW_CONCURRENCY")]
    concurrency: usize,

    /// Also dump the results here as JSON
    #[arg(long, default_value = "analysis_results.json")]
    results_file: PathBuf,

    /// OpenAI API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// Gemini API key
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: Option<String>,

    /// OAuth bearer token with spreadsheet scope
    #[arg(long, env = "GOOGLE_SHEETS_TOKEN", hide_env_values = true)]
    sheets_token: String,

    /// Enable debug logging
    #[arg(long, env = "ADTOON_DEBUG")]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    setup_logging(args.debug).map_err(|err| anyhow::anyhow!(err))?;

    let system_prompt = match (&args.system_prompt, &args.system_prompt_file) {
        (Some(prompt), _) => prompt.clone(),
        (None, Some(path)) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?,
        (None, None) => bail!("Pass --system-prompt or --system-prompt-file"),
    };

    let analyst: Arc<dyn RowAnalyst> = Arc::new(ChatAnalyst::for_model(
        &args.model,
        args.openai_api_key.as_deref(),
        args.gemini_api_key.as_deref(),
    )?);
    let sheets = SheetsClient::new(&args.sheets_token)?;

    let job = SheetJob {
        sheet_url: args.sheet_url,
        sheet_name: args.sheet_name,
        columns: args.columns,
        system_prompt,
        new_column: args.new_column,
        concurrency: args.concurrency,
    };
    let results = job.run(&sheets, &analyst).await?;

    tokio::fs::write(&args.results_file, serde_json::to_vec_pretty(&results)?)
        .await
        .with_context(|| format!("Failed to write {}", args.results_file.display()))?;
    info!(
        "{} rows written to '{}', results in {}",
        results.len(),
        job.new_column,
        args.results_file.display()
    );
    Ok(())
}
