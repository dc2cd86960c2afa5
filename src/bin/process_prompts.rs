//! Sends every prompt of the input CSV file to one LLM service and saves the
//! answers to that service's response file.

use std::path::PathBuf;
use anyhow::Context;
use clap::Parser;
use log::{error, info};
use batchprompt::llm::Provider;
use batchprompt::processor::run_provider;
use batchprompt::settings::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "process_prompts", about = "Send a CSV file of prompts to Claude, Gemini or OpenAI")]
struct Cli {
    /// Service to send the prompts to: claude, gemini or openai
    provider: Provider,

    /// Configuration file (defaults to batchprompt.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Input CSV file, overrides the configured one
    #[arg(long)]
    input: Option<PathBuf>,

    /// Output CSV file, overrides the configured one
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() {
    if let Err(e) = run() {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    // a missing .env file is fine, the variables may already be set
    let _ = dotenvy::dotenv();
    batchprompt::init_logging();

    let cli = Cli::parse();
    let mut app_config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(input) = cli.input {
        app_config.processor.input_csv = input;
    }
    if let Some(output) = cli.output {
        app_config
            .llm_apis
            .entry(cli.provider.config_key().to_string())
            .or_default()
            .output_csv = Some(output);
    }

    let summary = run_provider(cli.provider, &app_config)
        .with_context(|| format!("Processing prompts with {} failed", cli.provider.service_name()))?;
    info!(
        "All {} responses have been saved to '{}' ({} succeeded, {} failed, {} rate limit retries).",
        summary.rows_processed,
        summary.output_csv.display(),
        summary.succeeded,
        summary.failed,
        summary.rate_limit_retries
    );
    Ok(())
}
