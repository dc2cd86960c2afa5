//! # BatchPrompt - send a CSV file of prompts to an LLM API service
//!
//! Reads every row of a prompt file, sends the prompt column to Claude, Gemini or
//! ChatGPT one request at a time and writes each row, with the model's answer in an
//! extra column, to an output CSV file. The output file is flushed after every row,
//! so an interrupted run leaves behind complete rows only.
//!
//! When a service answers with a rate limit error the same row is retried with the
//! next API key of the pool. Once every key has been tried the run pauses for a
//! cooldown period before going on. Any other error is written into the response
//! column as `Error: <message>` and the run moves on to the next row.
//!
//! The `merge_csv` tool combines the response files of the different services into
//! one table, joined on the `base_question_id` column.
//!
//! # Quick Start:
//!
//! //     use batchprompt::llm::Provider;
//! //     use batchprompt::processor::run_provider;
//! //     use batchprompt::settings::AppConfig;
//! //
//! //     let app_config = AppConfig::load(None)?;
//! //     let summary = run_provider(Provider::Claude, &app_config)?;
//! //     println!("{} rows saved to {}", summary.rows_processed, summary.output_csv.display());
//!
//! The api keys are picked up from environment variables (or a `.env` file), either
//! as a comma separated list or as a single key:
//!   - Claude: ANTHROPIC_API_KEYS or ANTHROPIC_API_KEY
//!   - Gemini: GOOGLE_API_KEYS or GOOGLE_API_KEY
//!   - ChatGPT: OPENAI_API_KEYS or OPENAI_API_KEY
//!
//! # Configuration File
//! All entries are optional, `batchprompt.toml` may look like this:
//!
//! <tt>
//!
//! [processor]
//!
//! input_csv = "generated_prompts.csv"
//!
//! inter_request_delay_secs = 1
//!
//! cooldown_secs = 60
//!
//! max_rate_limit_retries = 100
//!
//!
//!
//! [llm_apis."claude"]
//!
//! model_name = "claude-sonnet-4-20250514"
//!
//! max_gen_tokens = 512
//!
//! temperature = 0.7
//!
//! output_csv = "generated_responses_claude.csv"
//!
//! model_api_timeout = 200
//!
//! </tt>
//!
//! Every value can also be set from the environment, e.g.
//! `BATCHPROMPT__PROCESSOR__COOLDOWN_SECS=30`.

pub mod credentials;
pub mod error;
pub mod llm;
pub mod merge;
pub mod processor;
pub mod settings;
pub mod providers {
    pub mod anthropic;
    pub mod google;
    pub mod openai;
}

/// Held by tests that set or remove process environment variables.
#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Sends `log` records to stderr. The level defaults to `info` and can be changed
/// with RUST_LOG, e.g. `RUST_LOG=batchprompt=debug`.
pub fn init_logging() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // the fmt subscriber also installs the log -> tracing bridge
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}
