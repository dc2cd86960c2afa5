// file: processor.rs

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use log::{debug, error, info, warn};
use crate::credentials::CredentialPool;
use crate::error::{BatchError, ProviderError};
use crate::llm::{LLMTextGenBuilder, Provider, TextGenerator};
use crate::providers::openai::OPENAI_MODEL_ENV;
use crate::settings::{AppConfig, ProviderSettings};

/// Pauses taken by the batch loop, and how long a rate limited row is retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Pause after each row is written.
    pub inter_request_delay: Duration,
    /// Pause after switching to the next API key.
    pub rotation_delay: Duration,
    /// Pause once every key in the pool has been rate limited for the same row.
    pub cooldown: Duration,
    /// Rate limit retries allowed per row before the row is recorded as an error.
    /// None retries without limit.
    pub max_rate_limit_retries: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            inter_request_delay: Duration::from_secs(1),
            rotation_delay: Duration::from_secs(1),
            cooldown: Duration::from_secs(60),
            max_rate_limit_retries: None,
        }
    }
}

impl RetryPolicy {
    fn allows_retry(&self, retries_so_far: u32) -> bool {
        match self.max_rate_limit_retries {
            Some(max_retries) => retries_so_far < max_retries,
            None => true,
        }
    }
}

pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Blocks the current thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
    }
}

/// Column of the input file that holds the prompt text.
pub const PROMPT_COLUMN: &str = "generated_prompt";

/// All prompt rows of the input file, held in memory so a row can be sent again
/// after a rate limit.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptBatch {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub prompt_column: String,
}

impl PromptBatch {
    /// Reads the whole input CSV file.
    ///
    /// # Arguments
    ///
    /// * `path`: CSV file with a header row
    /// * `prompt_column`: name of the column holding the prompt text
    ///
    /// returns: Result<PromptBatch, BatchError>
    pub fn load(path: &Path, prompt_column: &str) -> Result<PromptBatch, BatchError> {
        if !path.is_file() {
            return Err(BatchError::InputNotFound(path.to_path_buf()));
        }
        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => BatchError::InputNotFound(path.to_path_buf()),
            _ => BatchError::InputRead {
                path: path.to_path_buf(),
                source: csv::Error::from(e),
            },
        })?;
        Self::from_reader(file, prompt_column).map_err(|source| BatchError::InputRead {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_reader<R: io::Read>(reader: R, prompt_column: &str) -> Result<PromptBatch, csv::Error> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = csv_reader.headers()?.iter().map(String::from).collect();
        if headers.is_empty() {
            return Err(csv::Error::from(io::Error::new(
                io::ErrorKind::InvalidData,
                "missing header row",
            )));
        }

        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record?;
            let mut row: Vec<String> = record.iter().map(String::from).collect();
            if row.len() > headers.len() {
                warn!(
                    "Row {} has {} fields but the header has {}, dropping the extra fields",
                    rows.len() + 1,
                    row.len(),
                    headers.len()
                );
                row.truncate(headers.len());
            }
            rows.push(row);
        }

        Ok(PromptBatch {
            headers,
            rows,
            prompt_column: prompt_column.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Prompt text of a row. Fails with `KeyMissing` when the header has no prompt
    /// column or the row is too short to reach it.
    pub fn prompt(&self, row_index: usize) -> Result<&str, ProviderError> {
        self.headers
            .iter()
            .position(|h| h == &self.prompt_column)
            .and_then(|col| self.rows.get(row_index)?.get(col))
            .map(String::as_str)
            .ok_or_else(|| ProviderError::KeyMissing(self.prompt_column.clone()))
    }

    fn output_record(&self, row_index: usize, response: &str) -> Vec<String> {
        let mut record = self.rows[row_index].clone();
        record.resize(self.headers.len(), String::new());
        record.push(response.to_string());
        record
    }
}

/// Counters reported at the end of a run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub rows_processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub rate_limit_retries: usize,
    pub key_rotations: usize,
    pub output_csv: PathBuf,
}

/// Sends every row of a batch to one LLM service, one request at a time, and
/// writes each answered row to the output file as soon as it is done.
pub struct BatchProcessor {
    generator: Box<dyn TextGenerator>,
    credentials: CredentialPool,
    policy: RetryPolicy,
    sleeper: Box<dyn Sleeper>,
}

impl BatchProcessor {
    pub fn new(generator: Box<dyn TextGenerator>, credentials: CredentialPool, policy: RetryPolicy) -> BatchProcessor {
        BatchProcessor {
            generator,
            credentials,
            policy,
            sleeper: Box::new(ThreadSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Box<dyn Sleeper>) -> BatchProcessor {
        self.sleeper = sleeper;
        self
    }

    pub fn credentials(&self) -> &CredentialPool {
        &self.credentials
    }

    /// Processes all rows of `batch`, overwriting `output_path`.
    ///
    /// The header is written before the first request. Every row is flushed right
    /// after it is written, so an interrupted run leaves only whole rows behind.
    /// Per-row failures are recorded in the response column; only file errors
    /// end the run early.
    pub fn run(&mut self, batch: &PromptBatch, output_path: &Path) -> Result<RunSummary, BatchError> {
        let output_error = |source: csv::Error| BatchError::OutputWrite {
            path: output_path.to_path_buf(),
            source,
        };
        let service = self.generator.service_name().to_string();
        info!(
            "Starting to process {} prompts from column '{}' with {}...",
            batch.len(),
            batch.prompt_column,
            service
        );

        let mut writer = csv::Writer::from_path(output_path).map_err(output_error)?;
        let mut header = batch.headers.clone();
        header.push(self.generator.response_column().to_string());
        writer.write_record(&header).map_err(output_error)?;
        writer.flush().map_err(|e| output_error(csv::Error::from(e)))?;

        let mut summary = RunSummary {
            output_csv: output_path.to_path_buf(),
            ..RunSummary::default()
        };
        let mut row_index = 0;
        let mut row_retries: u32 = 0;

        while row_index < batch.len() {
            let row_number = row_index + 1;
            info!("Processing row {}: Sending prompt to {} API...", row_number, service);

            let outcome = batch
                .prompt(row_index)
                .and_then(|prompt| self.generator.generate(self.credentials.current(), prompt));

            let response = match outcome {
                Ok(text) => {
                    summary.succeeded += 1;
                    text
                }
                Err(err) if err.is_rate_limited() && self.policy.allows_retry(row_retries) => {
                    warn!(
                        "Rate limit hit for {} API key index {}. Attempting to switch key.",
                        service,
                        self.credentials.current_index()
                    );
                    debug!("Rate limit detail: {}", err);
                    row_retries += 1;
                    summary.rate_limit_retries += 1;
                    self.handle_rate_limit(&service, &mut summary);
                    continue;
                }
                Err(err) => {
                    if matches!(err, ProviderError::InvalidApiKey) {
                        warn!(
                            "{} API key index {} cannot be sent in a request header.",
                            service,
                            self.credentials.current_index()
                        );
                    }
                    error!(
                        "An error occurred while processing row {} with API key index {}: {}",
                        row_number,
                        self.credentials.current_index(),
                        err
                    );
                    summary.failed += 1;
                    format!("Error: {}", err)
                }
            };

            writer
                .write_record(&batch.output_record(row_index, &response))
                .map_err(output_error)?;
            writer.flush().map_err(|e| output_error(csv::Error::from(e)))?;
            debug!("Saved row {} to '{}'", row_number, output_path.display());

            row_index += 1;
            row_retries = 0;
            summary.rows_processed += 1;
            self.credentials.reset_cycle();

            if row_index < batch.len() {
                self.sleeper.sleep(self.policy.inter_request_delay);
            }
        }

        info!(
            "Processing complete. {} rows ({} failed) have been saved to '{}'.",
            summary.rows_processed,
            summary.failed,
            output_path.display()
        );
        Ok(summary)
    }

    fn handle_rate_limit(&mut self, service: &str, summary: &mut RunSummary) {
        self.credentials.mark_cycle_start();
        let full_cycle = self.credentials.rotate();
        summary.key_rotations += 1;
        info!("Switching to {} API key index {}.", service, self.credentials.current_index());

        if full_cycle {
            warn!(
                "All {} API keys have been rate-limited. Waiting {} seconds before retrying.",
                service,
                self.policy.cooldown.as_secs()
            );
            self.sleeper.sleep(self.policy.cooldown);
        } else {
            self.sleeper.sleep(self.policy.rotation_delay);
        }
    }
}

/// Wires a complete run for one service from the configuration and environment:
/// API keys, HTTP client, input rows and output file.
pub fn run_provider(provider: Provider, app_config: &AppConfig) -> Result<RunSummary, BatchError> {
    let mut settings = app_config.provider_settings(provider);
    apply_model_override(provider, &mut settings, std::env::var(OPENAI_MODEL_ENV).ok());
    info!("Using {} model '{}'", provider.service_name(), settings.model_name);

    let (list_var, single_var) = provider.key_env_vars();
    let credentials = CredentialPool::from_env(list_var, single_var)?;
    let generator = LLMTextGenBuilder::build(provider, &settings)?;

    let processor_settings = &app_config.processor;
    let batch = PromptBatch::load(&processor_settings.input_csv, PROMPT_COLUMN)?;

    let mut processor = BatchProcessor::new(generator, credentials, processor_settings.retry_policy());
    processor.run(&batch, &settings.output_csv)
}

/// The OPENAI_MODEL environment variable replaces the configured OpenAI model.
fn apply_model_override(provider: Provider, settings: &mut ProviderSettings, env_model: Option<String>) {
    if provider != Provider::OpenAi {
        return;
    }
    if let Some(model_name) = env_model {
        if !model_name.trim().is_empty() {
            settings.model_name = model_name.trim().to_string();
        }
    }
}
