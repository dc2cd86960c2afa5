// file: error.rs

use std::path::PathBuf;
use reqwest::StatusCode;
use thiserror::Error;

/// Errors that stop a batch run.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("the input file '{}' was not found", .0.display())]
    InputNotFound(PathBuf),

    #[error("unable to read input file '{}': {source}", path.display())]
    InputRead {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("unable to write output file '{}': {source}", path.display())]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("neither {list_var} nor {single_var} found in environment variables, please set one in your .env file")]
    MissingCredentials {
        list_var: String,
        single_var: String,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] config::ConfigError),

    #[error("unknown LLM service: {0}")]
    UnknownProvider(String),

    #[error("unable to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Errors raised by a single generation request. These never stop a batch run,
/// the processor either retries the row or records the message in the output.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("prompt column '{0}' not found in row")]
    KeyMissing(String),

    #[error("{service} API returned status {status}: {message}")]
    Status {
        service: String,
        status: StatusCode,
        message: String,
    },

    #[error("{0}")]
    Transport(String),

    #[error("unexpected response format: {0}")]
    InvalidResponse(String),

    #[error("{0} API returned no text")]
    EmptyResponse(String),

    #[error("API key contains characters that are not allowed in an HTTP header")]
    InvalidApiKey,
}

impl ProviderError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::RateLimited(_))
    }
}

/// Errors raised by the CSV merge tool.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("you need at least 2 CSV files to merge, got {0}")]
    NotEnoughFiles(usize),

    #[error("file '{}' does not exist", .0.display())]
    FileNotFound(PathBuf),

    #[error("'{}' is not a CSV file", .0.display())]
    NotCsv(PathBuf),

    #[error("error reading '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("error saving merged file '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("no valid CSV files to process")]
    NoValidFiles,
}
