// file: credentials.rs

use std::fmt;
use log::info;
use crate::error::BatchError;

/// Ordered pool of API keys for one service, with a cursor that wraps around.
///
/// The pool is owned by the batch loop, nothing else reads or rotates it.
pub struct CredentialPool {
    keys: Vec<String>,
    index: usize,
    cycle_start: Option<usize>,
}

impl CredentialPool {
    /// Creates a pool from the given keys, or None if there are none.
    pub fn new(keys: Vec<String>) -> Option<CredentialPool> {
        if keys.is_empty() {
            return None;
        }
        Some(CredentialPool {
            keys,
            index: 0,
            cycle_start: None,
        })
    }

    /// Splits a comma separated list of keys, trimming whitespace and dropping blank entries.
    pub fn parse(key_list: &str) -> Vec<String> {
        key_list
            .split(',')
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(String::from)
            .collect()
    }

    /// Loads the pool from the environment.
    ///
    /// # Arguments
    ///
    /// * `list_var`: variable holding a comma separated list of keys, e.g. ANTHROPIC_API_KEYS
    /// * `single_var`: fallback variable holding one key, e.g. ANTHROPIC_API_KEY
    ///
    /// returns: Result<CredentialPool, BatchError>
    pub fn from_env(list_var: &str, single_var: &str) -> Result<CredentialPool, BatchError> {
        Self::from_values(
            std::env::var(list_var).ok(),
            std::env::var(single_var).ok(),
            list_var,
            single_var,
        )
    }

    /// Builds the pool from already-read variable values. The list takes precedence,
    /// the single key is used only when the list is absent or holds no keys.
    pub fn from_values(
        key_list: Option<String>,
        single_key: Option<String>,
        list_var: &str,
        single_var: &str,
    ) -> Result<CredentialPool, BatchError> {
        let mut keys = key_list.as_deref().map(Self::parse).unwrap_or_default();
        if keys.is_empty() {
            if let Some(key) = single_key.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
                keys.push(key.to_string());
            }
        }
        let pool = CredentialPool::new(keys).ok_or_else(|| BatchError::MissingCredentials {
            list_var: list_var.to_string(),
            single_var: single_var.to_string(),
        })?;
        info!("Loaded {} API key(s) for rotation", pool.len());
        Ok(pool)
    }

    pub fn current(&self) -> &str {
        &self.keys[self.index]
    }

    pub fn current_index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Remembers the key in use when a row first hits a rate limit. Calling it again
    /// before `reset_cycle` keeps the original starting point.
    pub fn mark_cycle_start(&mut self) {
        if self.cycle_start.is_none() {
            self.cycle_start = Some(self.index);
        }
    }

    pub fn reset_cycle(&mut self) {
        self.cycle_start = None;
    }

    /// Moves to the next key, wrapping at the end of the pool.
    ///
    /// Returns true when the rotation landed back on the key recorded by
    /// `mark_cycle_start`, i.e. every key has been tried since then.
    pub fn rotate(&mut self) -> bool {
        self.index = (self.index + 1) % self.keys.len();
        self.cycle_start == Some(self.index)
    }
}

impl fmt::Debug for CredentialPool {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("CredentialPool")
            .field("keys", &format_args!("<{} redacted>", self.keys.len()))
            .field("index", &self.index)
            .field("cycle_start", &self.cycle_start)
            .finish()
    }
}
