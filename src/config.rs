//! Runtime configuration read from `WIDECOL_*` environment variables.

use crate::error::{ImportError, Result};
use crate::import::{ImportOptions, RetryPolicy};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq)]
pub struct ImportConfig {
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub state_dir: PathBuf,
    /// JSON registry file; the built-in MovieLens registry when unset
    pub registry: Option<PathBuf>,
    pub workers: usize,
    pub max_retries: usize,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
    pub max_skip_ratio: Option<f64>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            output_dir: PathBuf::from("output"),
            state_dir: PathBuf::from(".import-state"),
            registry: None,
            workers: 4,
            max_retries: 3,
            retry_initial_ms: 100,
            retry_max_ms: 10_000,
            max_skip_ratio: None,
        }
    }
}

fn env_parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ImportError::Config(format!("{} has invalid value '{}'", name, raw))),
    }
}

impl ImportConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup`, falling back to defaults for
    /// unset variables.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            data_dir: env_parse(&lookup, "WIDECOL_DATA_DIR")?.unwrap_or(defaults.data_dir),
            output_dir: env_parse(&lookup, "WIDECOL_OUTPUT_DIR")?.unwrap_or(defaults.output_dir),
            state_dir: env_parse(&lookup, "WIDECOL_STATE_DIR")?.unwrap_or(defaults.state_dir),
            registry: env_parse(&lookup, "WIDECOL_REGISTRY")?,
            workers: env_parse(&lookup, "WIDECOL_WORKERS")?.unwrap_or(defaults.workers),
            max_retries: env_parse(&lookup, "WIDECOL_MAX_RETRIES")?.unwrap_or(defaults.max_retries),
            retry_initial_ms: env_parse(&lookup, "WIDECOL_RETRY_INITIAL_MS")?
                .unwrap_or(defaults.retry_initial_ms),
            retry_max_ms: env_parse(&lookup, "WIDECOL_RETRY_MAX_MS")?.unwrap_or(defaults.retry_max_ms),
            max_skip_ratio: env_parse(&lookup, "WIDECOL_MAX_SKIP_RATIO")?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(ImportError::Config("worker count must be at least 1".to_string()));
        }
        if let Some(ratio) = self.max_skip_ratio {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(ImportError::Config(format!(
                    "max skip ratio {} is outside [0, 1]",
                    ratio
                )));
            }
        }
        if self.retry_initial_ms > self.retry_max_ms {
            return Err(ImportError::Config(format!(
                "initial retry delay {}ms exceeds maximum {}ms",
                self.retry_initial_ms, self.retry_max_ms
            )));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.retry_initial_ms),
            Duration::from_millis(self.retry_max_ms),
        )
    }

    pub fn import_options(&self) -> ImportOptions {
        ImportOptions {
            workers: self.workers,
            retry: self.retry_policy(),
            max_skip_ratio: self.max_skip_ratio,
            state_dir: Some(self.state_dir.clone()),
        }
    }
}
