/// Runtime tuning for the handle-table scanner and liberation flow
///
/// No configuration files are read; defaults can be overridden through
/// `HANDLEFREE_*` environment variables.
use crate::config::types::{LiberationError, Result};
use serde::{Deserialize, Serialize};

pub const ENV_INITIAL_BUFFER_BYTES: &str = "HANDLEFREE_INITIAL_BUFFER_BYTES";
pub const ENV_BUFFER_HEADROOM_BYTES: &str = "HANDLEFREE_BUFFER_HEADROOM_BYTES";
pub const ENV_MAX_QUERY_ATTEMPTS: &str = "HANDLEFREE_MAX_QUERY_ATTEMPTS";
pub const ENV_MAX_BUFFER_BYTES: &str = "HANDLEFREE_MAX_BUFFER_BYTES";
pub const ENV_VERIFY_EXCLUSIVE: &str = "HANDLEFREE_VERIFY_EXCLUSIVE";

/// Liberation configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiberationConfig {
    /// First guess for the handle snapshot buffer
    pub initial_buffer_bytes: usize,
    /// Added on top of the size the kernel asks for; the table keeps growing between calls
    pub buffer_headroom_bytes: usize,
    /// Upper bound on NtQuerySystemInformation calls per scan
    pub max_query_attempts: u32,
    /// Upper bound on the snapshot buffer
    pub max_buffer_bytes: usize,
    /// Re-open the file exclusively after `liberate` to confirm the lock is gone
    #[serde(default)]
    pub verify_exclusive_access: bool,
}

impl Default for LiberationConfig {
    fn default() -> Self {
        Self {
            initial_buffer_bytes: 1024 * 1024,
            buffer_headroom_bytes: 1024,
            max_query_attempts: 16,
            max_buffer_bytes: 256 * 1024 * 1024,
            verify_exclusive_access: false,
        }
    }
}

impl LiberationConfig {
    /// Defaults with environment overrides applied, then validated
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_INITIAL_BUFFER_BYTES) {
            config.initial_buffer_bytes = parse_number(ENV_INITIAL_BUFFER_BYTES, &value)?;
        }
        if let Some(value) = lookup(ENV_BUFFER_HEADROOM_BYTES) {
            config.buffer_headroom_bytes = parse_number(ENV_BUFFER_HEADROOM_BYTES, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_QUERY_ATTEMPTS) {
            config.max_query_attempts = parse_number(ENV_MAX_QUERY_ATTEMPTS, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_BUFFER_BYTES) {
            config.max_buffer_bytes = parse_number(ENV_MAX_BUFFER_BYTES, &value)?;
        }
        if let Some(value) = lookup(ENV_VERIFY_EXCLUSIVE) {
            config.verify_exclusive_access = parse_flag(ENV_VERIFY_EXCLUSIVE, &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.initial_buffer_bytes == 0 {
            return Err(LiberationError::Config(
                "initial_buffer_bytes must be greater than zero".to_string(),
            ));
        }
        if self.max_query_attempts == 0 {
            return Err(LiberationError::Config(
                "max_query_attempts must be greater than zero".to_string(),
            ));
        }
        if self.initial_buffer_bytes > self.max_buffer_bytes {
            return Err(LiberationError::Config(format!(
                "initial_buffer_bytes ({}) exceeds max_buffer_bytes ({})",
                self.initial_buffer_bytes, self.max_buffer_bytes
            )));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| LiberationError::Config(format!("{} is not a valid number: {:?}", key, value)))
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(LiberationError::Config(format!(
            "{} is not a valid flag: {:?}",
            key, other
        ))),
    }
}
