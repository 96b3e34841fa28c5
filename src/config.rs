//! Runtime configuration
//!
//! Read from `RELAY_*` environment variables, after loading a `.env` file
//! when one exists. The bind address may also be given as the first
//! command-line argument.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ConfigError;

/// Default server address
pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// Channel buffer size for server commands
pub const DEFAULT_COMMAND_BUFFER: usize = 256;

/// Per-connection outbound buffer
pub const DEFAULT_OUTBOUND_BUFFER: usize = 32;

/// Largest image payload accepted for hosting
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub addr: String,
    pub command_buffer: usize,
    pub outbound_buffer: usize,
    /// CIDR → country table
    pub geo_table: Option<PathBuf>,
    pub image_upload_url: Option<String>,
    pub image_upload_preset: Option<String>,
    pub max_image_bytes: usize,
    /// JSON-lines event log; events go to tracing when unset
    pub event_log: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            command_buffer: DEFAULT_COMMAND_BUFFER,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            geo_table: None,
            image_upload_url: None,
            image_upload_preset: None,
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            event_log: None,
        }
    }
}

impl Config {
    /// Load from the process environment and arguments
    ///
    /// A `.env` file in the working directory is loaded first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut config = Self::from_lookup(|key| env::var(key).ok())?;
        if let Some(addr) = env::args().nth(1) {
            config.addr = addr;
        }
        Ok(config)
    }

    /// Load from the process environment, falling back to a dotenv file
    ///
    /// Variables already set in the environment win over the file.
    pub fn from_env_file(path: &Path) -> Result<Self, ConfigError> {
        let bad = |e: dotenvy::Error| ConfigError::EnvFile(format!("{}: {}", path.display(), e));
        let file = dotenvy::from_path_iter(path)
            .map_err(bad)?
            .collect::<Result<HashMap<String, String>, _>>()
            .map_err(bad)?;

        Self::from_lookup(|key| env::var(key).ok().or_else(|| file.get(key).cloned()))
    }

    /// Load from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let text = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            addr: text("RELAY_ADDR").unwrap_or(defaults.addr),
            command_buffer: parse(&lookup, "RELAY_COMMAND_BUFFER")?
                .unwrap_or(defaults.command_buffer),
            outbound_buffer: parse(&lookup, "RELAY_OUTBOUND_BUFFER")?
                .unwrap_or(defaults.outbound_buffer),
            geo_table: text("RELAY_GEO_TABLE").map(PathBuf::from),
            image_upload_url: text("RELAY_IMAGE_UPLOAD_URL"),
            image_upload_preset: text("RELAY_IMAGE_UPLOAD_PRESET"),
            max_image_bytes: parse(&lookup, "RELAY_MAX_IMAGE_BYTES")?
                .unwrap_or(defaults.max_image_bytes),
            event_log: text("RELAY_EVENT_LOG").map(PathBuf::from),
        })
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
    }
}
