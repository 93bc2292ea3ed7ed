use std::path::PathBuf;
use std::time::Duration;
use std::{env, io};

use serde::Serialize;
use tracing::debug;

pub const DEFAULT_FILTER_DEBOUNCE_MS: u64 = 300;
pub const DEFAULT_ADMIN_TIER_NAME: &str = "Admin";
pub const DEFAULT_TIER_DELIMITER: char = '-';
const DEFAULT_DIAGNOSTICS_BUFFER_MAX_BYTES: u64 = 5 * 1024 * 1024;
const DEFAULT_DIAGNOSTICS_BUFFER_MAX_FILES: usize = 5;

#[derive(Clone, Debug, Serialize)]
pub struct AppConfig {
    pub filter_debounce_ms: u64,
    pub storage_file_name: String,
    pub country_table_path: Option<PathBuf>,
    pub admin_tier_name: String,
    pub tier_delimiter: char,
    pub diagnostics_enabled: bool,
    pub diagnostics_batch_size: usize,
    pub diagnostics_buffer_max_bytes: u64,
    pub diagnostics_buffer_max_files: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            filter_debounce_ms: parse_u64("FILTER_DEBOUNCE_MS", DEFAULT_FILTER_DEBOUNCE_MS),
            storage_file_name: env::var("STORAGE_FILE_NAME")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| "candidate-filters.db".to_string()),
            country_table_path: env::var("COUNTRY_TABLE_PATH")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            admin_tier_name: env::var("ADMIN_TIER_NAME")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_ADMIN_TIER_NAME.to_string()),
            tier_delimiter: env::var("TIER_DELIMITER")
                .ok()
                .and_then(|v| v.trim().chars().next())
                .unwrap_or(DEFAULT_TIER_DELIMITER),
            diagnostics_enabled: parse_bool("DIAGNOSTICS_ENABLED", true),
            diagnostics_batch_size: parse_usize("DIAGNOSTICS_BATCH_SIZE", 25).max(1),
            diagnostics_buffer_max_bytes: parse_u64(
                "DIAGNOSTICS_BUFFER_MAX_BYTES",
                DEFAULT_DIAGNOSTICS_BUFFER_MAX_BYTES,
            ),
            diagnostics_buffer_max_files: parse_usize(
                "DIAGNOSTICS_BUFFER_MAX_FILES",
                DEFAULT_DIAGNOSTICS_BUFFER_MAX_FILES,
            )
            .max(1),
        }
    }

    pub fn filter_debounce(&self) -> Duration {
        Duration::from_millis(self.filter_debounce_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            filter_debounce_ms: DEFAULT_FILTER_DEBOUNCE_MS,
            storage_file_name: "candidate-filters.db".to_string(),
            country_table_path: None,
            admin_tier_name: DEFAULT_ADMIN_TIER_NAME.to_string(),
            tier_delimiter: DEFAULT_TIER_DELIMITER,
            diagnostics_enabled: true,
            diagnostics_batch_size: 25,
            diagnostics_buffer_max_bytes: DEFAULT_DIAGNOSTICS_BUFFER_MAX_BYTES,
            diagnostics_buffer_max_files: DEFAULT_DIAGNOSTICS_BUFFER_MAX_FILES,
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}
