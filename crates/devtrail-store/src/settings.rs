//! Store configuration with layered loading.
//!
//! Loading flow:
//! 1. Start with compiled [`StoreSettings::default()`]
//! 2. If a settings file exists, deep-merge its values over the defaults
//! 3. Apply `DEVTRAIL_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised while loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Failed to read the settings file from disk.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to parse JSON in the settings file.
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// A settings value was invalid (e.g., out of range).
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

/// Storage engine settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Database file location.
    pub db_path: PathBuf,
    /// Maximum pooled connections.
    pub pool_size: u32,
    /// How long a connection waits on a locked database before returning busy.
    pub busy_timeout_ms: u64,
    /// Page cache per connection, in KiB.
    pub cache_size_kib: u32,
    /// How long to wait for a free pooled connection.
    pub connection_timeout_ms: u64,
    /// Default per-operation deadline.
    pub operation_timeout_ms: u64,
    /// Page size used when a search asks for 0.
    pub default_page_size: usize,
    /// Upper bound on search page size.
    pub max_page_size: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            db_path: devtrail_home().join("events.db"),
            pool_size: 8,
            busy_timeout_ms: 5000,
            cache_size_kib: 8192,
            connection_timeout_ms: 5000,
            operation_timeout_ms: 10_000,
            default_page_size: 50,
            max_page_size: 500,
        }
    }
}

impl StoreSettings {
    /// Busy timeout as a [`Duration`].
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Pool checkout timeout as a [`Duration`].
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Default operation deadline as a [`Duration`].
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// Resolve a requested page size: 0 means default, anything above the max is clamped.
    pub fn page_size(&self, requested: usize) -> usize {
        match requested {
            0 => self.default_page_size,
            n => n.min(self.max_page_size),
        }
    }

    /// Reject combinations no store can run with.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.pool_size == 0 {
            return Err(SettingsError::InvalidValue("poolSize must be at least 1".into()));
        }
        if self.operation_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "operationTimeoutMs must be at least 1".into(),
            ));
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err(SettingsError::InvalidValue(format!(
                "defaultPageSize must be in 1..={}",
                self.max_page_size
            )));
        }
        Ok(())
    }
}

fn devtrail_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".devtrail")
}

/// Resolve the path to the settings file (`~/.devtrail/store.json`).
pub fn settings_path() -> PathBuf {
    devtrail_home().join("store.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<StoreSettings, SettingsError> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, or the result fails [`StoreSettings::validate`], returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<StoreSettings, SettingsError> {
    let defaults = serde_json::to_value(StoreSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading store settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "store settings file not found, using defaults");
        defaults
    };

    let mut settings: StoreSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid or out-of-range values are ignored with a warning.
pub fn apply_env_overrides(settings: &mut StoreSettings) {
    if let Some(v) = read_env_string("DEVTRAIL_DB_PATH") {
        settings.db_path = PathBuf::from(v);
    }
    if let Some(v) = read_env_u64("DEVTRAIL_POOL_SIZE", 1, 64) {
        // bounded to 64 above
        settings.pool_size = u32::try_from(v).unwrap_or(settings.pool_size);
    }
    if let Some(v) = read_env_u64("DEVTRAIL_BUSY_TIMEOUT_MS", 0, 600_000) {
        settings.busy_timeout_ms = v;
    }
    if let Some(v) = read_env_u64("DEVTRAIL_OP_TIMEOUT_MS", 1, 3_600_000) {
        settings.operation_timeout_ms = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid integer env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
