//! Configuration loader.
//!
//! Environment variables are the primary source; when the required ones are
//! absent the loader falls back to probing for a `config.*` / `dealflow.*`
//! file in JSON or TOML form.
//!
//! ## Environment Variables
//! - `DEALFLOW_DB_PATH`: Cache database file path (required)
//! - `DEALFLOW_DB_POOL_SIZE`: Connection pool size
//! - `DEALFLOW_CRM_BASE_URL`: CRM API base URL (required)
//! - `DEALFLOW_CRM_API_TOKEN`: CRM API token (required)
//! - `DEALFLOW_CRM_PAGE_SIZE`: Page size for paginated CRM endpoints
//! - `DEALFLOW_ORACLE_API_KEY`: API key for the forecast oracle
//! - `DEALFLOW_ORACLE_MODEL`: Oracle model identifier
//! - `DEALFLOW_SYNC_INTERVAL`: Sync interval in seconds
//! - `DEALFLOW_SYNC_ENABLED`: Whether periodic sync runs (true/false)
//!
//! Forecast rule thresholds have no environment mapping; tune them through a
//! config file.
//!
//! ## File Probe Order
//! The working directory, its parent, and the executable's directory are each
//! checked for `config.json`, `config.toml`, `dealflow.json` and
//! `dealflow.toml`, in that order; the first existing file wins.

use std::path::{Path, PathBuf};

use dealflow_domain::{
    Config, CrmConfig, DatabaseConfig, DealflowError, ForecastConfig, OracleConfig, Result,
    SyncConfig,
};

/// Load configuration, preferring the environment over config files.
///
/// # Errors
/// Returns `DealflowError::Config` when neither source yields a full
/// configuration.
pub fn load() -> Result<Config> {
    match load_from_env() {
        Ok(config) => {
            tracing::info!("configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = ?e, "environment configuration incomplete, probing for files");
            load_from_file(None)
        }
    }
}

/// Build the configuration from `DEALFLOW_*` environment variables.
///
/// The database path, CRM base URL and CRM API token are required; every
/// other variable falls back to its default when unset.
///
/// # Errors
/// Returns `DealflowError::Config` if a required variable is missing or a
/// numeric variable has an invalid value.
pub fn load_from_env() -> Result<Config> {
    let db_path = required_env("DEALFLOW_DB_PATH")?;
    let crm_base_url = required_env("DEALFLOW_CRM_BASE_URL")?;
    let crm_api_token = required_env("DEALFLOW_CRM_API_TOKEN")?;

    let mut config = Config {
        database: DatabaseConfig {
            path: db_path,
            pool_size: dealflow_domain::constants::DEFAULT_DB_POOL_SIZE,
        },
        crm: CrmConfig {
            base_url: crm_base_url,
            api_token: crm_api_token,
            page_size: dealflow_domain::constants::DEFAULT_CRM_PAGE_SIZE,
        },
        oracle: OracleConfig::default(),
        sync: SyncConfig::default(),
        forecast: ForecastConfig::default(),
    };

    if let Some(pool_size) = env_parse::<u32>("DEALFLOW_DB_POOL_SIZE")? {
        config.database.pool_size = pool_size;
    }
    if let Some(page_size) = env_parse::<u32>("DEALFLOW_CRM_PAGE_SIZE")? {
        config.crm.page_size = page_size;
    }
    if let Ok(api_key) = std::env::var("DEALFLOW_ORACLE_API_KEY") {
        config.oracle.api_key = api_key;
    }
    if let Ok(model) = std::env::var("DEALFLOW_ORACLE_MODEL") {
        config.oracle.model = model;
    }
    if let Some(interval) = env_parse::<u64>("DEALFLOW_SYNC_INTERVAL")? {
        config.sync.interval_seconds = interval;
    }
    config.sync.enabled = env_bool("DEALFLOW_SYNC_ENABLED", config.sync.enabled);

    Ok(config)
}

/// Read and parse a config file, probing the standard locations when no
/// explicit path is given. The format follows the file extension.
///
/// # Errors
/// Returns `DealflowError::Config` if no file is found or it does not parse.
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(explicit) if explicit.exists() => explicit,
        Some(explicit) => {
            return Err(DealflowError::Config(format!(
                "config file not found: {}",
                explicit.display()
            )));
        }
        None => probe_config_paths().ok_or_else(|| {
            DealflowError::Config("no config file found in any probed location".into())
        })?,
    };

    tracing::info!(path = %config_path.display(), "loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| DealflowError::Config(format!("failed to read config file: {e}")))?;

    parse_config(&contents, &config_path)
}

fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(contents).map_err(|e| {
            DealflowError::Config(format!("invalid TOML in {}: {e}", path.display()))
        }),
        // Extensionless files are read as JSON
        Some("json") | None => serde_json::from_str(contents).map_err(|e| {
            DealflowError::Config(format!("invalid JSON in {}: {e}", path.display()))
        }),
        Some(other) => Err(DealflowError::Config(format!("unsupported config format: {other}"))),
    }
}

/// First existing config file among the probed locations, if any.
pub fn probe_config_paths() -> Option<PathBuf> {
    const BASENAMES: [&str; 4] = ["config.json", "config.toml", "dealflow.json", "dealflow.toml"];

    let mut dirs = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        let parent = cwd.join("..");
        dirs.push(cwd);
        dirs.push(parent);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            dirs.push(dir.to_path_buf());
        }
    }

    dirs.iter()
        .flat_map(|dir| BASENAMES.iter().map(move |name| dir.join(name)))
        .find(|candidate| candidate.exists())
}

fn required_env(key: &str) -> Result<String> {
    std::env::var(key)
        .map_err(|_| DealflowError::Config(format!("missing required environment variable: {key}")))
}

/// Unset means `None`; set-but-invalid is an error rather than a silent
/// fallback to the default.
fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| DealflowError::Config(format!("invalid value for {key}: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Accepts `1`/`true`/`yes`/`on` (case-insensitive) as true; anything else
/// set is false, unset keeps the default.
fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(raw) => matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}
