//! Configuration loader for Mnemos.
//!
//! Reads `config.toml` from the data directory (`~/.mnemos/` by default)
//! and deserializes it into [`MnemosConfig`]. Falls back to defaults when
//! the file is missing or malformed.

use std::path::{Path, PathBuf};

use mnemos_types::config::MnemosConfig;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "MNEMOS_DATA_DIR";

/// Resolve the data directory: `MNEMOS_DATA_DIR`, else `~/.mnemos`.
pub fn default_data_dir() -> PathBuf {
    match std::env::var_os(DATA_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mnemos"),
    }
}

/// Load configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`MnemosConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - Otherwise returns the parsed config with out-of-range memory settings clamped.
pub async fn load_config(data_dir: &Path) -> MnemosConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return MnemosConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return MnemosConfig::default();
        }
    };

    match toml::from_str::<MnemosConfig>(&content) {
        Ok(mut config) => {
            config.memory = config.memory.sanitized();
            config
        }
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            MnemosConfig::default()
        }
    }
}
