// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

use std::{error::Error, path::PathBuf, str::FromStr};

use calpush_caldav::CalDavConfig;
use calpush_core::SyncConfig;
use tokio::fs;

pub const APP_NAME: &str = "calpush";

const CALPUSH_CONFIG_ENV: &str = "CALPUSH_CONFIG";
const CALPUSH_DEV_ENV: &str = "CALPUSH_DEV";

const CALPUSH_DEV_VALID_TRUE: &[&str] = &["1", "true", "yes"];
const CALPUSH_DEV_VALID_FALSE: &[&str] = &["0", "false", "no"];

/// Locates and reads the configuration file.
///
/// Lookup order: the explicit path, then `CALPUSH_CONFIG`, then the user
/// config directory. The last step is refused when `CALPUSH_DEV` is set.
#[tracing::instrument]
pub async fn parse_config(path: Option<PathBuf>) -> Result<Config, Box<dyn Error>> {
    let path = if let Some(path) = path {
        path
    } else if let Ok(env_path) = std::env::var(CALPUSH_CONFIG_ENV) {
        PathBuf::from(env_path)
    } else {
        if let Some(true) = is_dev_mode() {
            return Err(format!(
                "Development environment detected ({CALPUSH_DEV_ENV} is set): config must be explicitly specified via --config or {CALPUSH_CONFIG_ENV} environment variable",
            ).into());
        }
        let config = get_config_dir()?.join(format!("{APP_NAME}/config.toml"));
        if !config.exists() {
            return Err(format!("No config found at: {}", config.display()).into());
        }
        config
    };

    fs::read_to_string(&path)
        .await
        .map_err(|e| format!("Failed to read config file at {}: {}", path.display(), e))?
        .parse()
}

/// Configuration of the calpush binary.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    /// Server connection.
    pub caldav: CalDavConfig,

    /// Engine tuning.
    #[serde(default)]
    pub sync: SyncConfig,
}

impl FromStr for Config {
    type Err = Box<dyn Error>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(toml::from_str(s)?)
    }
}

fn get_config_dir() -> Result<PathBuf, Box<dyn Error>> {
    #[cfg(unix)]
    let config_dir = xdg::BaseDirectories::new().get_config_home();
    #[cfg(windows)]
    let config_dir = dirs::config_dir();
    config_dir.ok_or_else(|| "User-specific home directory not found".into())
}

fn is_dev_mode() -> Option<bool> {
    let val = std::env::var(CALPUSH_DEV_ENV).ok()?;
    let lower = val.to_lowercase();
    if CALPUSH_DEV_VALID_TRUE.contains(&lower.as_str()) {
        Some(true)
    } else if CALPUSH_DEV_VALID_FALSE.contains(&lower.as_str()) {
        Some(false)
    } else {
        tracing::warn!(
            "Unrecognized value for {}: '{}'. Expected one of: true: {}, false: {}. Treating as unset.",
            CALPUSH_DEV_ENV,
            val,
            CALPUSH_DEV_VALID_TRUE.join(", "),
            CALPUSH_DEV_VALID_FALSE.join(", ")
        );
        None
    }
}
