use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{GatorError, Result};

const CONFIG_FILE_NAME: &str = ".gatorconfig.toml";
const CONFIG_PATH_ENV: &str = "GATOR_CONFIG_PATH";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Database connection string
    #[serde(default = "default_db_url")]
    pub db_url: String,
    /// Name of the active user, empty when nobody is logged in
    #[serde(default)]
    pub current_user_name: String,
    #[serde(skip)]
    path: PathBuf,
}

fn default_db_url() -> String {
    "sqlite:gator.db?mode=rwc".to_string()
}

impl Config {
    /// Location of the config file: `$GATOR_CONFIG_PATH`, else `~/.gatorconfig.toml`.
    pub fn default_path() -> Result<PathBuf> {
        if let Ok(custom) = std::env::var(CONFIG_PATH_ENV) {
            if !custom.is_empty() {
                return Ok(PathBuf::from(custom));
            }
        }
        dirs::home_dir()
            .map(|home| home.join(CONFIG_FILE_NAME))
            .ok_or_else(|| GatorError::Config("could not determine home directory".to_string()))
    }

    /// Load the config at `path`. A missing file yields the defaults, which are
    /// written back the first time the current user changes.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| {
                GatorError::Config(format!("failed to read {}: {}", path.display(), e))
            })?;
            Self::from_str(&content)?
        } else {
            Self::from_str("")?
        };
        config.path = path.to_path_buf();
        Ok(config)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| GatorError::Config(e.to_string()))
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current_user(&self) -> Option<&str> {
        if self.current_user_name.is_empty() {
            None
        } else {
            Some(&self.current_user_name)
        }
    }

    /// Set the active user and persist the change. An empty name logs out.
    pub fn set_user(&mut self, name: &str) -> Result<()> {
        self.current_user_name = name.to_string();
        self.save()
    }

    pub fn save(&self) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| GatorError::Config(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    GatorError::Config(format!("failed to create {}: {}", parent.display(), e))
                })?;
            }
        }
        std::fs::write(&self.path, content).map_err(|e| {
            GatorError::Config(format!("failed to write {}: {}", self.path.display(), e))
        })
    }
}
