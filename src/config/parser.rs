use super::Config;
use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAMES: [&str; 2] = ["sidecar.yaml", "sidecar.yml"];

pub struct Parser;

impl Parser {
    pub fn new() -> Self {
        Self
    }

    /// Find config file starting from current directory
    pub fn find_config_file(&self) -> Option<PathBuf> {
        let current_dir = std::env::current_dir().ok()?;
        Self::find_config_in_dir(&current_dir)
    }

    pub fn find_config_in_dir(dir: &Path) -> Option<PathBuf> {
        for name in CONFIG_FILE_NAMES {
            let candidate = dir.join(name);
            if candidate.exists() {
                return Some(candidate);
            }
        }

        // Try parent directory
        dir.parent().and_then(Self::find_config_in_dir)
    }

    /// Load an explicit path, else the discovered file, else defaults.
    ///
    /// An explicit path that does not exist is an error; a missing
    /// discovered file is not.
    pub fn load_or_default(&self, explicit: Option<&Path>) -> Result<Config> {
        let config = match explicit {
            Some(path) => self.load_config(path)?,
            None => match self.find_config_file() {
                Some(path) => {
                    tracing::debug!("Using config file {}", path.display());
                    self.load_config(&path)?
                }
                None => Config::default(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Load config from file path
    pub fn load_config<P: AsRef<Path>>(&self, path: P) -> Result<Config> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        self.parse_config(&content)
    }

    /// Parse config from YAML string
    pub fn parse_config(&self, content: &str) -> Result<Config> {
        if content.trim().is_empty() {
            return Ok(Config::default());
        }
        let config: Config = serde_yaml::from_str(content)
            .map_err(|e| Error::Parse(format!("Failed to parse YAML config: {}", e)))?;

        Ok(config)
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}
