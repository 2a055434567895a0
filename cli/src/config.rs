//! Probe configuration: `~/.probe/config.toml`, overridable via `PROBE_CONFIG`.
//!
//! Every field is optional. A missing file means the built-in target
//! (`../main.ae` as `aecor` at 244:25 on `localhost:3333`).

use std::path::{Path, PathBuf};
use std::{env, fs};

use probe_lsp::{ClientConfig, Position};
use serde::Deserialize;

const CONFIG_ENV_VAR: &str = "PROBE_CONFIG";

#[derive(Debug, Default, Deserialize)]
pub struct ProbeConfig {
    pub client: Option<ClientConfig>,
    pub probe: Option<TargetConfig>,
}

/// What to open and where to ask for completions.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Resolved against the workspace root when relative.
    pub document: PathBuf,
    pub language_id: String,
    /// 0-based.
    pub line: u32,
    /// 0-based UTF-16 offset.
    pub character: u32,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            document: PathBuf::from("../main.ae"),
            language_id: String::from("aecor"),
            line: 244,
            character: 25,
        }
    }
}

impl TargetConfig {
    #[must_use]
    pub fn position(&self) -> Position {
        Position::new(self.line, self.character)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ProbeConfig {
    /// Load from the default location. `Ok(None)` when there is no file.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(None),
        }
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(Some(config)),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    /// Client settings with the workspace root defaulted to `cwd`.
    #[must_use]
    pub fn client_config(&self, cwd: &Path) -> ClientConfig {
        let mut client = self.client.clone().unwrap_or_default();
        if client.workspace_root.is_none() {
            client.workspace_root = Some(cwd.to_path_buf());
        }
        client
    }

    #[must_use]
    pub fn target(&self) -> TargetConfig {
        self.probe.clone().unwrap_or_default()
    }
}

pub fn config_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_ENV_VAR).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(".probe").join("config.toml"))
}
