//! `jac.toml` project configuration.
//!
//! The file is discovered by walking up from the starting directory, so
//! commands work from anywhere inside a project. All sections are optional;
//! an absent file yields the defaults.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

pub const CONFIG_FILE: &str = "jac.toml";

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "config read error: {msg}"),
            ConfigError::Parse(msg) => write!(f, "config parse error: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ProjectConfig {
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub entry_point: Option<String>,
}

/// `[serve]` section.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ServeConfig {
    /// URL prefix under which client pages are served.
    pub cl_route_prefix: String,
    /// When set, `GET /` renders this client page instead of the API index.
    pub base_route_app: Option<String>,
    pub port: Option<u16>,
    pub session: Option<String>,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            cl_route_prefix: "cl".to_string(),
            base_route_app: None,
            port: None,
            session: None,
        }
    }
}

/// `[environments.response.headers]` — merged into every HTTP response.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct EnvironmentsConfig {
    pub response: ResponseConfig,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ResponseConfig {
    pub headers: BTreeMap<String, String>,
}

/// Free-form per-command option tables (`[run]`, `[build]`, `[test]`).
pub type CommandOptions = BTreeMap<String, toml::Value>;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct JacConfig {
    pub project: ProjectConfig,
    pub run: CommandOptions,
    pub build: CommandOptions,
    pub test: CommandOptions,
    pub serve: ServeConfig,
    pub environments: EnvironmentsConfig,
    #[serde(skip)]
    source_path: Option<PathBuf>,
}

impl JacConfig {
    /// Locate and load `jac.toml`, walking up from `start_dir`. Returns the
    /// defaults when no file is found.
    pub fn discover(start_dir: &Path) -> Result<Self, ConfigError> {
        match Self::find_file(start_dir) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load a specific config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let mut config: JacConfig =
            toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// The path the config was loaded from, if any.
    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    fn find_file(start_dir: &Path) -> Option<PathBuf> {
        let mut dir = Some(start_dir);
        while let Some(current) = dir {
            let candidate = current.join(CONFIG_FILE);
            if candidate.is_file() {
                return Some(candidate);
            }
            dir = current.parent();
        }
        None
    }
}
