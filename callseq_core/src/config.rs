use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct RunnerSettings {
    #[serde(default)]
    pub report: ReportFormat,
    /// Upper bound on one isolated step, in milliseconds.
    #[serde(default = "default_child_timeout_ms")]
    pub child_timeout_ms: u64,
    /// Where per-run temporary directories are created; the system temp dir
    /// when unset.
    #[serde(default)]
    pub temp_root: Option<PathBuf>,
    /// Only run cases whose id contains this substring.
    #[serde(default)]
    pub filter: Option<String>,
}

pub fn default_child_timeout_ms() -> u64 {
    2000
}

impl RunnerSettings {
    pub fn child_timeout(&self) -> Duration {
        Duration::from_millis(self.child_timeout_ms)
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            report: ReportFormat::default(),
            child_timeout_ms: default_child_timeout_ms(),
            temp_root: None,
            filter: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct SuiteSettings {
    /// Include the built-in case catalog.
    #[serde(default = "default_builtin")]
    pub builtin: bool,
    /// Suite files or directories of `*.toml` suite files.
    #[serde(default)]
    pub paths: Vec<PathBuf>,
}

fn default_builtin() -> bool {
    true
}

impl Default for SuiteSettings {
    fn default() -> Self {
        Self {
            builtin: default_builtin(),
            paths: Vec::new(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CallseqConfig {
    #[serde(default)]
    pub runner: RunnerSettings,
    #[serde(default)]
    pub suite: SuiteSettings,
}

impl CallseqConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config: CallseqConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;

        Ok(config)
    }
}
