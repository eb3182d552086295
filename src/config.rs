//! Optional TOML configuration for stage locations, excludes and keywords.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{IoContext, Result, SieveError};

/// Config file picked up from the current directory when `--config` is not given.
pub const DEFAULT_CONFIG: &str = ".poc-sieve.toml";

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Parent of the stage directories
    pub work_dir: PathBuf,
    pub step1: PathBuf,
    pub step2: PathBuf,
    pub step3: PathBuf,
    /// Extra glob patterns pruned from the dedup walk
    pub exclude: Vec<String>,
    /// Any of these marks a template as HTTP-based
    pub http_keywords: Vec<String>,
    /// Any of these disqualifies a template
    pub skip_keywords: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            work_dir: PathBuf::from("."),
            step1: PathBuf::from("step1"),
            step2: PathBuf::from("step2"),
            step3: PathBuf::from("step3"),
            exclude: Vec::new(),
            http_keywords: ["HTTP", "GET", "POST", "PUT", "BaseURL"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            skip_keywords: ["/readme.txt", "/style.css"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Resolved locations of the three stage collections.
#[derive(Debug, Clone, PartialEq)]
pub struct StageDirs {
    pub unique: PathBuf,
    pub severe: PathBuf,
    pub accepted: PathBuf,
}

impl StageDirs {
    pub fn all(&self) -> [&Path; 3] {
        [&self.unique, &self.severe, &self.accepted]
    }
}

impl Config {
    /// Load from an explicit path (which must exist) or from [`DEFAULT_CONFIG`]
    /// if present. With neither, defaults apply.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let fallback = PathBuf::from(DEFAULT_CONFIG);
                if !fallback.is_file() {
                    return Ok(Config::default());
                }
                fallback
            }
        };

        let content = fs::read_to_string(&path).at(&path)?;
        Self::parse(&content).map_err(|source| SieveError::Config { path, source })
    }

    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn stage_dirs(&self) -> StageDirs {
        StageDirs {
            unique: self.work_dir.join(&self.step1),
            severe: self.work_dir.join(&self.step2),
            accepted: self.work_dir.join(&self.step3),
        }
    }
}
