//! Fatal errors for a run; per-file problems are logged, not returned.

use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum SieveError {
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Config error in {}: {source}", .path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid exclude pattern: {0}")]
    Glob(#[from] globset::Error),

    #[error("Invalid keyword pattern: {0}")]
    Keyword(#[from] regex::Error),

    #[error("Source root not found: {}", .0.display())]
    MissingSource(PathBuf),

    #[error("Install directory {} is also a stage directory", .0.display())]
    InstallAliasesStage(PathBuf),

    #[error("Stage directory {} already holds templates (use --clean to clear it)", .0.display())]
    StageNotEmpty(PathBuf),
}

pub type Result<T> = std::result::Result<T, SieveError>;

/// Attach the offending path to an I/O error.
pub trait IoContext<T> {
    fn at(self, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn at(self, path: &Path) -> Result<T> {
        self.map_err(|source| SieveError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
