//! The full dedup → severity → keyword run, plus hand-off and cleanup.

use std::fs;
use std::path::{Path, PathBuf};

use colored::Colorize;
use serde::Serialize;
use tracing::info;

use crate::config::{Config, StageDirs};
use crate::dedup::{collect_unique, DedupReport, WalkFilter};
use crate::error::{IoContext, Result, SieveError};
use crate::fsops::{copy_preserving, holds_templates, template_entries};
use crate::keywords::{promote_relevant, KeywordFilter, KeywordReport};
use crate::severity::{split_by_severity, SeverityReport};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Clear stage directories left over from a previous run
    pub clean: bool,
    /// Copy the final collection here after Stage 3
    pub install: Option<PathBuf>,
    pub keep_intermediate: bool,
    /// Suppress stage banners
    pub quiet: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RunReport {
    pub dedup: DedupReport,
    pub severity: SeverityReport,
    pub keywords: KeywordReport,
    pub installed: Option<usize>,
    /// Where the accepted templates ended up
    pub final_dir: PathBuf,
}

pub struct Pipeline {
    source: PathBuf,
    dirs: StageDirs,
    exclude: Vec<String>,
    keywords: KeywordFilter,
}

impl Pipeline {
    pub fn new(source: &Path, config: &Config) -> Result<Self> {
        Ok(Pipeline {
            source: source.to_path_buf(),
            dirs: config.stage_dirs(),
            exclude: config.exclude.clone(),
            keywords: KeywordFilter::new(&config.http_keywords, &config.skip_keywords)?,
        })
    }

    pub fn dirs(&self) -> &StageDirs {
        &self.dirs
    }

    pub fn run(&self, options: &RunOptions) -> Result<RunReport> {
        if !self.source.is_dir() {
            return Err(SieveError::MissingSource(self.source.clone()));
        }
        if let Some(install) = &options.install {
            self.check_install(install)?;
        }
        self.prepare(options.clean)?;

        let mut pruned: Vec<&Path> = self.dirs.all().to_vec();
        if let Some(install) = &options.install {
            pruned.push(install);
        }
        let filter = WalkFilter::new(&self.source, &pruned, &self.exclude)?;

        banner(options.quiet, "Step 1: Processing Original Files");
        let dedup = collect_unique(&self.source, &self.dirs.unique, &filter)?;

        banner(options.quiet, "Step 2: Processing Severity Levels");
        let severity = split_by_severity(&self.dirs.unique, &self.dirs.severe)?;

        banner(options.quiet, "Step 3: Processing Keywords");
        let keywords = promote_relevant(&self.dirs.unique, &self.dirs.accepted, &self.keywords)?;

        let installed = match &options.install {
            Some(install) => Some(install_templates(&self.dirs.accepted, install)?),
            None => None,
        };

        let final_dir = match &options.install {
            Some(install) => install.clone(),
            None => self.dirs.accepted.clone(),
        };

        if !options.keep_intermediate {
            self.cleanup(options.install.is_some())?;
        }

        Ok(RunReport {
            dedup,
            severity,
            keywords,
            installed,
            final_dir,
        })
    }

    /// The install target must not be one of the stage directories: installing
    /// would copy files onto themselves and cleanup would then delete them.
    fn check_install(&self, install: &Path) -> Result<()> {
        fs::create_dir_all(install).at(install)?;
        let install = fs::canonicalize(install).at(install)?;
        for dir in self.dirs.all() {
            if fs::canonicalize(dir).ok().as_ref() == Some(&install) {
                return Err(SieveError::InstallAliasesStage(dir.to_path_buf()));
            }
        }
        Ok(())
    }

    /// Refuse to mix a new run with templates from an earlier one, unless asked to clear them.
    fn prepare(&self, clean: bool) -> Result<()> {
        for dir in self.dirs.all() {
            if holds_templates(dir)? {
                if !clean {
                    return Err(SieveError::StageNotEmpty(dir.to_path_buf()));
                }
                info!(path = %dir.display(), "clearing previous stage output");
                fs::remove_dir_all(dir).at(dir)?;
            }
            fs::create_dir_all(dir).at(dir)?;
        }
        Ok(())
    }

    fn cleanup(&self, installed: bool) -> Result<()> {
        let mut doomed = vec![&self.dirs.unique, &self.dirs.severe];
        if installed {
            doomed.push(&self.dirs.accepted);
        }
        for dir in doomed {
            if dir.is_dir() {
                fs::remove_dir_all(dir).at(dir)?;
                info!(path = %dir.display(), "removed intermediate directory");
            }
        }
        Ok(())
    }
}

/// Copy the accepted collection into a scanner's template directory.
pub fn install_templates(accepted: &Path, install: &Path) -> Result<usize> {
    fs::create_dir_all(install).at(install)?;

    let mut count = 0;
    for path in template_entries(accepted)? {
        let Some(name) = path.file_name() else { continue };
        let destination = install.join(name);
        copy_preserving(&path, &destination)?;
        info!(
            source = %path.display(),
            destination = %destination.display(),
            "installed template"
        );
        count += 1;
    }
    Ok(count)
}

fn banner(quiet: bool, title: &str) {
    if !quiet {
        println!("\n{}", format!("=== {} ===", title).cyan().bold());
    }
}
