//! Stage 3: promote HTTP templates that do not touch excluded resources.

use std::fs;
use std::path::Path;

use regex::RegexSet;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{IoContext, Result};
use crate::fsops::{move_file, template_entries};

/// Case-sensitive literal substring matcher over the raw template text.
#[derive(Debug, Clone)]
pub struct KeywordFilter {
    http: RegexSet,
    skip: RegexSet,
}

fn literal_set(keywords: &[String]) -> Result<RegexSet> {
    Ok(RegexSet::new(keywords.iter().map(|k| regex::escape(k)))?)
}

impl KeywordFilter {
    pub fn new(http_keywords: &[String], skip_keywords: &[String]) -> Result<Self> {
        Ok(KeywordFilter {
            http: literal_set(http_keywords)?,
            skip: literal_set(skip_keywords)?,
        })
    }

    pub fn has_http(&self, content: &str) -> bool {
        self.http.is_match(content)
    }

    pub fn should_skip(&self, content: &str) -> bool {
        self.skip.is_match(content)
    }

    pub fn accepts(&self, content: &str) -> bool {
        self.has_http(content) && !self.should_skip(content)
    }
}

#[derive(Serialize, Debug, Default, Clone, PartialEq)]
pub struct KeywordReport {
    pub accepted: usize,
    pub rejected: usize,
    pub errors: usize,
}

/// Move every template in `source` accepted by `filter` into `target`.
/// Rejected and unreadable templates stay where they are.
pub fn promote_relevant(source: &Path, target: &Path, filter: &KeywordFilter) -> Result<KeywordReport> {
    fs::create_dir_all(target).at(target)?;

    let mut report = KeywordReport::default();
    for path in template_entries(source)? {
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                report.errors += 1;
                warn!(path = %path.display(), error = %e, "failed to check keywords");
                continue;
            }
        };

        if !filter.accepts(&content) {
            report.rejected += 1;
            continue;
        }

        let Some(name) = path.file_name() else { continue };
        let destination = target.join(name);
        match move_file(&path, &destination) {
            Ok(()) => {
                report.accepted += 1;
                info!(
                    source = %path.display(),
                    destination = %destination.display(),
                    "moved template matching keywords"
                );
            }
            Err(e) => {
                report.errors += 1;
                warn!(path = %path.display(), error = %e, "failed to move template");
            }
        }
    }

    Ok(report)
}
