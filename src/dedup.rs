//! Stage 1: walk the corpus and keep one template per fingerprint.

use std::fs;
use std::path::{Path, PathBuf};

use ahash::AHashSet;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{IoContext, Result, SieveError};
use crate::fingerprint::Fingerprint;
use crate::fsops::{copy_preserving, is_template};

#[derive(Serialize, Debug, Default, Clone, PartialEq)]
pub struct DedupReport {
    /// Templates visited by the walk
    pub scanned: usize,
    pub unique: usize,
    pub duplicates: usize,
    pub errors: usize,
}

/// Decides which parts of the corpus tree the walk must not enter.
///
/// Stage output directories usually live under the corpus root, so they are
/// pruned by identity (canonical path). User patterns are matched against the
/// path relative to the root.
#[derive(Clone, Debug)]
pub struct WalkFilter {
    root: PathBuf,
    pruned_dirs: Vec<PathBuf>,
    globs: GlobSet,
}

impl WalkFilter {
    /// Directories that do not exist yet are ignored, so create stage
    /// directories before building the filter.
    pub fn new(root: &Path, pruned_dirs: &[&Path], patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(Glob::new(pattern)?);
        }

        Ok(WalkFilter {
            root: root.to_path_buf(),
            pruned_dirs: pruned_dirs
                .iter()
                .filter_map(|dir| fs::canonicalize(dir).ok())
                .collect(),
            globs: builder.build()?,
        })
    }

    pub fn is_pruned(&self, path: &Path, is_dir: bool) -> bool {
        if let Ok(rel) = path.strip_prefix(&self.root) {
            if !rel.as_os_str().is_empty() && self.globs.is_match(rel) {
                return true;
            }
        }
        is_dir
            && fs::canonicalize(path)
                .map(|p| self.pruned_dirs.contains(&p))
                .unwrap_or(false)
    }
}

/// Owns the seen-fingerprint set for the lifetime of one walk.
struct Collector<'a> {
    target: &'a Path,
    seen: AHashSet<Fingerprint>,
    report: DedupReport,
}

impl<'a> Collector<'a> {
    fn new(target: &'a Path) -> Self {
        Collector {
            target,
            seen: AHashSet::new(),
            report: DedupReport::default(),
        }
    }

    /// Copy `path` into the target if its fingerprint is new.
    /// Returns the destination, or `None` for a duplicate.
    fn offer(&mut self, path: &Path) -> Result<Option<PathBuf>> {
        let fingerprint = Fingerprint::of_file(path)?;
        if self.seen.contains(&fingerprint) {
            return Ok(None);
        }

        // Only a successful copy claims the fingerprint; a later duplicate gets another chance.
        let destination = self.target.join(fingerprint.file_name());
        copy_preserving(path, &destination)?;
        self.seen.insert(fingerprint);
        Ok(Some(destination))
    }

    fn visit(&mut self, path: &Path) {
        self.report.scanned += 1;
        match self.offer(path) {
            Ok(Some(destination)) => {
                self.report.unique += 1;
                info!(
                    source = %path.display(),
                    destination = %destination.display(),
                    "copied unique template"
                );
            }
            Ok(None) => self.report.duplicates += 1,
            Err(e) => {
                self.report.errors += 1;
                warn!(path = %path.display(), error = %e, "failed to process template");
            }
        }
    }
}

/// Copy one template per distinct fingerprint from `source` (recursively) into
/// `target`, naming each copy `<fingerprint>.yaml`. The corpus is left untouched.
pub fn collect_unique(source: &Path, target: &Path, filter: &WalkFilter) -> Result<DedupReport> {
    if !source.is_dir() {
        return Err(SieveError::MissingSource(source.to_path_buf()));
    }
    fs::create_dir_all(target).at(target)?;

    let mut builder = WalkBuilder::new(source);
    builder
        .standard_filters(false)
        .sort_by_file_name(|a, b| a.cmp(b));

    let entry_filter = filter.clone();
    builder.filter_entry(move |entry| {
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        !entry_filter.is_pruned(entry.path(), is_dir)
    });

    let mut collector = Collector::new(target);
    for entry in builder.build() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                collector.report.errors += 1;
                warn!(error = %e, "failed to read corpus entry");
                continue;
            }
        };

        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        if is_file && is_template(entry.path()) {
            collector.visit(entry.path());
        }
    }

    Ok(collector.report)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GET_FRAGMENT: &str = "requests:\n  - method: GET\n    path:\n      - \"{{BaseURL}}/admin\"\n";

    fn write(root: &Path, rel: &str, content: &str) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    fn names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_duplicates_collapse_to_one_copy() {
        let corpus = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();

        write(corpus.path(), "a/one.yaml", &format!("id: one\n{}", GET_FRAGMENT));
        write(
            corpus.path(),
            "b/deep/two.yaml",
            "id: two\n# a comment\nrequests:\n\n  - method:    GET\n    # note\n    path:\n      - \"{{BaseURL}}/admin\"",
        );
        write(corpus.path(), "c/three.yaml", "id: three\nrequests:\n  - method: POST\n");

        let filter = WalkFilter::new(corpus.path(), &[out.path()], &[]).unwrap();
        let report = collect_unique(corpus.path(), out.path(), &filter).unwrap();

        assert_eq!(report.scanned, 3);
        assert_eq!(report.unique, 2);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.errors, 0);

        let expected = Fingerprint::of_document(GET_FRAGMENT).file_name();
        assert!(names(out.path()).contains(&expected));
        assert_eq!(names(out.path()).len(), 2);
    }

    #[test]
    fn test_first_in_walk_order_wins() {
        let corpus = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();

        write(corpus.path(), "a.yaml", &format!("id: first\n{}", GET_FRAGMENT));
        write(corpus.path(), "b.yaml", &format!("id: second\n{}", GET_FRAGMENT));

        let filter = WalkFilter::new(corpus.path(), &[], &[]).unwrap();
        collect_unique(corpus.path(), out.path(), &filter).unwrap();

        let kept = out.path().join(Fingerprint::of_document(GET_FRAGMENT).file_name());
        assert!(fs::read_to_string(kept).unwrap().starts_with("id: first"));
    }

    #[test]
    fn test_corpus_is_left_untouched() {
        let corpus = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let original = write(corpus.path(), "x.yaml", GET_FRAGMENT);

        let filter = WalkFilter::new(corpus.path(), &[], &[]).unwrap();
        collect_unique(corpus.path(), out.path(), &filter).unwrap();

        assert_eq!(fs::read_to_string(original).unwrap(), GET_FRAGMENT);
    }

    #[test]
    fn test_non_templates_are_ignored() {
        let corpus = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write(corpus.path(), "README.md", GET_FRAGMENT);
        write(corpus.path(), "x.yml", GET_FRAGMENT);

        let filter = WalkFilter::new(corpus.path(), &[], &[]).unwrap();
        let report = collect_unique(corpus.path(), out.path(), &filter).unwrap();

        assert_eq!(report.scanned, 0);
        assert!(names(out.path()).is_empty());
    }

    #[test]
    fn test_output_dir_inside_corpus_is_not_rescanned() {
        let corpus = tempfile::tempdir().unwrap();
        let out = corpus.path().join("step1");
        fs::create_dir_all(&out).unwrap();
        // A stale generated file that would otherwise be walked
        write(&out, "stale.yaml", "requests:\n  - method: DELETE\n");
        write(corpus.path(), "t.yaml", GET_FRAGMENT);

        let filter = WalkFilter::new(corpus.path(), &[out.as_path()], &[]).unwrap();
        let report = collect_unique(corpus.path(), &out, &filter).unwrap();

        assert_eq!(report.scanned, 1);
        assert_eq!(report.unique, 1);
    }

    #[test]
    fn test_exclude_patterns_prune_paths() {
        let corpus = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write(corpus.path(), ".git/hooks/x.yaml", "requests:\n  - method: PUT\n");
        write(corpus.path(), "keep/t.yaml", GET_FRAGMENT);

        let filter = WalkFilter::new(corpus.path(), &[], &["**/.git/**".to_string()]).unwrap();
        let report = collect_unique(corpus.path(), out.path(), &filter).unwrap();

        assert_eq!(report.scanned, 1);
    }

    #[test]
    fn test_bad_file_is_logged_and_skipped() {
        let corpus = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let bad = corpus.path().join("a-bad.yaml");
        fs::write(&bad, [0xff, 0xfe, 0x00, 0x80]).unwrap();
        write(corpus.path(), "b-good.yaml", GET_FRAGMENT);

        let filter = WalkFilter::new(corpus.path(), &[], &[]).unwrap();
        let report = collect_unique(corpus.path(), out.path(), &filter).unwrap();

        assert_eq!(report.scanned, 2);
        assert_eq!(report.errors, 1);
        assert_eq!(report.unique, 1);
    }

    #[test]
    fn test_failed_copy_leaves_fingerprint_unclaimed() {
        let corpus = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write(corpus.path(), "a.yaml", &format!("id: first\n{}", GET_FRAGMENT));
        write(corpus.path(), "b.yaml", &format!("id: second\n{}", GET_FRAGMENT));

        // Occupy the destination name with a directory so the first copy fails
        let destination = out.path().join(Fingerprint::of_document(GET_FRAGMENT).file_name());
        fs::create_dir(&destination).unwrap();

        let mut collector = Collector::new(out.path());
        collector.visit(&corpus.path().join("a.yaml"));
        assert_eq!(collector.report.errors, 1);

        fs::remove_dir(&destination).unwrap();
        collector.visit(&corpus.path().join("b.yaml"));

        assert_eq!(collector.report.unique, 1);
        assert_eq!(collector.report.duplicates, 0);
        assert!(fs::read_to_string(&destination).unwrap().starts_with("id: second"));
    }

    #[test]
    fn test_missing_source_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let filter = WalkFilter::new(dir.path(), &[], &[]).unwrap();
        let err = collect_unique(&dir.path().join("missing"), &dir.path().join("out"), &filter)
            .unwrap_err();
        assert!(matches!(err, SieveError::MissingSource(_)));
    }

    #[test]
    fn test_invalid_glob_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = WalkFilter::new(dir.path(), &[], &["a/[".to_string()]).unwrap_err();
        assert!(matches!(err, SieveError::Glob(_)));
    }
}
