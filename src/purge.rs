//! Detecting manifests written by another instance and removing their files
//! without that instance's bookkeeping.
//!
//! The only evidence a foreign instance leaves is the manifest itself, so a
//! recorded file is removed only while its modification time still equals
//! the recorded one. A file touched since deployment is left in place.

use crate::{
    fsutil,
    manifest::{DeployedFile, DeploymentManifest},
    methods::MethodRegistry,
};
use async_trait::async_trait;
use futures_util::{
    future,
    stream::{self, StreamExt},
};
use std::{
    io,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};
use thiserror::Error;

pub const DEFAULT_PURGE_CONCURRENCY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeSafety {
    Safe,
    Unsafe,
}

impl PurgeSafety {
    pub fn label(self) -> &'static str {
        match self {
            PurgeSafety::Safe => "safe",
            PurgeSafety::Unsafe => "unsafe",
        }
    }

    pub fn prompt_text(self) -> &'static str {
        match self {
            PurgeSafety::Safe => {
                "Files in this folder were deployed by a different SigilSmith instance. \
                 They can be removed by checking that each one is unchanged since it was \
                 deployed. Files that were modified afterwards are kept."
            }
            PurgeSafety::Unsafe => {
                "Files in this folder were deployed by a different SigilSmith instance, \
                 using a deployment method this instance cannot verify. Removing them \
                 relies on modification times only and may delete files that are not \
                 mod files. This is destructive and cannot be undone."
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeChoice {
    Purge,
    Cancel,
}

/// Everything a confirmation dialog is told about a pending fallback purge.
#[derive(Debug, Clone, Copy)]
pub struct PurgeRequest<'a> {
    pub safety: PurgeSafety,
    pub target_dir: &'a Path,
    pub mod_type: &'a str,
    pub foreign_instance: &'a str,
    pub instance: &'a str,
    pub deployment_method: Option<&'a str>,
    pub files: &'a [DeployedFile],
}

/// Asks the user whether a foreign deployment may be purged.
#[async_trait]
pub trait PurgeConfirm: Send + Sync {
    async fn confirm(&self, request: &PurgeRequest<'_>) -> anyhow::Result<PurgeChoice>;
}

/// Whether a foreign manifest can be purged with confidence.
pub fn classify<R: MethodRegistry + ?Sized>(
    manifest: &DeploymentManifest,
    methods: &R,
) -> PurgeSafety {
    let safe = manifest
        .deployment_method
        .as_deref()
        .and_then(|id| methods.lookup(id))
        .is_some_and(|info| info.fallback_purge_safe);
    if safe {
        PurgeSafety::Safe
    } else {
        PurgeSafety::Unsafe
    }
}

#[derive(Debug, Error)]
#[error("fallback purge failed at {path:?}: {source}")]
pub struct PurgeError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
    /// Files deleted before the purge gave up. They are not restored.
    pub removed: Vec<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PurgeReport {
    pub removed: Vec<String>,
    /// Present but modified since deployment.
    pub kept: Vec<String>,
    pub missing: usize,
    /// Paths pointing outside the target; never touched.
    pub refused: Vec<String>,
}

impl PurgeReport {
    fn record(&mut self, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Removed(rel_path) => self.removed.push(rel_path),
            FileOutcome::Kept(rel_path) => self.kept.push(rel_path),
            FileOutcome::Missing => self.missing += 1,
            FileOutcome::Refused(rel_path) => self.refused.push(rel_path),
        }
    }

    // Completion order is arbitrary; keep the report stable.
    fn sort(&mut self) {
        self.removed.sort();
        self.kept.sort();
        self.refused.sort();
    }
}

#[derive(Debug)]
enum FileOutcome {
    Removed(String),
    Kept(String),
    Missing,
    Refused(String),
}

/// Removes every recorded file whose modification time still matches the
/// manifest.
///
/// The first error other than not-found stops new removals. Removals already
/// running are allowed to finish before that error is returned, and files
/// already removed stay removed.
pub async fn fallback_purge(
    target_dir: &Path,
    files: &[DeployedFile],
    concurrency: usize,
) -> Result<PurgeReport, PurgeError> {
    let aborted = AtomicBool::new(false);
    let mut outcomes = stream::iter(files)
        .take_while(|_| future::ready(!aborted.load(Ordering::Relaxed)))
        .map(|file| purge_file(target_dir, file))
        .buffer_unordered(concurrency.max(1));

    let mut report = PurgeReport::default();
    let mut failure = None;
    while let Some(outcome) = outcomes.next().await {
        match outcome {
            Ok(outcome) => report.record(outcome),
            Err(err) => {
                aborted.store(true, Ordering::Relaxed);
                if failure.is_none() {
                    failure = Some(err);
                } else {
                    tracing::warn!(error = %err, "further fallback purge failure");
                }
            }
        }
    }
    report.sort();

    if let Some(mut err) = failure {
        tracing::warn!(
            target_dir = %target_dir.display(),
            path = %err.path.display(),
            removed = report.removed.len(),
            "fallback purge stopped; removed files stay removed"
        );
        err.removed = report.removed;
        return Err(err);
    }

    tracing::info!(
        target_dir = %target_dir.display(),
        removed = report.removed.len(),
        kept = report.kept.len(),
        missing = report.missing,
        refused = report.refused.len(),
        "fallback purge finished"
    );
    Ok(report)
}

async fn purge_file(target_dir: &Path, file: &DeployedFile) -> Result<FileOutcome, PurgeError> {
    let Some(path) = fsutil::resolve_within(target_dir, &file.rel_path) else {
        tracing::warn!(rel_path = %file.rel_path, "refusing to purge path outside target");
        return Ok(FileOutcome::Refused(file.rel_path.clone()));
    };

    let fail = |source| PurgeError {
        path: path.clone(),
        source,
        removed: Vec::new(),
    };

    let Some(mtime) = fsutil::stat_mtime(&path).await.map_err(fail)? else {
        return Ok(FileOutcome::Missing);
    };
    if mtime != file.time {
        tracing::debug!(
            path = %path.display(),
            recorded = file.time,
            actual = mtime,
            "keeping file modified since deployment"
        );
        return Ok(FileOutcome::Kept(file.rel_path.clone()));
    }

    if fsutil::remove_if_exists(&path).await.map_err(fail)? {
        tracing::debug!(path = %path.display(), "purged file");
        Ok(FileOutcome::Removed(file.rel_path.clone()))
    } else {
        Ok(FileOutcome::Missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fsutil::filetime_millis, methods::MethodTable};
    use filetime::FileTime;
    use tempfile::TempDir;

    fn deploy(root: &Path, rel_path: &str, seconds: i64) -> DeployedFile {
        let path = root.join(rel_path);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, rel_path).unwrap();
        let time = FileTime::from_unix_time(seconds, 0);
        filetime::set_file_mtime(&path, time).unwrap();
        DeployedFile::new(rel_path, "mod", filetime_millis(time))
    }

    fn foreign(method: Option<&str>) -> DeploymentManifest {
        DeploymentManifest {
            version: 1,
            instance: "other".to_string(),
            deployment_method: method.map(str::to_string),
            files: vec![DeployedFile::new("a", "m", 1.0)],
        }
    }

    #[test]
    fn classify_needs_a_known_safe_method() {
        let methods = MethodTable::new().with("safe", true).with("risky", false);
        assert_eq!(classify(&foreign(Some("safe")), &methods), PurgeSafety::Safe);
        assert_eq!(classify(&foreign(Some("risky")), &methods), PurgeSafety::Unsafe);
        assert_eq!(classify(&foreign(Some("unknown")), &methods), PurgeSafety::Unsafe);
        assert_eq!(classify(&foreign(None), &methods), PurgeSafety::Unsafe);
    }

    #[test]
    fn prompts_differ_and_unsafe_warns() {
        assert_ne!(
            PurgeSafety::Safe.prompt_text(),
            PurgeSafety::Unsafe.prompt_text()
        );
        assert!(PurgeSafety::Unsafe.prompt_text().contains("cannot be undone"));
    }

    #[tokio::test]
    async fn only_unchanged_files_are_removed() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let a = deploy(root, "Data/a.txt", 1_700_000_000);
        let mut b = deploy(root, "Data/b.txt", 1_700_000_100);
        b.time = filetime_millis(FileTime::from_unix_time(1_600_000_000, 0));
        let gone = DeployedFile::new("Data/gone.txt", "mod", 1.0);

        let report = fallback_purge(root, &[a, b, gone], 4).await.unwrap();

        assert!(!root.join("Data/a.txt").exists());
        assert!(root.join("Data/b.txt").exists());
        assert_eq!(report.removed, vec!["Data/a.txt".to_string()]);
        assert_eq!(report.kept, vec!["Data/b.txt".to_string()]);
        assert_eq!(report.missing, 1);
        assert!(report.refused.is_empty());
    }

    #[tokio::test]
    async fn escaping_paths_are_never_touched() {
        let outer = TempDir::new().unwrap();
        let root = outer.path().join("target");
        std::fs::create_dir_all(&root).unwrap();
        let victim = deploy(outer.path(), "victim.txt", 1_700_000_000);
        let escaping = DeployedFile::new("../victim.txt", "mod", victim.time);

        let report = fallback_purge(&root, &[escaping], 1).await.unwrap();

        assert!(outer.path().join("victim.txt").exists());
        assert_eq!(report.refused, vec!["../victim.txt".to_string()]);
    }

    #[tokio::test]
    async fn many_files_purge_with_small_fan_out() {
        let dir = TempDir::new().unwrap();
        let files: Vec<DeployedFile> = (0..40)
            .map(|index| deploy(dir.path(), &format!("f/{index}.bin"), 1_650_000_000 + index))
            .collect();

        let report = fallback_purge(dir.path(), &files, 3).await.unwrap();

        assert_eq!(report.removed.len(), 40);
        assert_eq!(std::fs::read_dir(dir.path().join("f")).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stat_failures_abort_the_purge() {
        let dir = TempDir::new().unwrap();
        // A regular file used as a directory component fails with ENOTDIR.
        std::fs::write(dir.path().join("blocker"), b"x").unwrap();
        let broken = DeployedFile::new("blocker/inner.txt", "mod", 1.0);

        let err = fallback_purge(dir.path(), &[broken], 1).await.unwrap_err();
        assert_eq!(err.path, dir.path().join("blocker").join("inner.txt"));
    }

    /// An empty directory recorded with its real mtime: the stat matches but
    /// the removal fails.
    #[cfg(unix)]
    fn unremovable(root: &Path, rel_path: &str) -> DeployedFile {
        let path = root.join(rel_path);
        std::fs::create_dir_all(&path).unwrap();
        let time = FileTime::from_unix_time(1_700_000_000, 0);
        filetime::set_file_mtime(&path, time).unwrap();
        DeployedFile::new(rel_path, "mod", filetime_millis(time))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failure_stops_new_removals_and_keeps_finished_ones() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let a = deploy(root, "a.txt", 1_700_000_000);
        let locked = unremovable(root, "locked");
        let b = deploy(root, "b.txt", 1_700_000_000);

        let err = fallback_purge(root, &[a, locked, b], 1).await.unwrap_err();

        assert_eq!(err.path, root.join("locked"));
        assert_eq!(err.removed, vec!["a.txt".to_string()]);
        assert!(!root.join("a.txt").exists());
        assert!(root.join("b.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn removals_in_flight_finish_before_the_error_returns() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let locked = unremovable(root, "locked");
        let a = deploy(root, "a.txt", 1_700_000_000);
        let b = deploy(root, "b.txt", 1_700_000_000);

        let err = fallback_purge(root, &[locked, a, b], 3).await.unwrap_err();

        assert_eq!(err.path, root.join("locked"));
        assert_eq!(err.removed, vec!["a.txt".to_string(), "b.txt".to_string()]);
        assert!(!root.join("a.txt").exists());
        assert!(!root.join("b.txt").exists());
    }
}
