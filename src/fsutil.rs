use filetime::FileTime;
use std::{
    ffi::OsString,
    fs::Metadata,
    io,
    path::{Component, Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};
use tokio::fs;

/// Modification time in manifest units: milliseconds since the Unix epoch,
/// keeping whatever sub-millisecond precision the filesystem reports.
pub fn mtime_millis(meta: &Metadata) -> f64 {
    filetime_millis(FileTime::from_last_modification_time(meta))
}

pub fn filetime_millis(time: FileTime) -> f64 {
    time.unix_seconds() as f64 * 1000.0 + f64::from(time.nanoseconds()) / 1_000_000.0
}

/// Stats `path` and returns its modification time, `None` if it is missing.
pub async fn stat_mtime(path: &Path) -> io::Result<Option<f64>> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(Some(mtime_millis(&meta))),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Removes a file; a file that is already gone is not an error.
/// Returns whether anything was deleted.
pub async fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Writes `contents` next to `path` and renames it into place, so readers
/// see either the old file or the new one.
pub async fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    fs::create_dir_all(parent).await?;

    let mut temp_name = OsString::from(file_name);
    temp_name.push(".tmp");
    let mut temp_path = parent.join(temp_name);
    if fs::try_exists(&temp_path).await.unwrap_or(false) {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let mut temp_name = OsString::from(file_name);
        temp_name.push(format!(".{stamp}.tmp"));
        temp_path = parent.join(temp_name);
    }

    fs::write(&temp_path, contents).await?;
    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err);
    }
    Ok(())
}

/// Joins a manifest-relative path onto the target root. Returns `None` for
/// paths that would land outside the root (absolute paths, `..`, prefixes).
pub fn resolve_within(root: &Path, rel_path: &str) -> Option<PathBuf> {
    let rel = Path::new(rel_path);
    if rel_path.is_empty() {
        return None;
    }
    let mut resolved = root.to_path_buf();
    for component in rel.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(resolved)
}
