use super::{
    codec::{self, CodecError},
    DeployedFile, DeploymentManifest, CURRENT_VERSION,
};
use crate::fsutil;
use std::{
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::fs;

pub const MANIFEST_PREFIX: &str = "sigilsmith.deployment";
pub const MANIFEST_EXTENSION: &str = "json";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("deployment manifest {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("deployment manifest {path:?}: {source}")]
    Codec {
        path: PathBuf,
        #[source]
        source: CodecError,
    },
}

impl ManifestError {
    /// Manifest file the error is about, for pointing the user at it.
    pub fn path(&self) -> &Path {
        match self {
            ManifestError::Io { path, .. } | ManifestError::Codec { path, .. } => path,
        }
    }

    fn io(path: &Path, source: io::Error) -> Self {
        ManifestError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn codec(path: &Path, source: CodecError) -> Self {
        ManifestError::Codec {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// `sigilsmith.deployment.json`, or `sigilsmith.deployment.<type>.json`.
pub fn manifest_file_name(mod_type: &str) -> String {
    if mod_type.is_empty() {
        format!("{MANIFEST_PREFIX}.{MANIFEST_EXTENSION}")
    } else {
        format!("{MANIFEST_PREFIX}.{mod_type}.{MANIFEST_EXTENSION}")
    }
}

/// Location of the manifest for a mod type. Tags that would put the file
/// anywhere but directly inside `target_dir` are rejected.
pub fn manifest_path(target_dir: &Path, mod_type: &str) -> Result<PathBuf, ManifestError> {
    let path = target_dir.join(manifest_file_name(mod_type));
    if !is_valid_mod_type(mod_type) {
        return Err(ManifestError::io(
            &path,
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid mod type {mod_type:?}"),
            ),
        ));
    }
    Ok(path)
}

/// Mod types become part of a file name: no separators, dots or control
/// characters.
pub fn is_valid_mod_type(mod_type: &str) -> bool {
    !mod_type
        .chars()
        .any(|c| std::path::is_separator(c) || c == '.' || c.is_control())
}

/// Reads the manifest for a target. A missing or blank file yields an empty
/// manifest owned by `instance`.
pub async fn load(
    target_dir: &Path,
    mod_type: &str,
    instance: &str,
) -> Result<DeploymentManifest, ManifestError> {
    let path = manifest_path(target_dir, mod_type)?;
    let raw = match fs::read(&path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no deployment manifest yet");
            return Ok(DeploymentManifest::empty(instance));
        }
        Err(err) => return Err(ManifestError::io(&path, err)),
    };

    let manifest = codec::decode_slice(&raw)
        .map_err(|err| ManifestError::codec(&path, err))?
        .unwrap_or_else(|| DeploymentManifest::empty(instance));
    tracing::debug!(
        path = %path.display(),
        files = manifest.files.len(),
        owner = %manifest.instance,
        "loaded deployment manifest"
    );
    Ok(manifest)
}

/// Replaces the manifest for a target. An empty file list removes the
/// manifest instead, since no file means nothing is deployed.
pub async fn save(
    target_dir: &Path,
    mod_type: &str,
    instance: &str,
    files: Vec<DeployedFile>,
    deployment_method: Option<&str>,
) -> Result<(), ManifestError> {
    let path = manifest_path(target_dir, mod_type)?;
    let manifest = DeploymentManifest {
        version: CURRENT_VERSION,
        instance: instance.to_string(),
        deployment_method: deployment_method.map(str::to_string),
        files,
    };
    let raw = codec::encode(&manifest).map_err(|err| ManifestError::codec(&path, err))?;

    if manifest.files.is_empty() {
        let removed = fsutil::remove_if_exists(&path)
            .await
            .map_err(|err| ManifestError::io(&path, err))?;
        if removed {
            tracing::info!(path = %path.display(), "removed empty deployment manifest");
        }
        return Ok(());
    }

    fsutil::write_atomic(&path, &raw)
        .await
        .map_err(|err| ManifestError::io(&path, err))?;
    tracing::info!(
        path = %path.display(),
        files = manifest.files.len(),
        "saved deployment manifest"
    );
    Ok(())
}

/// Mod types that currently have a manifest in `target_dir`, sorted. The
/// default manifest is reported as `""`.
pub async fn list_mod_types(target_dir: &Path) -> Result<Vec<String>, ManifestError> {
    let mut entries = match fs::read_dir(target_dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(ManifestError::io(target_dir, err)),
    };

    let mut mod_types = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|err| ManifestError::io(target_dir, err))?
    {
        let name = entry.file_name();
        if let Some(mod_type) = name.to_str().and_then(mod_type_from_file_name) {
            mod_types.push(mod_type.to_string());
        }
    }
    mod_types.sort();
    Ok(mod_types)
}

fn mod_type_from_file_name(name: &str) -> Option<&str> {
    let stem = name
        .strip_prefix(MANIFEST_PREFIX)?
        .strip_suffix(MANIFEST_EXTENSION)?
        .strip_suffix('.')?;
    if stem.is_empty() {
        return Some("");
    }
    let mod_type = stem.strip_prefix('.')?;
    (!mod_type.is_empty() && is_valid_mod_type(mod_type)).then_some(mod_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn files() -> Vec<DeployedFile> {
        vec![
            DeployedFile::new("Textures/a.dds", "mod-a", 1_700_000_000_000.0),
            DeployedFile::new("Textures/b.dds", "mod-b", 1_700_000_000_500.25),
        ]
    }

    #[test]
    fn file_name_embeds_mod_type() {
        assert_eq!(manifest_file_name(""), "sigilsmith.deployment.json");
        assert_eq!(
            manifest_file_name("loose"),
            "sigilsmith.deployment.loose.json"
        );
    }

    #[test]
    fn file_name_parses_back_to_mod_type() {
        assert_eq!(mod_type_from_file_name("sigilsmith.deployment.json"), Some(""));
        assert_eq!(
            mod_type_from_file_name("sigilsmith.deployment.loose.json"),
            Some("loose")
        );
        assert_eq!(mod_type_from_file_name("sigilsmith.deployment.json.tmp"), None);
        assert_eq!(mod_type_from_file_name("sigilsmith.deployment..json"), None);
        assert_eq!(mod_type_from_file_name("sigilsmith.deploymentjson"), None);
        assert_eq!(mod_type_from_file_name("sigilsmith.deployment.a.b.json"), None);
        assert_eq!(mod_type_from_file_name("other.json"), None);
    }

    #[tokio::test]
    async fn missing_manifest_loads_empty_for_caller() {
        let dir = TempDir::new().unwrap();
        let manifest = load(dir.path(), "", "me").await.unwrap();
        assert_eq!(manifest, DeploymentManifest::empty("me"));
    }

    #[tokio::test]
    async fn blank_manifest_loads_empty_for_caller() {
        let dir = TempDir::new().unwrap();
        std::fs::write(manifest_path(dir.path(), "").unwrap(), "").unwrap();
        let manifest = load(dir.path(), "", "me").await.unwrap();
        assert_eq!(manifest, DeploymentManifest::empty("me"));
    }

    #[tokio::test]
    async fn saved_files_load_back() {
        let dir = TempDir::new().unwrap();
        save(dir.path(), "loose", "me", files(), Some("copy"))
            .await
            .unwrap();

        let manifest = load(dir.path(), "loose", "someone-else").await.unwrap();
        assert_eq!(manifest.files, files());
        assert_eq!(manifest.instance, "me");
        assert_eq!(manifest.deployment_method.as_deref(), Some("copy"));
        assert_eq!(manifest.version, CURRENT_VERSION);
    }

    #[tokio::test]
    async fn mod_types_are_kept_apart() {
        let dir = TempDir::new().unwrap();
        save(dir.path(), "", "me", files(), None).await.unwrap();
        save(dir.path(), "pak", "me", files()[..1].to_vec(), None)
            .await
            .unwrap();

        assert_eq!(load(dir.path(), "", "me").await.unwrap().files.len(), 2);
        assert_eq!(load(dir.path(), "pak", "me").await.unwrap().files.len(), 1);
        assert_eq!(
            list_mod_types(dir.path()).await.unwrap(),
            vec!["".to_string(), "pak".to_string()]
        );
    }

    #[tokio::test]
    async fn empty_save_removes_manifest() {
        let dir = TempDir::new().unwrap();
        let path = manifest_path(dir.path(), "").unwrap();
        save(dir.path(), "", "me", files(), None).await.unwrap();
        assert!(path.exists());

        save(dir.path(), "", "me", Vec::new(), None).await.unwrap();
        assert!(!path.exists());

        save(dir.path(), "", "me", Vec::new(), None).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn malformed_manifest_reports_its_path() {
        let dir = TempDir::new().unwrap();
        let path = manifest_path(dir.path(), "").unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        let err = load(dir.path(), "", "me").await.unwrap_err();
        assert_eq!(err.path(), path.as_path());
        assert!(matches!(
            err,
            ManifestError::Codec {
                source: CodecError::Malformed(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn invalid_utf8_is_malformed() {
        let dir = TempDir::new().unwrap();
        let path = manifest_path(dir.path(), "").unwrap();
        let mut raw = br#"{ "version": 1, "instance": ""#.to_vec();
        raw.extend_from_slice(b"\xff\xfe");
        raw.extend_from_slice(br#"", "files": [] }"#);
        std::fs::write(&path, raw).unwrap();

        let err = load(dir.path(), "", "me").await.unwrap_err();
        assert_eq!(err.path(), path.as_path());
        assert!(matches!(
            err,
            ManifestError::Codec {
                source: CodecError::Malformed(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn mod_type_cannot_leave_the_target() {
        let outer = TempDir::new().unwrap();
        let target = outer.path().join("game").join("Data");
        std::fs::create_dir_all(&target).unwrap();

        for mod_type in ["x/../../../escaped", "..", "a.b", "tab\t", "sub/dir"] {
            let err = save(&target, mod_type, "me", files(), None)
                .await
                .unwrap_err();
            assert!(
                matches!(&err, ManifestError::Io { source, .. } if source.kind() == io::ErrorKind::InvalidInput),
                "{mod_type:?}: {err}"
            );
            assert!(load(&target, mod_type, "me").await.is_err());
            assert!(manifest_path(&target, mod_type).is_err());
        }

        let outer_entries: Vec<_> = std::fs::read_dir(outer.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(outer_entries, vec![std::ffi::OsString::from("game")]);
        assert_eq!(std::fs::read_dir(&target).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn unreadable_manifest_is_an_io_error() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(manifest_path(dir.path(), "").unwrap()).unwrap();

        let err = load(dir.path(), "", "me").await.unwrap_err();
        assert!(matches!(err, ManifestError::Io { .. }));
    }

    #[tokio::test]
    async fn listing_a_missing_target_is_empty() {
        let dir = TempDir::new().unwrap();
        let types = list_mod_types(&dir.path().join("nope")).await.unwrap();
        assert!(types.is_empty());
    }
}
