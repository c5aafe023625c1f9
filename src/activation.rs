use crate::{
    manifest::{self, DeployedFile, ManifestError},
    methods::MethodRegistry,
    purge::{
        self, PurgeChoice, PurgeConfirm, PurgeError, PurgeReport, PurgeRequest,
        DEFAULT_PURGE_CONCURRENCY,
    },
};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ActivationError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Purge(#[from] PurgeError),

    /// The user declined to purge a foreign deployment. Whatever triggered
    /// the load must stop without further side effects.
    #[error("purge of {target:?} (deployed by instance {foreign_instance:?}) canceled")]
    UserCanceled {
        target: PathBuf,
        mod_type: String,
        foreign_instance: String,
        instance: String,
    },
}

impl ActivationError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, ActivationError::UserCanceled { .. })
    }
}

/// How the deployment state of a target was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Activation {
    /// Nothing is recorded for the target.
    Fresh,
    /// Files this instance deployed earlier (or a foreign manifest that
    /// lists nothing).
    Owned(Vec<DeployedFile>),
    /// A foreign deployment was purged; the target now belongs to this
    /// instance. Files modified since deployment are still on disk and
    /// listed in the report.
    Purged(PurgeReport),
}

impl Activation {
    pub fn into_files(self) -> Vec<DeployedFile> {
        match self {
            Activation::Owned(files) => files,
            Activation::Fresh | Activation::Purged(_) => Vec::new(),
        }
    }
}

/// Files currently deployed to `target_dir` by this instance.
///
/// If the manifest belongs to another instance the user is asked whether
/// its files may be purged; after a purge this instance owns the target and
/// the list is empty. [`resolve_activation`] reports what the purge left.
pub async fn load_activation<R, C>(
    mod_type: &str,
    target_dir: &Path,
    instance: &str,
    methods: &R,
    confirm: &C,
) -> Result<Vec<DeployedFile>, ActivationError>
where
    R: MethodRegistry + ?Sized,
    C: PurgeConfirm + ?Sized,
{
    load_activation_with(
        mod_type,
        target_dir,
        instance,
        methods,
        confirm,
        DEFAULT_PURGE_CONCURRENCY,
    )
    .await
}

pub async fn load_activation_with<R, C>(
    mod_type: &str,
    target_dir: &Path,
    instance: &str,
    methods: &R,
    confirm: &C,
    purge_concurrency: usize,
) -> Result<Vec<DeployedFile>, ActivationError>
where
    R: MethodRegistry + ?Sized,
    C: PurgeConfirm + ?Sized,
{
    resolve_activation(
        mod_type,
        target_dir,
        instance,
        methods,
        confirm,
        purge_concurrency,
    )
    .await
    .map(Activation::into_files)
}

/// Like [`load_activation_with`], but tells a fresh target from one that
/// was just purged and hands back the purge report.
pub async fn resolve_activation<R, C>(
    mod_type: &str,
    target_dir: &Path,
    instance: &str,
    methods: &R,
    confirm: &C,
    purge_concurrency: usize,
) -> Result<Activation, ActivationError>
where
    R: MethodRegistry + ?Sized,
    C: PurgeConfirm + ?Sized,
{
    let loaded = manifest::load(target_dir, mod_type, instance).await?;
    if loaded.files.is_empty() {
        return Ok(Activation::Fresh);
    }
    if !loaded.is_foreign(instance) {
        return Ok(Activation::Owned(loaded.files));
    }

    let safety = purge::classify(&loaded, methods);
    tracing::warn!(
        target_dir = %target_dir.display(),
        mod_type,
        foreign_instance = %loaded.instance,
        files = loaded.files.len(),
        safety = safety.label(),
        "deployment manifest belongs to another instance"
    );

    let request = PurgeRequest {
        safety,
        target_dir,
        mod_type,
        foreign_instance: &loaded.instance,
        instance,
        deployment_method: loaded.deployment_method.as_deref(),
        files: &loaded.files,
    };
    let canceled = || ActivationError::UserCanceled {
        target: target_dir.to_path_buf(),
        mod_type: mod_type.to_string(),
        foreign_instance: loaded.instance.clone(),
        instance: instance.to_string(),
    };
    match confirm.confirm(&request).await {
        Ok(PurgeChoice::Purge) => {}
        Ok(PurgeChoice::Cancel) => return Err(canceled()),
        Err(err) => {
            tracing::warn!("purge confirmation failed: {err:#}");
            return Err(canceled());
        }
    }

    let report = purge::fallback_purge(target_dir, &loaded.files, purge_concurrency).await?;
    manifest::save(target_dir, mod_type, instance, Vec::new(), None).await?;
    Ok(Activation::Purged(report))
}

/// Records `files` as the current deployment of `target_dir`.
pub async fn save_activation(
    mod_type: &str,
    instance: &str,
    target_dir: &Path,
    files: Vec<DeployedFile>,
    deployment_method: Option<&str>,
) -> Result<(), ActivationError> {
    manifest::save(target_dir, mod_type, instance, files, deployment_method).await?;
    Ok(())
}
