//! The deployment manifest: which files were placed into a target, by whom
//! and when.

pub mod codec;
pub mod format;
pub mod store;

use serde::{Deserialize, Serialize};

pub use codec::{decode, decode_slice, encode, repair, CodecError};
pub use format::{FormatRegistry, CURRENT_VERSION};
pub use store::{
    is_valid_mod_type, list_mod_types, load, manifest_file_name, manifest_path, save,
    ManifestError,
};

/// Persisted record for one (target directory, mod type) pair.
///
/// Field order here is the on-disk field order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentManifest {
    pub version: u32,
    pub instance: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_method: Option<String>,
    pub files: Vec<DeployedFile>,
}

impl DeploymentManifest {
    /// Manifest for a target nothing has been deployed to yet.
    pub fn empty(instance: &str) -> Self {
        Self {
            version: CURRENT_VERSION,
            instance: instance.to_string(),
            deployment_method: None,
            files: Vec::new(),
        }
    }

    pub fn is_foreign(&self, instance: &str) -> bool {
        self.instance != instance
    }
}

/// One file placed into a deployment target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployedFile {
    /// Path relative to the deployment target root.
    pub rel_path: String,
    /// Id of the mod that contributed the file.
    pub source: String,
    /// Modification time at deployment, milliseconds since the Unix epoch.
    pub time: f64,
}

impl DeployedFile {
    pub fn new(rel_path: impl Into<String>, source: impl Into<String>, time: f64) -> Self {
        Self {
            rel_path: rel_path.into(),
            source: source.into(),
            time,
        }
    }
}
