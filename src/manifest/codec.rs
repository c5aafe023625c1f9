use super::{
    format::{version_number, FormatRegistry, CURRENT_VERSION},
    DeployedFile, DeploymentManifest,
};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed deployment manifest: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("malformed deployment manifest: expected a JSON object at the root")]
    NotAnObject,

    #[error("no upgrade path for manifest version {from} (current format is {current})")]
    UnsupportedUpgrade { from: u32, current: u32 },

    #[error("manifest version {found} was written by a newer release (this release reads up to {current})")]
    NewerFormat { found: u32, current: u32 },

    #[error("deployment manifest failed to serialize: {0}")]
    Serialization(#[source] serde_json::Error),
}

impl CodecError {
    pub fn is_malformed(&self) -> bool {
        matches!(self, CodecError::Malformed(_) | CodecError::NotAnObject)
    }
}

/// Parses manifest text. Blank input means no manifest exists yet.
pub fn decode(raw: &str) -> Result<Option<DeploymentManifest>, CodecError> {
    decode_with(&FormatRegistry::builtin(), raw)
}

pub fn decode_with(
    registry: &FormatRegistry,
    raw: &str,
) -> Result<Option<DeploymentManifest>, CodecError> {
    decode_slice_with(registry, raw.as_bytes())
}

/// Like [`decode`], for raw file contents. Bytes that are not UTF-8 are a
/// malformed manifest, not an I/O problem.
pub fn decode_slice(raw: &[u8]) -> Result<Option<DeploymentManifest>, CodecError> {
    decode_slice_with(&FormatRegistry::builtin(), raw)
}

pub fn decode_slice_with(
    registry: &FormatRegistry,
    raw: &[u8],
) -> Result<Option<DeploymentManifest>, CodecError> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let value: Value = serde_json::from_slice(raw).map_err(CodecError::Malformed)?;
    if !value.is_object() {
        return Err(CodecError::NotAnObject);
    }
    let upgraded = registry.upgrade(value)?;
    Ok(Some(repair(&upgraded)))
}

/// Normalizes a parsed manifest. Never fails: bad file records are dropped,
/// missing header fields get their defaults.
pub fn repair(value: &Value) -> DeploymentManifest {
    let version = value
        .get("version")
        .and_then(version_number)
        .filter(|version| *version > 0)
        .unwrap_or(CURRENT_VERSION);

    let instance = value
        .get("instance")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let deployment_method = value
        .get("deploymentMethod")
        .and_then(Value::as_str)
        .filter(|method| !method.is_empty())
        .map(str::to_string);

    let files = value
        .get("files")
        .and_then(Value::as_array)
        .map(|entries| entries.iter().filter_map(repair_file).collect())
        .unwrap_or_default();

    DeploymentManifest {
        version,
        instance,
        deployment_method,
        files,
    }
}

fn repair_file(entry: &Value) -> Option<DeployedFile> {
    let rel_path = entry.get("relPath")?.as_str()?;
    let source = entry.get("source")?.as_str()?;
    let time = entry.get("time")?.as_f64()?;
    Some(DeployedFile::new(rel_path, source, time))
}

/// Pretty JSON with stable field order. The output is read back before it is
/// returned so nothing unreadable ever reaches disk.
pub fn encode(manifest: &DeploymentManifest) -> Result<String, CodecError> {
    let mut raw = serde_json::to_string_pretty(manifest).map_err(CodecError::Serialization)?;
    serde_json::from_str::<DeploymentManifest>(&raw).map_err(CodecError::Serialization)?;
    raw.push('\n');
    Ok(raw)
}
