//! Schema versions of the on-disk manifest and the upgrade steps between them.

use super::codec::CodecError;
use serde_json::Value;
use std::collections::BTreeMap;

pub const CURRENT_VERSION: u32 = 1;

/// Version assumed for manifests written before the field existed.
pub const UNVERSIONED: u32 = 1;

/// Transforms a manifest of one version into the next version.
pub type UpgradeStep = fn(Value) -> Value;

#[derive(Debug, Clone)]
pub struct FormatRegistry {
    current: u32,
    steps: BTreeMap<u32, UpgradeStep>,
}

impl FormatRegistry {
    /// Registry with every format this build has ever shipped.
    pub fn builtin() -> Self {
        Self::new(CURRENT_VERSION).with_step(0, upgrade_v0)
    }

    pub fn new(current: u32) -> Self {
        Self {
            current,
            steps: BTreeMap::new(),
        }
    }

    pub fn with_step(mut self, from: u32, step: UpgradeStep) -> Self {
        self.steps.insert(from, step);
        self
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    /// Applies upgrade steps until the manifest is at the current version.
    ///
    /// Every step must strictly increase the version without passing the
    /// current one; anything else is a broken registry and fails loudly.
    pub fn upgrade(&self, mut value: Value) -> Result<Value, CodecError> {
        let mut version = declared_version(&value);
        if version > self.current {
            return Err(CodecError::NewerFormat {
                found: version,
                current: self.current,
            });
        }

        while version < self.current {
            let step = self
                .steps
                .get(&version)
                .ok_or(CodecError::UnsupportedUpgrade {
                    from: version,
                    current: self.current,
                })?;
            value = step(value);
            let next = declared_version(&value);
            if next <= version || next > self.current {
                return Err(CodecError::UnsupportedUpgrade {
                    from: version,
                    current: self.current,
                });
            }
            tracing::debug!(from = version, to = next, "upgraded deployment manifest");
            version = next;
        }

        if let Value::Object(map) = &mut value {
            map.insert("version".to_string(), Value::from(version));
        }
        Ok(value)
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Version field of a parsed manifest; absent or unusable values read as
/// [`UNVERSIONED`]. An explicit `0` is kept so pre-release files upgrade.
pub fn declared_version(value: &Value) -> u32 {
    value
        .get("version")
        .and_then(version_number)
        .unwrap_or(UNVERSIONED)
}

/// A version number as written by any JSON producer: `2` and `2.0` are the
/// same version, `2.5` is not a version at all.
pub fn version_number(value: &Value) -> Option<u32> {
    if let Some(version) = value.as_u64() {
        return u32::try_from(version).ok();
    }
    let version = value.as_f64()?;
    let integral = version.is_finite() && version.fract() == 0.0;
    (integral && (0.0..=f64::from(u32::MAX)).contains(&version)).then_some(version as u32)
}

// Pre-release builds stamped version 0 but otherwise wrote the v1 layout.
fn upgrade_v0(mut value: Value) -> Value {
    if let Value::Object(map) = &mut value {
        map.insert("version".to_string(), Value::from(1u32));
    }
    value
}
