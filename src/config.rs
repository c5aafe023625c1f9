use crate::purge::DEFAULT_PURGE_CONCURRENCY;
use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use uuid::Uuid;

const CONFIG_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Identity written into every manifest this installation saves.
    #[serde(default)]
    pub instance_id: String,
    #[serde(default = "default_purge_concurrency")]
    pub purge_concurrency: usize,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(skip)]
    path: PathBuf,
}

impl AppConfig {
    pub fn load_or_create() -> Result<Self> {
        Self::load_or_create_in(&base_data_dir()?)
    }

    pub fn load_or_create_in(base_dir: &Path) -> Result<Self> {
        fs::create_dir_all(base_dir).context("create app data dir")?;
        let path = base_dir.join(CONFIG_FILE);
        if path.exists() {
            let raw = fs::read_to_string(&path).context("read manifest config")?;
            let mut config: AppConfig =
                serde_json::from_str(&raw).context("parse manifest config")?;
            config.path = path;
            let mut dirty = false;
            if config.instance_id.trim().is_empty() {
                config.instance_id = new_instance_id();
                dirty = true;
            }
            if config.purge_concurrency == 0 {
                config.purge_concurrency = default_purge_concurrency();
                dirty = true;
            }
            if dirty {
                config.save()?;
            }
            return Ok(config);
        }

        let config = AppConfig {
            instance_id: new_instance_id(),
            purge_concurrency: default_purge_concurrency(),
            log_level: default_log_level(),
            path,
        };
        config.save()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let raw = serde_json::to_string_pretty(self).context("serialize manifest config")?;
        fs::write(&self.path, raw).context("write manifest config")?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn new_instance_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn default_purge_concurrency() -> usize {
    DEFAULT_PURGE_CONCURRENCY
}

fn default_log_level() -> String {
    "info".to_string()
}

fn base_data_dir() -> Result<PathBuf> {
    let base = BaseDirs::new().context("resolve home dir")?;
    Ok(base.data_local_dir().join("sigilsmith"))
}
