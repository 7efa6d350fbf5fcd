use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};

use crate::app_config::AppConfig;

pub const CONFIG_PATH_ENV: &str = "VOICELINK_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "voicelink.json";

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$VOICELINK_CONFIG`, or `voicelink.json` in the working directory.
    pub fn from_env(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let path = lookup(CONFIG_PATH_ENV)
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CONFIG_FILE.into());
        Self::at_path(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> anyhow::Result<AppConfig> {
        let bytes = fs::read(&self.path)
            .with_context(|| format!("read config: {}", self.path.display()))?;
        let cfg: AppConfig = serde_json::from_slice(&bytes).context("decode config JSON")?;
        Ok(cfg)
    }

    /// Like `load`, but a missing file yields the defaults.
    pub fn load_or_default(&self) -> anyhow::Result<AppConfig> {
        if !self.path.exists() {
            log::info!("No config at {}; using defaults", self.path.display());
            return Ok(AppConfig::default());
        }
        self.load()
    }

    pub fn save(&self, cfg: &AppConfig) -> anyhow::Result<()> {
        let json = serde_json::to_vec_pretty(cfg).context("encode config JSON")?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create config directory: {}", parent.display()))?;
        }

        // Atomic-ish write: write temp then replace.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("write temp: {}", tmp.display()))?;
        replace_file(&tmp, &self.path)
            .with_context(|| format!("replace file: {}", self.path.display()))?;
        Ok(())
    }
}

fn replace_file(tmp: &Path, dst: &Path) -> anyhow::Result<()> {
    let backup = dst.with_extension("bak");

    if dst.exists() {
        let _ = fs::remove_file(&backup);
        fs::rename(dst, &backup)
            .with_context(|| format!("failed rename {} -> {}", dst.display(), backup.display()))?;
    }

    if let Err(e) = fs::rename(tmp, dst) {
        // Try to restore previous file if we had one.
        if backup.exists() {
            let _ = fs::rename(&backup, dst);
        }
        let _ = fs::remove_file(tmp);
        return Err(anyhow::Error::new(e).context(format!(
            "failed rename {} -> {}",
            tmp.display(),
            dst.display()
        )));
    }

    let _ = fs::remove_file(&backup);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_config() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::at_path(dir.path().join("nested").join("voicelink.json"));

        let mut cfg = AppConfig::default();
        cfg.session.voice = "cedar".into();
        cfg.audio.input_device = Some("USB Mic".into());

        store.save(&cfg).unwrap();
        assert_eq!(store.load().unwrap(), cfg);

        // Overwrite keeps exactly one file and no leftovers.
        cfg.audio.playback_enabled = false;
        store.save(&cfg).unwrap();
        assert_eq!(store.load().unwrap(), cfg);
        assert!(!store.path().with_extension("bak").exists());
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::at_path(dir.path().join("absent.json"));
        assert!(store.load().is_err());
        assert_eq!(store.load_or_default().unwrap(), AppConfig::default());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voicelink.json");
        fs::write(&path, b"{not json").unwrap();
        assert!(ConfigStore::at_path(path).load_or_default().is_err());
    }

    #[test]
    fn path_comes_from_env_or_default() {
        let store = ConfigStore::from_env(|_| Some("/tmp/custom.json".into()));
        assert_eq!(store.path(), Path::new("/tmp/custom.json"));

        let store = ConfigStore::from_env(|_| None);
        assert_eq!(store.path(), Path::new(DEFAULT_CONFIG_FILE));
    }
}
