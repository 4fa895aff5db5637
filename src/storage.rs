use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use directories::{BaseDirs, ProjectDirs};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use tracing::{info, warn};

use crate::app_state::{AppConfig, ensure_dir};

const CONFIG_FILE: &str = "config.json";

/// Loads `config.json` from the working directory.
pub fn load_config() -> AppConfig {
    load_config_from(&config_path())
}

/// A missing or unreadable file yields the default config.
pub fn load_config_from(path: &Path) -> AppConfig {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(_) => return AppConfig::default(),
    };
    match serde_json::from_str(&data) {
        Ok(cfg) => cfg,
        Err(err) => {
            warn!("{} is not valid config JSON ({err}); using defaults", path.display());
            AppConfig::default()
        }
    }
}

/// Writes the config as indented UTF-8 JSON through a temp file, so a crash
/// mid-write never leaves a truncated config behind.
pub fn save_config_to(path: &Path, cfg: &AppConfig) -> Result<()> {
    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    cfg.serialize(&mut ser).context("serializing config")?;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;

    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("config path has no file name: {}", path.display()))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = dir.join(tmp_name);

    let res = (|| {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(&buf)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;
        Ok::<(), std::io::Error>(())
    })();
    if res.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    res.with_context(|| format!("failed to write {}", path.display()))
}

/// Creates `folder`, points the config at it and saves. The in-memory config
/// only changes once the save went through.
pub fn update_download_folder(cfg: &mut AppConfig, folder: &Path, path: &Path) -> Result<()> {
    ensure_dir(folder).with_context(|| format!("creating folder {}", folder.display()))?;
    let mut next = cfg.clone();
    next.download_folder = folder.to_path_buf();
    save_config_to(path, &next)?;
    *cfg = next;
    info!("Download folder set to {}", folder.display());
    Ok(())
}

/// `%LOCALAPPDATA%\osu!\Songs` on Windows, the equivalent local data folder elsewhere.
pub fn default_download_folder() -> PathBuf {
    BaseDirs::new()
        .map(|b| b.data_local_dir().join("osu!").join("Songs"))
        .unwrap_or_else(|| PathBuf::from("Songs"))
}

pub fn config_path() -> PathBuf {
    PathBuf::from(CONFIG_FILE)
}

pub fn base_dir() -> PathBuf {
    let proj = ProjectDirs::from("dev", "osu", "osu-beatmap-fetcher");
    proj.map(|p| p.data_local_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn logs_dir() -> PathBuf {
    base_dir().join("logs")
}
