use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_LIMIT: u32 = 100;
pub const MAX_FILE_NAME_LEN: usize = 250;
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_TITLE: &str = "Unknown Title";

static ILLEGAL_FILE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[<>:"/\\|?*]"#).expect("static regex"));

/// Timing and bounds of the download retry loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per mirror for transport errors and error statuses.
    pub attempts: u32,
    /// Pause after a failed attempt.
    pub retry_delay: Duration,
    /// Pause after a `425 Too Early` answer.
    pub too_early_delay: Duration,
    /// 425 answers per mirror that do not consume an attempt.
    pub too_early_retries: u32,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn default_attempts() -> u32 {
        3
    }
    pub fn default_retry_delay() -> Duration {
        Duration::from_secs(2)
    }
    pub fn default_too_early_delay() -> Duration {
        Duration::from_secs(5)
    }
    pub fn default_too_early_retries() -> u32 {
        3
    }
    pub fn default_timeout() -> Duration {
        Duration::from_secs(30)
    }

    /// Same bounds, no waiting. Used by tests and dry runs.
    pub fn immediate() -> Self {
        Self {
            retry_delay: Duration::ZERO,
            too_early_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: Self::default_attempts(),
            retry_delay: Self::default_retry_delay(),
            too_early_delay: Self::default_too_early_delay(),
            too_early_retries: Self::default_too_early_retries(),
            timeout: Self::default_timeout(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "crate::storage::default_download_folder")]
    pub download_folder: PathBuf,
    /// Keys this program does not know about, written back untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            download_folder: crate::storage::default_download_folder(),
            extra: Map::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BeatmapSummary {
    pub id: Option<u64>,
    pub beatmapset_id: Option<u64>,
    pub artist: String,
    pub title: String,
}

impl BeatmapSummary {
    /// Identifier used for archive downloads; falls back to `id`.
    pub fn set_id(&self) -> Option<u64> {
        self.beatmapset_id.or(self.id)
    }

    pub fn display_title(&self) -> String {
        format!("{} - {}", self.artist, self.title)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchFilter {
    pub query: Option<String>,
    pub limit: u32,
    pub offset: u32,
    pub status: Option<Vec<i64>>,
    pub mode: Option<Vec<i64>>,
    pub sort: Option<Vec<String>>,
}

impl Default for SearchFilter {
    fn default() -> Self {
        Self {
            query: None,
            limit: DEFAULT_LIMIT,
            offset: 0,
            status: None,
            mode: None,
            sort: None,
        }
    }
}

/// Replaces characters Windows refuses in file names and clamps the length,
/// keeping the extension when possible.
pub fn sanitize_filename(name: &str) -> String {
    let sanitized = ILLEGAL_FILE_CHARS.replace_all(name, "_").into_owned();
    if sanitized.chars().count() <= MAX_FILE_NAME_LEN {
        return sanitized;
    }
    let (stem, ext) = split_extension(&sanitized);
    let ext_len = ext.chars().count();
    if ext_len >= MAX_FILE_NAME_LEN {
        return sanitized.chars().take(MAX_FILE_NAME_LEN).collect();
    }
    let mut out: String = stem.chars().take(MAX_FILE_NAME_LEN - ext_len).collect();
    out.push_str(ext);
    out
}

/// Splits `name` at the last dot, ignoring leading dots (`.hidden` has no
/// extension).
fn split_extension(name: &str) -> (&str, &str) {
    let leading = name.len() - name.trim_start_matches('.').len();
    match name[leading..].rfind('.') {
        Some(idx) => name.split_at(leading + idx),
        None => (name, ""),
    }
}

pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
