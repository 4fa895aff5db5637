use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::USER_AGENT;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::app_state::{BeatmapSummary, RetryPolicy, ensure_dir, sanitize_filename};
use crate::search::BROWSER_USER_AGENT;

pub const CHUNK_SIZE: usize = 16 * 1024;
const TOO_EARLY: u16 = 425;

/// A host serving `.osz` archives under `/d/<set_id>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mirror {
    pub name: String,
    pub base_url: String,
}

impl Mirror {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn catboy() -> Self {
        Self::new("catboy.best", "https://catboy.best")
    }

    pub fn nerinyan() -> Self {
        Self::new("nerinyan.moe", "https://nerinyan.moe")
    }

    /// Primary host first, then the mirror.
    pub fn defaults() -> Vec<Mirror> {
        vec![Self::catboy(), Self::nerinyan()]
    }

    pub fn archive_url(&self, set_id: u64) -> String {
        format!("{}/d/{set_id}", self.base_url)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DownloadEvent {
    Attempt { mirror: String, attempt: u32 },
    TooEarly { mirror: String, wait: Duration },
    AttemptFailed { mirror: String, attempt: u32, reason: String },
    Progress { downloaded: u64, total: Option<u64> },
    MirrorExhausted { mirror: String },
    Completed { path: PathBuf, bytes: u64 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadReport {
    pub path: PathBuf,
    pub bytes: u64,
    pub mirror: String,
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("{title} has no beatmapset id")]
    MissingSetId { title: String },
    #[error("could not write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no mirror could deliver {title} (set {set_id}): {}", failures.join("; "))]
    Exhausted {
        set_id: u64,
        title: String,
        failures: Vec<String>,
    },
}

enum AttemptError {
    TooEarly,
    Retryable(String),
    Fatal(DownloadError),
}

/// Tally of a multi-item download run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl BatchSummary {
    pub fn record(&mut self, outcome: &Result<DownloadReport, DownloadError>) {
        match outcome {
            Ok(_) => self.succeeded += 1,
            Err(DownloadError::MissingSetId { .. }) => self.skipped += 1,
            Err(_) => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }
}

pub fn archive_file_name(set_id: u64, title: &str) -> String {
    sanitize_filename(&format!("{set_id} {title}.osz"))
}

fn part_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

pub struct Downloader {
    client: Client,
    mirrors: Vec<Mirror>,
    policy: RetryPolicy,
}

impl Downloader {
    pub fn new(mirrors: Vec<Mirror>, policy: RetryPolicy) -> Result<Self, DownloadError> {
        // The blocking client applies `timeout` to each wait (headers, every
        // body read), so a stalled source fails the attempt while a slow but
        // steady archive still finishes.
        let client = Client::builder()
            .connect_timeout(policy.timeout)
            .timeout(policy.timeout)
            .build()?;
        Ok(Self {
            client,
            mirrors,
            policy,
        })
    }

    pub fn with_defaults() -> Result<Self, DownloadError> {
        Self::new(Mirror::defaults(), RetryPolicy::default())
    }

    /// Downloads a search result, checking it carries a usable set id first.
    pub fn download_summary(
        &self,
        summary: &BeatmapSummary,
        folder: &Path,
        notify: &mut dyn FnMut(&DownloadEvent),
    ) -> Result<DownloadReport, DownloadError> {
        let title = summary.display_title();
        let Some(set_id) = summary.set_id() else {
            warn!("Skipping {title}: missing beatmapset_id");
            return Err(DownloadError::MissingSetId { title });
        };
        self.download(set_id, &title, folder, notify)
    }

    /// Tries every mirror in order until one delivers the archive into
    /// `folder`. Only a fully written file ever appears under the final name.
    pub fn download(
        &self,
        set_id: u64,
        title: &str,
        folder: &Path,
        notify: &mut dyn FnMut(&DownloadEvent),
    ) -> Result<DownloadReport, DownloadError> {
        ensure_dir(folder).map_err(|source| DownloadError::Io {
            path: folder.to_path_buf(),
            source,
        })?;
        let target = folder.join(archive_file_name(set_id, title));
        let mut failures = Vec::new();

        for mirror in &self.mirrors {
            let url = mirror.archive_url(set_id);
            info!("Downloading {title} (set {set_id}) from {url}");
            let mut attempt = 0;
            let mut too_early_left = self.policy.too_early_retries;

            while attempt < self.policy.attempts {
                notify(&DownloadEvent::Attempt {
                    mirror: mirror.name.clone(),
                    attempt: attempt + 1,
                });
                let reason = match self.fetch(&url, &target, notify) {
                    Ok(bytes) => {
                        info!("Saved {} ({bytes} bytes)", target.display());
                        notify(&DownloadEvent::Completed {
                            path: target.clone(),
                            bytes,
                        });
                        return Ok(DownloadReport {
                            path: target,
                            bytes,
                            mirror: mirror.name.clone(),
                        });
                    }
                    Err(AttemptError::Fatal(err)) => {
                        error!("Aborting {title}: {err}");
                        return Err(err);
                    }
                    Err(AttemptError::TooEarly) if too_early_left > 0 => {
                        too_early_left -= 1;
                        warn!(
                            "{} answered 425 Too Early, waiting {:?}",
                            mirror.name, self.policy.too_early_delay
                        );
                        notify(&DownloadEvent::TooEarly {
                            mirror: mirror.name.clone(),
                            wait: self.policy.too_early_delay,
                        });
                        thread::sleep(self.policy.too_early_delay);
                        continue;
                    }
                    Err(AttemptError::TooEarly) => format!("HTTP {TOO_EARLY}"),
                    Err(AttemptError::Retryable(reason)) => reason,
                };

                attempt += 1;
                warn!("Attempt {attempt} on {} failed: {reason}", mirror.name);
                notify(&DownloadEvent::AttemptFailed {
                    mirror: mirror.name.clone(),
                    attempt,
                    reason: reason.clone(),
                });
                failures.push(format!("{} attempt {attempt}: {reason}", mirror.name));
                if attempt < self.policy.attempts {
                    thread::sleep(self.policy.retry_delay);
                }
            }

            warn!("All attempts on {} failed, trying next source", mirror.name);
            notify(&DownloadEvent::MirrorExhausted {
                mirror: mirror.name.clone(),
            });
        }

        error!("Could not download {title} (set {set_id})");
        Err(DownloadError::Exhausted {
            set_id,
            title: title.to_string(),
            failures,
        })
    }

    fn fetch(
        &self,
        url: &str,
        target: &Path,
        notify: &mut dyn FnMut(&DownloadEvent),
    ) -> Result<u64, AttemptError> {
        let mut response = self
            .client
            .get(url)
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .send()
            .map_err(|err| AttemptError::Retryable(err.to_string()))?;
        let status = response.status();
        if status.as_u16() == TOO_EARLY {
            return Err(AttemptError::TooEarly);
        }
        if !status.is_success() {
            return Err(AttemptError::Retryable(format!("HTTP {}", status.as_u16())));
        }
        let total = response.content_length();

        let part = part_path(target);
        let io_error = |source| {
            AttemptError::Fatal(DownloadError::Io {
                path: part.clone(),
                source,
            })
        };
        let mut file = File::create(&part).map_err(io_error)?;
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut downloaded: u64 = 0;
        loop {
            let read = match response.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) => {
                    drop(file);
                    let _ = fs::remove_file(&part);
                    return Err(AttemptError::Retryable(format!("stream interrupted: {err}")));
                }
            };
            if let Err(err) = file.write_all(&buffer[..read]) {
                drop(file);
                let _ = fs::remove_file(&part);
                return Err(io_error(err));
            }
            downloaded += read as u64;
            notify(&DownloadEvent::Progress { downloaded, total });
        }
        let finished = file.flush().and_then(|_| {
            drop(file);
            fs::rename(&part, target)
        });
        if let Err(err) = finished {
            let _ = fs::remove_file(&part);
            return Err(io_error(err));
        }
        Ok(downloaded)
    }
}
