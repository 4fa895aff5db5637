//! Front-end controller for windowed use. Every user action that touches the
//! network runs on its own worker thread and reports back over a channel, so
//! the interaction thread only ever waits on `UiMsg`s.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, mpsc};
use std::thread::{self, JoinHandle};

use tracing::{error, info, warn};

use crate::app_state::{AppConfig, BeatmapSummary, SearchFilter};
use crate::downloader::{BatchSummary, Downloader};
use crate::search::SearchClient;
use crate::storage::update_download_folder;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UiMsg {
    SearchState { loading: bool, message: Option<String> },
    SearchFinished { count: usize },
    SearchFailed(String),
    DownloadProgress { done: usize, total: usize, label: String },
    DownloadFailed { title: String, reason: String },
    DownloadFinished(BatchSummary),
    Info(String),
    Warning(String),
    Error(String),
}

/// Embedding API for windowed front ends; the bundled binary uses `cli`.
pub struct Session {
    search: Arc<SearchClient>,
    downloader: Arc<Downloader>,
    config: Mutex<AppConfig>,
    config_path: PathBuf,
    results: Arc<Mutex<Vec<BeatmapSummary>>>,
    ui_tx: mpsc::Sender<UiMsg>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Session {
    pub fn new(
        search: SearchClient,
        downloader: Downloader,
        config: AppConfig,
        config_path: PathBuf,
        ui_tx: mpsc::Sender<UiMsg>,
    ) -> Self {
        Self {
            search: Arc::new(search),
            downloader: Arc::new(downloader),
            config: Mutex::new(config),
            config_path,
            results: Arc::new(Mutex::new(Vec::new())),
            ui_tx,
        }
    }

    pub fn download_folder(&self) -> PathBuf {
        lock(&self.config).download_folder.clone()
    }

    /// Snapshot of the current result table.
    pub fn results(&self) -> Vec<BeatmapSummary> {
        lock(&self.results).clone()
    }

    /// Persists a new download folder. On failure the previous folder stays
    /// in effect.
    pub fn save_folder(&self, folder: &Path) {
        let mut cfg = lock(&self.config);
        match update_download_folder(&mut cfg, folder, &self.config_path) {
            Ok(()) => {
                let _ = self.ui_tx.send(UiMsg::Info(format!(
                    "Download folder set to {}",
                    folder.display()
                )));
            }
            Err(err) => {
                error!("Saving download folder failed: {err:#}");
                let _ = self
                    .ui_tx
                    .send(UiMsg::Error(format!("Could not set folder: {err:#}")));
            }
        }
    }

    pub fn start_search(&self, filter: SearchFilter) -> JoinHandle<()> {
        let search = self.search.clone();
        let results = self.results.clone();
        let ui_tx = self.ui_tx.clone();
        thread::spawn(move || {
            let _ = ui_tx.send(UiMsg::SearchState {
                loading: true,
                message: Some("Searching...".into()),
            });
            lock(&results).clear();
            match search.search_summaries(&filter) {
                Ok(found) => {
                    let count = found.len();
                    *lock(&results) = found;
                    info!("Search finished with {count} results");
                    let _ = ui_tx.send(UiMsg::SearchFinished { count });
                }
                Err(err) => {
                    warn!("Search failed: {err}");
                    let _ = ui_tx.send(UiMsg::SearchFailed(err.to_string()));
                }
            }
            let _ = ui_tx.send(UiMsg::SearchState {
                loading: false,
                message: None,
            });
        })
    }

    /// Downloads the rows at `indices`. Returns `None` when nothing was
    /// selected.
    pub fn start_download(&self, indices: Vec<usize>) -> Option<JoinHandle<()>> {
        if indices.is_empty() {
            let _ = self
                .ui_tx
                .send(UiMsg::Warning("Select beatmaps to download first.".into()));
            return None;
        }
        let items: Vec<Option<BeatmapSummary>> = {
            let results = lock(&self.results);
            indices.iter().map(|&i| results.get(i).cloned()).collect()
        };
        Some(self.spawn_download(items))
    }

    pub fn start_download_all(&self) -> Option<JoinHandle<()>> {
        let items: Vec<Option<BeatmapSummary>> =
            lock(&self.results).iter().cloned().map(Some).collect();
        if items.is_empty() {
            let _ = self
                .ui_tx
                .send(UiMsg::Warning("Search for beatmaps first.".into()));
            return None;
        }
        Some(self.spawn_download(items))
    }

    fn spawn_download(&self, items: Vec<Option<BeatmapSummary>>) -> JoinHandle<()> {
        let downloader = self.downloader.clone();
        let folder = self.download_folder();
        let ui_tx = self.ui_tx.clone();
        thread::spawn(move || {
            let total = items.len();
            let mut summary = BatchSummary::default();
            for (idx, item) in items.into_iter().enumerate() {
                let Some(item) = item else {
                    warn!("Selected row {idx} is no longer in the result list");
                    summary.skipped += 1;
                    continue;
                };
                let title = item.display_title();
                let _ = ui_tx.send(UiMsg::DownloadProgress {
                    done: idx,
                    total,
                    label: format!("Downloading: {title}"),
                });
                let outcome = downloader.download_summary(&item, &folder, &mut |_| {});
                summary.record(&outcome);
                if let Err(err) = outcome {
                    let _ = ui_tx.send(UiMsg::DownloadFailed {
                        title: title.clone(),
                        reason: err.to_string(),
                    });
                }
                let _ = ui_tx.send(UiMsg::DownloadProgress {
                    done: idx + 1,
                    total,
                    label: title,
                });
            }
            info!(
                "Download run finished: {} ok, {} failed, {} skipped",
                summary.succeeded, summary.failed, summary.skipped
            );
            let _ = ui_tx.send(UiMsg::DownloadFinished(summary));
        })
    }
}
