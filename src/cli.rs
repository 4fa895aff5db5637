use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{info, warn};

use crate::app_state::{AppConfig, DEFAULT_LIMIT, SearchFilter};
use crate::downloader::{BatchSummary, DownloadEvent, Downloader};
use crate::search::SearchClient;
use crate::storage::update_download_folder;

/// Prints `label`, reads one line and returns it trimmed. End of input reads
/// as an empty answer.
pub fn prompt<R: BufRead, W: Write>(input: &mut R, out: &mut W, label: &str) -> io::Result<String> {
    write!(out, "{label}")?;
    out.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Digits only; anything else falls back to `default`.
pub fn parse_count(text: &str, default: u32) -> u32 {
    if text.is_empty() || !text.chars().all(|c| c.is_ascii_digit()) {
        return default;
    }
    text.parse().unwrap_or(default)
}

/// Comma-separated integers. Returns the parsed list (`None` when nothing
/// valid was given) and the tokens that were not integers.
pub fn parse_int_list(text: &str) -> (Option<Vec<i64>>, Vec<String>) {
    let mut values = Vec::new();
    let mut rejected = Vec::new();
    for token in text.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        match token.parse() {
            Ok(v) => values.push(v),
            Err(_) => rejected.push(token.to_string()),
        }
    }
    let values = if values.is_empty() { None } else { Some(values) };
    (values, rejected)
}

pub fn parse_sort(text: &str) -> Option<Vec<String>> {
    let tokens: Vec<String> = text
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect();
    if tokens.is_empty() { None } else { Some(tokens) }
}

/// Shows the current folder and lets the user replace it. A folder that
/// cannot be created or saved leaves the old one in place.
pub fn choose_folder<R: BufRead, W: Write>(
    input: &mut R,
    out: &mut W,
    cfg: &mut AppConfig,
    config_path: &Path,
) -> io::Result<PathBuf> {
    writeln!(out, "\nCurrent download folder: {}", cfg.download_folder.display())?;
    let answer = prompt(input, out, "New download folder (Enter to keep): ")?;
    if !answer.is_empty() {
        match update_download_folder(cfg, Path::new(&answer), config_path) {
            Ok(()) => writeln!(out, "Download folder updated to: {answer}")?,
            Err(err) => writeln!(out, "Could not set folder: {err:#}")?,
        }
    }
    Ok(cfg.download_folder.clone())
}

pub fn read_filter<R: BufRead, W: Write>(input: &mut R, out: &mut W) -> io::Result<SearchFilter> {
    writeln!(out, "\nSearch parameters (Enter for defaults):")?;
    let query = prompt(input, out, "Keyword (default: latest): ")?;
    let limit = prompt(input, out, &format!("Limit (default: {DEFAULT_LIMIT}): "))?;
    let offset = prompt(input, out, "Offset (default: 0): ")?;
    let status = prompt(input, out, "Status filter (e.g. 2 for Ranked, comma separated): ")?;
    let mode = prompt(input, out, "Mode filter (e.g. 3 for Mania, comma separated): ")?;
    let sort = prompt(input, out, "Sort order (e.g. ranked_desc): ")?;

    let (status, bad_status) = parse_int_list(&status);
    let (mode, bad_mode) = parse_int_list(&mode);
    for token in bad_status.iter().chain(&bad_mode) {
        writeln!(out, "Ignoring filter value that is not a number: {token}")?;
    }

    Ok(SearchFilter {
        query: (!query.is_empty()).then_some(query),
        limit: parse_count(&limit, DEFAULT_LIMIT),
        offset: parse_count(&offset, 0),
        status,
        mode,
        sort: parse_sort(&sort),
    })
}

fn print_event<W: Write>(out: &mut W, event: &DownloadEvent, last_pct: &mut Option<u64>) -> io::Result<()> {
    match event {
        DownloadEvent::Attempt { mirror, attempt } if *attempt == 1 => {
            *last_pct = None;
            writeln!(out, "Source: {mirror}")
        }
        DownloadEvent::Attempt { .. } => Ok(()),
        DownloadEvent::TooEarly { wait, .. } => {
            writeln!(out, "425 Too Early, retrying in {}s...", wait.as_secs())
        }
        DownloadEvent::AttemptFailed { attempt, reason, .. } => {
            writeln!(out, "Attempt {attempt} failed: {reason}")
        }
        DownloadEvent::Progress { downloaded, total } => {
            let Some(total) = total.filter(|t| *t > 0) else {
                return Ok(());
            };
            let pct = downloaded * 100 / total;
            if *last_pct != Some(pct) {
                *last_pct = Some(pct);
                write!(out, "\r{pct:>3}% ({downloaded}/{total} bytes)")?;
                out.flush()?;
            }
            Ok(())
        }
        DownloadEvent::MirrorExhausted { mirror } => {
            writeln!(out, "Every attempt on {mirror} failed, trying the next source...")
        }
        DownloadEvent::Completed { path, .. } => {
            if last_pct.is_some() {
                writeln!(out)?;
            }
            writeln!(out, "Saved: {}", path.display())
        }
    }
}

/// Runs the whole interactive flow: folder, filters, search, then one
/// download per result. Failed items are reported and skipped.
pub fn run<R: BufRead, W: Write>(
    input: &mut R,
    out: &mut W,
    search: &SearchClient,
    downloader: &Downloader,
    cfg: &mut AppConfig,
    config_path: &Path,
) -> Result<BatchSummary> {
    let folder = choose_folder(input, out, cfg, config_path)?;
    let filter = read_filter(input, out)?;
    writeln!(out, "Requesting: {}", search.search_url(&filter))?;

    let results = match search.search_summaries(&filter) {
        Ok(results) if !results.is_empty() => results,
        Ok(_) => {
            writeln!(out, "Search returned no beatmaps.")?;
            return Ok(BatchSummary::default());
        }
        Err(err) => {
            warn!("Search failed: {err}");
            writeln!(out, "Search failed: {err}")?;
            return Ok(BatchSummary::default());
        }
    };
    writeln!(out, "Found {} beatmaps", results.len())?;

    let mut summary = BatchSummary::default();
    for item in &results {
        let id = item.id.map(|v| v.to_string()).unwrap_or_else(|| "?".into());
        let set_id = item.set_id().map(|v| v.to_string()).unwrap_or_else(|| "?".into());
        writeln!(out, "\n{} - {} (ID: {id}, SetID: {set_id})", item.title, item.artist)?;

        let mut last_pct = None;
        let mut print_err = None;
        let outcome = downloader.download_summary(item, &folder, &mut |event| {
            if print_err.is_none() {
                print_err = print_event(&mut *out, event, &mut last_pct).err();
            }
        });
        if let Some(err) = print_err {
            warn!("Output failed during download of {}: {err}", item.display_title());
            return Err(err.into());
        }
        if let Err(err) = &outcome {
            writeln!(out, "Could not download: {err}")?;
        }
        summary.record(&outcome);
    }

    info!(
        "CLI run finished: {} ok, {} failed, {} skipped",
        summary.succeeded, summary.failed, summary.skipped
    );
    writeln!(
        out,
        "\nDone: {} downloaded, {} failed, {} skipped",
        summary.succeeded, summary.failed, summary.skipped
    )?;
    Ok(summary)
}
