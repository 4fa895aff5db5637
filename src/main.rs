use std::io;

use osu_beatmap_fetcher::app_state::ensure_dir;
use osu_beatmap_fetcher::downloader::Downloader;
use osu_beatmap_fetcher::search::SearchClient;
use osu_beatmap_fetcher::{cli, storage};
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    ensure_dir(&storage::logs_dir())?;

    let file_appender = tracing_appender::rolling::never(storage::logs_dir(), "app.log");
    let (nb_writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(nb_writer);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(console_layer)
        .with(file_layer)
        .init();

    let config_path = storage::config_path();
    let mut config = storage::load_config();
    let search = SearchClient::new()?;
    let downloader = Downloader::with_defaults()?;

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut out = io::stdout();
    if let Err(err) = cli::run(&mut input, &mut out, &search, &downloader, &mut config, &config_path) {
        error!("Interactive session ended with an error: {err:#}");
        eprintln!("Error: {err:#}");
    }
    Ok(())
}
