#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]

#[macro_use]
extern crate tracing;

mod config;
mod log;
mod rate_limit;
mod reader;
mod runner;
mod size;
mod writer;

use std::time::Duration;

use anyhow::Context as _;
use dlm_task::ShutdownHandle;
use queue_client::QueueClient;

use crate::config::Conf;
use crate::log::DownloaderLog;
use crate::runner::DownloaderTask;

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args();
    let executable = args.next().context("executable name is missing from the environment")?;

    match args.next().as_deref() {
        Some("--help" | "-h") => {
            println!(
                r#"USAGE:
    "{executable}"

CONFIGURATION (environment):
    DLM_DOWNLOADER_QUEUE_ADDRESS       Queue broker base URL (required)
    DLM_DOWNLOADER_KEY                 Shared secret (required)
    DLM_DOWNLOADER_DOWNLOAD_DIRECTORY  Sandbox root for downloads (required)
    DLM_DOWNLOADER_CONNECTION_TIMEOUT  Broker connect timeout (default: 10s)
    DLM_DOWNLOADER_USER_AGENT          Default User-Agent (default: dlm/development)
    DLM_DOWNLOADER_POLL_PERIOD         Claim polling interval, > 1s (default: 10s)
    DLM_DOWNLOADER_RATE_LIMIT          Aggregate rate cap, 0 = unlimited (default: 10MB)
    DLM_DOWNLOADER_QUEUE               Queue to poll (default: default)
    DLM_DOWNLOADER_LOG_FILE            Rolling log file location (stdout only when unset)
    DLM_DOWNLOADER_LOG_FILTER          Log filtering directives (default: info)
"#
            );
            Ok(())
        }
        Some(unexpected) => {
            anyhow::bail!("unexpected argument: {unexpected} (try --help)");
        }
        None => {
            let conf = Conf::from_env().context("unable to initialize configuration")?;

            let _logger_guard = dlm_log::init::<DownloaderLog>(conf.log_file.as_deref(), &conf.log_filter)
                .context("failed to setup logger")?;

            info!(version = env!("CARGO_PKG_VERSION"));

            config::check_download_directory(&conf.download_directory)
                .context("download directory check failed")?;

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to build the async runtime")?;

            runtime.block_on(run(conf))
        }
    }
}

async fn run(conf: Conf) -> anyhow::Result<()> {
    let client = QueueClient::new(&conf.queue_address, &conf.key, conf.connection_timeout)
        .context("failed to build the queue client")?;

    let (shutdown_handle, shutdown_signal) = ShutdownHandle::new();

    let task = DownloaderTask::new(client, &conf)?;
    let child = dlm_task::spawn_task(task, shutdown_signal);

    info!(queue = %conf.queue, address = %conf.queue_address, "Downloader started");

    build_signals_fut().await?;

    info!("Stopping downloader");
    shutdown_handle.signal();

    match tokio::time::timeout(Duration::from_secs(10), child.join()).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(anyhow::anyhow!(join_error)).context("downloader task failed"),
        Err(_) => {
            warn!("Downloader didn’t stop in time");
            Ok(())
        }
    }
}

#[cfg(unix)]
async fn build_signals_fut() -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate_signal = signal(SignalKind::terminate()).context("failed to create terminate signal stream")?;
    let mut interrupt_signal = signal(SignalKind::interrupt()).context("failed to create interrupt signal stream")?;

    tokio::select! {
        _ = terminate_signal.recv() => {}
        _ = interrupt_signal.recv() => {}
    }

    Ok(())
}

#[cfg(not(unix))]
async fn build_signals_fut() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await.context("CTRL_C signal failed")
}
