#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]

#[macro_use]
extern crate tracing;

mod service;

use anyhow::Context as _;
use dlm_broker::config::Conf;

use crate::service::BrokerService;

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args();
    let executable = args.next().context("executable name is missing from the environment")?;

    match args.next().as_deref() {
        Some("--help" | "-h") => {
            println!(
                r#"USAGE:
    "{executable}"

CONFIGURATION (environment):
    DLM_BROKER_PORT           Listen port (default: 9010)
    DLM_BROKER_DB             Queue database path (default: queue.db)
    DLM_BROKER_KEY            Shared secret; generated and logged when empty
    DLM_BROKER_DEFAULT_QUEUE  Queue created at startup (default: default)
    DLM_BROKER_LOG_FILE       Rolling log file location (stdout only when unset)
    DLM_BROKER_LOG_FILTER     Log filtering directives (default: info)
"#
            );
        }
        Some(unexpected) => {
            anyhow::bail!("unexpected argument: {unexpected} (try --help)");
        }
        None => {
            let conf = Conf::from_env().context("unable to initialize configuration")?;

            let mut service = BrokerService::load(conf).context("service loading failed")?;

            service
                .start()
                .inspect_err(|error| error!(error = format!("{error:#}"), "Failed to start"))?;

            // Waiting for some stop signal (CTRL-C…)
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_io()
                .build()
                .context("failed to build the async runtime")?;
            rt.block_on(build_signals_fut())?;

            service.stop();
        }
    }

    Ok(())
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
