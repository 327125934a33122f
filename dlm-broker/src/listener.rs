use std::net::SocketAddr;

use anyhow::Context as _;
use async_trait::async_trait;
use dlm_task::{ShutdownSignal, Task};
use tokio::net::TcpListener;

use crate::BrokerState;

pub struct HttpListenerTask {
    listener: TcpListener,
    state: BrokerState,
}

impl HttpListenerTask {
    pub async fn init_and_bind(addr: SocketAddr, state: BrokerState) -> anyhow::Result<Self> {
        info!(%addr, "Initiating listener…");

        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;

        let local_addr = listener.local_addr().context("failed to read bound address")?;
        info!(addr = %local_addr, "Listener started successfully");

        Ok(Self { listener, state })
    }
}

#[async_trait]
impl Task for HttpListenerTask {
    type Output = anyhow::Result<()>;

    const NAME: &'static str = "http listener";

    async fn run(self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
        let app = crate::api::make_router(self.state);

        axum::serve(self.listener, app)
            .with_graceful_shutdown(async move { shutdown_signal.wait().await })
            .await
            .context("HTTP server failure")
    }
}
