use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use dlm_task::{ChildTask, ShutdownSignal, Task};
use queue_client::QueueClient;
use queue_proto::{ClaimedItem, ItemState};
use tokio::io::{AsyncWrite, AsyncWriteExt as _};

use crate::config::Conf;
use crate::rate_limit::RateLimiter;
use crate::reader::SourceFactory;
use crate::writer::DestinationFactory;

/// Progress reports double as lease refreshes, so this must stay well under
/// the broker's 30 s claim TTL.
const UPDATE_PERIOD: Duration = Duration::from_secs(3);

pub(crate) struct DownloaderTask {
    client: QueueClient,
    queue: String,
    poll_period: Duration,
    limiter: RateLimiter,
    sources: SourceFactory,
    destinations: DestinationFactory,
}

impl DownloaderTask {
    pub(crate) fn new(client: QueueClient, conf: &Conf) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(conf.connection_timeout)
            .build()
            .context("failed to build the HTTP client")?;

        Ok(DownloaderTask {
            client,
            queue: conf.queue.clone(),
            poll_period: conf.poll_period,
            limiter: RateLimiter::new(conf.rate_limit.bytes()),
            sources: SourceFactory::new(http, conf.user_agent.clone()),
            destinations: DestinationFactory::new(conf.download_directory.clone()),
        })
    }

    async fn poll_loop(self) -> anyhow::Result<()> {
        let mut ticker = tokio::time::interval(self.poll_period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let claimed = match self.client.claim_next_item(&self.queue).await {
                Ok(Some(item)) => item,
                Ok(None) => {
                    trace!(queue = %self.queue, "No claimable item");
                    continue;
                }
                Err(error) => {
                    warn!(error = format!("{error:#}"), "Failed to claim an item");
                    continue;
                }
            };

            info!(item_id = %claimed.id, source = %claimed.source, "Claimed item");

            match self.handle_item(&claimed).await {
                Ok(outcome) => {
                    info!(item_id = %claimed.id, downloaded = outcome.downloaded, "Download complete");

                    let report = self
                        .client
                        .set_item_state(&claimed.id, ItemState::Complete, outcome.downloaded, outcome.total, "")
                        .await;
                    if let Err(error) = report {
                        error!(error = format!("{error:#}"), item_id = %claimed.id, "Failed to report completion");
                    }
                }
                Err(failure) => {
                    let message = format!("{:#}", failure.error);
                    error!(error = %message, item_id = %claimed.id, "Download failed");

                    let report = self
                        .client
                        .set_item_state(&claimed.id, ItemState::Failed, failure.downloaded, failure.total, &message)
                        .await;
                    if let Err(error) = report {
                        error!(error = format!("{error:#}"), item_id = %claimed.id, "Failed to report failure");
                    }
                }
            }
        }
    }

    /// Streams one claimed item from its source to its destination, feeding
    /// the progress reporter through a shared byte counter. The partial file
    /// is left in place on failure; a re-claim overwrites it.
    async fn handle_item(&self, item: &ClaimedItem) -> Result<TransferOutcome, ItemFailure> {
        let source = self
            .sources
            .build(&item.source)
            .with_context(|| format!("error constructing reader for url {}", item.source))
            .map_err(ItemFailure::early)?;

        let destination = self
            .destinations
            .build(&item.destination)
            .with_context(|| format!("error constructing writer for url {}", item.destination))
            .map_err(ItemFailure::early)?;

        let (mut reader, length) = source
            .open()
            .await
            .with_context(|| format!("error opening {}", item.source))
            .map_err(ItemFailure::early)?;
        let total = length.unwrap_or(0);

        let sink = destination
            .open()
            .await
            .with_context(|| format!("error opening {}", item.destination))
            .map_err(|error| ItemFailure::at(0, total, error))?;

        let counter = Arc::new(AtomicU64::new(0));
        let mut writer = CountingWriter::new(sink, Arc::clone(&counter));

        // Aborted when dropped, which ends reporting on every path out of
        // this function.
        let _reporter = ChildTask::spawn(report_progress(
            self.client.clone(),
            item.id.clone(),
            Arc::clone(&counter),
            total,
        ));

        let transferred = self.limiter.transfer(&mut reader, &mut writer).await;

        let closed = writer.shutdown().await;
        let downloaded = counter.load(Ordering::SeqCst);

        if let Err(error) = transferred.context("transfer error") {
            return Err(ItemFailure::at(downloaded, total, error));
        }

        closed
            .context("error closing destination")
            .map_err(|error| ItemFailure::at(downloaded, total, error))?;

        Ok(TransferOutcome { downloaded, total })
    }
}

#[async_trait]
impl Task for DownloaderTask {
    type Output = anyhow::Result<()>;

    const NAME: &'static str = "downloader";

    async fn run(self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
        let poll_loop = self.poll_loop();

        tokio::select! {
            result = poll_loop => result,
            _ = shutdown_signal.wait() => {
                debug!("Downloader stopped");
                Ok(())
            }
        }
    }
}

struct TransferOutcome {
    downloaded: u64,
    total: u64,
}

struct ItemFailure {
    downloaded: u64,
    total: u64,
    error: anyhow::Error,
}

impl ItemFailure {
    fn early(error: anyhow::Error) -> Self {
        ItemFailure::at(0, 0, error)
    }

    fn at(downloaded: u64, total: u64, error: anyhow::Error) -> Self {
        ItemFailure {
            downloaded,
            total,
            error,
        }
    }
}

async fn report_progress(client: QueueClient, item_id: String, counter: Arc<AtomicU64>, total: u64) {
    loop {
        tokio::time::sleep(UPDATE_PERIOD).await;

        let downloaded = counter.load(Ordering::SeqCst);
        debug!(item_id = %item_id, downloaded, total, "Downloading item");

        let report = client
            .set_item_state(&item_id, ItemState::Downloading, downloaded, total, "")
            .await;
        if let Err(error) = report {
            warn!(error = format!("{error:#}"), item_id = %item_id, "Failed to report progress");
        }
    }
}

/// Forwards writes to the inner sink while keeping a shared count of bytes
/// written, readable concurrently by the progress reporter.
struct CountingWriter<W> {
    inner: W,
    written: Arc<AtomicU64>,
}

impl<W> CountingWriter<W> {
    fn new(inner: W, written: Arc<AtomicU64>) -> Self {
        CountingWriter { inner, written }
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for CountingWriter<W> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);

        if let Poll::Ready(Ok(n)) = poll {
            this.written.fetch_add(n as u64, Ordering::SeqCst);
        }

        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
