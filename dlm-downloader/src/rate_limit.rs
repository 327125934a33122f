use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _};
use tokio::time::Instant;

/// Tokens are acquired in chunks of this size, which is also the transfer
/// buffer size.
pub(crate) const TRANSFER_CHUNK_SIZE: usize = 128 * 1024;

#[derive(Debug, thiserror::Error)]
pub(crate) enum TransferError {
    #[error("read error")]
    Read(#[source] io::Error),
    #[error("write error")]
    Write(#[source] io::Error),
}

/// Token-bucket cap on the aggregate byte rate of every concurrent
/// [`RateLimiter::transfer`] call.
///
/// The active bucket sits behind a reader-writer lock; transfers hold the
/// read lock only long enough to clone the bucket handle, and
/// reconfiguration swaps the handle under the write lock, taking effect at
/// the next token acquisition. Token waits hold no lock at all.
pub(crate) struct RateLimiter {
    bucket: RwLock<Arc<Bucket>>,
}

impl RateLimiter {
    pub(crate) fn new(bytes_per_second: i64) -> Self {
        let limiter = RateLimiter {
            bucket: RwLock::new(Arc::new(Bucket::unlimited())),
        };
        limiter.set_rate_limit(bytes_per_second);
        limiter
    }

    /// Sets the maximum aggregate transfer rate. Zero or negative removes
    /// the limit; anything below the chunk size is raised to it, because a
    /// bucket smaller than one acquisition could never grant it.
    pub(crate) fn set_rate_limit(&self, bytes_per_second: i64) {
        let bucket = if bytes_per_second <= 0 {
            Bucket::unlimited()
        } else {
            let rate = u64::try_from(bytes_per_second)
                .unwrap_or_default()
                .max(TRANSFER_CHUNK_SIZE as u64);
            Bucket::new(rate, rate)
        };

        *self.bucket.write() = Arc::new(bucket);
    }

    fn bucket(&self) -> Arc<Bucket> {
        Arc::clone(&self.bucket.read())
    }

    /// Copies `reader` into `writer` in rate-limited chunks, finishing
    /// cleanly at end-of-stream. Parallel calls share the same bucket, so
    /// the configured rate caps their combined throughput. Cancellation is
    /// dropping the returned future.
    pub(crate) async fn transfer<R, W>(&self, reader: &mut R, writer: &mut W) -> Result<(), TransferError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = vec![0u8; TRANSFER_CHUNK_SIZE];

        loop {
            // Re-load the bucket every iteration so a reconfiguration swap
            // applies to inflight transfers.
            self.bucket().acquire(TRANSFER_CHUNK_SIZE as u64).await;

            let n = reader.read(&mut buf).await.map_err(TransferError::Read)?;
            if n == 0 {
                return Ok(());
            }

            writer.write_all(&buf[..n]).await.map_err(TransferError::Write)?;
        }
    }
}

struct Bucket {
    /// Tokens per second; zero disables limiting.
    rate: u64,
    burst: u64,
    state: Mutex<BucketState>,
}

struct BucketState {
    available: f64,
    updated: Instant,
}

impl Bucket {
    fn new(rate: u64, burst: u64) -> Self {
        Bucket {
            rate,
            burst,
            state: Mutex::new(BucketState {
                available: burst as f64,
                updated: Instant::now(),
            }),
        }
    }

    fn unlimited() -> Self {
        Bucket::new(0, 1)
    }

    async fn acquire(&self, tokens: u64) {
        if self.rate == 0 {
            return;
        }

        let tokens = tokens as f64;

        loop {
            let wait = {
                let mut state = self.state.lock();

                let now = Instant::now();
                let elapsed = now.duration_since(state.updated).as_secs_f64();
                state.available = (state.available + elapsed * self.rate as f64).min(self.burst as f64);
                state.updated = now;

                if state.available >= tokens {
                    state.available -= tokens;
                    None
                } else {
                    Some(Duration::from_secs_f64((tokens - state.available) / self.rate as f64))
                }
            };

            match wait {
                None => return,
                Some(delay) => tokio::time::sleep(delay).await,
            }
        }
    }
}
