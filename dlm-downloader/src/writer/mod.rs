mod file;

use async_trait::async_trait;
use camino::Utf8PathBuf;
use tokio::io::AsyncWrite;

pub(crate) type SinkStream = Box<dyn AsyncWrite + Send + Unpin>;

/// A place bytes can be written to, resolved from a URL by scheme.
#[async_trait]
pub(crate) trait DestinationWriter: Send + Sync {
    /// Creates (truncating) the destination and returns the byte sink.
    async fn open(&self) -> anyhow::Result<SinkStream>;
}

/// Builds writers from destination URLs; every resolved path lives beneath
/// the download root configured at startup.
pub(crate) struct DestinationFactory {
    download_root: Utf8PathBuf,
}

impl DestinationFactory {
    pub(crate) fn new(download_root: Utf8PathBuf) -> Self {
        DestinationFactory { download_root }
    }

    pub(crate) fn build(&self, url: &str) -> anyhow::Result<Box<dyn DestinationWriter>> {
        let scheme = url.split(':').next().unwrap_or_default().to_ascii_lowercase();

        match scheme.as_str() {
            "file" => {
                let destination = file::FileDestination::parse(url, &self.download_root)?;
                Ok(Box::new(destination))
            }
            other => anyhow::bail!("no writer registered for scheme {other:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatches_on_the_lowercased_scheme() {
        let factory = DestinationFactory::new(Utf8PathBuf::from("/var/downloads"));

        assert!(factory.build("file:///a/b").is_ok());
        assert!(factory.build("FILE:///a/b").is_ok());
        assert!(factory.build("http://example.com/a").is_err());
    }
}
