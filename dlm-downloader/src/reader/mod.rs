mod http;

pub(crate) use http::DEFAULT_USER_AGENT;

use async_trait::async_trait;
use tokio::io::AsyncRead;

pub(crate) type SourceStream = Box<dyn AsyncRead + Send + Unpin>;

/// A place bytes can be fetched from, resolved from a URL by scheme.
#[async_trait]
pub(crate) trait SourceReader: Send + Sync {
    /// Opens the byte stream, returning the advertised length when the
    /// source knows it.
    async fn open(&self) -> anyhow::Result<(SourceStream, Option<u64>)>;
}

/// Builds readers from source URLs; the substring before the first `:`,
/// lowercased, selects the constructor.
pub(crate) struct SourceFactory {
    client: reqwest::Client,
    default_user_agent: String,
}

impl SourceFactory {
    pub(crate) fn new(client: reqwest::Client, default_user_agent: String) -> Self {
        SourceFactory {
            client,
            default_user_agent,
        }
    }

    pub(crate) fn build(&self, url: &str) -> anyhow::Result<Box<dyn SourceReader>> {
        let scheme = url.split(':').next().unwrap_or_default().to_ascii_lowercase();

        match scheme.as_str() {
            "http" | "https" => {
                let source = http::HttpSource::parse(url, self.client.clone(), &self.default_user_agent)?;
                Ok(Box::new(source))
            }
            other => anyhow::bail!("no reader registered for scheme {other:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatches_on_the_lowercased_scheme() {
        let factory = SourceFactory::new(reqwest::Client::new(), String::new());

        assert!(factory.build("http://example.com/a").is_ok());
        assert!(factory.build("HTTPS://example.com/a").is_ok());
        assert!(factory.build("ftp://example.com/a").is_err());
        assert!(factory.build("not a url").is_err());
    }
}
