use anyhow::Context as _;
use async_trait::async_trait;
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use percent_encoding::percent_decode_str;
use url::Url;

use super::{DestinationWriter, SinkStream};

pub(crate) struct FileDestination {
    path: Utf8PathBuf,
}

impl FileDestination {
    pub(crate) fn parse(raw: &str, download_root: &Utf8Path) -> anyhow::Result<Self> {
        let url = Url::parse(raw).context("file url is not well formed")?;

        if url.scheme() != "file" {
            anyhow::bail!("expected a file:// url, got {raw}");
        }

        Ok(FileDestination {
            path: sandboxed_path(download_root, &url),
        })
    }
}

/// Joins the URL's host and path, roots the result at `/`, lexically
/// collapses `.` and `..`, then re-roots it beneath the download root.
///
/// The collapse happens against `/` before the root is applied, so `..`
/// sequences bottom out at the root instead of escaping past it; an
/// already-absolute path simply recreates its layout inside the root.
fn sandboxed_path(root: &Utf8Path, url: &Url) -> Utf8PathBuf {
    let host = url.host_str().unwrap_or_default();
    let path = percent_decode_str(url.path()).decode_utf8_lossy();

    let joined = format!("/{host}/{path}");

    let mut cleaned = Utf8PathBuf::from("/");
    for component in Utf8Path::new(&joined).components() {
        match component {
            Utf8Component::Normal(part) => cleaned.push(part),
            Utf8Component::ParentDir => {
                cleaned.pop();
            }
            Utf8Component::RootDir | Utf8Component::CurDir | Utf8Component::Prefix(_) => {}
        }
    }

    let relative = cleaned.strip_prefix("/").unwrap_or(&cleaned);
    root.join(relative)
}

#[async_trait]
impl DestinationWriter for FileDestination {
    async fn open(&self) -> anyhow::Result<SinkStream> {
        let file = tokio::fs::File::create(&self.path)
            .await
            .with_context(|| format!("error opening {}", self.path))?;

        Ok(Box::new(file))
    }
}
