use std::time::Duration;

use anyhow::Context as _;
use camino::{Utf8Path, Utf8PathBuf};

use crate::size::Size;

/// Downloader configuration, read from the environment once at startup.
/// Anything invalid here is fatal; per-item problems never are.
#[derive(Debug, Clone)]
pub(crate) struct Conf {
    /// Base URL of the queue broker.
    pub queue_address: String,
    pub connection_timeout: Duration,
    /// Sandbox root beneath which every destination path is resolved.
    pub download_directory: Utf8PathBuf,
    /// Shared secret sent in the `authorization` header.
    pub key: String,
    /// Default `User-Agent` for sources that don't override it.
    pub user_agent: String,
    /// Claim polling interval; must be longer than one second.
    pub poll_period: Duration,
    /// Aggregate transfer cap; zero means unlimited.
    pub rate_limit: Size,
    /// Queue to poll for work.
    pub queue: String,
    pub log_file: Option<Utf8PathBuf>,
    pub log_filter: String,
}

impl Conf {
    pub(crate) fn from_env() -> anyhow::Result<Conf> {
        let queue_address = env_req("DLM_DOWNLOADER_QUEUE_ADDRESS")?;

        let connection_timeout = humantime::parse_duration(&env_or("DLM_DOWNLOADER_CONNECTION_TIMEOUT", "10s"))
            .context("DLM_DOWNLOADER_CONNECTION_TIMEOUT is not a valid duration")?;

        let download_directory = Utf8PathBuf::from(env_req("DLM_DOWNLOADER_DOWNLOAD_DIRECTORY")?);

        let key = env_req("DLM_DOWNLOADER_KEY")?;

        let user_agent = env_or("DLM_DOWNLOADER_USER_AGENT", "dlm/development");

        let poll_period = humantime::parse_duration(&env_or("DLM_DOWNLOADER_POLL_PERIOD", "10s"))
            .context("DLM_DOWNLOADER_POLL_PERIOD is not a valid duration")?;
        if poll_period <= Duration::from_secs(1) {
            anyhow::bail!("DLM_DOWNLOADER_POLL_PERIOD must be greater than one second");
        }

        let rate_limit = env_or("DLM_DOWNLOADER_RATE_LIMIT", "10MB")
            .parse::<Size>()
            .context("DLM_DOWNLOADER_RATE_LIMIT is not a valid size")?;

        let queue = env_or("DLM_DOWNLOADER_QUEUE", "default");

        let log_file = env_opt("DLM_DOWNLOADER_LOG_FILE").map(Utf8PathBuf::from);
        let log_filter = env_or("DLM_DOWNLOADER_LOG_FILTER", "info");

        Ok(Conf {
            queue_address,
            connection_timeout,
            download_directory,
            key,
            user_agent,
            poll_period,
            rate_limit,
            queue,
            log_file,
            log_filter,
        })
    }
}

/// The download root must exist and be writable before any item is claimed;
/// finding out mid-transfer would fail items pointlessly.
pub(crate) fn check_download_directory(dir: &Utf8Path) -> anyhow::Result<()> {
    let metadata = std::fs::metadata(dir).with_context(|| format!("download directory {dir} does not exist"))?;

    if !metadata.is_dir() {
        anyhow::bail!("download directory path {dir} is not a directory");
    }

    let probe = dir.join(".dlm-write-probe");
    std::fs::write(&probe, b"write probe; this file can be safely deleted\n")
        .with_context(|| format!("unable to write to download directory {dir}"))?;
    let _ = std::fs::remove_file(&probe);

    Ok(())
}

fn env_req(name: &str) -> anyhow::Result<String> {
    env_opt(name).with_context(|| format!("{name} is required"))
}

fn env_or(name: &str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_owned())
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_directory_check_accepts_a_writable_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = Utf8Path::from_path(dir.path()).expect("utf-8 temp dir");

        check_download_directory(path).expect("writable directory");

        // The probe file is cleaned up.
        assert!(std::fs::read_dir(path).expect("read dir").next().is_none());
    }

    #[test]
    fn download_directory_check_rejects_missing_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = Utf8Path::from_path(dir.path()).expect("utf-8 temp dir").join("missing");

        assert!(check_download_directory(&path).is_err());
    }

    #[test]
    fn download_directory_check_rejects_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = Utf8Path::from_path(dir.path()).expect("utf-8 temp dir").join("file");
        std::fs::write(&path, b"x").expect("write");

        assert!(check_download_directory(&path).is_err());
    }
}
