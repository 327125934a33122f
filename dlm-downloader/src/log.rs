use dlm_log::StaticLogConfig;

pub(crate) struct DownloaderLog;

impl StaticLogConfig for DownloaderLog {
    const MAX_LOG_FILES: usize = 10;
    const LOG_FILE_PREFIX: &'static str = "dlm_downloader";
}
