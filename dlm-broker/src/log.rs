use dlm_log::StaticLogConfig;

pub struct BrokerLog;

impl StaticLogConfig for BrokerLog {
    const MAX_LOG_FILES: usize = 10;
    const LOG_FILE_PREFIX: &'static str = "dlm_broker";
}
