use anyhow::Context as _;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use camino::Utf8PathBuf;
use rand::RngCore as _;
use rand::rngs::OsRng;

const KEY_LENGTH_BYTES: usize = 16;

/// Broker configuration, read from the environment once at startup.
#[derive(Debug, Clone)]
pub struct Conf {
    /// TCP port the RPC surface listens on.
    pub port: u16,
    /// Location of the single-file queue database.
    pub db_path: Utf8PathBuf,
    /// Shared secret expected in the `authorization` header.
    pub key: String,
    /// Whether `key` was generated at startup rather than configured.
    pub key_generated: bool,
    /// Queue created at startup when absent.
    pub default_queue: String,
    /// Optional rolling log file location; stdout only when unset.
    pub log_file: Option<Utf8PathBuf>,
    /// `EnvFilter` directives for the logger.
    pub log_filter: String,
}

impl Conf {
    pub fn from_env() -> anyhow::Result<Conf> {
        let port = env_or("DLM_BROKER_PORT", "9010")
            .parse::<u16>()
            .context("DLM_BROKER_PORT is not a valid port number")?;

        let db_path = Utf8PathBuf::from(env_or("DLM_BROKER_DB", "queue.db"));

        let (key, key_generated) = match env_opt("DLM_BROKER_KEY") {
            Some(key) => (key, false),
            None => (generate_key(), true),
        };

        let default_queue = env_or("DLM_BROKER_DEFAULT_QUEUE", "default");

        let log_file = env_opt("DLM_BROKER_LOG_FILE").map(Utf8PathBuf::from);
        let log_filter = env_or("DLM_BROKER_LOG_FILTER", "info");

        Ok(Conf {
            port,
            db_path,
            key,
            key_generated,
            default_queue,
            log_file,
            log_filter,
        })
    }
}

fn generate_key() -> String {
    let mut buf = [0u8; KEY_LENGTH_BYTES];
    OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

fn env_or(name: &str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_owned())
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}
