use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use crate::client::ResearchClient;
use crate::decoder::DecoderLimits;
use crate::history::HistoryStore;
use crate::persistence::JsonFileBackend;
use crate::retry::RetryPolicy;
use crate::session::SessionConfig;
use crate::transport::HttpTransport;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub api_url: String,
    pub stream_timeout: Duration,
    pub request_timeout: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub limits: DecoderLimits,
    pub history_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn Error>> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Box<dyn Error>> {
        let number = |key: &str, default: u64| -> Result<u64, Box<dyn Error>> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .map_err(|e| format!("invalid {}={:?}: {}", key, raw, e).into()),
                None => Ok(default),
            }
        };

        Ok(Self {
            api_url: lookup("RESEARCH_API_URL").unwrap_or_else(|| "http://localhost:8000".to_string()),
            stream_timeout: Duration::from_secs(number("RESEARCH_STREAM_TIMEOUT_SECS", 300)?),
            request_timeout: Duration::from_secs(number("RESEARCH_REQUEST_TIMEOUT_SECS", 300)?),
            retry_attempts: u32::try_from(number("RESEARCH_RETRY_ATTEMPTS", 4)?)?,
            retry_delay: Duration::from_millis(number("RESEARCH_RETRY_DELAY_MS", 1000)?),
            limits: DecoderLimits {
                max_pending_frames: usize::try_from(number("RESEARCH_MAX_PENDING_FRAMES", 8)?)?,
                max_pending_bytes: usize::try_from(number("RESEARCH_MAX_PENDING_BYTES", 65536)?)?,
            },
            history_dir: lookup("RESEARCH_HISTORY_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_history_dir),
        })
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            timeout: self.stream_timeout,
            limits: self.limits,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, self.retry_delay)
    }
}

fn default_history_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("deep-research"))
        .unwrap_or_else(|| PathBuf::from("."))
}

pub struct AppState {
    pub client: ResearchClient<HttpTransport>,
    pub history: HistoryStore<JsonFileBackend>,
}

pub fn app_init() -> Result<(Config, AppState), Box<dyn Error>> {
    let config = Config::from_env()?;
    log::info!("✅ Configuration loaded");

    let transport = HttpTransport::new(&config.api_url, config.request_timeout)?;
    let client = ResearchClient::new(transport)
        .with_session_config(config.session_config())
        .with_retry_policy(config.retry_policy());
    log::info!("🔌 Research API: {}", config.api_url);

    let history = HistoryStore::open(JsonFileBackend::new(&config.history_dir));
    log::info!(
        "💾 History: {} ({} records)",
        config.history_dir.display(),
        history.len()
    );

    Ok((config, AppState { client, history }))
}
