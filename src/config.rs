use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.homeroom.app/v1";
const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Remote API configuration. Env overrides let staging builds point at a
/// different backend without a recompile.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Self {
        let base_url =
            std::env::var("HOMEROOM_API_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let timeout_secs = std::env::var("HOMEROOM_API_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        ApiConfig {
            base_url,
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}
