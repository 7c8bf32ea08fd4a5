use std::net::SocketAddr;
use std::time::Duration;

/// HTTP front-end settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub request_timeout: Duration,
    /// `*` allows any origin.
    pub cors_origin: String,
    /// Static API key. `None` leaves the API open.
    pub api_key: Option<String>,
    pub enable_secrets: bool,
    pub enable_mpc: bool,
    /// Period of the background storage compaction; `None` disables it.
    pub compaction_interval: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8200)),
            request_timeout: Duration::from_secs(30),
            cors_origin: "*".to_string(),
            api_key: None,
            enable_secrets: true,
            enable_mpc: true,
            compaction_interval: Some(Duration::from_secs(300)),
        }
    }
}
