use std::time::Duration;

/// Progress API server settings.
///
/// Loaded by the worker binary together with the rest of its configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout (default: 30 s). Does not apply to open sockets.
    pub request_timeout: Duration,
    /// Interval between WebSocket pings (default: 30 s).
    pub heartbeat_interval: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            cors_origins: vec!["http://localhost:3000".into()],
            request_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}
