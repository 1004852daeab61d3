/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// HTTP request timeout in seconds (default: `300`; a cron-triggered
    /// sweep runs within the request).
    pub request_timeout_secs: u64,
    /// Shared secret for the cron trigger routes. When unset, those routes
    /// refuse every call.
    pub cron_secret: Option<String>,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default   |
    /// |------------------------|-----------|
    /// | `HOST`                 | `0.0.0.0` |
    /// | `PORT`                 | `3000`    |
    /// | `REQUEST_TIMEOUT_SECS` | `300`     |
    /// | `CRON_SECRET`          | unset     |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "300".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let cron_secret = std::env::var("CRON_SECRET").ok().filter(|s| !s.is_empty());
        if cron_secret.is_none() {
            tracing::warn!("CRON_SECRET not configured; cron trigger routes will refuse all calls");
        }

        Self {
            host,
            port,
            request_timeout_secs,
            cron_secret,
        }
    }
}
