//! Client configuration

use std::path::PathBuf;
use std::time::Duration;

/// Default namespace of the persisted session blob
pub const DEFAULT_STORAGE_NAMESPACE: &str = "order-sync";

/// Who this session belongs to; sent in the push registration handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Authenticated user, `None` for guest sessions
    pub user_id: Option<String>,
    /// `customer` or `admin`
    pub role: String,
    /// Client session identifier
    pub session_id: String,
}

impl Identity {
    pub fn customer(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            role: "customer".to_string(),
            session_id: shared::util::random_id(),
        }
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            role: "admin".to_string(),
            session_id: shared::util::random_id(),
        }
    }

    pub fn guest() -> Self {
        Self {
            user_id: None,
            role: "guest".to_string(),
            session_id: shared::util::random_id(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::guest()
    }
}

/// Push client configuration
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// First reconnect delay
    pub reconnect_delay: Duration,
    /// Upper bound of the exponential backoff
    pub max_reconnect_delay: Duration,
    /// Attempts before giving up and reporting `Offline` (0 = retry forever)
    pub max_reconnect_attempts: u32,
    /// How long to wait for the registration acknowledgement
    pub register_timeout: Duration,
    /// Keepalive ping interval (zero disables)
    pub ping_interval: Duration,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_millis(500),
            max_reconnect_delay: Duration::from_secs(10),
            max_reconnect_attempts: 5,
            register_timeout: Duration::from_secs(5),
            ping_interval: Duration::from_secs(30),
        }
    }
}

impl PushConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial and maximum reconnect delay
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_delay = initial;
        self.max_reconnect_delay = max;
        self
    }

    /// Set the attempt ceiling (0 = retry forever)
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_register_timeout(mut self, timeout: Duration) -> Self {
        self.register_timeout = timeout;
        self
    }

    /// Set the keepalive interval (zero disables)
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Delay before reconnect attempt `attempt` (1-based): doubles each time, capped
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.reconnect_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_reconnect_delay)
    }
}

/// Order sync session configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// REST base URL (e.g., "https://shop.example.com/api")
    pub api_base_url: String,
    /// Push endpoint (e.g., "wss://shop.example.com/push"); `None` disables push
    pub push_url: Option<String>,
    /// Bearer token for REST calls
    pub token: Option<String>,
    /// REST request timeout
    pub request_timeout: Duration,
    pub identity: Identity,
    /// redb file for the persisted session blob; `None` keeps state in memory
    pub storage_path: Option<PathBuf>,
    /// Key of the session blob inside the redb file
    pub storage_namespace: String,
    /// Emit a notification when an order is first seen (admin feed)
    pub announce_new_orders: bool,
    /// Re-fetch `my-orders` after every push reconnect
    pub refresh_on_reconnect: bool,
    pub push: PushConfig,
}

impl SyncConfig {
    /// Create a configuration for the given REST base URL
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            push_url: None,
            token: None,
            request_timeout: Duration::from_secs(30),
            identity: Identity::default(),
            storage_path: None,
            storage_namespace: DEFAULT_STORAGE_NAMESPACE.to_string(),
            announce_new_orders: false,
            refresh_on_reconnect: true,
            push: PushConfig::default(),
        }
    }

    /// Load configuration from environment variables
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | ORDER_SYNC_API_URL | http://localhost:3000/api |
    /// | ORDER_SYNC_PUSH_URL | (push disabled) |
    /// | ORDER_SYNC_TOKEN | (none) |
    /// | ORDER_SYNC_TIMEOUT_SECS | 30 |
    /// | ORDER_SYNC_STORAGE_PATH | (in memory) |
    pub fn from_env() -> Self {
        let mut config = Self::new(
            std::env::var("ORDER_SYNC_API_URL")
                .unwrap_or_else(|_| "http://localhost:3000/api".into()),
        );
        config.push_url = std::env::var("ORDER_SYNC_PUSH_URL").ok();
        config.token = std::env::var("ORDER_SYNC_TOKEN").ok();
        config.request_timeout = Duration::from_secs(
            std::env::var("ORDER_SYNC_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
        );
        config.storage_path = std::env::var("ORDER_SYNC_STORAGE_PATH").ok().map(PathBuf::from);
        config
    }

    pub fn with_push_url(mut self, url: impl Into<String>) -> Self {
        self.push_url = Some(url.into());
        self
    }

    /// Set the bearer token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = Some(path.into());
        self
    }

    pub fn with_announce_new_orders(mut self, enabled: bool) -> Self {
        self.announce_new_orders = enabled;
        self
    }

    pub fn with_refresh_on_reconnect(mut self, enabled: bool) -> Self {
        self.refresh_on_reconnect = enabled;
        self
    }

    pub fn with_push_config(mut self, push: PushConfig) -> Self {
        self.push = push;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("http://localhost:3000/api")
    }
}
