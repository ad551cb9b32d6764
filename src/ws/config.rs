#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};

use super::ConnectionManager;

const DEFAULT_MIN_DELAY_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Custom keep-alive, invoked on every heartbeat tick while connected.
pub type HeartbeatFn = Arc<dyn Fn(&ConnectionManager) + Send + Sync>;

/// Configuration for the rosbridge connection.
#[non_exhaustive]
#[derive(Clone, Default)]
pub struct Config {
    /// Bridge URL. When set, [`ConnectionManager::new`] connects right away.
    pub url: Option<String>,
    /// Heartbeat period. [`Duration::ZERO`] disables the watchdog.
    ///
    /// A link that stays silent for more than twice this period is
    /// considered dead and reconnected.
    pub heartbeat_interval: Duration,
    /// Replaces the default `/rosapi/get_time` keep-alive
    pub heartbeat_fn: Option<HeartbeatFn>,
    /// Reconnection strategy configuration
    pub reconnect: ReconnectConfig,
}

impl Config {
    #[must_use]
    pub fn with_url<S: Into<String>>(mut self, url: S) -> Self {
        self.url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    #[must_use]
    pub fn with_heartbeat_fn<F>(mut self, heartbeat: F) -> Self
    where
        F: Fn(&ConnectionManager) + Send + Sync + 'static,
    {
        self.heartbeat_fn = Some(Arc::new(heartbeat));
        self
    }

    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("url", &self.url)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("heartbeat_fn", &self.heartbeat_fn.as_ref().map(|_| "<fn>"))
            .field("reconnect", &self.reconnect)
            .finish()
    }
}

/// Configuration for automatic reconnection behavior.
///
/// Reconnection never gives up; only [`ConnectionManager::close`] stops it.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt
    pub min_delay: Duration,
    /// Upper bound for the delay between attempts
    pub max_delay: Duration,
    /// Factor applied to the delay after each attempt
    pub multiplier: f64,
}

impl ReconnectConfig {
    #[must_use]
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay,
            max_delay,
            ..Self::default()
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            min_delay: DEFAULT_MIN_DELAY_DURATION,
            max_delay: DEFAULT_MAX_DELAY_DURATION,
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl From<ReconnectConfig> for ExponentialBackoff {
    fn from(config: ReconnectConfig) -> Self {
        ExponentialBackoffBuilder::default()
            .with_initial_interval(config.min_delay)
            .with_max_interval(config.max_delay)
            .with_multiplier(config.multiplier)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build()
    }
}
