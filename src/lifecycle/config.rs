//! Unit-of-work configuration.
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `UOW_WAIT_TIMEOUT_MS` | `1500` | How long a waiting row lock may block before `LockTimeout` |
//! | `RUST_LOG` | unset | Log filter, see [`setup_tracing`](crate::lifecycle::setup_tracing) |

use crate::framework::DEFAULT_WAIT_TIMEOUT_MS;
use std::time::Duration;
use tracing::warn;

/// Environment variable overriding [`UnitOfWorkConfig::wait_timeout`].
pub const WAIT_TIMEOUT_ENV: &str = "UOW_WAIT_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOfWorkConfig {
    /// Upper bound on a blocking (non-NOWAIT) lock wait.
    pub wait_timeout: Duration,
}

impl Default for UnitOfWorkConfig {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_millis(DEFAULT_WAIT_TIMEOUT_MS),
        }
    }
}

impl UnitOfWorkConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`; invalid values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(raw) = lookup(WAIT_TIMEOUT_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(millis) => config.wait_timeout = Duration::from_millis(millis),
                Err(error) => warn!(
                    variable = WAIT_TIMEOUT_ENV,
                    value = %raw,
                    %error,
                    "Invalid wait timeout, using default"
                ),
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::TransactionOptions;

    #[test]
    fn default_wait_timeout() {
        assert_eq!(
            UnitOfWorkConfig::default().wait_timeout,
            Duration::from_millis(1500)
        );
        assert_eq!(
            UnitOfWorkConfig::from_lookup(|_| None),
            UnitOfWorkConfig::default()
        );
    }

    #[test]
    fn transaction_default_agrees_with_config_default() {
        assert_eq!(
            TransactionOptions::default().wait_timeout,
            UnitOfWorkConfig::default().wait_timeout
        );
    }

    #[test]
    fn wait_timeout_override_and_fallback() {
        let config = UnitOfWorkConfig::from_lookup(|name| {
            (name == WAIT_TIMEOUT_ENV).then(|| " 250 ".to_string())
        });
        assert_eq!(config.wait_timeout, Duration::from_millis(250));

        let config = UnitOfWorkConfig::from_lookup(|_| Some("soon".to_string()));
        assert_eq!(config, UnitOfWorkConfig::default());
    }
}
