//! # Election Configuration
//!
//! Immutable per-process configuration, identifier-based defaults and the
//! small parsing helpers shared by the daemon's flag and environment layers.

use crate::error::ConfigError;
use crate::types::{InstanceToken, LeaseKey};
use serde::Serialize;
use std::time::Duration;

/// Default lease lifetime in seconds.
pub const DEFAULT_TTL_SECS: u64 = 30;

/// Default delay between two acquire/renew cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Namespace under which default lease keys are derived.
pub const KEY_NAMESPACE: &str = "/warden";

/// Suffix appended to the identifier to derive the default unit name.
pub const UNIT_SUFFIX: &str = ".service";

/// Configuration of one election participant.
///
/// Built once at startup and shared read-only afterwards.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use warden_core::ElectionConfig;
///
/// let config = ElectionConfig::for_identifier("web", "node-a")
///     .unwrap()
///     .with_poll_interval(Duration::from_secs(2));
///
/// assert_eq!(config.unit_name, "web.service");
/// assert_eq!(config.lease_key.as_str(), "/warden/web");
/// assert_eq!(config.renew_threshold(), Duration::from_secs(15));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ElectionConfig {
    /// Lease lifetime in whole seconds
    pub ttl_secs: u64,

    /// Delay between acquire/renew cycles; also the supervisor polling interval
    pub poll_interval: Duration,

    /// Supervised unit started by the leader
    pub unit_name: String,

    /// Lock key in the coordination service
    pub lease_key: LeaseKey,

    /// Value written into the lock by this instance
    pub instance_token: InstanceToken,
}

impl ElectionConfig {
    pub fn new(
        lease_key: impl Into<LeaseKey>,
        instance_token: impl Into<InstanceToken>,
        unit_name: impl Into<String>,
    ) -> Self {
        Self {
            ttl_secs: DEFAULT_TTL_SECS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            unit_name: unit_name.into(),
            lease_key: lease_key.into(),
            instance_token: instance_token.into(),
        }
    }

    /// Derive unit name and lease key from an identifier.
    pub fn for_identifier(
        identifier: &str,
        instance_token: impl Into<InstanceToken>,
    ) -> Result<Self, ConfigError> {
        validate_identifier(identifier)?;
        Ok(Self::new(
            default_lease_key(identifier),
            instance_token,
            default_unit_name(identifier),
        ))
    }

    pub fn with_ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_unit_name(mut self, unit_name: impl Into<String>) -> Self {
        self.unit_name = unit_name.into();
        self
    }

    pub fn with_lease_key(mut self, key: impl Into<LeaseKey>) -> Self {
        self.lease_key = key.into();
        self
    }

    pub fn with_instance_token(mut self, token: impl Into<InstanceToken>) -> Self {
        self.instance_token = token.into();
        self
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Remaining lifetime below which the leader renews.
    pub fn renew_threshold(&self) -> Duration {
        self.ttl() / 2
    }

    /// Longest accepted poll interval. Renewal then starts with at least
    /// `ttl/6` of lease left and a failed renewal still gets a second attempt.
    pub fn max_poll_interval(&self) -> Duration {
        self.ttl() / 3
    }

    /// Check the invariants the election loop relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl_secs == 0 {
            return Err(ConfigError::invalid_value("ttl", "must be at least 1 second"));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::invalid_value(
                "poll_interval",
                "must be greater than zero",
            ));
        }
        if self.poll_interval > self.max_poll_interval() {
            return Err(ConfigError::invalid_value(
                "poll_interval",
                format!(
                    "{:?} must be at most a third of the TTL ({:?})",
                    self.poll_interval,
                    self.max_poll_interval()
                ),
            ));
        }
        if self.unit_name.trim().is_empty() {
            return Err(ConfigError::invalid_value("unit", "must not be empty"));
        }
        if self.lease_key.as_str().trim().is_empty() {
            return Err(ConfigError::invalid_value("key", "must not be empty"));
        }
        if self.instance_token.as_str().is_empty() {
            return Err(ConfigError::invalid_value("whoami", "must not be empty"));
        }
        Ok(())
    }
}

/// Validate the positional instance identifier.
pub fn validate_identifier(identifier: &str) -> Result<(), ConfigError> {
    let reason = if identifier.is_empty() {
        Some("must not be empty")
    } else if identifier.contains('/') {
        Some("must not contain '/'")
    } else if identifier.chars().any(|c| c.is_whitespace() || c.is_control()) {
        Some("must not contain whitespace or control characters")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(ConfigError::InvalidIdentifier {
            identifier: identifier.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

pub fn default_unit_name(identifier: &str) -> String {
    format!("{}{}", identifier, UNIT_SUFFIX)
}

pub fn default_lease_key(identifier: &str) -> LeaseKey {
    LeaseKey::new(format!("{}/{}", KEY_NAMESPACE, identifier))
}

/// Upper-case a flag or identifier name and replace dashes with underscores.
///
/// ```rust
/// assert_eq!(warden_core::config::to_environment_key("etcd-servers"), "ETCD_SERVERS");
/// ```
pub fn to_environment_key(name: &str) -> String {
    name.replace('-', "_").to_uppercase()
}

/// Environment prefixes consulted for `identifier`, most specific first.
pub fn environment_prefixes(base: &str, identifier: &str) -> [String; 2] {
    [
        format!("{}_{}", base, to_environment_key(identifier)),
        base.to_string(),
    ]
}

/// Parse a duration such as `500ms`, `5s`, `2m`, `1h` or a bare number of seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty duration".to_string());
    }

    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (digits, unit) = input.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration {:?}", input))?;

    let seconds = |factor: u64| {
        value
            .checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration {:?} is too large", input))
    };

    match unit {
        "" | "s" => Ok(Duration::from_secs(value)),
        "ms" => Ok(Duration::from_millis(value)),
        "m" => seconds(60),
        "h" => seconds(3600),
        other => Err(format!("unknown duration unit {:?} in {:?}", other, input)),
    }
}
