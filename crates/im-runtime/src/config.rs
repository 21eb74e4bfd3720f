//! Environment-backed session configuration.

use std::{env, error::Error, fmt, str::FromStr, time::Duration};

const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 30_000;
const MAX_COMMAND_TIMEOUT_MS: u64 = 86_400_000;
const DEFAULT_MAX_QUEUED_COMMANDS: usize = 64;
const DEFAULT_TRANSPORT_EVENT_BUFFER: usize = 256;
const DEFAULT_SESSION_EVENT_BUFFER: usize = 256;

/// What happens to commands submitted while the session is not connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OfflinePolicy {
    /// Hold commands in a bounded queue and send them once resumed.
    #[default]
    Queue,
    /// Reject immediately with `NotConnected`.
    FailFast,
}

impl FromStr for OfflinePolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "queue" => Ok(Self::Queue),
            "fail-fast" | "fail_fast" | "failfast" => Ok(Self::FailFast),
            other => Err(format!("expected 'queue' or 'fail-fast', got '{other}'")),
        }
    }
}

/// Runtime configuration for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Default per-command reply deadline.
    pub command_timeout: Duration,
    /// Offline submission policy.
    pub offline_policy: OfflinePolicy,
    /// Cap on commands held while offline.
    pub max_queued_commands: usize,
    /// Capacity of the inbound transport event channel.
    pub transport_event_buffer: usize,
    /// Capacity of the broadcast session event stream.
    pub session_event_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS),
            offline_policy: OfflinePolicy::default(),
            max_queued_commands: DEFAULT_MAX_QUEUED_COMMANDS,
            transport_event_buffer: DEFAULT_TRANSPORT_EVENT_BUFFER,
            session_event_buffer: DEFAULT_SESSION_EVENT_BUFFER,
        }
    }
}

impl SessionConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let command_timeout_ms = parse_with_default(
            "IM_COMMAND_TIMEOUT_MS",
            DEFAULT_COMMAND_TIMEOUT_MS,
            &mut lookup,
        )?;
        let offline_policy =
            parse_with_default("IM_OFFLINE_POLICY", OfflinePolicy::default(), &mut lookup)?;
        let max_queued_commands = parse_with_default(
            "IM_MAX_QUEUED_COMMANDS",
            DEFAULT_MAX_QUEUED_COMMANDS,
            &mut lookup,
        )?;
        let transport_event_buffer = parse_with_default(
            "IM_TRANSPORT_EVENT_BUFFER",
            DEFAULT_TRANSPORT_EVENT_BUFFER,
            &mut lookup,
        )?;
        let session_event_buffer = parse_with_default(
            "IM_SESSION_EVENT_BUFFER",
            DEFAULT_SESSION_EVENT_BUFFER,
            &mut lookup,
        )?;

        if !(1..=MAX_COMMAND_TIMEOUT_MS).contains(&command_timeout_ms) {
            return Err(ConfigError::InvalidValue {
                key: "IM_COMMAND_TIMEOUT_MS",
                value: command_timeout_ms.to_string(),
                reason: format!("must be between 1 and {MAX_COMMAND_TIMEOUT_MS}"),
            });
        }

        Ok(Self {
            command_timeout: Duration::from_millis(command_timeout_ms),
            offline_policy,
            max_queued_commands,
            transport_event_buffer,
            session_event_buffer,
        })
    }

    pub fn with_offline_policy(mut self, policy: OfflinePolicy) -> Self {
        self.offline_policy = policy;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_max_queued_commands(mut self, cap: usize) -> Self {
        self.max_queued_commands = cap;
        self
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn parse_with_default<T, F>(key: &'static str, default: T, lookup: &mut F) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
    else {
        return Ok(default);
    };
    value.parse::<T>().map_err(|err| ConfigError::InvalidValue {
        key,
        value,
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from_pairs(pairs: &[(&str, &str)]) -> Result<SessionConfig, ConfigError> {
        let map = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<HashMap<_, _>>();
        SessionConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_without_environment() {
        let cfg = config_from_pairs(&[]).expect("config should parse");
        assert_eq!(cfg, SessionConfig::default());
        assert_eq!(cfg.command_timeout, Duration::from_secs(30));
        assert_eq!(cfg.offline_policy, OfflinePolicy::Queue);
        assert_eq!(cfg.max_queued_commands, 64);
    }

    #[test]
    fn parses_overrides() {
        let cfg = config_from_pairs(&[
            ("IM_COMMAND_TIMEOUT_MS", "1500"),
            ("IM_OFFLINE_POLICY", " Fail-Fast "),
            ("IM_MAX_QUEUED_COMMANDS", "0"),
            ("IM_TRANSPORT_EVENT_BUFFER", "8"),
            ("IM_SESSION_EVENT_BUFFER", "4"),
        ])
        .expect("config should parse");

        assert_eq!(cfg.command_timeout, Duration::from_millis(1_500));
        assert_eq!(cfg.offline_policy, OfflinePolicy::FailFast);
        assert_eq!(cfg.max_queued_commands, 0);
        assert_eq!(cfg.transport_event_buffer, 8);
        assert_eq!(cfg.session_event_buffer, 4);
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let cfg = config_from_pairs(&[("IM_OFFLINE_POLICY", "   ")]).expect("config should parse");
        assert_eq!(cfg.offline_policy, OfflinePolicy::Queue);
    }

    #[test]
    fn rejects_zero_timeout() {
        let err = config_from_pairs(&[("IM_COMMAND_TIMEOUT_MS", "0")])
            .expect_err("zero timeout should fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "IM_COMMAND_TIMEOUT_MS",
                ..
            }
        ));
    }

    #[test]
    fn rejects_timeout_beyond_one_day() {
        let err = config_from_pairs(&[("IM_COMMAND_TIMEOUT_MS", "18446744073709551615")])
            .expect_err("huge timeout should fail");
        assert_eq!(
            err.to_string(),
            "invalid IM_COMMAND_TIMEOUT_MS='18446744073709551615': must be between 1 and 86400000"
        );

        let cfg = config_from_pairs(&[("IM_COMMAND_TIMEOUT_MS", "86400000")])
            .expect("one day is accepted");
        assert_eq!(cfg.command_timeout, Duration::from_secs(86_400));
    }

    #[test]
    fn rejects_invalid_values() {
        let err = config_from_pairs(&[("IM_OFFLINE_POLICY", "drop")])
            .expect_err("unknown policy should fail");
        assert_eq!(
            err.to_string(),
            "invalid IM_OFFLINE_POLICY='drop': expected 'queue' or 'fail-fast', got 'drop'"
        );

        let err = config_from_pairs(&[("IM_MAX_QUEUED_COMMANDS", "-1")])
            .expect_err("negative cap should fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "IM_MAX_QUEUED_COMMANDS",
                ..
            }
        ));
    }
}
