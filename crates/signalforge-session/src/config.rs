use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::SessionError;

/// Session configuration for one device connection.
///
/// Duration fields are written as human-readable strings in config
/// files (`"5s"`, `"250ms"`, `"1m"`); an unparsable duration is a
/// fatal configuration error.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub server_host: String,
    pub server_port: u16,
    pub max_connection_attempts: u32,
    pub max_retries_on_error: u32,
    pub max_message_size: usize,
    #[serde(deserialize_with = "duration_from_str")]
    pub connection_attempt_delay: Duration,
    #[serde(rename = "connection_lockout_duration", deserialize_with = "duration_from_str")]
    pub connection_lockout: Duration,
    #[serde(deserialize_with = "duration_from_str")]
    pub handshake_timeout: Duration,
    #[serde(deserialize_with = "duration_from_str")]
    pub read_timeout: Duration,
    #[serde(deserialize_with = "duration_from_str")]
    pub write_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_host: "localhost".to_string(),
            server_port: 3000,
            max_connection_attempts: 5,
            max_retries_on_error: 15,
            max_message_size: signalforge_wire::DEFAULT_MAX_MESSAGE,
            connection_attempt_delay: Duration::from_secs(5),
            connection_lockout: Duration::from_secs(60),
            handshake_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(1),
            write_timeout: Duration::from_secs(5),
        }
    }
}

impl SessionConfig {
    /// Collector address in `host:port` form.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    /// Reject configurations the session cannot run with.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.server_host.is_empty() {
            return Err(SessionError::Config("server_host must not be empty".into()));
        }
        if self.max_connection_attempts == 0 {
            return Err(SessionError::Config(
                "max_connection_attempts must be at least 1".into(),
            ));
        }
        if self.max_retries_on_error == 0 {
            return Err(SessionError::Config(
                "max_retries_on_error must be at least 1".into(),
            ));
        }
        if self.max_message_size == 0 {
            return Err(SessionError::Config(
                "max_message_size must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Parse a human-readable duration string: `150ms`, `5s`, `1m`.
/// A bare number is taken as seconds.
pub fn parse_duration(input: &str) -> Result<Duration, SessionError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(SessionError::Config("duration must not be empty".into()));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else if let Some(num) = input.strip_suffix('m') {
        (num, "m")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| SessionError::Config(format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(SessionError::Config(
            "duration must be greater than zero".into(),
        ));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        _ => Err(SessionError::Config(format!(
            "unsupported duration unit: {unit}"
        ))),
    }
}

fn duration_from_str<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).map_err(serde::de::Error::custom)
}
