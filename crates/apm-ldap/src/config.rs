// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Filter configuration built from the host's name/value properties.

use std::time::Duration;

use tracing::warn;

use crate::errors::ConfigError;

pub const LOOKUP_KEY_PROPERTY: &str = "lookup_key";
pub const PORT_PROPERTY: &str = "port";
pub const RETRIES_PROPERTY: &str = "retries";
pub const CONNECT_TIMEOUT_PROPERTY: &str = "connect_timeout_ms";
pub const READ_TIMEOUT_PROPERTY: &str = "read_timeout_ms";
pub const RETRY_BACKOFF_PROPERTY: &str = "retry_backoff_ms";
pub const DRAIN_TIMEOUT_PROPERTY: &str = "drain_timeout_ms";
pub const MAX_RESPONSE_BYTES_PROPERTY: &str = "max_response_bytes";
pub const ENTRY_FORMAT_PROPERTY: &str = "entry_format";

/// Reconnect attempts after the first failed one, per reconnect sequence.
pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);
/// Quiet period after which a response is considered complete.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);
/// Upper bound for the backoff step. Attempt `n` waits at most `n * MAX_RETRY_BACKOFF`.
pub const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(60);
/// Size of a single receive chunk. Responses are read in chunks of this size.
pub const RECV_CHUNK_SIZE: usize = 1024;
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 64 * 1024;

/// How returned entries are packed into the enriched record map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryFormat {
    /// The entry text becomes a map key with a nil value.
    #[default]
    Raw,
    /// The entry is split at the first `=` into key and value.
    Split,
}

impl std::str::FromStr for EntryFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(EntryFormat::Raw),
            "split" => Ok(EntryFormat::Split),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterConfig {
    /// Name of the record field whose value is sent to the lookup service
    pub lookup_key: String,
    /// Loopback port the lookup service listens on
    pub port: u16,
    pub retries: u32,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// How long a response may go quiet before it is considered complete
    pub drain_timeout: Duration,
    /// Delay step between connect attempts; attempt `n` waits `n * retry_backoff`
    pub retry_backoff: Duration,
    pub max_response_bytes: usize,
    pub entry_format: EntryFormat,
}

impl FilterConfig {
    /// Config with the two required values and defaults for everything else.
    pub fn new(lookup_key: impl Into<String>, port: u16) -> Self {
        Self {
            lookup_key: lookup_key.into(),
            port,
            retries: DEFAULT_RETRIES,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            retry_backoff: Duration::ZERO,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            entry_format: EntryFormat::default(),
        }
    }

    /// Builds the config from host properties. Property names are matched
    /// case-insensitively; unknown properties are ignored with a warning.
    pub fn from_properties<I, K, V>(properties: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut lookup_key: Option<String> = None;
        let mut port: Option<String> = None;
        let mut config = FilterConfig::new(String::new(), 0);

        for (key, value) in properties {
            let key = key.as_ref().trim().to_ascii_lowercase();
            let value = value.as_ref();
            match key.as_str() {
                LOOKUP_KEY_PROPERTY => lookup_key = Some(value.trim().to_string()),
                PORT_PROPERTY => port = Some(value.trim().to_string()),
                RETRIES_PROPERTY => config.retries = parse_value(&key, value)?,
                CONNECT_TIMEOUT_PROPERTY => {
                    config.connect_timeout = Duration::from_millis(parse_value(&key, value)?)
                }
                READ_TIMEOUT_PROPERTY => {
                    config.read_timeout = Duration::from_millis(parse_value(&key, value)?)
                }
                DRAIN_TIMEOUT_PROPERTY => {
                    config.drain_timeout = Duration::from_millis(parse_value(&key, value)?)
                }
                RETRY_BACKOFF_PROPERTY => {
                    config.retry_backoff = Duration::from_millis(parse_value(&key, value)?)
                }
                MAX_RESPONSE_BYTES_PROPERTY => {
                    config.max_response_bytes = parse_value(&key, value)?
                }
                ENTRY_FORMAT_PROPERTY => config.entry_format = parse_value(&key, value)?,
                _ => warn!("Ignoring unknown property '{}'", key),
            }
        }

        config.lookup_key = lookup_key.ok_or(ConfigError::MissingProperty(LOOKUP_KEY_PROPERTY))?;
        let port = port.ok_or(ConfigError::MissingProperty(PORT_PROPERTY))?;
        config.port = parse_port(&port)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lookup_key.trim().is_empty() {
            return Err(ConfigError::EmptyLookupKey);
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port.to_string()));
        }
        if self.max_response_bytes < RECV_CHUNK_SIZE {
            return Err(ConfigError::InvalidValue {
                key: MAX_RESPONSE_BYTES_PROPERTY.to_string(),
                value: self.max_response_bytes.to_string(),
            });
        }
        if self.connect_timeout.is_zero() || self.read_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "timeout".to_string(),
                value: "0".to_string(),
            });
        }
        if self.drain_timeout.is_zero() || self.drain_timeout > self.read_timeout {
            return Err(ConfigError::InvalidValue {
                key: DRAIN_TIMEOUT_PROPERTY.to_string(),
                value: self.drain_timeout.as_millis().to_string(),
            });
        }
        if self.retry_backoff > MAX_RETRY_BACKOFF {
            return Err(ConfigError::InvalidValue {
                key: RETRY_BACKOFF_PROPERTY.to_string(),
                value: self.retry_backoff.as_millis().to_string(),
            });
        }
        Ok(())
    }
}

fn parse_port(value: &str) -> Result<u16, ConfigError> {
    match value.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(ConfigError::InvalidPort(value.to_string())),
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
}
