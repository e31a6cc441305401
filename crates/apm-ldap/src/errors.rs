// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the apm-ldap filter.

use std::time::Duration;

/// Errors raised while building a [`crate::config::FilterConfig`]. Any of these stops the filter
/// instance from starting.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("required property '{0}' not found")]
    MissingProperty(&'static str),

    #[error("lookup key cannot be empty")]
    EmptyLookupKey,

    #[error("invalid port '{0}': must be an integer between 1 and 65535")]
    InvalidPort(String),

    #[error("invalid value '{value}' for property '{key}'")]
    InvalidValue { key: String, value: String },
}

/// A single failed connect attempt.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("connection to port {port} timed out after {timeout:?}")]
    Timeout { port: u16, timeout: Duration },

    #[error("connection failed on port {port}: {source}")]
    Io {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

/// Failure of one send/receive round trip on an established socket.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("error sending the path: {0}")]
    Send(#[source] std::io::Error),

    #[error("error receiving the response: {0}")]
    Receive(#[source] std::io::Error),

    #[error("no response within {0:?}")]
    ReceiveTimeout(Duration),

    #[error("connection closed by the lookup service")]
    Closed,

    #[error("{0} unsolicited bytes pending on the socket")]
    StaleData(usize),
}

/// A record that could not be decoded or re-encoded.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("malformed record: {0}")]
    Decode(String),

    #[error("unable to encode record: {0}")]
    Encode(String),
}

/// Terminal failure of a lookup.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("unable to connect to the lookup service after {attempts} attempts")]
    UnableToConnect { attempts: u32 },
}
