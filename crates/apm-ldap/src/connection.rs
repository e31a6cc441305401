// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The single outbound TCP connection to the lookup service.
//!
//! The lookup service always listens on the loopback address, so one [`LookupConnection`] is
//! shared (behind an `Arc`) by every filter instance in the process. The socket lives in a
//! `tokio::sync::Mutex` slot: whoever holds the slot owns the whole send/receive/reconnect
//! sequence, which keeps two exchanges from interleaving on the same socket.
//!
//! Reconnection is an explicit state machine:
//!
//! ```text
//!   Disconnected ──> Connecting(0) ──ok──> Connected
//!                        │
//!                      fail
//!                        v
//!                   Connecting(n) ──ok──> Connected
//!                        │
//!                  fail, n == retries
//!                        v
//!                    Exhausted
//! ```

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info};

use crate::config::FilterConfig;
use crate::errors::{ConnectError, LookupError};
use crate::stats::RetryCounter;

/// Connect and retry settings for the lookup service socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub port: u16,
    pub connect_timeout: Duration,
    /// Reconnect attempts allowed after the first failed attempt
    pub retries: u32,
    pub retry_backoff: Duration,
}

impl From<&FilterConfig> for ConnectionSettings {
    fn from(config: &FilterConfig) -> Self {
        Self {
            port: config.port,
            connect_timeout: config.connect_timeout,
            retries: config.retries,
            retry_backoff: config.retry_backoff,
        }
    }
}

enum ReconnectState {
    Disconnected,
    Connecting { attempt: u32 },
    Connected(TcpStream),
    Exhausted { attempts: u32 },
}

pub struct LookupConnection {
    settings: ConnectionSettings,
    stream: Mutex<Option<TcpStream>>,
    connect_attempts: AtomicU64,
    retry_counter: RetryCounter,
}

impl LookupConnection {
    /// Creates the connection owner without connecting. Call [`LookupConnection::establish`] or
    /// let the first lookup connect lazily.
    #[must_use]
    pub fn new(settings: ConnectionSettings) -> Self {
        Self {
            settings,
            stream: Mutex::new(None),
            connect_attempts: AtomicU64::new(0),
            retry_counter: RetryCounter::default(),
        }
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Total connect attempts made over the lifetime of this connection.
    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::Relaxed)
    }

    /// Failed-lookup count shared by every filter using this connection.
    pub fn retry_counter(&self) -> &RetryCounter {
        &self.retry_counter
    }

    /// Delay before reconnect attempt `attempt`; saturates instead of overflowing.
    fn backoff_for(&self, attempt: u32) -> Duration {
        self.settings.retry_backoff.saturating_mul(attempt)
    }

    /// Opens a new socket to `127.0.0.1:<port>`. A failure is logged and returned; retry policy
    /// belongs to the caller.
    pub async fn connect(&self) -> Result<TcpStream, ConnectError> {
        let port = self.settings.port;
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);

        let result = match timeout(self.settings.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(source)) => Err(ConnectError::Io { port, source }),
            Err(_) => Err(ConnectError::Timeout {
                port,
                timeout: self.settings.connect_timeout,
            }),
        };

        match result {
            Ok(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Unable to set TCP_NODELAY on port {}: {}", port, e);
                }
                info!("Connected to port {}", port);
                Ok(stream)
            }
            Err(e) => {
                error!("{}", e);
                Err(e)
            }
        }
    }

    /// Connects with up to `retries + 1` attempts in total.
    pub async fn reconnect_with_retry(&self) -> Result<TcpStream, LookupError> {
        let max_retries = self.settings.retries;
        let mut state = ReconnectState::Disconnected;

        loop {
            state = match state {
                ReconnectState::Disconnected => ReconnectState::Connecting { attempt: 0 },
                ReconnectState::Connecting { attempt } => {
                    if attempt > 0 {
                        info!(
                            "Trying to reconnect the socket: retry {}/{}",
                            attempt, max_retries
                        );
                        let backoff = self.backoff_for(attempt);
                        if !backoff.is_zero() {
                            sleep(backoff).await;
                        }
                    }
                    match self.connect().await {
                        Ok(stream) => ReconnectState::Connected(stream),
                        Err(_) if attempt >= max_retries => ReconnectState::Exhausted {
                            attempts: attempt + 1,
                        },
                        Err(_) => {
                            info!("Unable to reconnect the socket");
                            ReconnectState::Connecting {
                                attempt: attempt + 1,
                            }
                        }
                    }
                }
                ReconnectState::Connected(stream) => return Ok(stream),
                ReconnectState::Exhausted { attempts } => {
                    error!(
                        "Giving up on port {} after {} connect attempts",
                        self.settings.port, attempts
                    );
                    return Err(LookupError::UnableToConnect { attempts });
                }
            };
        }
    }

    /// Makes a single connect attempt and stores the socket. Returns whether it succeeded.
    pub async fn establish(&self) -> bool {
        let mut slot = self.stream.lock().await;
        if slot.is_some() {
            return true;
        }
        match self.connect().await {
            Ok(stream) => {
                *slot = Some(stream);
                true
            }
            Err(_) => false,
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.stream.lock().await.is_some()
    }

    /// Exclusive access to the socket slot for one full exchange.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, Option<TcpStream>> {
        self.stream.lock().await
    }

    /// Shuts the socket down. The next lookup reconnects.
    pub async fn close(&self) {
        if let Some(mut stream) = self.stream.lock().await.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("Error shutting down lookup socket: {}", e);
            }
            info!("Closed connection on port {}", self.settings.port);
        }
    }
}
