// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Request/response client for the lookup service.
//!
//! The wire protocol has no framing: the client writes the raw path bytes and the service answers
//! with zero or more entries separated by `}`. Since nothing marks the end of a response, the
//! client reads in chunks of [`RECV_CHUNK_SIZE`] bytes until the service stays quiet for
//! `drain_timeout`.
//!
//! A socket is only reused when the previous response was read to its end. After a truncated
//! response (more than `max_response_bytes`) or a peer close, the socket is dropped so that the
//! next lookup cannot read the tail of an earlier answer. Bytes already waiting on a socket when
//! a new lookup starts get the same treatment.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, trace, warn};

use crate::config::{FilterConfig, RECV_CHUNK_SIZE};
use crate::connection::LookupConnection;
use crate::errors::{ExchangeError, LookupError};

/// Delimiter between entries in a lookup response
pub const ENTRY_DELIMITER: char = '}';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupStatus {
    DataCollected,
    UnableToConnect,
}

/// One response from the lookup service. Entries are split out of the buffer on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupResponse {
    status: LookupStatus,
    body: String,
}

impl LookupResponse {
    pub fn collected(body: impl Into<String>) -> Self {
        Self {
            status: LookupStatus::DataCollected,
            body: body.into(),
        }
    }

    pub fn unable_to_connect() -> Self {
        Self {
            status: LookupStatus::UnableToConnect,
            body: String::new(),
        }
    }

    pub fn status(&self) -> LookupStatus {
        self.status
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        split_entries(&self.body)
    }
}

/// Splits a response body into its non-empty entries.
pub fn split_entries(body: &str) -> impl Iterator<Item = &str> {
    body.split(ENTRY_DELIMITER).filter(|entry| !entry.is_empty())
}

/// Resolves a lookup path into entries.
#[async_trait]
pub trait EntryLookup: Send + Sync {
    async fn lookup(&self, path: &str) -> LookupResponse;
}

#[derive(Clone)]
pub struct LookupClient {
    connection: Arc<LookupConnection>,
    read_timeout: Duration,
    drain_timeout: Duration,
    max_response_bytes: usize,
}

/// A complete response and whether its socket may carry the next exchange.
struct Received {
    body: String,
    reusable: bool,
}

impl LookupClient {
    pub fn new(connection: Arc<LookupConnection>, config: &FilterConfig) -> Self {
        Self {
            connection,
            read_timeout: config.read_timeout,
            drain_timeout: config.drain_timeout,
            max_response_bytes: config.max_response_bytes,
        }
    }

    pub fn connection(&self) -> &Arc<LookupConnection> {
        &self.connection
    }

    /// Sends the path and receives the response. On any transport failure the socket is dropped
    /// and a fresh one is obtained through the reconnect loop; the path is sent again on the new
    /// socket. At most `retries + 1` exchanges are attempted.
    pub async fn try_lookup(&self, path: &str) -> Result<String, LookupError> {
        let max_exchanges = self.connection.settings().retries.saturating_add(1);
        let mut slot = self.connection.lock().await;
        let mut exchanges = 0;

        loop {
            if slot.is_none() {
                *slot = Some(self.connection.reconnect_with_retry().await?);
            }
            let Some(stream) = slot.as_mut() else {
                continue;
            };

            exchanges += 1;
            match self.exchange(stream, path).await {
                Ok(received) => {
                    if !received.reusable {
                        debug!("Dropping lookup socket after response for path {}", path);
                        *slot = None;
                    }
                    return Ok(received.body);
                }
                Err(e) => {
                    error!("Lookup exchange failed for path {}: {}", path, e);
                    *slot = None;
                    if exchanges >= max_exchanges {
                        return Err(LookupError::UnableToConnect {
                            attempts: exchanges,
                        });
                    }
                }
            }
        }
    }

    async fn exchange(
        &self,
        stream: &mut TcpStream,
        path: &str,
    ) -> Result<Received, ExchangeError> {
        ensure_idle(stream)?;

        trace!("Sending lookup path: {}", path);
        stream
            .write_all(path.as_bytes())
            .await
            .map_err(ExchangeError::Send)?;

        let (body, reusable) = self.read_response(stream).await?;
        Ok(Received {
            body: String::from_utf8_lossy(&body).into_owned(),
            reusable,
        })
    }

    /// Reads until the service stays quiet for `drain_timeout`, the peer closes the socket or
    /// the response grows past `max_response_bytes`. The flag tells whether the socket can be
    /// reused.
    async fn read_response(
        &self,
        stream: &mut TcpStream,
    ) -> Result<(Vec<u8>, bool), ExchangeError> {
        let mut chunk = [0u8; RECV_CHUNK_SIZE];

        let read = match timeout(self.read_timeout, stream.read(&mut chunk)).await {
            Ok(Ok(0)) => return Err(ExchangeError::Closed),
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(ExchangeError::Receive(e)),
            Err(_) => return Err(ExchangeError::ReceiveTimeout(self.read_timeout)),
        };
        let mut body = chunk[..read].to_vec();
        let mut reusable = true;

        while body.len() <= self.max_response_bytes {
            match timeout(self.drain_timeout, stream.read(&mut chunk)).await {
                Ok(Ok(0)) => {
                    reusable = false;
                    break;
                }
                Ok(Ok(n)) => body.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => return Err(ExchangeError::Receive(e)),
                Err(_) => break,
            }
        }

        if body.len() > self.max_response_bytes {
            warn!(
                "Lookup response truncated to {} bytes, discarding the rest with the socket",
                self.max_response_bytes
            );
            body.truncate(self.max_response_bytes);
            reusable = false;
        }
        debug!("Received {} bytes from lookup service", body.len());
        Ok((body, reusable))
    }
}

/// Fails when the socket has bytes nobody asked for, or the peer already closed it.
fn ensure_idle(stream: &TcpStream) -> Result<(), ExchangeError> {
    let mut buf = [0u8; RECV_CHUNK_SIZE];
    match stream.try_read(&mut buf) {
        Ok(0) => Err(ExchangeError::Closed),
        Ok(n) => Err(ExchangeError::StaleData(n)),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
        Err(e) => Err(ExchangeError::Receive(e)),
    }
}

#[async_trait]
impl EntryLookup for LookupClient {
    async fn lookup(&self, path: &str) -> LookupResponse {
        match self.try_lookup(path).await {
            Ok(body) => LookupResponse::collected(body),
            Err(e) => {
                debug!("Lookup for path {} failed: {}", path, e);
                LookupResponse::unable_to_connect()
            }
        }
    }
}
