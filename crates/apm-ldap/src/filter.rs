// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Filter lifecycle: init, apply, close.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::client::LookupClient;
use crate::config::FilterConfig;
use crate::connection::{ConnectionSettings, LookupConnection};
use crate::errors::ConfigError;
use crate::stats::{FilterStats, RetryCounter, StatsSnapshot};
use crate::transform::{FilterResult, RecordTransformer};

/// The lifecycle a host drives a log filter through.
#[async_trait]
pub trait LogFilter: Sized + Send + Sync {
    type Config: Send;

    /// Creates the filter instance. An error means the instance must not start.
    async fn init(config: Self::Config) -> Result<Self, ConfigError>;

    /// Filters one encoded batch.
    async fn apply(&self, batch: &[u8]) -> FilterResult;

    /// Releases the instance's resources.
    async fn close(self);
}

/// State created once per filter instance and used by every invocation
#[derive(Debug)]
pub struct FilterContext {
    config: FilterConfig,
    stats: Arc<FilterStats>,
}

impl FilterContext {
    /// `retry_counter` is shared by every context on the same lookup connection.
    pub fn new(config: FilterConfig, retry_counter: RetryCounter) -> Self {
        Self {
            config,
            stats: Arc::new(FilterStats::new(retry_counter)),
        }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn stats(&self) -> &Arc<FilterStats> {
        &self.stats
    }
}

pub struct ApmLdapFilter {
    context: FilterContext,
    client: LookupClient,
}

impl ApmLdapFilter {
    /// Builds the filter from host properties (see [`FilterConfig::from_properties`]).
    pub async fn from_properties<I, K, V>(properties: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Self::init(FilterConfig::from_properties(properties)?).await
    }

    /// Builds a filter on top of a connection shared with other filter instances.
    pub async fn init_with_connection(
        config: FilterConfig,
        connection: Arc<LookupConnection>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if connection.settings().port != config.port {
            warn!(
                "Filter configured for port {} shares the connection to port {}",
                config.port,
                connection.settings().port
            );
        }

        // a failed first connect is retried on the first lookup
        if !connection.establish().await {
            warn!(
                "Lookup service on port {} not reachable at startup",
                connection.settings().port
            );
        }

        let retry_counter = connection.retry_counter().clone();
        let client = LookupClient::new(connection, &config);
        info!(
            "Filter initialized with lookup key {} on port {}",
            config.lookup_key, config.port
        );
        Ok(Self {
            context: FilterContext::new(config, retry_counter),
            client,
        })
    }

    pub fn context(&self) -> &FilterContext {
        &self.context
    }

    pub fn connection(&self) -> &Arc<LookupConnection> {
        self.client.connection()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.context.stats.snapshot()
    }
}

#[async_trait]
impl LogFilter for ApmLdapFilter {
    type Config = FilterConfig;

    async fn init(config: FilterConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let connection = Arc::new(LookupConnection::new(ConnectionSettings::from(&config)));
        Self::init_with_connection(config, connection).await
    }

    async fn apply(&self, batch: &[u8]) -> FilterResult {
        let config = &self.context.config;
        RecordTransformer::new(
            &config.lookup_key,
            config.entry_format,
            &self.client,
            &self.context.stats,
        )
        .transform(batch)
        .await
    }

    async fn close(self) {
        let stats = self.stats();
        debug!("Closing filter: {:?}", stats);
        self.client.connection().close().await;
    }
}
