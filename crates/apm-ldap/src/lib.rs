// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log record filter that enriches events with directory entries.
//!
//! For each `[timestamp, map]` event of a msgpack batch, the value of the configured lookup field
//! is sent as a path to a lookup service listening on `127.0.0.1:<port>`. The service answers with
//! `}`-separated entries, which are appended to the event's map before it moves downstream.
//!
//! ```rust,ignore
//! use apm_ldap::{ApmLdapFilter, FilterResult, LogFilter};
//!
//! let filter = ApmLdapFilter::from_properties([("lookup_key", "ldapPath"), ("port", "5140")]).await?;
//! match filter.apply(&batch).await {
//!     FilterResult::Modified(output) => forward(output),
//!     FilterResult::NoTouch => forward(batch),
//! }
//! filter.close().await;
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod client;
pub mod config;
pub mod connection;
pub mod errors;
pub mod filter;
pub mod stats;
pub mod transform;

pub use client::{EntryLookup, LookupClient, LookupResponse, LookupStatus};
pub use config::{EntryFormat, FilterConfig};
pub use connection::{ConnectionSettings, LookupConnection};
pub use errors::{ConfigError, LookupError};
pub use filter::{ApmLdapFilter, FilterContext, LogFilter};
pub use stats::{RetryCounter, StatsSnapshot};
pub use transform::{FilterResult, RecordTransformer};
