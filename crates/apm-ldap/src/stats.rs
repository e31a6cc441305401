// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Counters kept across filter invocations. They only ever grow.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Count of lookups that ended in `unable_to_connect`. Clones share the same count, so every
/// filter on one connection sees one process-wide total.
#[derive(Debug, Clone, Default)]
pub struct RetryCounter(Arc<AtomicU64>);

impl RetryCounter {
    /// Returns the count including this increment.
    pub(crate) fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct FilterStats {
    lookups: AtomicU64,
    failed_lookups: RetryCounter,
    enriched_events: AtomicU64,
    passthrough_events: AtomicU64,
    untouched_batches: AtomicU64,
}

/// Point-in-time copy of [`FilterStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub lookups: u64,
    /// Lookups that ended in `unable_to_connect`
    pub failed_lookups: u64,
    pub enriched_events: u64,
    pub passthrough_events: u64,
    pub untouched_batches: u64,
}

impl FilterStats {
    /// Stats whose failure count is shared through `failed_lookups`.
    pub fn new(failed_lookups: RetryCounter) -> Self {
        Self {
            failed_lookups,
            ..Self::default()
        }
    }

    pub(crate) fn record_lookup(&self) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the failure count including this one.
    pub(crate) fn record_failed_lookup(&self) -> u64 {
        self.failed_lookups.increment()
    }

    pub(crate) fn record_enriched_event(&self) {
        self.enriched_events.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_passthrough_event(&self) {
        self.passthrough_events.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_untouched_batch(&self) {
        self.untouched_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            lookups: self.lookups.load(Ordering::Relaxed),
            failed_lookups: self.failed_lookups.get(),
            enriched_events: self.enriched_events.load(Ordering::Relaxed),
            passthrough_events: self.passthrough_events.load(Ordering::Relaxed),
            untouched_batches: self.untouched_batches.load(Ordering::Relaxed),
        }
    }
}
