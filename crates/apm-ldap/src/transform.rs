// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Rewrites a batch of msgpack-encoded `[timestamp, map]` events, one event at a time.
//!
//! For every event whose map holds the lookup field, the field's value is sent to the lookup
//! service and the returned entries are appended to the map as extra flat slots. Everything else
//! is copied to the output byte for byte:
//!
//! - events that are not a 2-element array with a map as second element
//! - events without the lookup field
//! - events whose lookup returned no entries (including degraded passthrough when the service is
//!   unreachable)
//!
//! Enriched events keep the exact timestamp bytes of the input. If no event of the batch has the
//! lookup field the transformer answers [`FilterResult::NoTouch`] and produces no output.

use rmpv::Value;
use tracing::{debug, error, info, warn};

use crate::client::{EntryLookup, LookupStatus};
use crate::config::EntryFormat;
use crate::errors::RecordError;
use crate::stats::FilterStats;

/// Outcome of filtering one batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterResult {
    /// The batch was rewritten; the host must use this buffer
    Modified(Vec<u8>),
    /// Nothing applied; the host should reuse its input buffer
    NoTouch,
}

pub struct RecordTransformer<'a, L: EntryLookup + ?Sized> {
    lookup_key: &'a str,
    entry_format: EntryFormat,
    lookup: &'a L,
    stats: &'a FilterStats,
}

impl<'a, L: EntryLookup + ?Sized> RecordTransformer<'a, L> {
    pub fn new(
        lookup_key: &'a str,
        entry_format: EntryFormat,
        lookup: &'a L,
        stats: &'a FilterStats,
    ) -> Self {
        Self {
            lookup_key,
            entry_format,
            lookup,
            stats,
        }
    }

    pub async fn transform(&self, batch: &[u8]) -> FilterResult {
        let mut out = Vec::with_capacity(batch.len());
        let mut touched = false;
        let mut offset = 0;

        while offset < batch.len() {
            let mut rest = &batch[offset..];
            let event = match rmpv::decode::read_value(&mut rest) {
                Ok(event) => event,
                Err(e) => {
                    error!(
                        "Unable to decode record at offset {}: {}. Copying the remaining {} bytes unchanged",
                        offset,
                        e,
                        batch.len() - offset
                    );
                    out.extend_from_slice(&batch[offset..]);
                    break;
                }
            };
            let end = batch.len() - rest.len();
            let raw = &batch[offset..end];
            offset = end;

            touched |= self.transform_event(raw, event, &mut out).await;
        }

        if !touched {
            info!("Lookup key {} not found in the log record", self.lookup_key);
            self.stats.record_untouched_batch();
            return FilterResult::NoTouch;
        }
        FilterResult::Modified(out)
    }

    /// Writes one event to `out`. Returns whether the event held the lookup field.
    async fn transform_event(&self, raw: &[u8], event: Value, out: &mut Vec<u8>) -> bool {
        let Some(fields) = into_record_fields(event) else {
            debug!("Skipping record that is not a [timestamp, map] pair");
            self.passthrough(raw, out);
            return false;
        };

        let mut matched = false;
        let mut injected = Vec::new();
        for (key, value) in &fields {
            if !self.is_lookup_key(key) {
                continue;
            }
            matched = true;
            match value.as_str() {
                Some(path) => self.collect_entries(path, &mut injected).await,
                None => warn!(
                    "Lookup field {} does not hold a string, skipping lookup",
                    self.lookup_key
                ),
            }
        }

        if injected.is_empty() {
            self.passthrough(raw, out);
            return matched;
        }

        let injected_count = injected.len();
        match encode_enriched(raw, fields, injected) {
            Ok(encoded) => {
                debug!("Injected {} entries into record", injected_count);
                out.extend_from_slice(&encoded);
                self.stats.record_enriched_event();
            }
            Err(e) => {
                error!("Unable to enrich record, passing it through: {}", e);
                self.passthrough(raw, out);
            }
        }
        matched
    }

    async fn collect_entries(&self, path: &str, injected: &mut Vec<(Value, Value)>) {
        self.stats.record_lookup();
        let response = self.lookup.lookup(path).await;
        match response.status() {
            LookupStatus::DataCollected => {
                injected.extend(response.entries().map(|entry| self.entry_pair(entry)));
            }
            LookupStatus::UnableToConnect => {
                let failures = self.stats.record_failed_lookup();
                error!(
                    "Unable to establish connection with the lookup service: failed lookup {}",
                    failures
                );
            }
        }
    }

    fn passthrough(&self, raw: &[u8], out: &mut Vec<u8>) {
        out.extend_from_slice(raw);
        self.stats.record_passthrough_event();
    }

    fn is_lookup_key(&self, key: &Value) -> bool {
        key.as_str()
            .is_some_and(|key| key.eq_ignore_ascii_case(self.lookup_key))
    }

    fn entry_pair(&self, entry: &str) -> (Value, Value) {
        match (self.entry_format, entry.split_once('=')) {
            (EntryFormat::Split, Some((key, value))) => (Value::from(key), Value::from(value)),
            _ => (Value::from(entry), Value::Nil),
        }
    }
}

/// Returns the map of a `[timestamp, map]` event.
fn into_record_fields(event: Value) -> Option<Vec<(Value, Value)>> {
    let Value::Array(mut parts) = event else {
        return None;
    };
    if parts.len() != 2 {
        return None;
    }
    match parts.pop() {
        Some(Value::Map(fields)) => Some(fields),
        _ => None,
    }
}

/// Raw bytes of the first element of the event array.
fn timestamp_bytes(raw: &[u8]) -> Result<&[u8], RecordError> {
    let mut rest = raw;
    rmp::decode::read_array_len(&mut rest).map_err(|e| RecordError::Decode(e.to_string()))?;
    let start = raw.len() - rest.len();
    rmpv::decode::read_value(&mut rest).map_err(|e| RecordError::Decode(e.to_string()))?;
    let end = raw.len() - rest.len();
    Ok(&raw[start..end])
}

fn encode_enriched(
    raw: &[u8],
    mut fields: Vec<(Value, Value)>,
    injected: Vec<(Value, Value)>,
) -> Result<Vec<u8>, RecordError> {
    let timestamp = timestamp_bytes(raw)?;
    fields.extend(injected);

    let mut encoded = Vec::with_capacity(raw.len() * 2);
    rmp::encode::write_array_len(&mut encoded, 2)
        .map_err(|e| RecordError::Encode(e.to_string()))?;
    encoded.extend_from_slice(timestamp);
    rmpv::encode::write_value(&mut encoded, &Value::Map(fields))
        .map_err(|e| RecordError::Encode(e.to_string()))?;
    Ok(encoded)
}
