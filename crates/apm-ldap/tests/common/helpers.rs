// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batch builders for filter tests

use std::time::Duration;

use apm_ldap::FilterConfig;
use rmpv::Value;

pub const LOOKUP_KEY: &str = "ldapPath";

/// Filter config with short timeouts so failure paths finish quickly
pub fn test_config(port: u16) -> FilterConfig {
    FilterConfig {
        connect_timeout: Duration::from_millis(200),
        read_timeout: Duration::from_millis(500),
        drain_timeout: Duration::from_millis(50),
        ..FilterConfig::new(LOOKUP_KEY, port)
    }
}

/// Event time ext (type 0) as written by log routers: seconds and nanoseconds, big-endian
pub fn event_time(secs: u32, nanos: u32) -> Value {
    let mut data = secs.to_be_bytes().to_vec();
    data.extend_from_slice(&nanos.to_be_bytes());
    Value::Ext(0, data)
}

pub fn event(timestamp: Value, fields: &[(&str, &str)]) -> Value {
    Value::Array(vec![
        timestamp,
        Value::Map(
            fields
                .iter()
                .map(|(k, v)| (Value::from(*k), Value::from(*v)))
                .collect(),
        ),
    ])
}

pub fn encode_batch(events: &[Value]) -> Vec<u8> {
    let mut buf = Vec::new();
    for event in events {
        rmpv::encode::write_value(&mut buf, event).expect("Failed to encode test event");
    }
    buf
}

pub fn decode_batch(mut bytes: &[u8]) -> Vec<Value> {
    let mut events = Vec::new();
    while !bytes.is_empty() {
        events.push(rmpv::decode::read_value(&mut bytes).expect("Failed to decode event"));
    }
    events
}

pub fn timestamp_of(event: &Value) -> &Value {
    match event {
        Value::Array(parts) => &parts[0],
        other => panic!("expected [timestamp, map], got {:?}", other),
    }
}

pub fn fields_of(event: &Value) -> &[(Value, Value)] {
    match event {
        Value::Array(parts) => match &parts[1] {
            Value::Map(fields) => fields,
            other => panic!("expected map, got {:?}", other),
        },
        other => panic!("expected [timestamp, map], got {:?}", other),
    }
}
