use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::{Rng, RngCore, rngs::OsRng};
use serde_json::Value;
use url::Url;

/// Request ids: current time in nanosecond scale plus a random per-generator
/// offset and a counter, so ids minted in the same millisecond stay unique.
#[derive(Debug)]
pub struct IdGenerator {
    offset: u64,
    counter: AtomicU64,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator {
    pub fn new() -> Self {
        let initial: u16 = rand::thread_rng().r#gen();
        Self {
            offset: initial as u64,
            counter: AtomicU64::new(0),
        }
    }

    pub fn next_id(&self) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();

        let date_ns = millis * 1_000_000;
        let extra =
            (self.offset + self.counter.fetch_add(1, Ordering::Relaxed)) as u128;

        (date_ns + extra).to_string()
    }
}

pub fn random_bytes32() -> [u8; 32] {
    let mut random_value = [0u8; 32];
    OsRng.fill_bytes(&mut random_value);
    random_value
}

pub fn is_valid_url(input: &str) -> bool {
    Url::parse(input)
        .map(|url| url.host_str().is_some_and(|h| !h.is_empty()))
        .unwrap_or(false)
}

/// Depth first search for `key` in a loosely typed document, returning the
/// first value found.
pub fn find_key<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map
            .get(key)
            .or_else(|| map.values().find_map(|v| find_key(v, key))),
        Value::Array(items) => items.iter().find_map(|v| find_key(v, key)),
        _ => None,
    }
}
