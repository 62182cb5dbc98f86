use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;
use sha2::{Digest, Sha256};

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Short-lived response cache keyed by a hash of endpoint and query
/// parameters. Expired entries are dropped lazily on lookup and insert.
pub struct TtlCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, Value)>>,
}

impl TtlCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Parameter order does not affect the key.
    pub fn key(url: &str, params: &[(String, String)]) -> String {
        let mut sorted: Vec<_> = params.iter().collect();
        sorted.sort();

        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        for (k, v) in sorted {
            hasher.update(b"\0");
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock().ok()?;
        if let Some((stored, value)) = entries.get(key) {
            if stored.elapsed() < self.ttl {
                return Some(value.clone());
            }
            entries.remove(key);
        }
        None
    }

    pub fn insert(&self, key: String, value: Value) {
        if let Ok(mut entries) = self.entries.lock() {
            let ttl = self.ttl;
            entries.retain(|_, (stored, _)| stored.elapsed() < ttl);
            entries.insert(key, (Instant::now(), value));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_key_ignores_parameter_order() {
        let a = TtlCache::key("u", &params(&[("latitude", "1"), ("longitude", "2")]));
        let b = TtlCache::key("u", &params(&[("longitude", "2"), ("latitude", "1")]));
        let c = TtlCache::key("v", &params(&[("latitude", "1"), ("longitude", "2")]));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|ch| matches!(ch, '0'..='9' | 'a'..='f')));
    }

    #[test]
    fn test_entries_expire() {
        let cache = TtlCache::new(Duration::from_millis(20));
        cache.insert("k".into(), json!({"daily": {}}));
        assert!(cache.get("k").is_some());

        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }
}
