//! In-process cache for completed analyses.
//!
//! Entries expire after a fixed TTL. Concurrent analyses of the same key may
//! both compute and both insert; the last insert wins.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::helpers::floor_to_hour;

/// Cache key for an analysis: route, provider and the departure hour.
pub fn cache_key(route_id: &str, provider: &str, depart_time: DateTime<Utc>) -> String {
    format!(
        "{}:{}:{}",
        route_id,
        provider,
        floor_to_hour(depart_time).to_rfc3339()
    )
}

#[derive(Debug, Clone)]
struct StoredEntry<V> {
    value: V,
    expires_at: Instant,
}

/// TTL cache with a capacity bound.
#[derive(Debug)]
pub struct AnalysisCache<V> {
    entries: RwLock<HashMap<String, StoredEntry<V>>>,
    ttl: Duration,
    capacity: usize,
}

impl<V: Clone> AnalysisCache<V> {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            capacity: capacity.max(1),
        }
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now()).await
    }

    pub async fn insert(&self, key: String, value: V) {
        self.insert_at(key, value, Instant::now()).await
    }

    async fn get_at(&self, key: &str, now: Instant) -> Option<V> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        // Expired: drop it so it stops counting against capacity
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| e.expires_at <= now) {
            entries.remove(key);
        }
        None
    }

    async fn insert_at(&self, key: String, value: V, now: Instant) {
        let mut entries = self.entries.write().await;

        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            entries.retain(|_, e| e.expires_at > now);
            if entries.len() >= self.capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.expires_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    tracing::debug!("Analysis cache full, evicting {}", oldest);
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            key,
            StoredEntry {
                value,
                expires_at: now + self.ttl,
            },
        );
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> DateTime<Utc> {
        s.parse::<DateTime<Utc>>().unwrap()
    }

    #[test]
    fn test_cache_key_truncates_to_hour() {
        let a = cache_key("route-1", "open-meteo", t("2024-05-01T10:05:00Z"));
        let b = cache_key("route-1", "open-meteo", t("2024-05-01T10:50:59Z"));
        let c = cache_key("route-1", "open-meteo", t("2024-05-01T11:00:00Z"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, "route-1:open-meteo:2024-05-01T10:00:00+00:00");
    }

    #[tokio::test]
    async fn test_get_and_expiry() {
        let cache = AnalysisCache::new(Duration::from_secs(60), 10);
        let now = Instant::now();
        cache.insert_at("k".to_string(), 1, now).await;

        assert_eq!(cache.get_at("k", now + Duration::from_secs(59)).await, Some(1));
        assert_eq!(cache.get_at("k", now + Duration::from_secs(60)).await, None);
        // Expired entry was pruned on read
        assert_eq!(cache.len().await, 0);
        assert_eq!(cache.get_at("missing", now).await, None);
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let cache = AnalysisCache::new(Duration::from_secs(60), 10);
        cache.insert("k".to_string(), "first").await;
        cache.insert("k".to_string(), "second").await;
        assert_eq!(cache.get("k").await, Some("second"));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_capacity_prefers_dropping_expired() {
        let cache = AnalysisCache::new(Duration::from_secs(60), 2);
        let now = Instant::now();
        cache.insert_at("old".to_string(), 1, now).await;
        cache
            .insert_at("fresh".to_string(), 2, now + Duration::from_secs(30))
            .await;
        // "old" has expired by now; it goes first and "fresh" survives
        let later = now + Duration::from_secs(61);
        cache.insert_at("new".to_string(), 3, later).await;

        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get_at("fresh", later).await, Some(2));
        assert_eq!(cache.get_at("new", later).await, Some(3));
    }

    #[tokio::test]
    async fn test_capacity_evicts_earliest_expiring() {
        let cache = AnalysisCache::new(Duration::from_secs(60), 2);
        let now = Instant::now();
        cache.insert_at("a".to_string(), 1, now).await;
        cache
            .insert_at("b".to_string(), 2, now + Duration::from_secs(1))
            .await;
        cache
            .insert_at("c".to_string(), 3, now + Duration::from_secs(2))
            .await;

        let at = now + Duration::from_secs(3);
        assert_eq!(cache.get_at("a", at).await, None);
        assert_eq!(cache.get_at("b", at).await, Some(2));
        assert_eq!(cache.get_at("c", at).await, Some(3));
    }
}
