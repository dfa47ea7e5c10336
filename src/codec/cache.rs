//! Per-worker cache of decoded descriptors.

use super::Descriptor;
use crate::error::Result;
use crate::telemetry::Metrics;
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::sync::Arc;

/// Bounded map from fingerprint to decoded value, evicting the oldest entry
/// once `capacity` is exceeded.
#[derive(Debug)]
pub struct DescriptorCache<T> {
    entries: VecDeque<(u64, T)>,
    capacity: usize,
    hits: u64,
    misses: u64,
    metrics: Option<Arc<Metrics>>,
}

impl<T: DeserializeOwned> DescriptorCache<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(64)),
            capacity: capacity.max(1),
            hits: 0,
            misses: 0,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Return the decoded value for `desc`, decoding and inserting it on a miss.
    pub fn resolve(&mut self, desc: &Descriptor<T>) -> Result<&T> {
        let fp = desc.fingerprint();

        if let Some(pos) = self.entries.iter().position(|(h, _)| *h == fp) {
            self.hits += 1;
            if let Some(ref metrics) = self.metrics {
                metrics.record_cache_hit();
            }
            return Ok(&self.entries[pos].1);
        }

        let value = desc.decode()?;
        self.misses += 1;
        if let Some(ref metrics) = self.metrics {
            metrics.record_cache_miss();
        }

        self.entries.push_back((fp, value));
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }

        // capacity >= 1, so the entry just pushed is still at the back
        Ok(&self.entries[self.entries.len() - 1].1)
    }
}

impl<T> DescriptorCache<T> {
    pub fn contains(&self, fingerprint: u64) -> bool {
        self.entries.iter().any(|(h, _)| *h == fingerprint)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_after_miss() {
        let mut cache = DescriptorCache::new(4);
        let desc = Descriptor::encode(&(3u64,)).unwrap();

        assert_eq!(cache.resolve(&desc).unwrap(), &(3u64,));
        assert_eq!(cache.resolve(&desc).unwrap(), &(3u64,));

        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_equal_content_shares_entry() {
        let mut cache = DescriptorCache::new(4);
        let a = Descriptor::encode(&vec![1u8, 2, 3]).unwrap();
        let b = Descriptor::encode(&vec![1u8, 2, 3]).unwrap();

        cache.resolve(&a).unwrap();
        cache.resolve(&b).unwrap();
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_fifo_eviction() {
        let mut cache = DescriptorCache::new(2);
        let descs: Vec<_> = (0u32..3).map(|i| Descriptor::encode(&i).unwrap()).collect();

        for d in &descs {
            cache.resolve(d).unwrap();
        }

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(descs[0].fingerprint()));
        assert!(cache.contains(descs[1].fingerprint()));
        assert!(cache.contains(descs[2].fingerprint()));

        // oldest entry is gone, so this is a fresh decode
        assert_eq!(cache.resolve(&descs[0]).unwrap(), &0);
        assert_eq!(cache.misses(), 4);
        assert!(!cache.contains(descs[1].fingerprint()));
    }

    #[test]
    fn test_decode_error_is_not_cached() {
        let mut cache: DescriptorCache<String> = DescriptorCache::new(2);
        let bad = Descriptor::from_raw(42, vec![0xff]);

        assert!(cache.resolve(&bad).is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_metrics_are_fed() {
        let metrics = Arc::new(Metrics::new());
        let mut cache = DescriptorCache::new(2).with_metrics(metrics.clone());
        let desc = Descriptor::encode(&1u8).unwrap();

        cache.resolve(&desc).unwrap();
        cache.resolve(&desc).unwrap();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cache_misses, 1);
    }
}
