//! Cached position policy
//!
//! Holds the most recent successful position fix and decides whether it
//! can satisfy a new request under that request's `maximum_age`.

use crate::position::{Geoposition, PositionOptions};

/// Most recently obtained position, reusable for new requests.
#[derive(Debug, Default)]
pub struct PositionCache {
    cached: Option<Geoposition>,
}

impl PositionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_cached_position(&mut self, position: Geoposition) {
        self.cached = Some(position);
    }

    pub fn cached_position(&self) -> Option<&Geoposition> {
        self.cached.as_ref()
    }

    /// Whether the cached position satisfies `options.maximum_age`.
    ///
    /// Absent `maximum_age` accepts any age; zero rejects the cache
    /// outright; a positive value accepts the cache iff its timestamp is
    /// newer than `now - maximum_age`. The three cases are deliberately
    /// distinct.
    pub fn is_suitable(&self, options: &PositionOptions, now_ms: u64) -> bool {
        let Some(cached) = &self.cached else {
            return false;
        };
        match options.maximum_age {
            None => true,
            Some(age) if age.is_zero() => false,
            Some(age) => cached.timestamp_ms > now_ms.saturating_sub(age.as_millis() as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::Coordinates;
    use std::time::Duration;

    fn position_at(timestamp_ms: u64) -> Geoposition {
        Geoposition::new(Coordinates::new(48.86, 2.35, 20.0), timestamp_ms)
    }

    #[test]
    fn test_empty_cache_never_suitable() {
        let cache = PositionCache::new();
        assert!(!cache.is_suitable(&PositionOptions::default(), 1_000_000));
    }

    #[test]
    fn test_absent_maximum_age_accepts_any_age() {
        let mut cache = PositionCache::new();
        cache.set_cached_position(position_at(0));
        assert!(cache.is_suitable(&PositionOptions::default(), u64::MAX));
    }

    #[test]
    fn test_zero_maximum_age_rejects_fresh_cache() {
        let mut cache = PositionCache::new();
        cache.set_cached_position(position_at(1_000_000));
        let opts = PositionOptions {
            maximum_age: Some(Duration::ZERO),
            ..Default::default()
        };
        // Cache entry is brand new but zero means "never use cache".
        assert!(!cache.is_suitable(&opts, 1_000_000));
    }

    #[test]
    fn test_positive_maximum_age_boundary() {
        let mut cache = PositionCache::new();
        cache.set_cached_position(position_at(990_000));
        let opts = PositionOptions {
            maximum_age: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        // 10s old against a 5s budget: rejected.
        assert!(!cache.is_suitable(&opts, 1_000_000));
        // 4s old against a 5s budget: accepted.
        assert!(cache.is_suitable(&opts, 994_000));
        // Exactly maximum_age old: rejected (strict comparison).
        assert!(!cache.is_suitable(&opts, 995_000));
    }
}
