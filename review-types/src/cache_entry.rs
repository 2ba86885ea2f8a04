//! A single cache slot, generic over the stored value (C1).

use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: DateTime<Utc>,
    pub ttl_seconds: i64,
    pub hits: u64,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, created_at: DateTime<Utc>, ttl_seconds: i64) -> Self {
        Self {
            value,
            created_at,
            ttl_seconds,
            hits: 0,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.created_at + chrono::Duration::seconds(self.ttl_seconds)
    }

    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_seconds().max(0)
    }

    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> i64 {
        (self.ttl_seconds - self.age_seconds(now)).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(offset_secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(offset_secs)
    }

    #[test]
    fn expires_exactly_at_ttl_boundary() {
        let entry = CacheEntry::new("v", at(0), 10);
        assert!(!entry.is_expired(at(9)));
        assert!(entry.is_expired(at(10)));
        assert!(entry.is_expired(at(11)));
    }

    #[test]
    fn remaining_ttl_never_goes_negative() {
        let entry = CacheEntry::new("v", at(0), 10);
        assert_eq!(entry.remaining_ttl(at(20)), 0);
    }
}
