//! Receipt correlation.
//!
//! The network reports receipts for the same message id under the
//! anonymized identity and under the phone identity. Remembering the first
//! identity seen per message id lets the second sighting reveal the alias.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use uuid::Uuid;

use crate::jid;

const DEFAULT_CAPACITY: usize = 1024;
const DEFAULT_TTL: Duration = Duration::from_secs(600);

struct Sighting {
    jid: String,
    seen_at: Instant,
}

/// Per-tenant bounded cache of message id to first-seen identity.
pub struct ReceiptCorrelator {
    capacity: NonZeroUsize,
    ttl: Duration,
    tenants: Mutex<HashMap<Uuid, LruCache<String, Sighting>>>,
}

impl Default for ReceiptCorrelator {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

impl ReceiptCorrelator {
    pub fn new(capacity_per_tenant: usize, ttl: Duration) -> Self {
        Self {
            capacity: NonZeroUsize::new(capacity_per_tenant).unwrap_or(NonZeroUsize::MIN),
            ttl,
            tenants: Mutex::new(HashMap::new()),
        }
    }

    /// Remember the identity a message was sent to.
    pub fn remember(&self, tenant_id: Uuid, message_id: &str, identity: &str) {
        let _ = self.observe_at(tenant_id, message_id, identity, Instant::now());
    }

    /// Record a sighting of `identity` for `message_id`.
    ///
    /// Returns `(anonymized, phone)` when this sighting completes a pair.
    pub fn observe(
        &self,
        tenant_id: Uuid,
        message_id: &str,
        identity: &str,
    ) -> Option<(String, String)> {
        self.observe_at(tenant_id, message_id, identity, Instant::now())
    }

    fn observe_at(
        &self,
        tenant_id: Uuid,
        message_id: &str,
        identity: &str,
        now: Instant,
    ) -> Option<(String, String)> {
        let identity = jid::normalize(identity);
        if !jid::is_anonymized(&identity) && !jid::is_phone(&identity) {
            return None;
        }

        let mut tenants = match self.tenants.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let cache = tenants
            .entry(tenant_id)
            .or_insert_with(|| LruCache::new(self.capacity));

        let fresh = cache
            .peek(message_id)
            .filter(|s| now.duration_since(s.seen_at) <= self.ttl)
            .map(|s| s.jid.clone());

        match fresh {
            Some(previous) => {
                let (lid, phone) = jid::alias_pair(&previous, &identity)?;
                let pair = (lid.to_string(), phone.to_string());
                cache.pop(message_id);
                Some(pair)
            }
            None => {
                cache.put(
                    message_id.to_string(),
                    Sighting {
                        jid: identity,
                        seen_at: now,
                    },
                );
                None
            }
        }
    }

    pub fn pending(&self, tenant_id: Uuid) -> usize {
        let tenants = match self.tenants.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tenants.get(&tenant_id).map_or(0, LruCache::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_anonymized_and_phone_sightings() {
        let correlator = ReceiptCorrelator::default();
        let tenant = Uuid::new_v4();

        assert_eq!(correlator.observe(tenant, "m1", "998877:3@lid"), None);
        assert_eq!(
            correlator.observe(tenant, "m1", "62811:9@s.whatsapp.net"),
            Some(("998877@lid".to_string(), "62811@s.whatsapp.net".to_string()))
        );
        assert_eq!(correlator.pending(tenant), 0);
    }

    #[test]
    fn same_form_sightings_do_not_pair() {
        let correlator = ReceiptCorrelator::default();
        let tenant = Uuid::new_v4();
        correlator.remember(tenant, "m1", "62811@s.whatsapp.net");
        assert_eq!(correlator.observe(tenant, "m1", "62899@s.whatsapp.net"), None);
        assert_eq!(correlator.pending(tenant), 1);
    }

    #[test]
    fn tenants_are_isolated() {
        let correlator = ReceiptCorrelator::default();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        correlator.observe(a, "m1", "998877@lid");
        assert_eq!(correlator.observe(b, "m1", "62811@s.whatsapp.net"), None);
    }

    #[test]
    fn expired_sightings_are_replaced() {
        let correlator = ReceiptCorrelator::new(8, Duration::from_secs(10));
        let tenant = Uuid::new_v4();
        let start = Instant::now();
        correlator.observe_at(tenant, "m1", "998877@lid", start);
        let later = start + Duration::from_secs(11);
        assert_eq!(
            correlator.observe_at(tenant, "m1", "62811@s.whatsapp.net", later),
            None
        );
    }

    #[test]
    fn capacity_bounds_each_tenant() {
        let correlator = ReceiptCorrelator::new(2, DEFAULT_TTL);
        let tenant = Uuid::new_v4();
        correlator.observe(tenant, "m1", "1@lid");
        correlator.observe(tenant, "m2", "2@lid");
        correlator.observe(tenant, "m3", "3@lid");
        assert_eq!(correlator.pending(tenant), 2);
        assert_eq!(correlator.observe(tenant, "m1", "62811@s.whatsapp.net"), None);
    }

    #[test]
    fn group_identities_are_ignored() {
        let correlator = ReceiptCorrelator::default();
        let tenant = Uuid::new_v4();
        assert_eq!(correlator.observe(tenant, "m1", "120363@g.us"), None);
        assert_eq!(correlator.pending(tenant), 0);
    }
}
