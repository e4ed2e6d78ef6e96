//! Complete-set cache, per-domain projections and backing-store fallback.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::time::Duration;

use super::TtlCache;
use crate::domain::{CategoryTable, CityMetadata, Domain, Poi, ResultSet, project};
use crate::persistence::ResultStore;

/// Which tier satisfied a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ResultSource {
    Complete,
    Domain,
    BackingStore,
    Empty,
}

/// Result of a domain read. Never an error: a miss everywhere is [`ResultSource::Empty`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainResult {
    pub key: String,
    pub domain: Domain,
    pub source: ResultSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<CityMetadata>,
    pub points_of_interest: Vec<Poi>,
}

impl DomainResult {
    fn empty(key: &str, domain: Domain) -> Self {
        Self {
            key: key.to_string(),
            domain,
            source: ResultSource::Empty,
            city: None,
            points_of_interest: Vec::new(),
        }
    }
}

/// Whether `key` is an acceptable session id or cache key.
#[must_use]
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= 128
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
}

/// Multi-tier result cache.
///
/// Reads try the complete-set cache (projected on the fly), then the
/// per-domain cache, then the backing store. Cloning shares all tiers.
#[derive(Debug, Clone)]
pub struct ResultCache {
    complete: TtlCache<Arc<ResultSet>>,
    projections: HashMap<Domain, TtlCache<Arc<ResultSet>>>,
    categories: Arc<CategoryTable>,
    store: Arc<dyn ResultStore>,
    repopulate: bool,
}

const PROJECTED: [Domain; 3] = [Domain::Lodging, Domain::Dining, Domain::Activities];

impl ResultCache {
    #[must_use]
    pub fn new(ttl: Duration, categories: CategoryTable, store: Arc<dyn ResultStore>) -> Self {
        Self {
            complete: TtlCache::new(ttl),
            projections: PROJECTED.iter().map(|d| (*d, TtlCache::new(ttl))).collect(),
            categories: Arc::new(categories),
            store,
            repopulate: true,
        }
    }

    /// Whether backing-store hits are written back into the caches.
    #[must_use]
    pub fn with_repopulate(mut self, repopulate: bool) -> Self {
        self.repopulate = repopulate;
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn ResultStore> {
        &self.store
    }

    /// Store `set` under `key` in the complete-set cache and every domain cache.
    pub fn put(&self, key: &str, set: ResultSet) {
        for domain in PROJECTED {
            let projection = ResultSet {
                city: set.city.clone(),
                points_of_interest: project(&self.categories, &set.points_of_interest, domain),
            };
            if let Some(cache) = self.projections.get(&domain) {
                cache.set(key, Arc::new(projection));
            }
        }
        tracing::debug!(key = %key, pois = set.len(), "Cached complete result set");
        self.complete.set(key, Arc::new(set));
    }

    /// Live complete result set for `key`.
    #[must_use]
    pub fn complete(&self, key: &str) -> Option<Arc<ResultSet>> {
        self.complete.get(key)
    }

    /// Read the `domain` view of `key`.
    ///
    /// `session_id` selects the backing-store record on a full cache miss and
    /// defaults to `key`.
    pub async fn load(&self, key: &str, session_id: Option<&str>, domain: Domain) -> DomainResult {
        if !is_valid_key(key) {
            tracing::debug!(key = %key, "Rejecting malformed result key");
            return DomainResult::empty(key, domain);
        }

        if let Some(set) = self.complete.get(key) {
            tracing::debug!(name: "cache.hit", key = %key, domain = %domain, tier = "complete", "Cache hit");
            return self.projected(key, domain, &set, ResultSource::Complete);
        }

        if let Some(set) = self.projections.get(&domain).and_then(|c| c.get(key)) {
            tracing::debug!(name: "cache.hit", key = %key, domain = %domain, tier = "domain", "Cache hit");
            return DomainResult {
                key: key.to_string(),
                domain,
                source: ResultSource::Domain,
                city: set.city.clone(),
                points_of_interest: set.points_of_interest.clone(),
            };
        }

        tracing::debug!(name: "cache.miss", key = %key, domain = %domain, "Cache miss, consulting backing store");
        let session_id = session_id.filter(|s| is_valid_key(s)).unwrap_or(key);
        match self.fetch_from_store(session_id).await {
            Some(set) => {
                let result = self.projected(key, domain, &set, ResultSource::BackingStore);
                if self.repopulate {
                    self.put(key, set);
                }
                result
            }
            None => DomainResult::empty(key, domain),
        }
    }

    /// Drop expired entries from every tier.
    pub fn purge_expired(&self) -> usize {
        self.complete.purge_expired()
            + self
                .projections
                .values()
                .map(TtlCache::purge_expired)
                .sum::<usize>()
    }

    /// Number of complete-set entries held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.complete.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.complete.is_empty()
    }

    fn projected(&self, key: &str, domain: Domain, set: &ResultSet, source: ResultSource) -> DomainResult {
        DomainResult {
            key: key.to_string(),
            domain,
            source,
            city: set.city.clone(),
            points_of_interest: project(&self.categories, &set.points_of_interest, domain),
        }
    }

    async fn fetch_from_store(&self, session_id: &str) -> Option<ResultSet> {
        let raw = match self.store.latest_result_for_session(session_id).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Backing store read failed");
                return None;
            }
        };

        let parsed = ResultSet::from_raw(&raw);
        if parsed.is_none() {
            tracing::warn!(session_id = %session_id, "Stored result could not be parsed");
        }
        parsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fixtures::poi;
    use crate::persistence::providers::memory::InMemoryResultStore;

    fn sample() -> ResultSet {
        ResultSet {
            city: None,
            points_of_interest: vec![
                poi("h1", "hotel"),
                poi("r1", "restaurant"),
                poi("r2", "Cafe"),
                poi("m1", "museum"),
            ],
        }
    }

    fn cache_with(store: Arc<InMemoryResultStore>) -> ResultCache {
        ResultCache::new(Duration::from_secs(60), CategoryTable::default(), store)
    }

    #[tokio::test]
    async fn test_complete_hit_projects_without_store() {
        let store = Arc::new(InMemoryResultStore::new());
        let cache = cache_with(Arc::clone(&store));
        cache.put("S", sample());

        let result = cache.load("S", None, Domain::Dining).await;
        assert_eq!(result.source, ResultSource::Complete);
        let ids: Vec<_> = result.points_of_interest.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["r1", "r2"]);
        assert_eq!(store.read_count(), 0);
    }

    #[tokio::test]
    async fn test_domain_cache_used_when_complete_missing() {
        let store = Arc::new(InMemoryResultStore::new());
        let cache = cache_with(Arc::clone(&store));
        cache.put("S", sample());
        cache.complete.delete("S");

        let result = cache.load("S", None, Domain::Lodging).await;
        assert_eq!(result.source, ResultSource::Domain);
        assert_eq!(result.points_of_interest.len(), 1);
        assert_eq!(store.read_count(), 0);
    }

    #[tokio::test]
    async fn test_backing_store_fallback_repopulates() {
        let store = Arc::new(InMemoryResultStore::new());
        store.save_result("S", &sample().to_raw().unwrap()).await.unwrap();
        let cache = cache_with(Arc::clone(&store));

        let result = cache.load("S", None, Domain::Activities).await;
        assert_eq!(result.source, ResultSource::BackingStore);
        assert_eq!(result.points_of_interest[0].id, "m1");

        let again = cache.load("S", None, Domain::Activities).await;
        assert_eq!(again.source, ResultSource::Complete);
        assert_eq!(store.read_count(), 1);
    }

    #[tokio::test]
    async fn test_cache_key_falls_back_to_session_record() {
        let store = Arc::new(InMemoryResultStore::new());
        store.save_result("S", &sample().to_raw().unwrap()).await.unwrap();
        let cache = cache_with(store).with_repopulate(false);

        let result = cache.load("page-key", Some("S"), Domain::Dining).await;
        assert_eq!(result.source, ResultSource::BackingStore);
        assert_eq!(result.key, "page-key");
        assert!(cache.complete("page-key").is_none());
    }

    #[tokio::test]
    async fn test_everything_missing_is_empty_not_error() {
        let cache = cache_with(Arc::new(InMemoryResultStore::new()));
        let result = cache.load("nope", None, Domain::Dining).await;
        assert_eq!(result.source, ResultSource::Empty);
        assert!(result.points_of_interest.is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_store_record_is_a_miss() {
        let store = Arc::new(InMemoryResultStore::new());
        store.save_result("S", "{{{").await.unwrap();
        let cache = cache_with(store);
        assert_eq!(cache.load("S", None, Domain::Dining).await.source, ResultSource::Empty);
    }

    #[tokio::test]
    async fn test_malformed_key_is_empty() {
        let store = Arc::new(InMemoryResultStore::new());
        let cache = cache_with(Arc::clone(&store));
        let result = cache.load("../../etc/passwd", None, Domain::Dining).await;
        assert_eq!(result.source, ResultSource::Empty);
        assert_eq!(store.read_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_never_served() {
        let store = Arc::new(InMemoryResultStore::new());
        let cache = cache_with(store);
        cache.put("S", sample());

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(cache.complete("S").is_none());
        assert_eq!(cache.load("S", None, Domain::Dining).await.source, ResultSource::Empty);
    }

    #[test]
    fn test_is_valid_key() {
        assert!(is_valid_key("3f2b-11aa_x"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("a b"));
        assert!(!is_valid_key(&"x".repeat(129)));
    }
}
