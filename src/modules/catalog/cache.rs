//! Memoization of filtered/paginated catalog queries.
//!
//! Invalidation is coarse on purpose: any catalog or lending mutation bumps
//! a single generation counter, which makes every cached page stale at once.
//! Entries are tagged with the generation they were computed under; a read
//! only hits when the tag still matches. No per-key eviction, no TTL.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use super::models::{Book, Page, SearchParams};

/// Normalized filter + pagination tuple. Two requests that normalize to the
/// same key share a cache slot; there is no partial-key matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SearchKey {
    pub title: Option<String>,
    pub author: Option<String>,
    pub isbn: Option<String>,
    pub genre: Option<String>,
    pub page: usize,
    pub per_page: usize,
}

impl SearchKey {
    pub const DEFAULT_PER_PAGE: usize = 20;

    /// Normalize raw query parameters: trim and lowercase filters, drop
    /// empty ones, default the pagination window.
    pub fn from_params(params: &SearchParams) -> Self {
        fn normalize(value: &Option<String>) -> Option<String> {
            value
                .as_deref()
                .map(|v| v.trim().to_lowercase())
                .filter(|v| !v.is_empty())
        }

        Self {
            title: normalize(&params.title),
            author: normalize(&params.author),
            isbn: normalize(&params.isbn),
            genre: normalize(&params.genre),
            page: params.page.unwrap_or(0),
            per_page: params.per_page.unwrap_or(Self::DEFAULT_PER_PAGE).max(1),
        }
    }
}

struct CachedPage {
    generation: u64,
    page: Page<Book>,
}

/// Generation-tagged search cache.
#[derive(Default)]
pub struct SearchCache {
    generation: AtomicU64,
    entries: RwLock<HashMap<SearchKey, CachedPage>>,
}

impl SearchCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generation the next read/compute cycle runs under. Pass this to
    /// [`SearchCache::put_at`] so a page computed before an invalidation
    /// cannot be stored as fresh.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Cached page for this exact key, if still current.
    pub fn get(&self, key: &SearchKey) -> Option<Page<Book>> {
        let current = self.generation();
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .filter(|entry| entry.generation == current)
            .map(|entry| entry.page.clone())
    }

    /// Store a page computed while `generation` was current. Dropped
    /// silently if an invalidation happened in between.
    pub fn put_at(&self, key: SearchKey, page: Page<Book>, generation: u64) {
        if generation != self.generation() {
            return;
        }
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key, CachedPage { generation, page });
    }

    /// Invalidate every cached page. O(1): stale entries are filtered out on
    /// read and overwritten on the next put.
    pub fn invalidate_all(&self) {
        self.generation.fetch_add(1, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(total: usize) -> Page<Book> {
        Page {
            items: Vec::new(),
            page: 0,
            per_page: 20,
            total,
        }
    }

    fn key(title: &str) -> SearchKey {
        SearchKey::from_params(&SearchParams {
            title: Some(title.to_string()),
            ..SearchParams::default()
        })
    }

    #[test]
    fn hit_after_put() {
        let cache = SearchCache::new();
        let generation = cache.generation();
        cache.put_at(key("kafka"), page(3), generation);

        assert_eq!(cache.get(&key("kafka")).unwrap().total, 3);
        assert!(cache.get(&key("tolstoy")).is_none());
    }

    #[test]
    fn invalidation_makes_every_entry_stale() {
        let cache = SearchCache::new();
        let generation = cache.generation();
        cache.put_at(key("kafka"), page(3), generation);
        cache.put_at(key("tolstoy"), page(5), generation);

        cache.invalidate_all();

        assert!(cache.get(&key("kafka")).is_none());
        assert!(cache.get(&key("tolstoy")).is_none());
    }

    #[test]
    fn put_races_with_invalidation_and_loses() {
        let cache = SearchCache::new();
        let generation = cache.generation();
        // The page was computed, then a mutation invalidated the cache
        // before the put landed. The stale page must not be stored.
        cache.invalidate_all();
        cache.put_at(key("kafka"), page(3), generation);

        assert!(cache.get(&key("kafka")).is_none());
    }

    #[test]
    fn keys_normalize_case_and_whitespace() {
        let loose = SearchKey::from_params(&SearchParams {
            title: Some("  Kafka ".to_string()),
            author: Some(String::new()),
            ..SearchParams::default()
        });
        let tight = SearchKey::from_params(&SearchParams {
            title: Some("kafka".to_string()),
            ..SearchParams::default()
        });
        assert_eq!(loose, tight);
        assert_eq!(loose.per_page, SearchKey::DEFAULT_PER_PAGE);
    }
}
