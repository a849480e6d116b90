use std::collections::HashMap;
use std::time::{Duration, Instant};

use deepresearch_common::types::normalize_url;

/// In-memory page cache. Entries are keyed by normalized URL, so
/// `HTTP://A.com/x#frag` and `http://a.com/x` occupy one slot. An entry
/// expires after the TTL, and the cache never holds more than `capacity`
/// pages; when full, the stalest page makes room for the new one.
pub struct PageCache {
    pages: HashMap<String, CachedPage>,
    ttl: Duration,
    capacity: usize,
}

struct CachedPage {
    content: String,
    status_code: u16,
    content_type: Option<String>,
    stored_at: Instant,
}

impl PageCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            pages: HashMap::new(),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Look up a page by URL (any spelling that normalizes to the same key).
    pub fn get(&self, url: &str) -> Option<(String, u16, Option<String>)> {
        let key = normalize_url(url);
        match self.pages.get(&key) {
            Some(page) if page.stored_at.elapsed() < self.ttl => {
                metrics::counter!("fetch.cache.hit").increment(1);
                Some((
                    page.content.clone(),
                    page.status_code,
                    page.content_type.clone(),
                ))
            }
            _ => {
                metrics::counter!("fetch.cache.miss").increment(1);
                None
            }
        }
    }

    /// Store a page, evicting to stay within capacity.
    pub fn insert(
        &mut self,
        url: &str,
        content: String,
        status_code: u16,
        content_type: Option<String>,
    ) {
        let key = normalize_url(url);

        if !self.pages.contains_key(&key) && self.pages.len() >= self.capacity {
            self.make_room();
        }

        self.pages.insert(
            key,
            CachedPage {
                content,
                status_code,
                content_type,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drop expired pages; if none were expired, drop the stalest live one.
    fn make_room(&mut self) {
        let before = self.pages.len();
        let ttl = self.ttl;
        self.pages.retain(|_, page| page.stored_at.elapsed() < ttl);
        if self.pages.len() < before {
            return;
        }

        let stalest = self
            .pages
            .iter()
            .min_by_key(|(_, page)| page.stored_at)
            .map(|(key, _)| key.clone());
        if let Some(key) = stalest {
            self.pages.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}
