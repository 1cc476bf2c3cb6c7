//! # Page Cache
//!
//! A bounded `page_id -> Page` map. The cache itself is not thread-safe:
//! the page manager wraps it in a single mutex, which serializes every
//! CRUD operation by design.
//!
//! Eviction has no recency tracking. When the cache is full the manager
//! asks for a candidate; a clean page is preferred because it can be
//! dropped without I/O, otherwise the first page found is flushed and
//! dropped.

use hashbrown::HashMap;

use crate::storage::page::Page;

pub struct PageCache {
    pages: HashMap<u32, Page>,
    capacity: usize,
}

impl PageCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            pages: HashMap::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.pages.len() >= self.capacity
    }

    pub fn contains(&self, page_id: u32) -> bool {
        self.pages.contains_key(&page_id)
    }

    pub fn get(&self, page_id: u32) -> Option<&Page> {
        self.pages.get(&page_id)
    }

    pub fn get_mut(&mut self, page_id: u32) -> Option<&mut Page> {
        self.pages.get_mut(&page_id)
    }

    pub fn insert(&mut self, page_id: u32, page: Page) {
        self.pages.insert(page_id, page);
    }

    pub fn remove(&mut self, page_id: u32) -> Option<Page> {
        self.pages.remove(&page_id)
    }

    pub fn clear(&mut self) {
        self.pages.clear();
    }

    /// Ids of all dirty pages, for flush walks.
    pub fn dirty_page_ids(&self) -> Vec<u32> {
        self.pages
            .iter()
            .filter(|(_, page)| page.is_dirty())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Picks a page to evict: a clean one when available, otherwise any.
    /// The returned flag says whether the candidate needs flushing first.
    pub fn evict_candidate(&self) -> Option<(u32, bool)> {
        let mut fallback = None;
        for (id, page) in &self.pages {
            if !page.is_dirty() {
                return Some((*id, false));
            }
            if fallback.is_none() {
                fallback = Some((*id, true));
            }
        }
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove() {
        let mut cache = PageCache::new(4);
        cache.insert(1, Page::new());
        assert!(cache.contains(1));
        assert_eq!(cache.len(), 1);

        cache.remove(1);
        assert!(cache.is_empty());
    }

    #[test]
    fn evict_candidate_prefers_clean_pages() {
        let mut cache = PageCache::new(4);
        cache.insert(1, Page::new());
        cache.insert(2, Page::new());

        // a freshly created page is dirty; clean one of them
        cache.get_mut(2).unwrap().reset_runtime_metadata();

        let (id, needs_flush) = cache.evict_candidate().unwrap();
        assert_eq!(id, 2);
        assert!(!needs_flush);
    }

    #[test]
    fn evict_candidate_falls_back_to_dirty() {
        let mut cache = PageCache::new(4);
        cache.insert(1, Page::new());

        let (id, needs_flush) = cache.evict_candidate().unwrap();
        assert_eq!(id, 1);
        assert!(needs_flush);
    }

    #[test]
    fn dirty_page_ids_tracks_dirty_flag() {
        let mut cache = PageCache::new(4);
        cache.insert(1, Page::new());
        cache.insert(2, Page::new());
        cache.get_mut(1).unwrap().reset_runtime_metadata();

        assert_eq!(cache.dirty_page_ids(), vec![2]);
    }
}
