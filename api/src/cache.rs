use std::time::{Duration, Instant};

use dashmap::DashMap;
use tally_shared::PostPage;
use uuid::Uuid;

use crate::{pagination::PageRequest, ranking::Strategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub community_id: Uuid,
    pub strategy: Strategy,
    pub page: u64,
    pub limit: u64,
}

impl CacheKey {
    pub fn new(community_id: Uuid, strategy: Strategy, request: &PageRequest) -> Self {
        Self {
            community_id,
            strategy,
            page: request.page(),
            limit: request.limit(),
        }
    }
}

struct Entry {
    page: PostPage,
    stored_at: Instant,
}

/// Ranked pages kept for at most `ttl`.
pub struct RankingCache {
    entries: DashMap<CacheKey, Entry>,
    /// Bumped by every invalidation of a community.
    generations: DashMap<Uuid, u64>,
    ttl: Duration,
}

impl RankingCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            generations: DashMap::new(),
            ttl,
        }
    }

    /// Read before fetching a page and handed back to [`RankingCache::insert`].
    pub fn generation(&self, community_id: Uuid) -> u64 {
        self.generations
            .get(&community_id)
            .map(|generation| *generation)
            .unwrap_or(0)
    }

    pub fn get(&self, key: &CacheKey) -> Option<PostPage> {
        let hit = {
            let entry = self.entries.get(key)?;
            (entry.stored_at.elapsed() < self.ttl).then(|| entry.page.clone())
        };
        if hit.is_none() {
            self.entries.remove_if(key, |_, entry| entry.stored_at.elapsed() >= self.ttl);
        }
        hit
    }

    /// Skipped when the community was invalidated after `generation` was read.
    /// Returns whether the page was stored.
    pub fn insert(&self, key: CacheKey, generation: u64, page: PostPage) -> bool {
        // the generation entry stays locked until the page is in, so an
        // invalidation either happens before the check or removes the page after
        let current = self.generations.entry(key.community_id).or_insert(0);
        if *current != generation {
            return false;
        }
        self.entries.insert(
            key,
            Entry {
                page,
                stored_at: Instant::now(),
            },
        );
        drop(current);
        true
    }

    /// Drops every page of `community_id`, whatever its strategy or window.
    pub fn invalidate_community(&self, community_id: Uuid) {
        *self.generations.entry(community_id).or_insert(0) += 1;
        self.entries.retain(|key, _| key.community_id != community_id);
    }

    /// Returns how many entries were evicted.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.stored_at.elapsed() < self.ttl);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
