use std::time::Duration;

use tally_shared::PostPage;
use tracing::debug;
use uuid::Uuid;

use crate::{
    cache::{CacheKey, RankingCache},
    error::StoreError,
    model::Post,
    pagination::{envelope, PageRequest},
    ranking::{by_score, Ranking, Strategy},
    store::FeedSource,
};

/// Community feed read path: picks the ordering, slices the page, builds the envelope.
pub struct FeedService<S> {
    source: S,
    cache: Option<RankingCache>,
}

impl<S: FeedSource> FeedService<S> {
    /// A zero `cache_ttl` disables caching.
    pub fn new(source: S, cache_ttl: Duration) -> Self {
        Self {
            source,
            cache: (!cache_ttl.is_zero()).then(|| RankingCache::new(cache_ttl)),
        }
    }

    pub fn cache(&self) -> Option<&RankingCache> {
        self.cache.as_ref()
    }

    pub async fn list_posts(
        &self,
        community_id: Uuid,
        strategy: Strategy,
        request: PageRequest,
    ) -> Result<PostPage, StoreError> {
        let key = CacheKey::new(community_id, strategy, &request);
        if let Some(page) = self.cache.as_ref().and_then(|cache| cache.get(&key)) {
            debug!(%community_id, strategy = strategy.as_str(), page = request.page(), "feed cache hit");
            return Ok(page);
        }

        let generation = self.cache.as_ref().map(|cache| cache.generation(community_id));
        let page = match strategy {
            Strategy::New => self.chronological_page(community_id, &request).await?,
            Strategy::Ranked(ranking) => self.ranked_page(community_id, ranking, &request).await?,
        };

        debug!(
            %community_id,
            strategy = strategy.as_str(),
            page = request.page(),
            limit = request.limit(),
            records = page.pagination.records,
            returned = page.data.len(),
            "feed page built"
        );

        if let (Some(cache), Some(generation)) = (&self.cache, generation) {
            cache.insert(key, generation, page.clone());
        }
        Ok(page)
    }

    pub fn invalidate(&self, community_id: Uuid) {
        if let Some(cache) = &self.cache {
            cache.invalidate_community(community_id);
        }
    }

    async fn chronological_page(
        &self,
        community_id: Uuid,
        request: &PageRequest,
    ) -> Result<PostPage, StoreError> {
        let records = self.source.count_by_community(community_id).await?;
        let window = request.window();

        let posts = if window.offset >= records {
            Vec::new()
        } else {
            self.source
                .query_by_community(community_id, Some(window))
                .await?
        };

        Ok(envelope(
            request,
            records,
            posts.iter().map(Post::summary).collect(),
        ))
    }

    async fn ranked_page(
        &self,
        community_id: Uuid,
        ranking: Ranking,
        request: &PageRequest,
    ) -> Result<PostPage, StoreError> {
        let rows = self.source.posts_with_metrics(community_id).await?;
        let records = rows.len() as u64;

        let page = request.window().select(ranking.rank(rows), by_score);

        Ok(envelope(
            request,
            records,
            page.iter().map(|ranked| ranked.post.summary()).collect(),
        ))
    }
}
