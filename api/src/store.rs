use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, InterruptHandle, Row};
use tally_shared::PostType;
use uuid::Uuid;

use crate::{
    error::StoreError,
    model::{Post, PostMetrics},
    pagination::Window,
    DbPool,
};

// SQLite's historical host-parameter limit.
const MAX_IN_PARAMS: usize = 900;

/// Undeleted posts of a community, always newest first with `id DESC` breaking ties.
#[async_trait]
pub trait PostStore: Send + Sync {
    /// All matching posts when `window` is `None`.
    async fn query_by_community(
        &self,
        community_id: Uuid,
        window: Option<Window>,
    ) -> Result<Vec<Post>, StoreError>;

    async fn count_by_community(&self, community_id: Uuid) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait PostMetricsProvider: Send + Sync {
    /// Posts without votes are simply missing from the map.
    async fn for_posts(&self, post_ids: &[Uuid]) -> Result<HashMap<Uuid, PostMetrics>, StoreError>;
}

/// Everything the feed needs. Implementors that can read posts and metrics
/// in one snapshot should override `posts_with_metrics`.
#[async_trait]
pub trait FeedSource: PostStore + PostMetricsProvider {
    async fn posts_with_metrics(
        &self,
        community_id: Uuid,
    ) -> Result<Vec<(Post, PostMetrics)>, StoreError> {
        let posts = self.query_by_community(community_id, None).await?;
        let ids: Vec<Uuid> = posts.iter().map(|post| post.id).collect();
        let mut metrics = self.for_posts(&ids).await?;

        Ok(posts
            .into_iter()
            .map(|post| {
                let m = metrics
                    .remove(&post.id)
                    .unwrap_or_else(|| PostMetrics::zero(post.id));
                (post, m)
            })
            .collect())
    }
}

// ── SQLite ──

#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Runs `f` on a pooled connection on the blocking pool. Dropping the
    /// returned future interrupts whatever statement `f` is executing, and
    /// skips `f` entirely if it has not started yet.
    async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let pool = self.pool.clone();
        let conn = tokio::task::spawn_blocking(move || pool.get()).await??;
        let in_flight = Arc::new(Mutex::new(InFlight {
            handle: Some(conn.get_interrupt_handle()),
            cancelled: false,
        }));
        let guard = CancelOnDrop(Some(in_flight.clone()));

        let out = tokio::task::spawn_blocking(move || {
            if in_flight.lock().cancelled {
                return Err(StoreError::Cancelled);
            }
            let out = f(&conn);
            // the handle must be gone before the connection goes back to the pool
            in_flight.lock().handle = None;
            drop(conn);
            out
        })
        .await;
        guard.disarm();
        out?
    }
}

struct InFlight {
    handle: Option<InterruptHandle>,
    cancelled: bool,
}

struct CancelOnDrop(Option<Arc<Mutex<InFlight>>>);

impl CancelOnDrop {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        let Some(in_flight) = self.0.take() else {
            return;
        };
        let mut in_flight = in_flight.lock();
        in_flight.cancelled = true;
        if let Some(handle) = in_flight.handle.take() {
            tracing::debug!("request dropped, interrupting sqlite statement");
            handle.interrupt();
        }
    }
}

const POST_COLUMNS: &str = "p.id, p.community_id, p.title, p.type, p.created_at, p.deleted_at";

struct PostRow {
    id: String,
    community_id: String,
    title: String,
    kind: String,
    created_at: String,
    deleted_at: Option<String>,
}

impl PostRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(PostRow {
            id: row.get(0)?,
            community_id: row.get(1)?,
            title: row.get(2)?,
            kind: row.get(3)?,
            created_at: row.get(4)?,
            deleted_at: row.get(5)?,
        })
    }
}

impl TryFrom<PostRow> for Post {
    type Error = StoreError;

    fn try_from(row: PostRow) -> Result<Self, Self::Error> {
        let kind = PostType::parse(&row.kind)
            .ok_or_else(|| StoreError::Corrupt(format!("post {} has type {:?}", row.id, row.kind)))?;
        Ok(Post {
            id: parse_uuid(&row.id)?,
            community_id: parse_uuid(&row.community_id)?,
            title: row.title,
            kind,
            created_at: parse_timestamp(&row.created_at)?,
            deleted_at: row.deleted_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

struct MetricsRow {
    post_id: String,
    upvote_count: i64,
    downvote_count: i64,
    vote_score: i64,
}

impl MetricsRow {
    fn read(row: &Row<'_>, start: usize) -> rusqlite::Result<Self> {
        Ok(MetricsRow {
            post_id: row.get(start)?,
            upvote_count: row.get(start + 1)?,
            downvote_count: row.get(start + 2)?,
            vote_score: row.get(start + 3)?,
        })
    }
}

impl TryFrom<MetricsRow> for PostMetrics {
    type Error = StoreError;

    fn try_from(row: MetricsRow) -> Result<Self, Self::Error> {
        let count = |value: i64| {
            u64::try_from(value).map_err(|_| {
                StoreError::Corrupt(format!("post {} has vote count {value}", row.post_id))
            })
        };
        Ok(PostMetrics {
            post_id: parse_uuid(&row.post_id)?,
            upvote_count: count(row.upvote_count)?,
            downvote_count: count(row.downvote_count)?,
            vote_score: row.vote_score,
        })
    }
}

fn parse_uuid(value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value).map_err(|_| StoreError::Corrupt(format!("bad uuid {value:?}")))
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| StoreError::Corrupt(format!("bad timestamp {value:?}")))
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
impl PostStore for SqliteStore {
    async fn query_by_community(
        &self,
        community_id: Uuid,
        window: Option<Window>,
    ) -> Result<Vec<Post>, StoreError> {
        let community = community_id.to_string();

        self.run(move |conn| {
            let base = format!(
                "SELECT {POST_COLUMNS}
                 FROM posts p
                 WHERE p.community_id = ?1 AND p.deleted_at IS NULL
                 ORDER BY p.created_at DESC, p.id DESC"
            );

            let rows = match window {
                Some(window) => {
                    let mut stmt = conn.prepare(&format!("{base} LIMIT ?2 OFFSET ?3"))?;
                    let rows = stmt
                        .query_map(
                            rusqlite::params![
                                community,
                                to_sql_int(window.limit),
                                to_sql_int(window.offset)
                            ],
                            PostRow::read,
                        )?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    rows
                }
                None => {
                    let mut stmt = conn.prepare(&base)?;
                    let rows = stmt
                        .query_map([&community], PostRow::read)?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    rows
                }
            };

            rows.into_iter().map(Post::try_from).collect()
        })
        .await
    }

    async fn count_by_community(&self, community_id: Uuid) -> Result<u64, StoreError> {
        let community = community_id.to_string();

        self.run(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM posts WHERE community_id = ?1 AND deleted_at IS NULL",
                [&community],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
        .await
    }
}

#[async_trait]
impl PostMetricsProvider for SqliteStore {
    async fn for_posts(&self, post_ids: &[Uuid]) -> Result<HashMap<Uuid, PostMetrics>, StoreError> {
        if post_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let ids: Vec<String> = post_ids.iter().map(Uuid::to_string).collect();

        self.run(move |conn| {
            let mut metrics = HashMap::with_capacity(ids.len());
            for chunk in ids.chunks(MAX_IN_PARAMS) {
                let placeholders = vec!["?"; chunk.len()].join(", ");
                let mut stmt = conn.prepare(&format!(
                    "SELECT post_id, upvote_count, downvote_count, vote_score
                     FROM post_metrics
                     WHERE post_id IN ({placeholders})"
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params_from_iter(chunk.iter()), |row| {
                        MetricsRow::read(row, 0)
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                for row in rows {
                    let m = PostMetrics::try_from(row)?;
                    metrics.insert(m.post_id, m);
                }
            }
            Ok(metrics)
        })
        .await
    }
}

#[async_trait]
impl FeedSource for SqliteStore {
    /// One LEFT JOIN statement, so posts and metrics come from the same snapshot.
    async fn posts_with_metrics(
        &self,
        community_id: Uuid,
    ) -> Result<Vec<(Post, PostMetrics)>, StoreError> {
        let community = community_id.to_string();

        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {POST_COLUMNS},
                        p.id,
                        COALESCE(m.upvote_count, 0),
                        COALESCE(m.downvote_count, 0),
                        COALESCE(m.vote_score, 0)
                 FROM posts p
                 LEFT JOIN post_metrics m ON m.post_id = p.id
                 WHERE p.community_id = ?1 AND p.deleted_at IS NULL"
            ))?;

            let rows = stmt
                .query_map([&community], |row| {
                    Ok((PostRow::read(row)?, MetricsRow::read(row, 6)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            rows.into_iter()
                .map(|(post, metrics)| -> Result<_, StoreError> {
                    Ok((Post::try_from(post)?, PostMetrics::try_from(metrics)?))
                })
                .collect()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use rusqlite::ErrorCode;
    use tokio::sync::oneshot;

    use crate::db::fixtures::{at, insert_post, memory_pool, set_votes, soft_delete};

    const COUNT_TO_A_BILLION: &str =
        "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 1000000000)
         SELECT count(*) FROM c";
    const COUNT_TO_TWO_MILLION: &str =
        "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 2000000)
         SELECT count(*) FROM c";

    fn interrupted(result: &rusqlite::Result<i64>) -> bool {
        matches!(
            result,
            Err(rusqlite::Error::SqliteFailure(err, _)) if err.code == ErrorCode::OperationInterrupted
        )
    }

    /// Exposes only the two base traits so the default `posts_with_metrics` runs.
    struct Composed(SqliteStore);

    #[async_trait]
    impl PostStore for Composed {
        async fn query_by_community(
            &self,
            community_id: Uuid,
            window: Option<Window>,
        ) -> Result<Vec<Post>, StoreError> {
            self.0.query_by_community(community_id, window).await
        }

        async fn count_by_community(&self, community_id: Uuid) -> Result<u64, StoreError> {
            self.0.count_by_community(community_id).await
        }
    }

    #[async_trait]
    impl PostMetricsProvider for Composed {
        async fn for_posts(
            &self,
            post_ids: &[Uuid],
        ) -> Result<HashMap<Uuid, PostMetrics>, StoreError> {
            self.0.for_posts(post_ids).await
        }
    }

    impl FeedSource for Composed {}

    #[tokio::test]
    async fn query_orders_newest_first_and_breaks_ties_by_id() {
        let pool = memory_pool();
        let community = Uuid::new_v4();
        let oldest = insert_post(&pool, community, "oldest", at(0));
        let tied_a = insert_post(&pool, community, "tied a", at(5));
        let tied_b = insert_post(&pool, community, "tied b", at(5));
        let newest = insert_post(&pool, community, "newest", at(9));

        let store = SqliteStore::new(pool);
        let ids: Vec<Uuid> = store
            .query_by_community(community, None)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();

        let (high, low) = if tied_a > tied_b { (tied_a, tied_b) } else { (tied_b, tied_a) };
        assert_eq!(ids, vec![newest, high, low, oldest]);
    }

    #[tokio::test]
    async fn query_window_and_count_skip_deleted_and_other_communities() {
        let pool = memory_pool();
        let community = Uuid::new_v4();
        let ids: Vec<Uuid> = (0..5)
            .map(|i| insert_post(&pool, community, &format!("post {i}"), at(i)))
            .collect();
        insert_post(&pool, Uuid::new_v4(), "elsewhere", at(100));
        soft_delete(&pool, ids[4]);

        let store = SqliteStore::new(pool);
        assert_eq!(store.count_by_community(community).await.unwrap(), 4);

        let page = store
            .query_by_community(community, Some(Window { offset: 1, limit: 2 }))
            .await
            .unwrap();
        let titles: Vec<&str> = page.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["post 2", "post 1"]);
        assert!(page.iter().all(|p| p.deleted_at.is_none() && p.community_id == community));

        let past_end = store
            .query_by_community(community, Some(Window { offset: 10, limit: 2 }))
            .await
            .unwrap();
        assert!(past_end.is_empty());
    }

    #[tokio::test]
    async fn metrics_lookup_omits_posts_without_votes() {
        let pool = memory_pool();
        let community = Uuid::new_v4();
        let voted = insert_post(&pool, community, "voted", at(0));
        let silent = insert_post(&pool, community, "silent", at(1));
        set_votes(&pool, voted, 7, 2);

        let store = SqliteStore::new(pool);
        let metrics = store.for_posts(&[voted, silent]).await.unwrap();

        assert_eq!(metrics.len(), 1);
        let m = metrics[&voted];
        assert_eq!((m.upvote_count, m.downvote_count, m.vote_score), (7, 2, 5));
        assert!(store.for_posts(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn joined_snapshot_matches_composed_default() {
        let pool = memory_pool();
        let community = Uuid::new_v4();
        let a = insert_post(&pool, community, "a", at(0));
        let b = insert_post(&pool, community, "b", at(1));
        let c = insert_post(&pool, community, "c", at(2));
        set_votes(&pool, a, 3, 1);
        set_votes(&pool, c, 0, 4);
        soft_delete(&pool, b);

        let store = SqliteStore::new(pool);
        let mut joined = store.posts_with_metrics(community).await.unwrap();
        let mut composed = Composed(store.clone())
            .posts_with_metrics(community)
            .await
            .unwrap();
        joined.sort_by_key(|(post, _)| post.id);
        composed.sort_by_key(|(post, _)| post.id);

        assert_eq!(joined, composed);
        assert_eq!(joined.len(), 2);
        let scores: HashMap<Uuid, i64> = joined
            .iter()
            .map(|(post, m)| (post.id, m.vote_score))
            .collect();
        assert_eq!(scores[&a], 2);
        assert_eq!(scores[&c], -4);
    }

    #[tokio::test]
    async fn posts_without_metrics_join_as_zero() {
        let pool = memory_pool();
        let community = Uuid::new_v4();
        let post = insert_post(&pool, community, "quiet", at(0));

        let store = SqliteStore::new(pool);
        let rows = store.posts_with_metrics(community).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1, PostMetrics::zero(post));
    }

    #[tokio::test]
    async fn unknown_post_type_is_reported_as_corrupt() {
        let pool = memory_pool();
        let community = Uuid::new_v4();
        let post = insert_post(&pool, community, "odd", at(0));
        pool.get()
            .unwrap()
            .execute("UPDATE posts SET type = 'poll' WHERE id = ?1", [post.to_string()])
            .unwrap();

        let store = SqliteStore::new(pool);
        let err = store.query_by_community(community, None).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[tokio::test]
    async fn dropping_the_future_interrupts_the_running_statement() {
        let pool = memory_pool();
        let store = SqliteStore::new(pool.clone());
        let (started_tx, started_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();

        let mut call = Box::pin(store.run(move |conn| {
            let _ = started_tx.send(());
            let result = conn.query_row(COUNT_TO_A_BILLION, [], |row| row.get::<_, i64>(0));
            let _ = done_tx.send(interrupted(&result));
            Ok(())
        }));
        tokio::select! {
            _ = &mut call => panic!("long query returned"),
            _ = started_rx => {}
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(call);

        let was_interrupted = tokio::time::timeout(Duration::from_secs(10), done_rx)
            .await
            .expect("statement kept running after the drop")
            .unwrap();
        assert!(was_interrupted);

        // the connection went back to the pool and is usable
        let count = store.count_by_community(Uuid::new_v4()).await.unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn late_drop_does_not_interrupt_the_next_borrower() {
        let pool = memory_pool();
        let store = SqliteStore::new(pool.clone());
        let (done_tx, done_rx) = oneshot::channel();

        let mut call = Box::pin(store.run(move |_conn| {
            let _ = done_tx.send(());
            Ok(1)
        }));
        // stop polling as soon as the closure has finished, before the future resolves
        tokio::select! {
            biased;
            _ = done_rx => {}
            _ = &mut call => {}
        }

        // max_size is 1, so this borrower gets the connection the closure just released
        let next = tokio::task::spawn_blocking(move || {
            let conn = pool.get().unwrap();
            conn.query_row(COUNT_TO_TWO_MILLION, [], |row| row.get::<_, i64>(0))
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(call);

        let result = next.await.unwrap();
        assert!(!interrupted(&result), "{result:?}");
        assert_eq!(result.unwrap(), 2_000_000);
    }

    #[tokio::test]
    async fn cancel_guard_marks_the_call_cancelled_unless_disarmed() {
        let pool = memory_pool();
        let store = SqliteStore::new(pool);
        let in_flight = Arc::new(Mutex::new(InFlight {
            handle: None,
            cancelled: false,
        }));
        drop(CancelOnDrop(Some(in_flight.clone())));
        assert!(in_flight.lock().cancelled);

        let disarmed = Arc::new(Mutex::new(InFlight {
            handle: None,
            cancelled: false,
        }));
        CancelOnDrop(Some(disarmed.clone())).disarm();
        assert!(!disarmed.lock().cancelled);

        assert_eq!(store.run(|_conn| Ok(7)).await.unwrap(), 7);
    }
}
