use chrono::{DateTime, Utc};
use tally_shared::{PostSummary, PostType};
use uuid::Uuid;

use crate::ranking::Score;

#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: Uuid,
    pub community_id: Uuid,
    pub title: String,
    pub kind: PostType,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Post {
    pub fn summary(&self) -> PostSummary {
        PostSummary {
            id: self.id,
            kind: self.kind,
            title: self.title.clone(),
            created_at: self.created_at,
        }
    }
}

/// Materialized vote aggregate of a post. Posts without a row rank as all zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostMetrics {
    pub post_id: Uuid,
    pub upvote_count: u64,
    pub downvote_count: u64,
    pub vote_score: i64,
}

impl PostMetrics {
    pub fn zero(post_id: Uuid) -> Self {
        Self {
            post_id,
            upvote_count: 0,
            downvote_count: 0,
            vote_score: 0,
        }
    }
}

/// A post with the score it was ranked by. Only lives for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedPost {
    pub post: Post,
    pub metrics: PostMetrics,
    pub score: Score,
}
