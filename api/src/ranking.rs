use std::cmp::Ordering;

use crate::model::{Post, PostMetrics, RankedPost};

/// How a community feed is ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// `created_at DESC, id DESC`, sliced by the store.
    New,
    /// Full community loaded and ranked in memory.
    Ranked(Ranking),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ranking {
    /// `vote_score DESC`.
    Top,
    /// Balanced vote volume.
    Controversial,
}

impl Strategy {
    /// Total: every unrecognized key, `"hot"` included, behaves like `"new"`.
    pub fn select(sort_by: &str) -> Self {
        match sort_by {
            "top" => Strategy::Ranked(Ranking::Top),
            "controversial" => Strategy::Ranked(Ranking::Controversial),
            _ => Strategy::New,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::New => "new",
            Strategy::Ranked(Ranking::Top) => "top",
            Strategy::Ranked(Ranking::Controversial) => "controversial",
        }
    }
}

/// Primary sort key of an in-memory ranking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Score {
    Votes(i64),
    Controversy(f64),
}

impl Score {
    /// Total order; a single ranking never mixes variants.
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Score::Votes(a), Score::Votes(b)) => a.cmp(b),
            (Score::Controversy(a), Score::Controversy(b)) => a.total_cmp(b),
            (Score::Votes(_), Score::Controversy(_)) => Ordering::Greater,
            (Score::Controversy(_), Score::Votes(_)) => Ordering::Less,
        }
    }
}

impl Ranking {
    pub fn score(&self, metrics: &PostMetrics) -> Score {
        match self {
            Ranking::Top => Score::Votes(metrics.vote_score),
            Ranking::Controversial => {
                Score::Controversy(controversy(metrics.upvote_count, metrics.downvote_count))
            }
        }
    }

    pub fn rank(&self, rows: Vec<(Post, PostMetrics)>) -> Vec<RankedPost> {
        rows.into_iter()
            .map(|(post, metrics)| RankedPost {
                score: self.score(&metrics),
                post,
                metrics,
            })
            .collect()
    }
}

/// `min/max * (up + down)`: zero with no votes or with one-sided votes.
pub fn controversy(up: u64, down: u64) -> f64 {
    let total = up + down;
    if total == 0 {
        return 0.0;
    }
    let ratio = up.min(down) as f64 / up.max(down) as f64;
    ratio * total as f64
}

/// Newer first, then higher id.
pub fn chronological(a: &Post, b: &Post) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.id.cmp(&a.id))
}

/// Higher score first, then [`chronological`].
pub fn by_score(a: &RankedPost, b: &RankedPost) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| chronological(&a.post, &b.post))
}
