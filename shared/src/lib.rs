use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Posts ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostType {
    Text,
    Link,
    Image,
    Video,
}

impl PostType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostType::Text => "text",
            PostType::Link => "link",
            PostType::Image => "image",
            PostType::Video => "video",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "text" => Some(PostType::Text),
            "link" => Some(PostType::Link),
            "image" => Some(PostType::Image),
            "video" => Some(PostType::Video),
            _ => None,
        }
    }
}

/// One row of a community feed page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostSummary {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: PostType,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

// ── Pagination ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationMeta {
    /// Requested page, echoed even when it is past the last page.
    pub current: u64,
    pub limit: u64,
    pub records: u64,
    pub pages: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostPage {
    pub pagination: PaginationMeta,
    pub data: Vec<PostSummary>,
}

// ── Errors ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
