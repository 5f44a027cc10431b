use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tally_shared::PostPage;
use uuid::Uuid;

use crate::{
    error::{Result, ValidationError},
    pagination::PageRequest,
    ranking::Strategy,
    AppState,
};

// ── Query params ──

#[derive(Debug, Deserialize)]
pub struct ListPostsParams {
    page: Option<i64>,
    limit: Option<i64>,
    sort_by: Option<String>,
}

fn parse_community(raw: &str) -> Result<Uuid, ValidationError> {
    Uuid::parse_str(raw).map_err(|_| ValidationError::CommunityId(raw.to_string()))
}

// ── Handlers ──

/// GET /api/communities/{id}/posts?page=1&limit=25&sort_by=top
pub async fn list_posts(
    State(state): State<AppState>,
    Path(community_id): Path<String>,
    params: std::result::Result<Query<ListPostsParams>, QueryRejection>,
) -> Result<Json<PostPage>> {
    let community_id = parse_community(&community_id)?;
    let Query(params) =
        params.map_err(|rejection| ValidationError::Query(rejection.body_text()))?;
    let request = PageRequest::new(
        params.page.unwrap_or(1),
        params
            .limit
            .unwrap_or(state.feed_config.default_limit as i64),
        state.feed_config.max_limit,
    )?;
    let strategy = Strategy::select(params.sort_by.as_deref().unwrap_or_default());

    let page = state.feed.list_posts(community_id, strategy, request).await?;
    Ok(Json(page))
}

/// DELETE /api/communities/{id}/posts/cache, called when a community's metrics are refreshed
pub async fn invalidate_cache(
    State(state): State<AppState>,
    Path(community_id): Path<String>,
) -> Result<StatusCode> {
    let community_id = parse_community(&community_id)?;
    state.feed.invalidate(community_id);
    Ok(StatusCode::NO_CONTENT)
}
