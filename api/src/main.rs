mod cache;
mod config;
mod db;
mod error;
mod feed;
mod model;
mod pagination;
mod posts;
mod ranking;
mod store;

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    routing::{delete, get},
    Router,
};
use tokio::time::MissedTickBehavior;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{
    config::{Config, FeedConfig, LogConfig},
    feed::FeedService,
    store::SqliteStore,
};

pub type DbPool = r2d2::Pool<r2d2_sqlite::SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub feed: Arc<FeedService<SqliteStore>>,
    pub feed_config: FeedConfig,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(|| async { "ok" }))
        // Feed
        .route("/api/communities/{id}/posts", get(posts::list_posts))
        .route(
            "/api/communities/{id}/posts/cache",
            delete(posts::invalidate_cache),
        )
        .with_state(state)
}

fn init_tracing(log: &LogConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let registry = tracing_subscriber::registry().with(filter);

    if log.json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true),
            )
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Periodically evicts expired pages so idle keys do not pile up.
fn spawn_cache_purge(feed: Arc<FeedService<SqliteStore>>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Some(cache) = feed.cache() {
                let evicted = cache.purge_expired();
                if evicted > 0 {
                    debug!(evicted, remaining = cache.len(), "purged expired feed pages");
                }
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    init_tracing(&config.log);

    let pool = db::open_pool(&config.database).context("failed to create DB pool")?;
    db::run_migrations(&pool).context("failed to run migrations")?;

    let feed = Arc::new(FeedService::new(
        SqliteStore::new(pool),
        config.feed.cache_ttl,
    ));
    if feed.cache().is_some() {
        spawn_cache_purge(feed.clone(), config.feed.cache_ttl);
    }

    let cors = CorsLayer::new()
        .allow_origin(
            config
                .server
                .cors_origin
                .parse::<axum::http::HeaderValue>()
                .context("invalid CORS_ORIGIN")?,
        )
        .allow_methods(AllowMethods::any())
        .allow_headers(AllowHeaders::any());

    let state = AppState {
        feed,
        feed_config: config.feed,
    };
    let router = app(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_addr))?;
    info!(
        addr = %config.server.bind_addr,
        default_limit = config.feed.default_limit,
        max_limit = config.feed.max_limit,
        cache_ttl_secs = config.feed.cache_ttl.as_secs(),
        "feed API listening"
    );
    axum::serve(listener, router).await?;

    Ok(())
}
