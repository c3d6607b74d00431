use actix_web::{dev::Service, web, App, HttpServer};
use std::io;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use account_service::{
    CacheRegistry, CacheStore, InvalidationListener, MemoryCacheStore, PgUserDirectory,
    RedisCacheStore, UserCache, UserDirectory, USER_CACHE,
};
use cache_invalidation::InvalidationSubscriber;
use feed_service::config::{CacheBackend, Config};
use feed_service::db::{
    FeedStore, FollowGraph, PgCommentStore, PgFeedStore, PgFollowGraph, PgLikeStore, PgTweetStore,
    TweetStore,
};
use feed_service::handlers::{self, AppState};
use feed_service::{
    CommentService, FanoutDispatcher, FriendshipService, JobRegistry, LikeService, NewsFeedService,
    TweetService,
};
use sqlx::postgres::PgPoolOptions;

#[actix_web::main]
async fn main() -> io::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_file(true)
                .with_target(true),
        )
        .init();

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Configuration loading failed: {:#}", e);
            eprintln!("ERROR: Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting feed-service v{}", env!("CARGO_PKG_VERSION"));
    info!("Environment: {}", config.app.env);

    let pool = match PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .connect(&config.database.url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            error!("Database pool creation failed: {:#}", e);
            eprintln!("ERROR: Failed to create database pool: {}", e);
            std::process::exit(1);
        }
    };

    if config.database.run_migrations {
        if let Err(e) = account_service::run_migrations(&pool).await {
            error!("Account migrations failed: {}", e);
            std::process::exit(1);
        }
        if let Err(e) = feed_service::db::run_migrations(&pool).await {
            error!("Feed migrations failed: {}", e);
            std::process::exit(1);
        }
        info!("Database migrations applied");
    }

    // User cache, kept coherent by account-service invalidations
    let directory: Arc<dyn UserDirectory> = Arc::new(PgUserDirectory::new(pool.clone()));
    let store: Arc<dyn CacheStore> = match config.cache.backend {
        CacheBackend::Memory => Arc::new(MemoryCacheStore::new()),
        CacheBackend::Redis => {
            match RedisCacheStore::new(&config.redis.url, config.cache.namespace.clone()).await {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    error!("Failed to connect user cache to Redis: {}", e);
                    std::process::exit(1);
                }
            }
        }
    };
    let users = Arc::new(UserCache::new(directory, store));
    let caches = CacheRegistry::new();
    caches.register(USER_CACHE, Arc::clone(&users));

    // Without invalidations the cache would serve stale users forever, so a
    // listener that cannot attach stops startup.
    let subscriber = match InvalidationSubscriber::with_channel(
        &config.redis.url,
        config.redis.invalidation_channel.clone(),
    )
    .await
    {
        Ok(subscriber) => subscriber,
        Err(e) => {
            error!("Failed to connect invalidation subscriber to Redis: {}", e);
            std::process::exit(1);
        }
    };
    let listener =
        match InvalidationListener::attach_redis(&subscriber, caches.clone(), USER_CACHE).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to subscribe user cache to invalidations: {}", e);
                std::process::exit(1);
            }
        };

    let tweets: Arc<dyn TweetStore> = Arc::new(PgTweetStore::new(pool.clone()));
    let graph: Arc<dyn FollowGraph> = Arc::new(PgFollowGraph::new(pool.clone()));
    let feeds: Arc<dyn FeedStore> = Arc::new(PgFeedStore::new(pool.clone()));

    let newsfeeds = Arc::new(NewsFeedService::new(
        Arc::clone(&graph),
        feeds,
        Arc::clone(&tweets),
        Arc::clone(&users),
        config.fanout.clone(),
    ));
    let registry = JobRegistry::with_retention(config.fanout.job_retention());
    let (dispatcher, worker) = FanoutDispatcher::start(Arc::clone(&newsfeeds), registry.clone());
    info!("Fan-out dispatcher started");

    let comments = Arc::new(CommentService::new(
        Arc::new(PgCommentStore::new(pool.clone())),
        Arc::clone(&tweets),
        Arc::clone(&users),
    ));
    let likes = Arc::new(LikeService::new(
        Arc::new(PgLikeStore::new(pool.clone())),
        Arc::clone(&tweets),
    ));

    let state = web::Data::new(AppState {
        tweets: Arc::new(TweetService::new(tweets, Arc::clone(&users), dispatcher)),
        newsfeeds,
        friendships: Arc::new(FriendshipService::new(graph, users)),
        comments,
        likes,
        jobs: registry,
    });

    let bind_addr = format!("{}:{}", config.app.host, config.app.port);
    info!("HTTP server listening on {}", bind_addr);

    let result = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/health", web::get().to(|| async { "OK" }))
            .route("/api/v1/health/live", web::get().to(|| async { "OK" }))
            .route("/api/v1/health/ready", web::get().to(|| async { "OK" }))
            .route("/metrics", web::get().to(feed_service::metrics::serve_metrics))
            .wrap_fn(|req, srv| {
                let method = req.method().to_string();
                let path = req
                    .match_pattern()
                    .unwrap_or_else(|| req.path().to_string());
                let start = Instant::now();

                let fut = srv.call(req);
                async move {
                    let res = fut.await;
                    let status = match &res {
                        Ok(res) => res.status().as_u16(),
                        Err(_) => 500,
                    };
                    feed_service::metrics::observe_http_request(
                        &method,
                        &path,
                        status,
                        start.elapsed(),
                    );
                    res
                }
            })
            .configure(handlers::configure)
    })
    .bind(bind_addr)?
    .run()
    .await;

    info!("HTTP server stopped, draining fan-out queue");
    worker.shutdown().await;
    listener.shutdown().await;
    info!("feed-service shut down");

    result
}
