use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use form_backend::{
    AppState, build_router,
    cache::RedisStore,
    config::Config,
    routes::form::PgFormRepository,
};
use sqlx::Executor;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::from_env().expect("Failed to load configuration");

    // 设置数据库连接池
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("SET application_name = 'form_backend';")
                    .await?;
                Ok(())
            })
        })
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to Postgres");

    // 设置 Redis 客户端，限流计数和表单缓存都存在这里
    let redis_client =
        redis::Client::open(config.redis_url.clone()).expect("Failed to create Redis client");
    let store = Arc::new(RedisStore::new(Arc::new(redis_client)));

    tracing::info!(
        "Rate limits: default {}/{}s, strict {}/{}s, user {}/{}s, counter mode {:?}",
        config.rate_limit_requests,
        config.rate_limit_window_secs,
        config.strict_rate_limit_requests,
        config.strict_rate_limit_window_secs,
        config.user_rate_limit_requests,
        config.user_rate_limit_window_secs,
        config.counter_mode(),
    );

    // 设置应用状态
    let state = AppState::new(
        config.clone(),
        store,
        Arc::new(PgFormRepository::new(pool)),
    );

    let router = build_router(state);

    // 开发模式允许所有来源跨域
    #[cfg(debug_assertions)]
    let router = {
        tracing::debug!("Adding CORS layer for development mode");
        router.layer(tower_http::cors::CorsLayer::permissive())
    };

    // 启动服务器
    let addr = SocketAddr::new(
        config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        config.server_port,
    );
    tracing::info!("Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Failed to start server");
}
