/// Easy Container Cloud - Daemon
///
/// 存储池与存储卷管理守护进程，提供 REST API 服务

mod api;
mod app_state;
mod config;
mod db;
mod services;

use axum::{routing::get, Router};
use std::net::SocketAddr;
use storage::{DriverSettings, StorageManager};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::{
    app_state::AppState,
    db::{establish_connection, init_schema},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载环境变量
    dotenvy::dotenv().ok();

    // 加载配置
    let cfg = config::Config::from_env()?;

    // 初始化日志，RUST_LOG 优先于 LOG_LEVEL
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.log_level)),
        )
        .init();

    info!("🚀 启动 Easy Container Cloud Daemon...");
    info!("✅ 配置加载成功，存储根目录 {}", cfg.storage_root.display());

    tokio::fs::create_dir_all(&cfg.storage_root).await?;

    let sea_db = establish_connection(&cfg.database_url).await?;
    init_schema(&sea_db).await?;
    info!("✅ 数据库连接成功");

    let app_state = AppState::new(sea_db, StorageManager::new(DriverSettings::new(cfg.storage_root.clone())));
    register_pools(&app_state).await?;

    // 设置CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // 构建应用路由
    let app = Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .nest("/1.0", api::api_routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    // 启动服务器
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.server_port));
    info!("🎯 服务器监听在 http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// 为数据库中已有的存储池创建驱动实例
async fn register_pools(state: &AppState) -> anyhow::Result<()> {
    for name in db::storage::pool_names(&state.sea_db).await? {
        let pool = db::storage::pool_get(&state.sea_db, &name).await?;
        match state.storage.init_pool(&pool).await {
            Ok(_) => info!("✅ 存储池 {} ({}) 已加载", pool.name, pool.driver),
            Err(e) => warn!("存储池 {} 加载失败: {}", pool.name, e),
        }
    }
    Ok(())
}

async fn root_handler() -> &'static str {
    "Easy Container Cloud Daemon API 1.0"
}

async fn health_handler() -> &'static str {
    "OK"
}
