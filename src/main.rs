use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use axum::{
    http::{HeaderValue, Method},
    routing::{get, Router},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod error;
mod models;
mod routes;
mod services;
mod state;
mod utils;

use crate::{
    config::Config,
    services::{
        BlogService, BroadcastService, Database, EventQueueService, FanoutService, MarkerService,
        NotificationWorker, ReadCursorService, UserService,
    },
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("LOG_LEVEL").unwrap_or_else(|_| "rainbow_notify=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Rainbow-Notify service...");

    // 加载配置
    dotenv::dotenv().ok();
    let config = Config::from_env()?;

    // 初始化数据库连接
    let db = Arc::new(match Database::new(&config).await {
        Ok(db) => {
            db.verify_connection().await?;
            db.ensure_schema().await?;
            info!("Database connection established successfully");
            db
        }
        Err(e) => {
            error!("Failed to create database connection: {}", e);
            return Err(anyhow::anyhow!("Database initialization failed"));
        }
    });

    // Redis客户端：队列与广播各自从它派生专用连接
    let redis_client = redis::Client::open(config.redis_url.as_str())?;

    // 初始化所有服务
    let user_service = UserService::new(db.clone()).await?;
    let blog_service = BlogService::new(db.clone()).await?;
    let marker_service = MarkerService::new(db.clone(), &config).await?;
    let read_cursor_service = ReadCursorService::new(db.clone(), marker_service.clone()).await?;
    let event_queue = Arc::new(EventQueueService::new(&redis_client, &config).await?);
    let fanout_service = Arc::new(FanoutService::new());
    let broadcast_service =
        Arc::new(BroadcastService::new(&redis_client, fanout_service.clone(), &config).await?);

    // 创建应用状态
    let app_state = Arc::new(AppState {
        config: config.clone(),
        db: (*db).clone(),
        user_service,
        blog_service: blog_service.clone(),
        marker_service: marker_service.clone(),
        read_cursor_service,
        event_queue: event_queue.clone(),
        broadcast_service: broadcast_service.clone(),
        fanout_service,
    });

    // 启动后台任务：广播订阅循环 + 通知工作循环
    let shutdown = Arc::new(AtomicBool::new(false));

    tokio::spawn(broadcast_service.clone().run_subscriber(shutdown.clone()));

    let worker = Arc::new(NotificationWorker::new(
        event_queue,
        blog_service,
        marker_service,
        broadcast_service,
        &config,
        shutdown.clone(),
    ));
    let worker_task = worker.clone();
    tokio::spawn(async move {
        worker_task.run().await;
    });

    // 配置 CORS
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .allow_origin(
            config
                .cors_allowed_origins
                .split(',')
                .map(|origin| origin.parse::<HeaderValue>().unwrap())
                .collect::<Vec<_>>(),
        );

    // 构建应用路由 - 使用/api/blog/前缀避免网关路由冲突
    let app = Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .nest("/api/blog/notifications", routes::notifications::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    // 启动主服务器
    let addr = format!("{}:{}", config.server_host, config.server_port);
    info!("Starting server on http://{}", addr);

    axum::Server::bind(&addr.parse()?)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn health_check() -> &'static str {
    "Rainbow-Notify is running!"
}

/// 等待ctrl-c，然后置位停机标志
/// 工作循环在迭代间隙看到标志后停止出队，在途事件处理完才退出
async fn shutdown_signal(stop: Arc<AtomicBool>) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received, stopping background tasks"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
    stop.store(true, Ordering::Relaxed);
}
