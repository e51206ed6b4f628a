use kickstart_recon::api::{self, AppState};
use kickstart_recon::{create_pool, AnthropicClient, AppConfig, MemoryTripStore, PgTripStore, Reconciler, TripStore};
use std::sync::Arc;
use tower::ServiceBuilder;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志 - 本地时间格式，级别由 RUST_LOG 控制
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .with_level(true)
        .init();

    // 加载配置
    let config = AppConfig::load()?;
    info!("Starting server with config: {:?}", config);

    // 存储：memory 仅用于本地试跑
    let store: Arc<dyn TripStore> = if config.database.is_memory() {
        warn!("Using in-memory store, data is lost on restart");
        Arc::new(MemoryTripStore::new())
    } else {
        let pool = create_pool(&config.database.url, config.database.max_connections).await?;
        info!("Database pool created");
        Arc::new(PgTripStore::new(pool))
    };

    // 同一个客户端同时承担吊牌识别、小票解析、配对
    if config.oracle.api_key.is_empty() {
        warn!("ANTHROPIC_API_KEY is not set, oracle calls will fail");
    }
    let oracle = Arc::new(AnthropicClient::new(config.oracle.clone())?);
    let reconciler = Reconciler::new(
        store,
        oracle.clone(),
        oracle.clone(),
        oracle,
        config.pipeline.clone(),
    );

    let app = api::router(AppState::new(reconciler)).layer(ServiceBuilder::new());

    // 启动服务器
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server listening on {}", addr);
    info!("API Endpoints:");
    info!("  POST /api/trips, /api/trips/:id/{{tags,receipt,submit,bulk-cost}}");
    info!("  PATCH /api/tags/:id");
    info!("  POST /api/enrich, /api/parse-receipt, /api/match, /api/finalize");
    info!("  GET  /api/profitability");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
