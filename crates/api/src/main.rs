use std::sync::Arc;
use tokio::net::TcpListener;

use huddle_api::{routes::create_router, AppState, Config, PgMessageStore};
use huddle_realtime::{
    EphemeralStore, GatewayLinks, Hub, InMemoryMessageStore, LinkTable, LocalLinks, MemoryStore,
    MessageStore, RedisStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present; real environment variables take precedence
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    // Initialize tracing/logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("huddle_api=info,huddle_realtime=info"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!("Huddle server v{} starting", env!("CARGO_PKG_VERSION"));

    // Ephemeral state
    let store: Arc<dyn EphemeralStore> = match &config.redis_url {
        Some(url) => Arc::new(RedisStore::connect(url).await?),
        None => {
            tracing::warn!("REDIS_URL not set - realtime state is local to this process");
            let memory = Arc::new(MemoryStore::new());
            spawn_purge_task(memory.clone(), config.store_purge_interval);
            memory
        }
    };

    // Message persistence
    let (pool, messages) = match &config.database_url {
        Some(url) => {
            let pool = huddle_shared::create_pool(url, config.database_max_connections).await?;
            huddle_shared::run_migrations(&pool).await?;
            tracing::info!("Connected to database");
            (
                Some(pool.clone()),
                Arc::new(PgMessageStore::new(pool)) as Arc<dyn MessageStore>,
            )
        }
        None => {
            tracing::warn!("DATABASE_URL not set - messages are kept in memory");
            (None, Arc::new(InMemoryMessageStore::new()) as Arc<dyn MessageStore>)
        }
    };

    if config.jwt_secret.is_none() {
        tracing::warn!("JWT_SECRET not set - connections are not authenticated");
    }

    // Frame delivery: sockets held by this process, or by a managed gateway
    let local_links = Arc::new(LocalLinks::new());
    let links: Arc<dyn LinkTable> = match &config.gateway_endpoint {
        Some(endpoint) => {
            tracing::info!(endpoint = %endpoint, "Delivering frames through managed gateway");
            Arc::new(GatewayLinks::new(
                endpoint.clone(),
                config.gateway_api_token.clone(),
                config.gateway_timeout,
            )?)
        }
        None => local_links.clone(),
    };

    let hub = Hub::new(store, links, messages, config.realtime());
    let bind_address = config.bind_address.clone();
    let app = create_router(AppState::new(config, hub, local_links, pool));

    // Bind and serve
    let listener = TcpListener::bind(&bind_address).await?;
    tracing::info!("Listening on {}", bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodically drop expired entries from the in-memory store
fn spawn_purge_task(store: Arc<MemoryStore>, every: std::time::Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let purged = store.purge_expired().await;
            if purged > 0 {
                tracing::debug!(purged, "Purged expired store entries");
            }
        }
    });
}
