//! Process entry point: wires configuration, tracing, a store backend, and
//! the decision HTTP surface into a running service.

use std::sync::Arc;

use ratelimit_decider::{DecisionEngine, EngineConfig};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = EngineConfig::from_env()?;
    info!(
        app_name = %config.app_name,
        environment = %config.environment,
        "starting rate limit decider"
    );

    let engine = build_engine(&config).await?;
    let router = ratelimit_decider::http::router(engine);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(feature = "redis")]
async fn build_engine(
    config: &EngineConfig,
) -> anyhow::Result<Arc<DecisionEngine<ratelimit_decider::RedisStore>>> {
    let store = ratelimit_decider::RedisStore::from_url(config.store_url.clone()).await?;
    Ok(Arc::new(DecisionEngine::new(store)))
}

#[cfg(not(feature = "redis"))]
async fn build_engine(
    _config: &EngineConfig,
) -> anyhow::Result<Arc<DecisionEngine<ratelimit_decider::MemoryStore>>> {
    Ok(Arc::new(DecisionEngine::new(
        ratelimit_decider::MemoryStore::new(),
    )))
}
