mod config;
mod db;
mod errors;
mod fit;
mod hashing;
mod models;
mod oracle;
mod overrides;
mod ranking;
mod routes;
mod state;
mod store;
#[cfg(test)]
mod test_support;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::create_pool;
use crate::oracle::embedding::EmbeddingClient;
use crate::oracle::{LlmClient, Throttled};
use crate::ranking::orchestrator::Orchestrator;
use crate::routes::build_router;
use crate::state::AppState;
use crate::store::{AttributeStore, DealSource, MemoryStore, PgStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting fitrank v{}", env!("CARGO_PKG_VERSION"));

    // PostgreSQL when configured, in-memory otherwise
    let (store, source): (Arc<dyn AttributeStore>, Arc<dyn DealSource>) =
        match &config.database_url {
            Some(url) => {
                let pg = Arc::new(PgStore::new(create_pool(url).await?));
                (pg.clone(), pg)
            }
            None => {
                info!("DATABASE_URL not set, using in-memory store");
                let memory = Arc::new(MemoryStore::new());
                (memory.clone(), memory)
            }
        };

    // Text oracle, bounded and timed out per call
    let llm = LlmClient::new(config.anthropic_api_key.clone(), config.oracle_model.clone())?;
    info!(
        "Oracle initialized (model: {}, concurrency: {}, timeout: {}s)",
        llm.model(),
        config.oracle_concurrency,
        config.stage_timeout_secs
    );
    let oracle = Throttled::new(
        llm,
        config.oracle_concurrency,
        Duration::from_secs(config.stage_timeout_secs),
    );

    let embedder = EmbeddingClient::new(
        config.embedding_url.clone(),
        config.embedding_api_key.clone(),
        config.embedding_model.clone(),
    )?;
    info!("Embedding client initialized (model: {})", config.embedding_model);

    let orchestrator = Orchestrator::new(store.clone(), source, Arc::new(oracle), Arc::new(embedder))
        .with_default_narrative(config.default_candidate_narrative.clone())
        .with_batch_concurrency(config.batch_concurrency);

    // Build app state
    let state = AppState {
        store,
        orchestrator: Arc::new(orchestrator),
        config: config.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins once the CRM front end has a fixed host

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
