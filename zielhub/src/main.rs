use anyhow::Result;
use axum::{routing::get, serve, Router};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use zielhub::api;
use zielhub_core::auth::{Hs256Verifier, SessionVerifier};
use zielhub_core::events::EventBus;
use zielhub_core::store::FormStore;

#[derive(Parser)]
#[command(name = "zielhub")]
#[command(about = "Target-agreement workflow server for school authorities")]
struct Cli {
    /// Listen address
    #[arg(short, long, default_value = "127.0.0.1:3000")]
    addr: String,

    /// Directory for form and notification records
    #[arg(short, long, default_value = "data")]
    data_dir: PathBuf,

    /// HS256 secret for session tokens
    #[arg(long, default_value = "dev-secret")]
    session_secret: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let store = Arc::new(RwLock::new(FormStore::new(&cli.data_dir)?));
    let events = EventBus::new();
    let verifier: Arc<dyn SessionVerifier> = Arc::new(Hs256Verifier::new(cli.session_secret));

    // observe lifecycle transitions for operators
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            info!(?event, target = ?event.target(), "lifecycle transition");
        }
    });

    let app = Router::new()
        .merge(api::router(store, events, verifier))
        .route("/health", get(|| async { "OK" }))
        .layer(CorsLayer::permissive());

    let listener = TcpListener::bind(&cli.addr).await?;
    info!("Listening on {}", cli.addr);
    serve(listener, app.into_make_service()).await?;
    Ok(())
}
