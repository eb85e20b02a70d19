use anyhow::{Context, Result};
use attendo_core::OnnxFaceEncoder;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod error;
mod images;
mod routes;
mod store;
mod upload;

#[tokio::main]
async fn main() -> Result<()> {
    if let Ok(path) = dotenvy::dotenv() {
        eprintln!("loaded environment from {}", path.display());
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("attendod starting");
    let config = config::Config::from_env();

    let store = store::FaceStore::open(&config.db_path)
        .await
        .with_context(|| format!("opening database {}", config.db_path.display()))?;
    tracing::info!(path = %config.db_path.display(), "database opened");

    let encoder = OnnxFaceEncoder::load_dir(&config.model_dir)
        .with_context(|| format!("loading models from {}", config.model_dir.display()))?;
    let engine = engine::spawn_engine(encoder)?;

    let images = match config.cloudinary.clone() {
        Some(cloud) => {
            tracing::info!(cloud = %cloud.cloud_name, folder = %cloud.folder, "image store enabled");
            Some(images::ImageStore::new(cloud))
        }
        None => {
            tracing::warn!("CLOUDINARY_* not set; registered images are encoded locally and not uploaded");
            None
        }
    };

    let state = routes::AppState {
        store,
        engine,
        images,
        upload_dir: config.upload_dir.clone(),
        match_threshold: config.match_threshold,
    };
    let app = routes::router(state, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(
        addr = %config.bind_addr,
        threshold = config.match_threshold,
        "attendod ready"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    tracing::info!("attendod shutting down");
    Ok(())
}
