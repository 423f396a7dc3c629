use anyhow::Result;
use clockface_core::arcface::ArcFaceModel;
use clockface_core::{AttendanceService, EmbeddingProvider};
use clockface_store::SqliteStore;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

use config::{BusKind, Config};
use dbus_interface::{AttendanceBus, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::load()?;
    tracing::info!(
        db = %config.db_path.display(),
        threshold = config.match_threshold,
        min_gap_secs = config.min_gap_secs,
        delete_policy = ?config.delete_policy,
        "clockfaced starting"
    );

    let store = Arc::new(SqliteStore::open(&config.db_path)?);

    // Without a model the daemon still serves vector and admin calls.
    let model_path = config.arcface_model_path();
    let (provider, model_loaded): (Arc<dyn EmbeddingProvider>, bool) =
        match ArcFaceModel::load(&model_path) {
            Ok(model) => (Arc::new(engine::spawn_engine(model)?), true),
            Err(e) => {
                tracing::warn!(path = %model_path, error = %e, "recognition model unavailable; image calls will fail");
                (Arc::new(engine::NoModel), false)
            }
        };

    let service = Arc::new(AttendanceService::new(store, provider, config.policy()));
    let iface = AttendanceBus::new(service, config.history_limit, model_loaded);

    let builder = match config.bus {
        BusKind::System => zbus::connection::Builder::system()?,
        BusKind::Session => zbus::connection::Builder::session()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, iface)?
        .build()
        .await?;

    tracing::info!(bus = ?config.bus, name = BUS_NAME, "clockfaced ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("clockfaced shutting down");

    Ok(())
}
