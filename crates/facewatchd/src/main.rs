use anyhow::Result;
use facewatch_core::{Controller, SessionFactory};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod render;

use dbus_interface::{FacewatchService, StatusInfo};

const BUS_NAME: &str = "org.freedesktop.Facewatch1";
const OBJECT_PATH: &str = "/org/freedesktop/Facewatch1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "facewatchd starting");

    let config = config::Config::from_env();
    let device = facewatch_hw::camera::device_path(config.camera_index);
    tracing::info!(
        device = %device,
        gallery = %config.gallery_path.display(),
        models = %config.model_dir.display(),
        threshold = config.match_threshold,
        "configuration loaded"
    );

    let status = StatusInfo {
        gallery_path: config.gallery_path.display().to_string(),
        device,
        working_width: config.working_width,
        match_threshold: config.match_threshold,
    };
    let factory: Box<dyn SessionFactory> = Box::new(engine::CameraSessionFactory::new(config));
    let service = FacewatchService::new(Controller::new(factory), status);

    let connection = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "facewatchd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("facewatchd shutting down");

    let iface = connection
        .object_server()
        .interface::<_, FacewatchService>(OBJECT_PATH)
        .await?;
    iface.get().await.shutdown().await;

    Ok(())
}
