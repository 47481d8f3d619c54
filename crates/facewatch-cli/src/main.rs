use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facewatch_hw::Camera;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "facewatch", about = "Facewatch live face recognition CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start live recognition in the daemon
    Start,
    /// Stop live recognition
    Stop,
    /// Show daemon status
    Status,
    /// List V4L2 capture devices
    Devices,
    /// Run camera diagnostics
    Test {
        /// Camera index (/dev/videoN)
        #[arg(short, long, default_value_t = 0)]
        index: u32,
    },
}

#[zbus::proxy(
    interface = "org.freedesktop.Facewatch1",
    default_service = "org.freedesktop.Facewatch1",
    default_path = "/org/freedesktop/Facewatch1"
)]
trait Facewatch {
    fn start(&self) -> zbus::Result<bool>;
    fn stop(&self) -> zbus::Result<bool>;
    fn status(&self) -> zbus::Result<String>;
}

async fn proxy() -> Result<FacewatchProxy<'static>> {
    let connection = zbus::Connection::session()
        .await
        .context("failed to connect to session bus")?;
    FacewatchProxy::new(&connection)
        .await
        .context("facewatchd not reachable")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            if proxy().await?.start().await? {
                println!("Recognition started");
            } else {
                println!("Recognition already running");
            }
        }
        Commands::Stop => {
            if proxy().await?.stop().await? {
                println!("Recognition stopping");
            } else {
                println!("Recognition not running");
            }
        }
        Commands::Status => {
            let raw = proxy().await?.status().await?;
            let status: serde_json::Value =
                serde_json::from_str(&raw).context("malformed status reply")?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
        Commands::Test { index } => {
            println!("Running camera diagnostics...");
            let mut camera = Camera::open(index, 10)?;
            camera.set_read_timeout(Duration::from_secs(2));
            let frame = camera.capture_frame()?;
            println!("device:     {}", camera.device_path);
            println!("format:     {:?} ({:?})", camera.pixel_format(), camera.fourcc);
            println!("resolution: {}x{}", frame.width, frame.height);
            println!("brightness: {:.1}", frame.avg_brightness());
        }
    }

    Ok(())
}
