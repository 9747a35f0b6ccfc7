use log::{error, info};
use std::net::{IpAddr, TcpListener};
use warp::Filter;

use photovault::config::Config;
use photovault::handlers_album::build_album_routes;
use photovault::handlers_config::build_config_routes;
use photovault::handlers_duplicates::build_duplicate_routes;
use photovault::handlers_health::build_health_routes;
use photovault::handlers_photo::build_photo_routes;
use photovault::handlers_scan::build_scan_routes;
use photovault::handlers_sync::build_sync_routes;
use photovault::scheduler::VaultScheduler;
use photovault::warp_helpers::{cors, handle_rejection};
use photovault::PhotoVault;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;
    let port = config.port;
    let host: IpAddr = config.host.parse()?;

    info!("Starting Photovault server on {}:{}", host, port);
    info!("Data path: {}", config.data_path);
    info!("Database: {}", config.db_path);

    // Check if port is available BEFORE initializing services
    if !is_port_available(host, port) {
        error!(
            "Port {} is already in use. Stop the other Photovault instance or set PHOTOVAULT_PORT.",
            port
        );
        anyhow::bail!("Port {} is already in use", port);
    }

    let vault = PhotoVault::open(config)?;
    start_background_tasks(vault.clone());

    let routes = build_health_routes(vault.clone())
        .or(build_config_routes(vault.clone()))
        .or(build_scan_routes(vault.clone()))
        .or(build_photo_routes(vault.clone()))
        .or(build_album_routes(vault.clone()))
        .or(build_duplicate_routes(vault.clone()))
        .or(build_sync_routes(vault))
        .with(cors())
        .with(warp::log("photovault"))
        .recover(handle_rejection);

    info!(
        "Server started successfully, listening on http://{}:{}",
        host, port
    );

    warp::serve(routes).run((host, port)).await;

    Ok(())
}

fn is_port_available(host: IpAddr, port: u16) -> bool {
    TcpListener::bind((host, port)).is_ok()
}

fn start_background_tasks(vault: PhotoVault) {
    let scheduler = VaultScheduler::new(vault, tokio::runtime::Handle::current());
    let _nightly = scheduler.start();

    // Startup recovery must finish before the worker and the probe start
    // reacting to drive changes on their own.
    tokio::spawn(async move {
        scheduler.run_startup().await;
        scheduler.spawn_drive_probe();
        scheduler.spawn_sync_worker();
    });
}
