//! appimaged - desktop integration daemon for AppImages
//!
//! Watches application directories, integrates every AppImage that shows
//! up (menu entry + thumbnail) and removes the integration when it goes.

mod config;
mod event_bus;
mod services;

use appimage_desktop::integrator::remove_orphans;
use appimage_desktop::{ArtifactLayout, Registry, XdgIntegrator};
use config::Config;
use log::{info, warn};
use std::error::Error;
use std::sync::Arc;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("Starting appimaged...");

    let config_path = Config::path();
    let config = Config::load(&config_path);
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Could not write default config {}: {}", config_path.display(), e);
        }
    }
    info!("Using configuration from {}", config_path.display());

    let layout = ArtifactLayout::default();
    let orphans = remove_orphans(&layout);
    if orphans > 0 {
        info!("Removed {} orphaned menu entries", orphans);
    }

    let registry = Arc::new(Registry::new(
        Arc::new(XdgIntegrator::new(config.thumbnails)),
        layout,
        config.registry_options(),
    ));

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(services::run_all(&config, Arc::clone(&registry)))?;

    info!("Stopped with {} integrated AppImage(s)", registry.len());
    Ok(())
}
