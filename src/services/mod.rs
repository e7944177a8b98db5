//! Background services of the daemon.
//!
//! - `integration` - filesystem watching, debouncing, registry updates
//! - `menu` - desktop database refresh after topology changes

pub mod integration;
pub mod menu;

use crate::config::Config;
use appimage_desktop::{Registry, paths};
use log::{info, warn};
use std::error::Error;
use std::sync::Arc;

/// Run all services until SIGINT or SIGTERM.
pub async fn run_all(config: &Config, registry: Arc<Registry>) -> Result<(), Box<dyn Error>> {
    info!("Starting services...");

    if config.refresh_menu {
        let refresher = menu::MenuRefresher::new(config.menu_tool.clone(), paths::applications_dir());
        tokio::spawn(refresher.run(registry.subscribe()));
    }

    integration::run(registry, config.watch_options(), shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
        _ = term.recv() => info!("Received SIGTERM"),
    }
}
