//! Integration service: wires the notify watcher to the registry front end.

use appimage_desktop::watch::{self, EVENT_CAPACITY, Frontend, WatchOptions};
use appimage_desktop::{Registry, Result};
use log::info;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Watch `options.dirs` and keep `registry` current until `shutdown` resolves.
///
/// The first resync runs immediately and integrates everything already on
/// disk.
pub async fn run<F>(registry: Arc<Registry>, options: WatchOptions, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    info!(
        "Starting integration service ({} directories, settle {:?})",
        options.dirs.len(),
        options.settle
    );

    let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
    let watcher = watch::notify_watcher(tx)?;
    let frontend = Frontend::new(registry, options, Box::new(watcher));
    frontend.run(rx, shutdown).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use appimage_desktop::{ArtifactLayout, RegistryOptions, XdgIntegrator};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_initial_scan_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let watched = dir.path().join("Applications");
        std::fs::create_dir(&watched).unwrap();
        std::fs::write(watched.join("Broken.AppImage"), b"not a container").unwrap();

        let registry = Arc::new(Registry::new(
            Arc::new(XdgIntegrator::new(false)),
            ArtifactLayout {
                applications_dir: dir.path().join("applications"),
                thumbnails_dir: dir.path().join("thumbnails"),
            },
            RegistryOptions::default(),
        ));
        let options = WatchOptions {
            dirs: vec![watched],
            media_roots: Vec::new(),
            settle: Duration::from_millis(20),
            resync: Duration::from_secs(3600),
        };

        tokio::time::timeout(
            Duration::from_secs(5),
            run(registry.clone(), options, tokio::time::sleep(Duration::from_millis(200))),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(registry.is_empty());
    }
}
