//! Menu refresh service.
//!
//! Rebuilds the desktop database after the registry topology changes so
//! launchers pick up new and removed entries. Bursts are coalesced.

use crate::event_bus;
use appimage_desktop::RegistryEvent;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tokio::sync::broadcast::Receiver;

/// Quiet period after a change before refreshing.
pub const COALESCE: Duration = Duration::from_millis(500);

pub struct MenuRefresher {
    tool: PathBuf,
    applications_dir: PathBuf,
    quiet: Duration,
}

impl MenuRefresher {
    pub fn new(tool: PathBuf, applications_dir: PathBuf) -> Self {
        Self {
            tool,
            applications_dir,
            quiet: COALESCE,
        }
    }

    /// Refresh once per burst of events until the registry goes away.
    pub async fn run(self, mut events: Receiver<RegistryEvent>) {
        info!("Starting menu refresher ({})", self.tool.display());

        while event_bus::next(&mut events).await.is_some() {
            tokio::time::sleep(self.quiet).await;
            let skipped = event_bus::drain_pending(&mut events);
            debug!("Refreshing menu after {} change(s)", skipped + 1);

            let tool = self.tool.clone();
            let dir = self.applications_dir.clone();
            match tokio::task::spawn_blocking(move || refresh(&tool, &dir)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Menu refresh failed: {}", e),
                Err(e) => warn!("Menu refresh task failed: {}", e),
            }
        }
    }
}

fn refresh(tool: &Path, applications_dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(applications_dir)?;
    let status = Command::new(tool)
        .arg(applications_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .status()?;
    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::other(format!(
            "{} exited with {}",
            tool.display(),
            status
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tokio::sync::broadcast;

    #[tokio::test]
    async fn test_burst_refreshes_once() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("runs.log");
        let tool = dir.path().join("fake-update-desktop-database");
        std::fs::write(&tool, format!("#!/bin/sh\necho \"$1\" >> '{}'\n", log.display())).unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let apps = dir.path().join("applications");
        let refresher = MenuRefresher {
            tool,
            applications_dir: apps.clone(),
            quiet: Duration::from_millis(50),
        };
        let (tx, rx) = broadcast::channel(16);
        let task = tokio::spawn(refresher.run(rx));

        for _ in 0..5 {
            tx.send(RegistryEvent::TopologyChanged).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        drop(tx);
        task.await.unwrap();

        let runs = std::fs::read_to_string(&log).unwrap();
        assert_eq!(runs.lines().collect::<Vec<_>>(), vec![apps.display().to_string()]);
    }

    #[test]
    fn test_missing_tool_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(refresh(Path::new("/nonexistent/update-desktop-database"), dir.path()).is_err());
    }
}
