//! Daemon configuration, stored as JSON in `$XDG_CONFIG_HOME/appimaged/config.json`.
//!
//! Every field has a default, so a missing file, a partial file, or an
//! unreadable one all yield a usable configuration.

use appimage_desktop::paths;
use appimage_desktop::{RegistryOptions, SuffixFilter, WatchOptions};
use appimage_reader::detect::DEFAULT_MIN_SIZE;
use appimage_reader::{BackendOptions, ContainerOptions, DescriptorOptions};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directories watched for AppImages (non-recursive).
    pub watch_dirs: Vec<PathBuf>,
    /// Also watch `Applications` folders on mounted removable media.
    pub scan_media: bool,
    pub suffixes: Vec<String>,
    /// Smallest file size considered a container, in bytes.
    pub min_size: u64,
    pub settle_ms: u64,
    pub resync_secs: u64,
    pub idle_unmount_secs: u64,
    /// Strip ` ;` / ` #` inline comments from descriptor values.
    pub strict_inline_comments: bool,
    pub thumbnails: bool,
    /// Run `menu_tool` on the applications directory after changes.
    pub refresh_menu: bool,
    pub listing_tool: PathBuf,
    pub mount_tool: PathBuf,
    pub unmount_tool: PathBuf,
    pub menu_tool: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let backend = BackendOptions::default();
        Self {
            watch_dirs: paths::default_watch_dirs(),
            scan_media: true,
            suffixes: appimage_desktop::DEFAULT_SUFFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            min_size: DEFAULT_MIN_SIZE,
            settle_ms: 100,
            resync_secs: 30,
            idle_unmount_secs: backend.idle_unmount.as_secs(),
            strict_inline_comments: false,
            thumbnails: true,
            refresh_menu: true,
            listing_tool: backend.listing_tool,
            mount_tool: backend.mount_tool,
            unmount_tool: backend.unmount_tool,
            menu_tool: PathBuf::from("update-desktop-database"),
        }
    }
}

impl Config {
    /// Default location of the config file.
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(std::env::var("HOME").unwrap_or_default()).join(".config"))
            .join("appimaged")
            .join("config.json")
    }

    /// Load from config file, or return default if not found
    pub fn load(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            return Self::default();
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!("Ignoring invalid config {}: {}", path.display(), e);
            Self::default()
        })
    }

    /// Save to config file
    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
    }

    pub fn container_options(&self) -> ContainerOptions {
        ContainerOptions {
            min_size: self.min_size,
            backend: BackendOptions {
                listing_tool: self.listing_tool.clone(),
                mount_tool: self.mount_tool.clone(),
                unmount_tool: self.unmount_tool.clone(),
                idle_unmount: Duration::from_secs(self.idle_unmount_secs),
                ..BackendOptions::default()
            },
            descriptor: DescriptorOptions {
                strict_inline_comments: self.strict_inline_comments,
            },
        }
    }

    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            container: self.container_options(),
            suffixes: SuffixFilter::new(self.suffixes.iter().cloned()),
        }
    }

    pub fn watch_options(&self) -> WatchOptions {
        WatchOptions {
            dirs: self.watch_dirs.clone(),
            media_roots: if self.scan_media {
                paths::media_roots()
            } else {
                Vec::new()
            },
            settle: Duration::from_millis(self.settle_ms),
            resync: Duration::from_secs(self.resync_secs.max(1)),
        }
    }
}
