//! appimage-desktop: keeps desktop artifacts in step with AppImages on disk.
//!
//! - `Registry` - path to integrated container map, rollback on failure
//! - `Integrator` - seam for artifact writers (`XdgIntegrator` by default)
//! - `Frontend` - notify events, per-path debouncing, periodic resync

pub mod debounce;
pub mod desktop_entry;
mod error;
mod filter;
pub mod identity;
pub mod integrator;
pub mod paths;
pub mod registry;
pub mod thumbnail;
pub mod watch;

pub use error::{Error, Result};
pub use filter::{DEFAULT_SUFFIXES, SuffixFilter};
pub use identity::{ArtifactIds, ArtifactKind, ArtifactLayout};
pub use integrator::{IntegrationReport, Integrator, Outcome, XdgIntegrator};
pub use registry::{BulkReport, Change, Registry, RegistryEvent, RegistryOptions};
pub use watch::{ChangeKind, Frontend, FsEvent, WatchOptions};

#[cfg(test)]
pub(crate) mod tests {
    use appimage_reader::{BackendOptions, Container, ContainerOptions};
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    const LISTING: &str = "\
-rw-r--r--  0 0 0  90 Jan  1  1970 app.desktop
-rw-r--r--  0 0 0 100 Jan  1  1970 app.png
lrwxrwxrwx  0 0 0   0 Jan  1  1970 .DirIcon -> app.png
";

    /// Fake `bsdtar` serving one descriptor (named after the image) and a PNG icon.
    const TOOL: &str = r#"#!/bin/sh
case "$1" in
  -tvf) cat '{dir}/listing.txt' ;;
  -xOf)
    case "$3" in
      app.desktop) printf '[Desktop Entry]\nType=Application\nName=%s\nExec=app %%F\nIcon=app\n' "$(basename "$2" .AppImage)" ;;
      app.png) cat '{dir}/app.png' ;;
      *) exit 1 ;;
    esac ;;
  *) exit 2 ;;
esac
"#;

    /// Container options whose listing tool serves the fixture archive in `dir`.
    pub fn fixture_options(dir: &Path) -> ContainerOptions {
        let tool = dir.join("fake-bsdtar");
        if !tool.exists() {
            std::fs::write(dir.join("listing.txt"), LISTING).unwrap();
            std::fs::write(
                dir.join("app.png"),
                crate::thumbnail::tests::png_bytes(256, 256),
            )
            .unwrap();
            std::fs::write(&tool, TOOL.replace("{dir}", &dir.display().to_string())).unwrap();
            let mut perms = std::fs::metadata(&tool).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&tool, perms).unwrap();
        }

        ContainerOptions {
            backend: BackendOptions {
                listing_tool: tool,
                ..BackendOptions::default()
            },
            ..ContainerOptions::default()
        }
    }

    /// Write a type 1 image named `<name>.AppImage` into `dir`.
    pub fn legacy_image(dir: &Path, name: &str) -> PathBuf {
        let mut data = vec![0u8; 150 * 1024];
        data[..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
        data[8..11].copy_from_slice(&[0x41, 0x49, 0x01]);
        let path = dir.join(format!("{}.AppImage", name));
        std::fs::write(&path, data).unwrap();
        path
    }

    /// Open a fixture container, using `dir` for both the image and the tool.
    pub fn legacy_container(dir: &Path, name: &str) -> Container {
        let options = fixture_options(dir);
        Container::open(&legacy_image(dir, name), &options).unwrap()
    }
}
