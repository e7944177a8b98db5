//! The artifact collaborator seam and its default XDG implementation.

use crate::desktop_entry::{self, wants_integration};
use crate::error::{Error, Result};
use crate::identity::{ArtifactIds, ArtifactKind, ArtifactLayout, DESKTOP_ENTRY_PREFIX};
use crate::thumbnail;
use appimage_reader::{Container, Descriptor, DescriptorOptions};
use log::{debug, info, warn};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Result of producing one artifact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Created,
    /// Up to date, disabled, or nothing to produce.
    Skipped,
    Failed(String),
}

impl Outcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}

/// Per-kind outcomes of one `integrate` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntegrationReport {
    pub desktop_entry: Outcome,
    pub thumbnail: Outcome,
}

impl IntegrationReport {
    pub fn skipped() -> Self {
        Self {
            desktop_entry: Outcome::Skipped,
            thumbnail: Outcome::Skipped,
        }
    }

    pub fn outcome(&self, kind: ArtifactKind) -> &Outcome {
        match kind {
            ArtifactKind::DesktopEntry => &self.desktop_entry,
            ArtifactKind::Thumbnail => &self.thumbnail,
        }
    }

    pub fn is_success(&self) -> bool {
        !self.desktop_entry.is_failed() && !self.thumbnail.is_failed()
    }

    /// The first failed kind as an error, if any.
    pub fn failure(&self, ids: &ArtifactIds) -> Option<Error> {
        [ArtifactKind::DesktopEntry, ArtifactKind::Thumbnail]
            .into_iter()
            .find_map(|kind| match self.outcome(kind) {
                Outcome::Failed(reason) => Some(Error::Artifact {
                    kind,
                    path: ids.path(kind).to_path_buf(),
                    reason: reason.clone(),
                }),
                _ => None,
            })
    }
}

/// Creates and removes the desktop artifacts of a container.
///
/// `integrate` must be idempotent: artifacts newer than the container are
/// reported as `Skipped`.
pub trait Integrator: Send + Sync {
    fn integrate(&self, container: &Container, ids: &ArtifactIds) -> IntegrationReport;

    /// Remove every artifact named by `ids`. Missing artifacts are not an error.
    fn unintegrate(&self, ids: &ArtifactIds) -> Result<()>;
}

/// Writes a menu entry to `applications/` and a PNG thumbnail to
/// `thumbnails/normal/`.
#[derive(Clone, Debug)]
pub struct XdgIntegrator {
    thumbnails: bool,
}

impl Default for XdgIntegrator {
    fn default() -> Self {
        Self { thumbnails: true }
    }
}

impl XdgIntegrator {
    pub fn new(thumbnails: bool) -> Self {
        Self { thumbnails }
    }

    fn thumbnail(&self, container: &Container, target: &Path) -> Outcome {
        if !self.thumbnails || is_fresh(target, container) {
            return Outcome::Skipped;
        }

        let icon = match container.icon() {
            Ok(icon) => icon,
            Err(e) => {
                debug!("{}: no icon ({})", container.path().display(), e);
                return Outcome::Skipped;
            }
        };
        let img = match thumbnail::make_thumbnail(&icon) {
            Ok(img) => img,
            Err(e) => {
                debug!("{}: icon not decodable ({})", container.path().display(), e);
                return Outcome::Skipped;
            }
        };

        match thumbnail::write_png(&img, target) {
            Ok(()) => Outcome::Created,
            Err(e) => Outcome::Failed(e.to_string()),
        }
    }

    fn desktop_entry(&self, container: &Container, ids: &ArtifactIds) -> Outcome {
        if is_fresh(&ids.desktop_entry, container) {
            return Outcome::Skipped;
        }

        let icon = ids.thumbnail.exists().then_some(ids.thumbnail.as_path());
        let content = desktop_entry::render(container, ids, icon);
        match desktop_entry::write_atomic(&ids.desktop_entry, content.as_bytes()) {
            Ok(()) => Outcome::Created,
            Err(e) => Outcome::Failed(e.to_string()),
        }
    }
}

impl Integrator for XdgIntegrator {
    fn integrate(&self, container: &Container, ids: &ArtifactIds) -> IntegrationReport {
        if !wants_integration(container.descriptor()) {
            debug!("{}: integration disabled by descriptor", container.path().display());
            return IntegrationReport::skipped();
        }

        // Thumbnail first so the menu entry can point at it.
        let thumbnail = self.thumbnail(container, &ids.thumbnail);
        let desktop_entry = self.desktop_entry(container, ids);
        IntegrationReport {
            desktop_entry,
            thumbnail,
        }
    }

    fn unintegrate(&self, ids: &ArtifactIds) -> Result<()> {
        let mut first_error = None;
        for kind in [ArtifactKind::DesktopEntry, ArtifactKind::Thumbnail] {
            let path = ids.path(kind);
            match fs::remove_file(path) {
                Ok(()) => debug!("Removed {} {}", kind, path.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("Failed to remove {} {}: {}", kind, path.display(), e);
                    first_error.get_or_insert(Error::Artifact {
                        kind,
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Remove artifacts of ours whose container disappeared while nobody was
/// watching. Returns how many menu entries were removed.
pub fn remove_orphans(layout: &ArtifactLayout) -> usize {
    let walker = walkdir::WalkDir::new(&layout.applications_dir)
        .min_depth(1)
        .max_depth(1);
    let mut removed = 0;

    for entry in walker.into_iter().filter_map(|e| e.ok()) {
        let name = entry.file_name().to_string_lossy();
        let Some(digest) = name
            .strip_prefix(DESKTOP_ENTRY_PREFIX)
            .and_then(|rest| rest.strip_suffix(".desktop"))
        else {
            continue;
        };

        let Ok(content) = fs::read_to_string(entry.path()) else {
            continue;
        };
        let target = Descriptor::parse(&content, DescriptorOptions::default())
            .get("TryExec")
            .map(PathBuf::from);
        if target.is_some_and(|t| t.exists()) {
            continue;
        }

        info!("Removing orphaned {}", entry.path().display());
        let thumbnail = layout.thumbnails_dir.join(format!("{}.png", digest));
        for path in [entry.path(), thumbnail.as_path()] {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != ErrorKind::NotFound {
                    warn!("Failed to remove {}: {}", path.display(), e);
                }
            }
        }
        removed += 1;
    }
    removed
}

/// An artifact at least as new as its container needs no rewrite.
fn is_fresh(artifact: &Path, container: &Container) -> bool {
    let Ok(written) = fs::metadata(artifact).and_then(|m| m.modified()) else {
        return false;
    };
    match container.modified() {
        Some(source) => written >= source,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::legacy_container;

    fn layout(root: &Path) -> ArtifactLayout {
        ArtifactLayout {
            applications_dir: root.join("applications"),
            thumbnails_dir: root.join("thumbnails/normal"),
        }
    }

    #[test]
    fn test_integrate_writes_and_skips_when_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let container = legacy_container(dir.path(), "Demo");
        let ids = layout(dir.path()).ids_for(container.path());
        let integrator = XdgIntegrator::default();

        let report = integrator.integrate(&container, &ids);
        assert_eq!(report.desktop_entry, Outcome::Created);
        assert_eq!(report.thumbnail, Outcome::Created);

        let entry = fs::read_to_string(&ids.desktop_entry).unwrap();
        assert!(entry.contains("Name=Demo"));
        assert!(entry.contains(&format!("Icon={}", ids.thumbnail.display())));

        let again = integrator.integrate(&container, &ids);
        assert_eq!(again, IntegrationReport::skipped());
    }

    #[test]
    fn test_thumbnails_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let container = legacy_container(dir.path(), "Demo");
        let ids = layout(dir.path()).ids_for(container.path());

        let report = XdgIntegrator::new(false).integrate(&container, &ids);
        assert_eq!(report.thumbnail, Outcome::Skipped);
        assert_eq!(report.desktop_entry, Outcome::Created);
        assert!(!ids.thumbnail.exists());
    }

    #[test]
    fn test_unwritable_target_fails() {
        let dir = tempfile::tempdir().unwrap();
        let container = legacy_container(dir.path(), "Demo");
        // A regular file where the applications directory should be.
        fs::write(dir.path().join("applications"), b"").unwrap();
        let ids = layout(dir.path()).ids_for(container.path());

        let report = XdgIntegrator::new(false).integrate(&container, &ids);
        assert!(!report.is_success());
        assert!(matches!(
            report.failure(&ids),
            Some(Error::Artifact {
                kind: ArtifactKind::DesktopEntry,
                ..
            })
        ));
    }

    #[test]
    fn test_unintegrate_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let container = legacy_container(dir.path(), "Demo");
        let ids = layout(dir.path()).ids_for(container.path());
        let integrator = XdgIntegrator::default();
        integrator.integrate(&container, &ids);

        integrator.unintegrate(&ids).unwrap();
        assert!(!ids.desktop_entry.exists());
        assert!(!ids.thumbnail.exists());
        integrator.unintegrate(&ids).unwrap();
    }

    #[test]
    fn test_remove_orphans() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        let kept = legacy_container(dir.path(), "Kept");
        let gone = legacy_container(dir.path(), "Gone");
        let integrator = XdgIntegrator::default();
        let kept_ids = layout.ids_for(kept.path());
        let gone_ids = layout.ids_for(gone.path());
        integrator.integrate(&kept, &kept_ids);
        integrator.integrate(&gone, &gone_ids);
        fs::write(layout.applications_dir.join("firefox.desktop"), "[Desktop Entry]\n").unwrap();

        fs::remove_file(gone.path()).unwrap();
        assert_eq!(remove_orphans(&layout), 1);

        assert!(kept_ids.desktop_entry.exists());
        assert!(!gone_ids.desktop_entry.exists());
        assert!(!gone_ids.thumbnail.exists());
        assert!(layout.applications_dir.join("firefox.desktop").exists());
    }
}
