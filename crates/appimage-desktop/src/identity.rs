//! Stable names for the artifacts of one container.
//!
//! Both names derive from the MD5 of the file's `file://` URI, the same key
//! freedesktop thumbnailers use, so they survive restarts and collide only
//! when the path does.

use md5::{Digest, Md5};
use std::fmt;
use std::path::{Path, PathBuf};

/// Prefix shared by every desktop entry we own.
pub const DESKTOP_ENTRY_PREFIX: &str = "appimagekit_";

/// The kinds of artifact an integrator produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    DesktopEntry,
    Thumbnail,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::DesktopEntry => write!(f, "desktop entry"),
            ArtifactKind::Thumbnail => write!(f, "thumbnail"),
        }
    }
}

/// Where artifacts are written.
#[derive(Clone, Debug)]
pub struct ArtifactLayout {
    pub applications_dir: PathBuf,
    pub thumbnails_dir: PathBuf,
}

impl Default for ArtifactLayout {
    fn default() -> Self {
        Self {
            applications_dir: crate::paths::applications_dir(),
            thumbnails_dir: crate::paths::thumbnails_dir(),
        }
    }
}

impl ArtifactLayout {
    /// Identities for the container at `path` (absolute).
    pub fn ids_for(&self, path: &Path) -> ArtifactIds {
        let uri = file_uri(path);
        let digest = uri_digest(&uri);
        ArtifactIds {
            desktop_entry: self
                .applications_dir
                .join(format!("{}{}.desktop", DESKTOP_ENTRY_PREFIX, digest)),
            thumbnail: self.thumbnails_dir.join(format!("{}.png", digest)),
            uri,
            digest,
        }
    }
}

/// Artifact identities of one registry entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactIds {
    pub uri: String,
    /// Lowercase hex MD5 of `uri`.
    pub digest: String,
    pub desktop_entry: PathBuf,
    pub thumbnail: PathBuf,
}

impl ArtifactIds {
    pub fn path(&self, kind: ArtifactKind) -> &Path {
        match kind {
            ArtifactKind::DesktopEntry => &self.desktop_entry,
            ArtifactKind::Thumbnail => &self.thumbnail,
        }
    }
}

/// Canonical `file://` URI: every byte outside the RFC 3986 path character
/// set is percent-encoded (uppercase hex).
pub fn file_uri(path: &Path) -> String {
    use std::os::unix::ffi::OsStrExt;

    let mut uri = String::from("file://");
    for &byte in path.as_os_str().as_bytes() {
        if is_path_char(byte) {
            uri.push(byte as char);
        } else {
            uri.push_str(&format!("%{:02X}", byte));
        }
    }
    uri
}

fn is_path_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || b"-._~!$&'()*+,;=:@/".contains(&byte)
}

pub fn uri_digest(uri: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(uri.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_uri_encoding() {
        assert_eq!(
            file_uri(Path::new("/home/user/Apps/My App[1].AppImage")),
            "file:///home/user/Apps/My%20App%5B1%5D.AppImage"
        );
        assert_eq!(
            file_uri(Path::new("/opt/caf\u{e9}.AppImage")),
            "file:///opt/caf%C3%A9.AppImage"
        );
    }

    #[test]
    fn test_digest_matches_known_value() {
        assert_eq!(uri_digest(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(uri_digest("abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_ids_are_stable_and_distinct() {
        let layout = ArtifactLayout {
            applications_dir: PathBuf::from("/data/applications"),
            thumbnails_dir: PathBuf::from("/cache/thumbnails/normal"),
        };
        let a = layout.ids_for(Path::new("/apps/A.AppImage"));
        let again = layout.ids_for(Path::new("/apps/A.AppImage"));
        let b = layout.ids_for(Path::new("/apps/B.AppImage"));

        assert_eq!(a, again);
        assert_ne!(a.digest, b.digest);
        assert_eq!(
            a.desktop_entry,
            PathBuf::from(format!("/data/applications/appimagekit_{}.desktop", a.digest))
        );
        assert_eq!(
            a.path(ArtifactKind::Thumbnail),
            Path::new(&format!("/cache/thumbnails/normal/{}.png", a.digest))
        );
    }
}
