//! Path helpers for XDG directories.

use std::path::PathBuf;

fn home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(std::env::var("HOME").unwrap_or_default()))
}

/// `$XDG_DATA_HOME/applications`, where menu entries are written.
pub fn applications_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| home().join(".local/share"))
        .join("applications")
}

/// `$XDG_CACHE_HOME/thumbnails/normal` (128 px thumbnails).
pub fn thumbnails_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| home().join(".cache"))
        .join("thumbnails")
        .join("normal")
}

/// Directories watched when no configuration says otherwise.
pub fn default_watch_dirs() -> Vec<PathBuf> {
    let home = home();
    let mut dirs = vec![
        home.join("Downloads"),
        home.join("Applications"),
        home.join(".local/bin"),
        home.join("bin"),
        home.join("Desktop"),
        PathBuf::from("/Applications"),
        PathBuf::from("/opt"),
        PathBuf::from("/usr/local/bin"),
    ];

    if let Some(downloads) = dirs::download_dir() {
        if !dirs.contains(&downloads) {
            dirs.insert(0, downloads);
        }
    }

    dirs
}

/// Mounted removable media usually appear below these roots.
pub fn media_roots() -> Vec<PathBuf> {
    let user = std::env::var("USER").unwrap_or_default();
    let mut roots = vec![PathBuf::from("/media"), PathBuf::from("/mnt")];
    if !user.is_empty() {
        roots.insert(0, PathBuf::from("/run/media").join(&user));
        roots.insert(1, PathBuf::from("/media").join(&user));
    }
    roots
}

/// `Applications` folders on currently mounted media below `roots`.
pub fn media_application_dirs(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for root in roots {
        let walker = walkdir::WalkDir::new(root).min_depth(1).max_depth(1);
        for entry in walker.into_iter().filter_map(|e| e.ok()) {
            let candidate = entry.path().join("Applications");
            if entry.file_type().is_dir() && candidate.is_dir() && !found.contains(&candidate) {
                found.push(candidate);
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_dirs_are_absolute() {
        for dir in default_watch_dirs() {
            assert!(dir.is_absolute(), "{:?}", dir);
        }
        assert!(applications_dir().ends_with("applications"));
        assert!(thumbnails_dir().ends_with("thumbnails/normal"));
    }

    #[test]
    fn test_media_application_dirs() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("USBSTICK/Applications")).unwrap();
        std::fs::create_dir_all(root.path().join("OTHER/Documents")).unwrap();

        let found = media_application_dirs(&[root.path().to_path_buf(), PathBuf::from("/nonexistent")]);
        assert_eq!(found, vec![root.path().join("USBSTICK/Applications")]);
    }
}
