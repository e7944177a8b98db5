//! The per-file container handle.

use crate::archive::{ArchiveReader, Backend, BackendOptions};
use crate::descriptor::{Descriptor, DescriptorOptions};
use crate::detect::{self, ContainerKind, DEFAULT_MIN_SIZE, Detection, PayloadFormat};
use crate::error::{Error, Result};
use log::debug;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::SystemTime;

/// Where the descriptor lives: the first top-level `.desktop` file.
const DESCRIPTOR_ENTRY: &str = "*.desktop";
const DIR_ICON: &str = ".DirIcon";

/// Settings applied when opening containers.
#[derive(Clone, Debug)]
pub struct ContainerOptions {
    /// Files below this size are never containers.
    pub min_size: u64,
    pub backend: BackendOptions,
    pub descriptor: DescriptorOptions,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            min_size: DEFAULT_MIN_SIZE,
            backend: BackendOptions::default(),
            descriptor: DescriptorOptions::default(),
        }
    }
}

/// A point-in-time observation of one AppImage on disk.
///
/// The archive reader is built on first access and dropped with the handle.
/// Selection runs at most once per handle: a failure is remembered too.
#[derive(Debug)]
pub struct Container {
    path: PathBuf,
    detection: Detection,
    name: String,
    version: String,
    update_locator: String,
    modified: Option<SystemTime>,
    descriptor: Option<Descriptor>,
    options: ContainerOptions,
    reader: OnceLock<std::result::Result<Backend, String>>,
}

impl Container {
    /// Detect `path` and read its metadata.
    ///
    /// Fails only when the file is not a container. A container whose
    /// contents cannot be read still opens, with empty metadata.
    pub fn open(path: &Path, options: &ContainerOptions) -> Result<Self> {
        let path = std::path::absolute(path)?;
        let detection = detect::detect_path(&path, options.min_size)?;

        let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
        let update_locator = {
            let mut file = BufReader::new(File::open(&path)?);
            detect::update_locator(&mut file, detection.kind).unwrap_or_default()
        };

        let mut container = Self {
            path,
            detection,
            name: String::new(),
            version: String::new(),
            update_locator,
            modified,
            descriptor: None,
            options: options.clone(),
            reader: OnceLock::new(),
        };
        container.load_descriptor();
        Ok(container)
    }

    fn load_descriptor(&mut self) {
        match self.read_descriptor() {
            Ok(descriptor) => {
                self.name = descriptor.name();
                self.version = descriptor.version();
                self.descriptor = Some(descriptor);
            }
            Err(e) => debug!("{}: no readable descriptor: {}", self.path.display(), e),
        }
    }

    fn read_descriptor(&self) -> Result<Descriptor> {
        let bytes = self.reader()?.read_to_vec(DESCRIPTOR_ENTRY)?;
        Ok(Descriptor::parse(
            &String::from_utf8_lossy(&bytes),
            self.options.descriptor,
        ))
    }

    /// The archive reader, constructed on first use.
    ///
    /// Later calls after a failed selection return `BackendUnavailable`
    /// without trying again; `close` clears the remembered outcome.
    pub fn reader(&self) -> Result<&Backend> {
        if let Some(selected) = self.reader.get() {
            return cached(selected);
        }
        if !self.detection.kind.is_container() {
            return Err(Error::NotAContainer(self.path.clone()));
        }

        match Backend::select(&self.path, &self.detection, &self.options.backend) {
            Ok(backend) => {
                debug!("{}: using {} backend", self.path.display(), backend.name());
                cached(self.reader.get_or_init(|| Ok(backend)))
            }
            Err(e) => {
                debug!("{}: no usable backend: {}", self.path.display(), e);
                let _ = self.reader.set(Err(e.to_string()));
                Err(e)
            }
        }
    }

    /// Tear down the reader (temporary extractions, mounts).
    pub fn close(&mut self) {
        self.reader.take();
    }

    /// Icon bytes: `.DirIcon`, else the descriptor's `Icon` as png/svg at the root.
    pub fn icon(&self) -> Result<Vec<u8>> {
        let reader = self.reader()?;
        let mut candidates = vec![DIR_ICON.to_string()];
        if let Some(icon) = self.descriptor.as_ref().and_then(|d| d.icon()) {
            candidates.push(format!("{}.png", icon));
            candidates.push(format!("{}.svg", icon));
            candidates.push(format!("usr/share/icons/hicolor/*/apps/{}.png", icon));
        }

        let mut last = Error::NotFound(DIR_ICON.to_string());
        for candidate in candidates {
            match reader.read_to_vec(&candidate) {
                Ok(bytes) if !bytes.is_empty() => return Ok(bytes),
                Ok(_) => {}
                Err(e) => last = e,
            }
        }
        Err(last)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> ContainerKind {
        self.detection.kind
    }

    pub fn payload_offset(&self) -> u64 {
        self.detection.payload_offset
    }

    pub fn payload_format(&self) -> PayloadFormat {
        self.detection.payload_format
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Update information, verbatim (e.g. `gh-releases-zsync|owner|repo|latest|*.zsync`).
    pub fn update_locator(&self) -> &str {
        &self.update_locator
    }

    pub fn modified(&self) -> Option<SystemTime> {
        self.modified
    }

    pub fn descriptor(&self) -> Option<&Descriptor> {
        self.descriptor.as_ref()
    }

    /// Human readable name, falling back to the file name.
    pub fn display_name(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

fn cached(selected: &std::result::Result<Backend, String>) -> Result<&Backend> {
    selected
        .as_ref()
        .map_err(|reason| Error::unavailable("archive", reason.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::write_script;
    use crate::detect::tests::modern_image;
    use std::io::Write;

    fn write_image(path: &Path, data: &[u8]) {
        let mut file = File::create(path).unwrap();
        file.write_all(data).unwrap();
    }

    #[test]
    fn test_directory_is_detection_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = Container::open(dir.path(), &ContainerOptions::default()).unwrap_err();
        assert!(err.is_detection_failure());
    }

    #[test]
    fn test_small_file_is_detection_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Tiny.AppImage");
        write_image(&path, &modern_image(4096, 1000, 64, 5));

        let err = Container::open(&path, &ContainerOptions::default()).unwrap_err();
        assert!(err.is_detection_failure());
    }

    #[test]
    fn test_unreadable_payload_opens_with_empty_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Broken.AppImage");
        write_image(&path, &modern_image(150 * 1024, 1000, 64, 5));

        let container = Container::open(&path, &ContainerOptions::default()).unwrap();
        assert_eq!(container.kind(), ContainerKind::Modern);
        assert_eq!(container.payload_offset(), 1320);
        assert_eq!(container.name(), "");
        assert_eq!(container.version(), "");
        assert_eq!(container.update_locator(), "");
        assert_eq!(container.display_name(), "Broken");
        assert!(container.reader().is_err());
    }

    #[test]
    fn test_metadata_from_legacy_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Scripted.AppImage");

        let mut data = modern_image(150 * 1024, 0, 0, 0);
        data[8..11].copy_from_slice(&[0x41, 0x49, 0x01]);
        write_image(&path, &data);

        let listing = dir.path().join("listing.txt");
        std::fs::write(
            &listing,
            "-rw-r--r--  0 0 0 60 Jan  1  1970 scripted.desktop\n\
             -rw-r--r--  0 0 0 3 Jan  1  1970 scripted.png\n\
             lrwxrwxrwx  0 0 0 0 Jan  1  1970 .DirIcon -> scripted.png\n",
        )
        .unwrap();
        let tool = dir.path().join("fake-bsdtar");
        write_script(
            &tool,
            &format!(
                "case \"$1\" in\n  -tvf) cat '{}' ;;\n  -xOf)\n    case \"$3\" in\n      scripted.desktop) printf '[Desktop Entry]\\nName=Scripted\\nIcon=scripted\\nX-AppImage-Version=3.1\\n' ;;\n      scripted.png) printf 'PNG' ;;\n    esac ;;\nesac",
                listing.display()
            ),
        );

        let options = ContainerOptions {
            backend: BackendOptions {
                listing_tool: tool,
                ..BackendOptions::default()
            },
            ..ContainerOptions::default()
        };

        let mut container = Container::open(&path, &options).unwrap();
        assert_eq!(container.kind(), ContainerKind::Legacy);
        assert_eq!(container.name(), "Scripted");
        assert_eq!(container.version(), "3.1");
        assert_eq!(container.reader().unwrap().name(), "listing");
        assert_eq!(container.icon().unwrap(), b"PNG");

        container.close();
        assert!(container.reader.get().is_none());
    }

    #[test]
    fn test_failed_reader_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Unlisted.AppImage");
        let mut data = modern_image(150 * 1024, 0, 0, 0);
        data[8..11].copy_from_slice(&[0x41, 0x49, 0x01]);
        write_image(&path, &data);

        let attempts = dir.path().join("attempts");
        let tool = dir.path().join("failing-bsdtar");
        write_script(&tool, &format!("echo x >> '{}'\nexit 1", attempts.display()));
        let options = ContainerOptions {
            backend: BackendOptions {
                listing_tool: tool,
                ..BackendOptions::default()
            },
            ..ContainerOptions::default()
        };
        let count = || std::fs::read_to_string(&attempts).unwrap().lines().count();

        let mut container = Container::open(&path, &options).unwrap();
        assert_eq!(container.name(), "");
        assert_eq!(count(), 1);

        assert!(matches!(
            container.reader().err(),
            Some(Error::BackendUnavailable { .. })
        ));
        assert!(container.icon().is_err());
        assert_eq!(count(), 1);

        container.close();
        assert!(container.reader().is_err());
        assert_eq!(count(), 2);
    }
}
