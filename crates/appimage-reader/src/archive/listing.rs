//! Listing backend for type 1 (ISO9660) AppImages.
//!
//! The directory structure is built once from `bsdtar -tvf`; single entries
//! are then extracted to memory on demand.

use super::{ArchiveReader, BackendOptions, MAX_SYMLINK_HOPS, follow_symlinks, run_tool};
use crate::error::{Error, Result};
use crate::wildcard;
use log::debug;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::process::Command;

const BACKEND: &str = "listing";

/// What an index entry is.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Symlink(String),
}

/// In-memory directory structure of an archive.
#[derive(Clone, Debug, Default)]
pub struct ListingIndex {
    children: BTreeMap<String, BTreeSet<String>>,
    kinds: HashMap<String, EntryKind>,
}

impl ListingIndex {
    pub fn new() -> Self {
        let mut index = Self::default();
        index.kinds.insert(String::new(), EntryKind::Dir);
        index.children.insert(String::new(), BTreeSet::new());
        index
    }

    /// Parse `bsdtar -tv` output (ls -l style, one entry per line).
    pub fn parse(listing: &str) -> Self {
        let mut index = Self::new();

        for line in listing.lines() {
            let Some((mode, name)) = split_listing_line(line) else {
                continue;
            };

            let (name, kind) = match mode.chars().next() {
                Some('d') => (name, EntryKind::Dir),
                Some('l') => match name.split_once(" -> ") {
                    Some((link, target)) => (link, EntryKind::Symlink(target.to_string())),
                    None => continue,
                },
                // Hard links are listed as "name link to target"; treat as files.
                _ => (
                    name.split_once(" link to ").map(|(n, _)| n).unwrap_or(name),
                    EntryKind::File,
                ),
            };

            index.insert(&wildcard::normalize(name), kind);
        }

        index
    }

    /// Add an entry, creating its parent directories.
    pub fn insert(&mut self, path: &str, kind: EntryKind) {
        if path.is_empty() {
            return;
        }

        let mut parent = String::new();
        let mut segments = path.split('/').peekable();
        while let Some(segment) = segments.next() {
            let current = wildcard::join(&parent, segment);
            self.children
                .entry(parent.clone())
                .or_default()
                .insert(segment.to_string());

            if segments.peek().is_some() {
                self.kinds.entry(current.clone()).or_insert(EntryKind::Dir);
                self.children.entry(current.clone()).or_default();
            }
            parent = current;
        }

        if kind == EntryKind::Dir {
            self.children.entry(path.to_string()).or_default();
        }
        self.kinds.insert(path.to_string(), kind);
    }

    pub fn kind(&self, path: &str) -> Option<&EntryKind> {
        self.kinds.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.kinds.contains_key(path)
    }

    pub fn is_dir(&self, path: &str) -> bool {
        matches!(self.kinds.get(path), Some(EntryKind::Dir))
    }

    pub fn children(&self, dir: &str) -> Vec<String> {
        self.children
            .get(dir)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn symlink_target(&self, path: &str) -> Option<String> {
        match self.kinds.get(path) {
            Some(EntryKind::Symlink(target)) => Some(target.clone()),
            _ => None,
        }
    }

    /// Resolve wildcards in `entry`.
    pub fn resolve(&self, entry: &str) -> Result<String> {
        wildcard::resolve(entry, |dir| self.children(dir))
    }

    /// Follow symlinks starting at `entry`. Absolute targets are left
    /// unresolved; cycles are rejected as not found.
    pub fn resolve_symlinks(&self, entry: &str) -> Result<String> {
        follow_symlinks(entry, true, |p| self.symlink_target(p)).map_err(|e| match e {
            Error::CannotResolve(_) => Error::NotFound(entry.to_string()),
            other => other,
        })
    }

    /// Rewrite `entry` so that none of its directory components is a
    /// symlink. The last component is left alone.
    pub fn resolve_parents(&self, entry: &str) -> Result<String> {
        self.resolve_parents_within(entry, 0)
    }

    fn resolve_parents_within(&self, entry: &str, depth: usize) -> Result<String> {
        if depth > MAX_SYMLINK_HOPS {
            return Err(Error::CannotResolve(entry.to_string()));
        }

        let (parent, name) = wildcard::split(entry);
        let mut current = String::new();
        if !parent.is_empty() {
            for segment in parent.split('/') {
                let next = wildcard::join(&current, segment);
                let followed = follow_symlinks(&next, false, |p| self.symlink_target(p))?;
                current = if followed == next {
                    next
                } else {
                    // The link target may itself pass through linked directories.
                    self.resolve_parents_within(&followed, depth + 1)?
                };
            }
        }
        Ok(wildcard::join(&current, name))
    }

    /// All entries at or below `prefix`, in lexical order.
    pub fn subtree(&self, prefix: &str) -> Vec<String> {
        let mut out: Vec<String> = self
            .kinds
            .keys()
            .filter(|p| {
                prefix.is_empty()
                    || p.as_str() == prefix
                    || p.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('/'))
            })
            .filter(|p| !p.is_empty())
            .cloned()
            .collect();
        out.sort();
        out
    }
}

/// Split a listing line into its mode string and the trailing name field.
/// The name is everything after the eighth whitespace-separated column.
fn split_listing_line(line: &str) -> Option<(&str, &str)> {
    let mut rest = line.trim_start();
    let mut mode = "";
    for column in 0..8 {
        let end = rest.find(char::is_whitespace)?;
        if column == 0 {
            mode = &rest[..end];
        }
        rest = rest[end..].trim_start();
    }

    if mode.len() < 10 || rest.is_empty() {
        return None;
    }
    Some((mode, rest))
}

/// Reads a type 1 image through an external archive tool.
#[derive(Debug)]
pub struct ListingBackend {
    source: PathBuf,
    tool: PathBuf,
    index: ListingIndex,
    /// Whether the tool lists entries as `./name`.
    dot_prefixed: bool,
}

impl ListingBackend {
    pub fn open(source: &Path, options: &BackendOptions) -> Result<Self> {
        let output = run_tool(
            BACKEND,
            Command::new(&options.listing_tool).arg("-tvf").arg(source),
        )?;
        let listing = String::from_utf8_lossy(&output.stdout);

        let dot_prefixed = listing
            .lines()
            .filter_map(split_listing_line)
            .any(|(_, name)| name.starts_with("./"));
        let index = ListingIndex::parse(&listing);
        debug!(
            "{}: indexed {} entries",
            source.display(),
            index.kinds.len()
        );

        Ok(Self {
            source: source.to_path_buf(),
            tool: options.listing_tool.clone(),
            index,
            dot_prefixed,
        })
    }

    pub fn index(&self) -> &ListingIndex {
        &self.index
    }

    fn archive_name(&self, entry: &str) -> String {
        if self.dot_prefixed {
            format!("./{}", entry)
        } else {
            entry.to_string()
        }
    }

    fn lookup(&self, entry: &str) -> Result<String> {
        let resolved = self.index.resolve(entry)?;
        let resolved = self
            .index
            .resolve_parents(&resolved)
            .map_err(|_| Error::NotFound(entry.to_string()))?;
        let resolved = self.index.resolve_symlinks(&resolved)?;
        match self.index.kind(&resolved) {
            None | Some(EntryKind::Symlink(_)) => Err(Error::NotFound(entry.to_string())),
            Some(_) => Ok(resolved),
        }
    }
}

impl ArchiveReader for ListingBackend {
    fn read_file(&self, entry: &str) -> Result<Box<dyn Read + '_>> {
        let resolved = self.lookup(entry)?;
        if self.index.is_dir(&resolved) {
            return Err(Error::IsDirectory(resolved));
        }

        let output = run_tool(
            BACKEND,
            Command::new(&self.tool)
                .arg("-xOf")
                .arg(&self.source)
                .arg(self.archive_name(&resolved)),
        )?;
        Ok(Box::new(Cursor::new(output.stdout)))
    }

    fn is_directory(&self, entry: &str) -> bool {
        self.lookup(entry)
            .map(|p| self.index.is_dir(&p))
            .unwrap_or(false)
    }

    fn list_directory(&self, entry: &str) -> Vec<String> {
        match self.lookup(entry) {
            Ok(p) if self.index.is_dir(&p) => self.index.children(&p),
            _ => Vec::new(),
        }
    }

    fn extract(&self, entry: &str, dest: &Path, resolve_symlinks: bool) -> Result<()> {
        let requested = self.index.resolve(entry)?;
        if !self.index.contains(&requested) {
            return Err(Error::NotFound(entry.to_string()));
        }
        let source_entry = if resolve_symlinks {
            self.lookup(&requested)?
        } else {
            requested.clone()
        };

        std::fs::create_dir_all(dest)?;
        run_tool(
            BACKEND,
            Command::new(&self.tool)
                .arg("-xf")
                .arg(&self.source)
                .arg("-C")
                .arg(dest)
                .arg(self.archive_name(&source_entry)),
        )?;

        if source_entry != requested {
            let from = super::destination(dest, &source_entry);
            let to = super::destination(dest, &requested);
            if let Some(parent) = to.parent() {
                std::fs::create_dir_all(parent)?;
            }
            super::remove_stale(&to)?;
            std::fs::rename(&from, &to)?;
        }
        Ok(())
    }

    fn resolve(&self, entry: &str) -> Result<String> {
        self.index.resolve(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::write_script;

    const LISTING: &str = "\
drwxr-xr-x  0 0      0           0 Jan  1  1970 .
-rwxr-xr-x  0 0      0       12345 Jan  1  1970 AppRun
lrwxrwxrwx  0 0      0           0 Jan  1  1970 .DirIcon -> sample.png
-rw-r--r--  0 0      0         812 Jan  1  1970 sample.png
-rw-r--r--  0 0      0         120 Jan  1  1970 sample.desktop
drwxr-xr-x  0 0      0           0 Jan  1  1970 usr
drwxr-xr-x  0 0      0           0 Jan  1  1970 usr/share
-rw-r--r--  0 0      0         120 Jan  1  1970 usr/share/sample.desktop
lrwxrwxrwx  0 0      0           0 Jan  1  1970 usr/lib -> /lib
lrwxrwxrwx  0 0      0           0 Jan  1  1970 usr/data -> share
lrwxrwxrwx  0 0      0           0 Jan  1  1970 loop-a -> loop-b
lrwxrwxrwx  0 0      0           0 Jan  1  1970 loop-b -> loop-a
-rw-r--r--  0 0      0          10 Jan  1  1970 usr/share/file with spaces.txt
";

    #[test]
    fn test_parse_listing() {
        let index = ListingIndex::parse(LISTING);
        assert_eq!(
            index.children(""),
            vec![".DirIcon", "AppRun", "loop-a", "loop-b", "sample.desktop", "sample.png", "usr"]
        );
        assert!(index.is_dir("usr/share"));
        assert_eq!(index.symlink_target(".DirIcon").as_deref(), Some("sample.png"));
        assert!(index.contains("usr/share/file with spaces.txt"));
    }

    #[test]
    fn test_wildcard_resolution_prefers_top_level() {
        let index = ListingIndex::parse(LISTING);
        assert_eq!(index.resolve("*.desktop").unwrap(), "sample.desktop");
        assert_eq!(
            index.resolve("usr/s*/*.desktop").unwrap(),
            "usr/share/sample.desktop"
        );
        // Each segment takes its first match; there is no backtracking.
        assert!(index.resolve("usr/*/*.desktop").is_err());
    }

    #[test]
    fn test_symlinks_resolve_and_cycles_fail() {
        let index = ListingIndex::parse(LISTING);
        assert_eq!(index.resolve_symlinks(".DirIcon").unwrap(), "sample.png");
        // Absolute targets stay unresolved.
        assert_eq!(index.resolve_symlinks("usr/lib").unwrap(), "usr/lib");
        let err = index.resolve_symlinks("loop-a").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_linked_directories_in_the_middle() {
        let index = ListingIndex::parse(LISTING);
        assert_eq!(
            index.resolve_parents("usr/data/sample.desktop").unwrap(),
            "usr/share/sample.desktop"
        );
        assert_eq!(index.resolve_parents("usr/data").unwrap(), "usr/data");
        assert_eq!(index.resolve_parents("AppRun").unwrap(), "AppRun");
        assert!(index.resolve_parents("usr/lib/libfoo.so").is_err());
        assert!(index.resolve_parents("loop-a/anything").is_err());
    }

    #[test]
    fn test_implicit_parents() {
        let mut index = ListingIndex::new();
        index.insert("a/b/c.txt", EntryKind::File);
        assert!(index.is_dir("a"));
        assert!(index.is_dir("a/b"));
        assert_eq!(index.children("a/b"), vec!["c.txt"]);
        assert_eq!(index.subtree("a"), vec!["a", "a/b", "a/b/c.txt"]);
    }

    #[test]
    fn test_backend_with_scripted_tool() {
        let dir = tempfile::tempdir().unwrap();
        let listing_path = dir.path().join("listing.txt");
        std::fs::write(&listing_path, LISTING).unwrap();

        let tool = dir.path().join("fake-bsdtar");
        write_script(
            &tool,
            &format!(
                "case \"$1\" in\n  -tvf) cat '{}' ;;\n  -xOf) printf 'contents of %s' \"$3\" ;;\n  *) exit 2 ;;\nesac",
                listing_path.display()
            ),
        );

        let options = BackendOptions {
            listing_tool: tool,
            ..BackendOptions::default()
        };
        let backend = ListingBackend::open(Path::new("/tmp/App.AppImage"), &options).unwrap();

        let data = backend.read_to_vec(".DirIcon").unwrap();
        assert_eq!(data, b"contents of sample.png");
        assert!(backend.is_directory("usr"));
        assert_eq!(backend.list_directory("usr"), vec!["data", "lib", "share"]);
        assert_eq!(
            backend.read_to_vec("usr/data/sample.desktop").unwrap(),
            b"contents of usr/share/sample.desktop"
        );
        assert_eq!(backend.list_directory("usr/data"), vec!["file with spaces.txt", "sample.desktop"]);
        assert!(backend.list_directory("AppRun").is_empty());
        assert!(matches!(
            backend.read_file("usr").err(),
            Some(Error::IsDirectory(_))
        ));
        assert!(matches!(
            backend.read_file("missing").err(),
            Some(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_missing_tool_is_backend_unavailable() {
        let options = BackendOptions {
            listing_tool: PathBuf::from("/nonexistent/bsdtar"),
            ..BackendOptions::default()
        };
        let err = ListingBackend::open(Path::new("/tmp/App.AppImage"), &options)
            .err()
            .unwrap();
        assert!(err.is_backend_unavailable());
    }
}
