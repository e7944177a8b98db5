//! File name filtering.

use std::path::Path;

/// Suffixes considered when none are configured.
pub const DEFAULT_SUFFIXES: &[&str] = &[".AppImage", ".appimage"];

/// Accepts paths whose file name ends with one of the configured suffixes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SuffixFilter {
    suffixes: Vec<String>,
}

impl Default for SuffixFilter {
    fn default() -> Self {
        Self::new(DEFAULT_SUFFIXES.iter().copied())
    }
}

impl SuffixFilter {
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            suffixes: suffixes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        self.suffixes
            .iter()
            .any(|suffix| name.len() > suffix.len() && name.ends_with(suffix.as_str()))
    }
}
