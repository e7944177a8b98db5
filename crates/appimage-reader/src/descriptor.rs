//! Parsing of the embedded `.desktop` descriptor.

/// Version reported when the descriptor carries none.
pub const FALLBACK_VERSION: &str = "1.0";

const MAIN_SECTION: &str = "Desktop Entry";

/// Parser knobs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DescriptorOptions {
    /// Treat ` ;` and ` #` inside values as the start of an inline comment.
    /// Off by default: some producers write unescaped `;` into values.
    pub strict_inline_comments: bool,
}

/// One `[Section]` with its key/value pairs in file order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub entries: Vec<(String, String)>,
}

/// A parsed desktop entry document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Descriptor {
    pub sections: Vec<Section>,
}

impl Section {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Replace the value of `key`, appending it if absent.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }
}

impl Descriptor {
    pub fn parse(content: &str, options: DescriptorOptions) -> Self {
        let mut sections: Vec<Section> = Vec::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                sections.push(Section {
                    name: line[1..line.len() - 1].to_string(),
                    entries: Vec::new(),
                });
                continue;
            }

            let Some(section) = sections.last_mut() else {
                continue;
            };

            if let Some((key, value)) = line.split_once('=') {
                let value = if options.strict_inline_comments {
                    strip_inline_comment(value)
                } else {
                    value
                };
                section
                    .entries
                    .push((key.trim().to_string(), value.trim().to_string()));
            }
        }

        Self { sections }
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn section_mut(&mut self, name: &str) -> Option<&mut Section> {
        self.sections.iter_mut().find(|s| s.name == name)
    }

    pub fn main(&self) -> Option<&Section> {
        self.section(MAIN_SECTION)
    }

    pub fn main_mut(&mut self) -> Option<&mut Section> {
        self.section_mut(MAIN_SECTION)
    }

    /// Look up a key in `[Desktop Entry]`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.main()?.get(key)
    }

    pub fn name(&self) -> String {
        self.get("Name").unwrap_or_default().to_string()
    }

    pub fn version(&self) -> String {
        self.get("X-AppImage-Version")
            .filter(|v| !v.is_empty())
            .unwrap_or(FALLBACK_VERSION)
            .to_string()
    }

    pub fn icon(&self) -> Option<&str> {
        self.get("Icon").filter(|v| !v.is_empty())
    }

    /// Serialize back to desktop entry syntax.
    pub fn to_desktop_string(&self) -> String {
        let mut out = String::new();
        for (idx, section) in self.sections.iter().enumerate() {
            if idx > 0 {
                out.push('\n');
            }
            out.push('[');
            out.push_str(&section.name);
            out.push_str("]\n");
            for (key, value) in &section.entries {
                out.push_str(key);
                out.push('=');
                out.push_str(value);
                out.push('\n');
            }
        }
        out
    }
}

fn strip_inline_comment(value: &str) -> &str {
    let bytes = value.as_bytes();
    for (idx, &b) in bytes.iter().enumerate() {
        if (b == b';' || b == b'#') && idx > 0 && bytes[idx - 1].is_ascii_whitespace() {
            return &value[..idx];
        }
    }
    value
}
