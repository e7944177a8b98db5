//! Menu entry generation.

use crate::identity::ArtifactIds;
use appimage_reader::descriptor::Section;
use appimage_reader::{Container, Descriptor};
use std::fs;
use std::path::Path;

const MAIN_SECTION: &str = "Desktop Entry";
const ACTION_PREFIX: &str = "Desktop Action ";

/// Whether the embedded descriptor opts out via `X-AppImage-Integrate=false`.
pub fn wants_integration(descriptor: Option<&Descriptor>) -> bool {
    descriptor
        .and_then(|d| d.get("X-AppImage-Integrate"))
        .map(|v| !v.eq_ignore_ascii_case("false"))
        .unwrap_or(true)
}

/// Render the menu entry for `container`, pointing `Icon` at `icon` if given.
pub fn render(container: &Container, ids: &ArtifactIds, icon: Option<&Path>) -> String {
    build(
        container.descriptor(),
        container.path(),
        &container.display_name(),
        container.version(),
        ids,
        icon,
    )
    .to_desktop_string()
}

fn build(
    embedded: Option<&Descriptor>,
    path: &Path,
    display_name: &str,
    version: &str,
    ids: &ArtifactIds,
    icon: Option<&Path>,
) -> Descriptor {
    let mut entry = embedded.cloned().unwrap_or_default();
    if entry.main().is_none() {
        entry.sections.insert(
            0,
            Section {
                name: MAIN_SECTION.to_string(),
                entries: Vec::new(),
            },
        );
    }

    let target = path.to_string_lossy();
    for section in &mut entry.sections {
        if section.name == MAIN_SECTION || section.name.starts_with(ACTION_PREFIX) {
            let exec = rewrite_exec(section.get("Exec").unwrap_or_default(), &target);
            section.set("Exec", exec);
        }
    }

    if let Some(main) = entry.main_mut() {
        if main.get("Type").is_none() {
            main.set("Type", "Application");
        }
        if main.get("Name").unwrap_or_default().is_empty() {
            main.set("Name", display_name);
        }
        main.set("TryExec", target.to_string());
        if let Some(icon) = icon {
            main.set("Icon", icon.to_string_lossy());
        }
        if !version.is_empty() {
            main.set("X-AppImage-Version", version);
        }
        main.set("X-AppImage-Identifier", ids.digest.as_str());
        main.set("X-AppImage-Comment", "Generated by appimaged");
    }

    entry
}

/// Replace the program of an `Exec` line with the quoted container path,
/// keeping its arguments. An empty line becomes `"<path>" %U`.
pub fn rewrite_exec(exec: &str, target: &str) -> String {
    let exec = exec.trim();
    let quoted = quote_exec_arg(target);
    if exec.is_empty() {
        return format!("{} %U", quoted);
    }

    let args = split_program(exec).1.trim_start();
    if args.is_empty() {
        quoted
    } else {
        format!("{} {}", quoted, args)
    }
}

/// Split off the first (possibly quoted) word of an `Exec` line.
fn split_program(exec: &str) -> (&str, &str) {
    if let Some(rest) = exec.strip_prefix('"') {
        let mut escaped = false;
        for (idx, ch) in rest.char_indices() {
            match ch {
                '\\' if !escaped => escaped = true,
                '"' if !escaped => return (&exec[..idx + 2], &rest[idx + 1..]),
                _ => escaped = false,
            }
        }
        return (exec, "");
    }
    match exec.find(char::is_whitespace) {
        Some(idx) => (&exec[..idx], &exec[idx..]),
        None => (exec, ""),
    }
}

fn quote_exec_arg(arg: &str) -> String {
    let mut out = String::with_capacity(arg.len() + 2);
    out.push('"');
    for ch in arg.chars() {
        if matches!(ch, '"' | '`' | '$' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

/// Write `content` to `path` via a sibling temporary file and a rename.
pub fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)
}
