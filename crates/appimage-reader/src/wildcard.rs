//! Shell-style wildcard matching and entry path resolution.

use crate::error::{Error, Result};

/// True if `segment` contains any wildcard metacharacter.
pub fn has_wildcard(segment: &str) -> bool {
    segment.contains(['*', '?', '['])
}

/// Match `name` against a shell pattern supporting `*`, `?` and `[...]`
/// classes (with `!`/`^` negation and `a-z` ranges).
pub fn matches(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();

    let (mut pi, mut ni) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while ni < n.len() {
        if pi < p.len() {
            match p[pi] {
                '*' => {
                    backtrack = Some((pi, ni));
                    pi += 1;
                    continue;
                }
                '?' => {
                    pi += 1;
                    ni += 1;
                    continue;
                }
                '[' => {
                    if let Some((matched, next)) = match_class(&p, pi, n[ni]) {
                        if matched {
                            pi = next;
                            ni += 1;
                            continue;
                        }
                    } else if n[ni] == '[' {
                        // Unterminated class is a literal bracket.
                        pi += 1;
                        ni += 1;
                        continue;
                    }
                }
                c if c == n[ni] => {
                    pi += 1;
                    ni += 1;
                    continue;
                }
                _ => {}
            }
        }

        match backtrack {
            Some((star, consumed)) => {
                pi = star + 1;
                ni = consumed + 1;
                backtrack = Some((star, consumed + 1));
            }
            None => return false,
        }
    }

    p[pi..].iter().all(|&c| c == '*')
}

/// Returns (matched, index after the class) or None if the class is unterminated.
fn match_class(p: &[char], start: usize, c: char) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = matches!(p.get(i), Some('!') | Some('^'));
    if negate {
        i += 1;
    }

    let mut matched = false;
    let mut first = true;
    while i < p.len() {
        if p[i] == ']' && !first {
            return Some((matched != negate, i + 1));
        }
        first = false;

        if i + 2 < p.len() && p[i + 1] == '-' && p[i + 2] != ']' {
            if p[i] <= c && c <= p[i + 2] {
                matched = true;
            }
            i += 3;
        } else {
            if p[i] == c {
                matched = true;
            }
            i += 1;
        }
    }

    None
}

/// Normalize an entry path: strip leading `/` and `./`, drop empty and `.`
/// segments and apply `..` lexically. The root is the empty string.
pub fn normalize(entry: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in entry.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

/// Join a directory and a child name into an entry path.
pub fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Split an entry path into (parent, name).
pub fn split(entry: &str) -> (&str, &str) {
    match entry.rsplit_once('/') {
        Some((parent, name)) => (parent, name),
        None => ("", entry),
    }
}

/// Resolve a possibly-wildcarded entry path against a directory structure.
///
/// `list` returns the children of a directory (any order). Each segment
/// prefers an exact, case-sensitive match and otherwise takes the first
/// wildcard match in lexical order.
pub fn resolve<F>(entry: &str, mut list: F) -> Result<String>
where
    F: FnMut(&str) -> Vec<String>,
{
    let normalized = normalize(entry);
    if !has_wildcard(&normalized) {
        return Ok(normalized);
    }

    let mut current = String::new();
    for segment in normalized.split('/') {
        let mut children = list(&current);

        let chosen = if children.iter().any(|c| c == segment) {
            segment.to_string()
        } else if has_wildcard(segment) {
            children.sort();
            children
                .into_iter()
                .find(|c| matches(segment, c))
                .ok_or_else(|| Error::NotFound(entry.to_string()))?
        } else {
            return Err(Error::NotFound(entry.to_string()));
        };

        current = join(&current, &chosen);
    }

    Ok(current)
}
