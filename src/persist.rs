//! Config file encoding: YAML documents with comments carried across a
//! load/save round trip, written atomically.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use serde_yaml::{Mapping, Value};
use tempfile::NamedTempFile;

use crate::error::{ConfigError, ConfigResult};

/// Comment blocks found in a loaded config file.
///
/// Blocks directly above a top-level key stay attached to that key; a block
/// after the last key is kept as a footer. Leading lines cut off from the
/// first key by a blank line form the document header, and a trailing
/// `# ...` on a top-level key line stays on that key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Comments {
    header: Vec<String>,
    by_key: HashMap<String, Vec<String>>,
    inline: HashMap<String, String>,
    footer: Vec<String>,
}

/// Parse a config document into its top-level entries and comments.
pub(crate) fn parse_document(text: &str) -> ConfigResult<(Vec<(String, Value)>, Comments)> {
    let root: Value =
        serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let mapping = match root {
        Value::Null => Mapping::new(),
        Value::Mapping(m) => m,
        other => {
            return Err(ConfigError::Parse(format!(
                "top level must be a mapping, not {}",
                kind_name(&other)
            )))
        }
    };

    let mut entries = Vec::with_capacity(mapping.len());
    for (k, v) in mapping {
        let Value::String(name) = k else {
            return Err(ConfigError::Parse(format!(
                "config keys must be strings, not {}",
                kind_name(&k)
            )));
        };
        entries.push((name, v));
    }
    Ok((entries, scan_comments(text)))
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

fn scan_comments(text: &str) -> Comments {
    let mut comments = Comments::default();
    let mut pending: Vec<String> = Vec::new();
    let mut seen_key = false;
    for line in text.lines() {
        if line.trim().is_empty() {
            if !pending.is_empty() {
                pending.push(String::new());
            }
        } else if line.starts_with('#') {
            pending.push(line.to_string());
        } else if line.starts_with(char::is_whitespace) {
            // nested content; indented comments are not carried over
            if !line.trim_start().starts_with('#') {
                pending.clear();
            }
        } else if let Some(key) = top_level_key(line) {
            if !seen_key {
                if let Some(split) = pending.iter().rposition(String::is_empty) {
                    let mut header: Vec<String> = pending.drain(..=split).collect();
                    trim_trailing_blanks(&mut header);
                    comments.header = header;
                }
                seen_key = true;
            }
            trim_trailing_blanks(&mut pending);
            if !pending.is_empty() {
                comments.by_key.insert(key.clone(), std::mem::take(&mut pending));
            }
            if let Some(note) = inline_comment(line) {
                comments.inline.insert(key, note.to_string());
            }
        } else {
            pending.clear();
        }
    }
    trim_trailing_blanks(&mut pending);
    comments.footer = pending;
    comments
}

fn top_level_key(line: &str) -> Option<String> {
    if line.starts_with("---") || line.starts_with("...") {
        return None;
    }
    if let Some(quote) = line.chars().next().filter(|c| *c == '"' || *c == '\'') {
        let rest = &line[1..];
        let end = rest.find(quote)?;
        return Some(rest[..end].to_string());
    }
    let end = line.find(':')?;
    Some(line[..end].trim_end().to_string())
}

/// The `# ...` tail of a line, if it has one outside quotes.
fn inline_comment(line: &str) -> Option<&str> {
    let mut quote = None;
    let mut prev = ' ';
    for (i, c) in line.char_indices() {
        match (quote, c) {
            (None, '"' | '\'') if prev.is_whitespace() || prev == ':' => quote = Some(c),
            (Some(q), _) if c == q => quote = None,
            (None, '#') if prev.is_whitespace() => return Some(line[i..].trim_end()),
            _ => {}
        }
        prev = c;
    }
    None
}

fn trim_trailing_blanks(lines: &mut Vec<String>) {
    while lines.last().is_some_and(String::is_empty) {
        lines.pop();
    }
}

/// Render entries, in the given order, with their preserved comments.
pub(crate) fn render_document(entries: &[(String, Value)], comments: &Comments) -> ConfigResult<String> {
    let mut out = String::new();
    if !comments.header.is_empty() {
        for line in &comments.header {
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
    }
    for (name, value) in entries {
        if let Some(block) = comments.by_key.get(name) {
            for line in block {
                out.push_str(line);
                out.push('\n');
            }
        }
        let mut single = Mapping::new();
        single.insert(Value::String(name.clone()), value.clone());
        let rendered = serde_yaml::to_string(&single)?;
        match comments.inline.get(name) {
            Some(note) => {
                let (first, rest) = rendered.split_once('\n').unwrap_or((rendered.as_str(), ""));
                out.push_str(first);
                out.push(' ');
                out.push_str(note);
                out.push('\n');
                out.push_str(rest);
            }
            None => out.push_str(&rendered),
        }
    }
    if entries.is_empty() {
        out.push_str("{}\n");
    }
    if !comments.footer.is_empty() {
        out.push('\n');
        for line in &comments.footer {
            out.push_str(line);
            out.push('\n');
        }
    }
    Ok(out)
}

/// Replace `path` with `contents` without ever exposing a partial file.
///
/// Writes to a temp file in the same directory, syncs it, and renames it
/// over the destination.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> ConfigResult<()> {
    let write_err = |source: std::io::Error| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(dir).map_err(write_err)?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(contents.as_bytes()).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    // best effort: make the rename itself durable
    if let Ok(d) = fs::File::open(dir) {
        let _ = d.sync_all();
    }
    Ok(())
}
