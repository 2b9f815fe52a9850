//! Gettext `.po` catalogs. Singular entries only; plural forms and the header
//! entry are left alone.

use crate::error::{AlgebrasError, Result};
use super::{DocumentProjection, DocumentRole, FormatHandler, KeyPath, PatchedDocument, StructureHandle};

const FORMAT: &str = "po";

pub struct PoHandler;

#[derive(Debug, Default)]
struct PoEntry {
    msgctxt: Option<String>,
    msgid: String,
    msgstr: String,
    plural: bool,
    /// Byte range of the `msgstr` keyword line and its continuation lines
    msgstr_span: Option<(usize, usize)>,
}

impl PoEntry {
    fn key(&self) -> KeyPath {
        match &self.msgctxt {
            Some(ctx) => KeyPath::new([ctx.clone(), self.msgid.clone()]),
            None => KeyPath::new([self.msgid.clone()]),
        }
    }

    fn is_header(&self) -> bool {
        self.msgid.is_empty() && self.msgctxt.is_none()
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Field {
    Context,
    Id,
    IdPlural,
    Str,
    PluralStr,
}

fn quoted(line: &str) -> Result<String> {
    let start = line.find('"');
    let end = line.rfind('"');
    match (start, end) {
        (Some(start), Some(end)) if end > start => Ok(unescape(&line[start + 1..end])),
        _ => Err(AlgebrasError::format(FORMAT, "<input>", format!("expected quoted string in `{}`", line))),
    }
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\t', "\\t")
        .replace('\r', "\\r")
}

/// `keyword "text"`, switching to continuation lines for multi-line text.
fn format_field(keyword: &str, text: &str) -> String {
    if !text.contains('\n') || text == "\n" {
        return format!("{} \"{}\"\n", keyword, escape(text));
    }

    let mut out = format!("{} \"\"\n", keyword);
    for piece in text.split_inclusive('\n') {
        out.push_str(&format!("\"{}\"\n", escape(piece)));
    }
    out
}

fn format_entry(key: &KeyPath, msgstr: &str) -> String {
    let mut out = String::new();
    let msgid = match key.segments() {
        [ctx, msgid] => {
            out.push_str(&format_field("msgctxt", ctx));
            msgid.clone()
        }
        _ => key.to_string(),
    };
    out.push_str(&format_field("msgid", &msgid));
    out.push_str(&format_field("msgstr", msgstr));
    out
}

fn scan(content: &str) -> Result<Vec<PoEntry>> {
    let mut entries = Vec::new();
    let mut current: Option<PoEntry> = None;
    let mut field: Option<Field> = None;
    let mut offset = 0usize;

    for raw_line in content.split_inclusive('\n') {
        let line_start = offset;
        offset += raw_line.len();
        let line = raw_line.trim();

        if line.is_empty() || line.starts_with('#') {
            // Blank lines and comments close the current entry once its msgstr has been seen
            if matches!(field, Some(Field::Str | Field::PluralStr)) {
                entries.extend(current.take());
                field = None;
            }
            continue;
        }

        if line.starts_with('"') {
            let text = quoted(line)?;
            let Some(entry) = current.as_mut() else {
                continue;
            };
            match field {
                Some(Field::Context) => entry.msgctxt.get_or_insert_with(String::new).push_str(&text),
                Some(Field::Id) => entry.msgid.push_str(&text),
                Some(Field::Str) => {
                    entry.msgstr.push_str(&text);
                    if let Some(span) = entry.msgstr_span.as_mut() {
                        span.1 = offset;
                    }
                }
                _ => {}
            }
            continue;
        }

        let keyword = line.split_whitespace().next().unwrap_or_default();
        let starts_entry = matches!(keyword, "msgctxt")
            || (keyword == "msgid" && !matches!(field, Some(Field::Context)));
        if starts_entry {
            entries.extend(current.take());
            current = Some(PoEntry::default());
        }
        let Some(entry) = current.as_mut() else {
            continue;
        };

        field = match keyword {
            "msgctxt" => {
                entry.msgctxt = Some(quoted(line)?);
                Some(Field::Context)
            }
            "msgid" => {
                entry.msgid = quoted(line)?;
                Some(Field::Id)
            }
            "msgid_plural" => {
                entry.plural = true;
                Some(Field::IdPlural)
            }
            "msgstr" => {
                entry.msgstr = quoted(line)?;
                entry.msgstr_span = Some((line_start, offset));
                Some(Field::Str)
            }
            k if k.starts_with("msgstr[") => Some(Field::PluralStr),
            _ => None,
        };
    }
    entries.extend(current);

    Ok(entries)
}

impl PoHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PoHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatHandler for PoHandler {
    fn name(&self) -> &'static str {
        FORMAT
    }

    fn supports_in_place_merge(&self) -> bool {
        true
    }

    fn parse(&self, content: &str, role: DocumentRole) -> Result<DocumentProjection> {
        let mut projection = DocumentProjection::new(StructureHandle::from_text(content));
        for entry in scan(content)? {
            if entry.is_header() || entry.plural {
                continue;
            }
            let value = match role {
                DocumentRole::Source if entry.msgstr.is_empty() => entry.msgid.clone(),
                _ => entry.msgstr.clone(),
            };
            projection.insert(entry.key(), value);
        }
        Ok(projection)
    }

    fn render(&self, entries: &[(KeyPath, String)]) -> Result<String> {
        let mut out = String::from(
            "msgid \"\"\nmsgstr \"\"\n\"Content-Type: text/plain; charset=UTF-8\\n\"\n\"Content-Transfer-Encoding: 8bit\\n\"\n",
        );
        for (key, value) in entries {
            out.push('\n');
            out.push_str(&format_entry(key, value));
        }
        Ok(out)
    }

    fn patch(&self, structure: &StructureHandle, updates: &[(KeyPath, String)]) -> Result<PatchedDocument> {
        let Some(content) = structure.text() else {
            return Ok(PatchedDocument {
                content: self.render(updates)?,
                appended: Vec::new(),
            });
        };

        let entries = scan(content)?;
        let mut edits: Vec<(usize, usize, String)> = Vec::new();
        let mut tail = String::new();
        let mut appended = Vec::new();

        for (key, value) in updates {
            let located = entries
                .iter()
                .filter(|e| !e.is_header() && !e.plural)
                .find(|e| &e.key() == key)
                .and_then(|e| e.msgstr_span);
            match located {
                Some((start, end)) => {
                    let mut replacement = format_field("msgstr", value);
                    // Keep a missing final newline missing
                    if !content[start..end].ends_with('\n') {
                        replacement.pop();
                    }
                    edits.push((start, end, replacement));
                }
                None => {
                    tail.push('\n');
                    tail.push_str(&format_entry(key, value));
                    appended.push(key.clone());
                }
            }
        }

        edits.sort_by(|a, b| b.0.cmp(&a.0));
        let mut patched = content.to_string();
        for (start, end, replacement) in edits {
            patched.replace_range(start..end, &replacement);
        }
        if !tail.is_empty() {
            if !patched.is_empty() && !patched.ends_with('\n') {
                patched.push('\n');
            }
            patched.push_str(&tail);
        }

        Ok(PatchedDocument { content: patched, appended })
    }
}
