//! Android `res/values*/strings.xml` handler.
//!
//! Patching works on byte spans recorded while scanning the original text, so
//! comments, entities, attribute order and whitespace of entries that are not
//! updated survive untouched.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::BTreeMap;
use std::ops::Range;

use crate::error::{AlgebrasError, Result};
use super::{DocumentProjection, DocumentRole, FormatHandler, KeyPath, PatchedDocument, StructureHandle};

const FORMAT: &str = "android-xml";
const PLURAL_ORDER: &[&str] = &["zero", "one", "two", "few", "many", "other"];
const DEFAULT_INDENT: &str = "    ";

pub struct AndroidXmlHandler {
    /// Backslash-escape apostrophes on write (only when normalization is off)
    escape_apostrophes: bool,
}

/// Where a translatable value lives in the original text.
#[derive(Debug, Clone)]
enum ValueSpan {
    /// Text between `<string ...>` and `</string>`
    Inner(Range<usize>),
    /// Self-closing element; the start tag without its `/>`
    SelfClosing { element: Range<usize>, open_tag: String, close_name: String },
}

#[derive(Debug, Clone)]
struct ScannedEntry {
    key: KeyPath,
    span: ValueSpan,
    raw_value: String,
    element_start: usize,
}

#[derive(Debug, Clone)]
struct PluralsBlock {
    name: String,
    close_start: usize,
}

#[derive(Debug, Default)]
struct Layout {
    entries: Vec<ScannedEntry>,
    plurals: Vec<PluralsBlock>,
    resources_close: Option<usize>,
}

fn xml_error(e: impl std::fmt::Display) -> AlgebrasError {
    AlgebrasError::format(FORMAT, "<input>", e.to_string())
}

fn attribute(e: &BytesStart<'_>, name: &str) -> Result<Option<String>> {
    match e.try_get_attribute(name).map_err(xml_error)? {
        Some(attr) => Ok(Some(attr.unescape_value().map_err(xml_error)?.into_owned())),
        None => Ok(None),
    }
}

/// Advance past the end tag matching an already-consumed start tag; returns where that end tag begins.
fn skip_to_end(reader: &mut Reader<&[u8]>) -> Result<usize> {
    let mut depth = 0usize;
    loop {
        let before = reader.buffer_position() as usize;
        match reader.read_event().map_err(xml_error)? {
            Event::Start(_) => depth += 1,
            Event::End(_) if depth == 0 => return Ok(before),
            Event::End(_) => depth -= 1,
            Event::Eof => return Err(xml_error("unexpected end of document inside element")),
            _ => {}
        }
    }
}

fn scan(content: &str) -> Result<Layout> {
    let mut reader = Reader::from_str(content);
    let mut layout = Layout::default();
    let mut current_plurals: Option<String> = None;

    loop {
        let before = reader.buffer_position() as usize;
        let event = reader.read_event().map_err(xml_error)?;
        match event {
            Event::Start(e) => {
                let local = e.local_name();
                match local.as_ref() {
                    b"string" => {
                        let name = attribute(&e, "name")?;
                        let translatable = attribute(&e, "translatable")?;
                        let inner_start = reader.buffer_position() as usize;
                        let inner_end = skip_to_end(&mut reader)?;
                        if let (Some(name), false) = (name, translatable.as_deref() == Some("false")) {
                            layout.entries.push(ScannedEntry {
                                key: KeyPath::new([name]),
                                span: ValueSpan::Inner(inner_start..inner_end),
                                raw_value: content[inner_start..inner_end].to_string(),
                                element_start: before,
                            });
                        }
                    }
                    b"plurals" => {
                        current_plurals = attribute(&e, "name")?;
                    }
                    b"item" => {
                        let quantity = attribute(&e, "quantity")?;
                        let inner_start = reader.buffer_position() as usize;
                        let inner_end = skip_to_end(&mut reader)?;
                        if let (Some(plural), Some(quantity)) = (&current_plurals, quantity) {
                            layout.entries.push(ScannedEntry {
                                key: KeyPath::new([plural.clone(), quantity]),
                                span: ValueSpan::Inner(inner_start..inner_end),
                                raw_value: content[inner_start..inner_end].to_string(),
                                element_start: before,
                            });
                        }
                    }
                    _ => {}
                }
            }
            Event::Empty(e) => {
                let local = e.local_name();
                let key = match local.as_ref() {
                    b"string" => {
                        let translatable = attribute(&e, "translatable")?;
                        if translatable.as_deref() == Some("false") {
                            None
                        } else {
                            attribute(&e, "name")?.map(|name| KeyPath::new([name]))
                        }
                    }
                    b"item" => match (&current_plurals, attribute(&e, "quantity")?) {
                        (Some(plural), Some(quantity)) => Some(KeyPath::new([plural.clone(), quantity])),
                        _ => None,
                    },
                    _ => None,
                };
                if let Some(key) = key {
                    let end = reader.buffer_position() as usize;
                    let raw_tag = &content[before..end];
                    let open_tag = raw_tag.trim_end_matches("/>").trim_end().to_string();
                    layout.entries.push(ScannedEntry {
                        key,
                        span: ValueSpan::SelfClosing {
                            element: before..end,
                            open_tag,
                            close_name: String::from_utf8_lossy(local.as_ref()).into_owned(),
                        },
                        raw_value: String::new(),
                        element_start: before,
                    });
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"plurals" => {
                    if let Some(name) = current_plurals.take() {
                        layout.plurals.push(PluralsBlock { name, close_start: before });
                    }
                }
                b"resources" => layout.resources_close = Some(before),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(layout)
}

/// Decode the raw inner text of an element into the string users translate.
fn decode_value(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(inner) = trimmed
        .strip_prefix("<![CDATA[")
        .and_then(|rest| rest.strip_suffix("]]>"))
    {
        return inner.to_string();
    }
    // Markup such as <b> or <xliff:g> is kept verbatim
    if trimmed.contains('<') {
        return trimmed.to_string();
    }

    let unescaped = quick_xml::escape::unescape(trimmed)
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| trimmed.to_string());
    unescape_android(&unescaped)
}

fn unescape_android(text: &str) -> String {
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
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('@') => out.push('@'),
            Some('?') => out.push('?'),
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

/// Whether `text` contains tags and they nest correctly inside an element.
fn is_balanced_markup(text: &str) -> bool {
    if !text.contains('<') {
        return false;
    }
    let wrapped = format!("<value>{}</value>", text);
    let mut reader = Reader::from_str(&wrapped);
    let mut depth = 0usize;
    loop {
        match reader.read_event() {
            Ok(Event::Start(_)) => depth += 1,
            Ok(Event::End(_)) => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
            }
            Ok(Event::Eof) => return depth == 0,
            Ok(_) => {}
            Err(_) => return false,
        }
    }
}

fn is_entity_start(rest: &str) -> bool {
    let Some(end) = rest.find(';') else {
        return false;
    };
    let body = &rest[1..end];
    !body.is_empty()
        && end <= 12
        && (body.starts_with('#') || body.chars().all(|c| c.is_ascii_alphanumeric()))
}

impl AndroidXmlHandler {
    pub fn new(normalize_strings: bool) -> Self {
        Self {
            escape_apostrophes: !normalize_strings,
        }
    }

    /// Escape a translated value for placement between `<string>` tags.
    ///
    /// Angle brackets pass through only when the value is well-formed inline
    /// markup such as `<b>bold</b>`; anything else is written as text.
    fn escape_value(&self, text: &str) -> String {
        let markup = is_balanced_markup(text);
        let mut out = String::with_capacity(text.len() + 8);
        for (idx, c) in text.char_indices() {
            match c {
                '&' if is_entity_start(&text[idx..]) => out.push('&'),
                '&' => out.push_str("&amp;"),
                '<' if !markup => out.push_str("&lt;"),
                '>' if !markup => out.push_str("&gt;"),
                '\u{a0}' => out.push_str("&#160;"),
                '"' => out.push_str("\\\""),
                '\n' => out.push_str("\\n"),
                '\t' => out.push_str("\\t"),
                '\'' if self.escape_apostrophes => out.push_str("\\'"),
                _ => out.push(c),
            }
        }
        out
    }

    fn string_element(&self, key: &KeyPath, value: &str) -> String {
        format!("<string name=\"{}\">{}</string>", attr_escape(&key.to_string()), self.escape_value(value))
    }

    fn item_element(&self, quantity: &str, value: &str) -> String {
        format!("<item quantity=\"{}\">{}</item>", attr_escape(quantity), self.escape_value(value))
    }
}

fn attr_escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('"', "&quot;").replace('<', "&lt;")
}

/// Leading whitespace of the line containing `pos`.
fn indent_at(content: &str, pos: usize) -> String {
    let line_start = content[..pos].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let prefix = &content[line_start..pos];
    if prefix.chars().all(char::is_whitespace) {
        prefix.to_string()
    } else {
        DEFAULT_INDENT.to_string()
    }
}

/// Insertion point for new lines placed before a closing tag at `close_start`.
fn line_insertion_point(content: &str, close_start: usize) -> (usize, bool) {
    let line_start = content[..close_start].rfind('\n').map(|i| i + 1).unwrap_or(0);
    if content[line_start..close_start].chars().all(char::is_whitespace) {
        (line_start, false)
    } else {
        (close_start, true)
    }
}

fn quantity_rank(quantity: &str) -> usize {
    PLURAL_ORDER.iter().position(|q| *q == quantity).unwrap_or(PLURAL_ORDER.len())
}

impl FormatHandler for AndroidXmlHandler {
    fn name(&self) -> &'static str {
        FORMAT
    }

    fn supports_in_place_merge(&self) -> bool {
        true
    }

    fn parse(&self, content: &str, _role: DocumentRole) -> Result<DocumentProjection> {
        let layout = scan(content)?;
        if layout.resources_close.is_none() && !content.trim().is_empty() && !layout.entries.is_empty() {
            return Err(xml_error("missing </resources> root"));
        }

        let mut projection = DocumentProjection::new(StructureHandle::from_text(content));
        for entry in layout.entries {
            projection.insert(entry.key, decode_value(&entry.raw_value));
        }
        Ok(projection)
    }

    fn render(&self, entries: &[(KeyPath, String)]) -> Result<String> {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<resources>\n");

        // Plural items are grouped under the first occurrence of their block
        let mut plural_items: BTreeMap<&str, Vec<(&str, &str)>> = BTreeMap::new();
        for (key, value) in entries {
            if let [plural, quantity] = key.segments() {
                plural_items.entry(plural.as_str()).or_default().push((quantity.as_str(), value.as_str()));
            }
        }

        let mut emitted_plurals = std::collections::HashSet::new();
        for (key, value) in entries {
            match key.segments() {
                [plural, _] => {
                    if !emitted_plurals.insert(plural.as_str()) {
                        continue;
                    }
                    let mut items = plural_items.remove(plural.as_str()).unwrap_or_default();
                    items.sort_by_key(|(quantity, _)| quantity_rank(quantity));
                    out.push_str(&format!("{}<plurals name=\"{}\">\n", DEFAULT_INDENT, attr_escape(plural)));
                    for (quantity, text) in items {
                        out.push_str(&format!("{0}{0}{1}\n", DEFAULT_INDENT, self.item_element(quantity, text)));
                    }
                    out.push_str(&format!("{}</plurals>\n", DEFAULT_INDENT));
                }
                _ => out.push_str(&format!("{}{}\n", DEFAULT_INDENT, self.string_element(key, value))),
            }
        }

        out.push_str("</resources>\n");
        Ok(out)
    }

    fn patch(&self, structure: &StructureHandle, updates: &[(KeyPath, String)]) -> Result<PatchedDocument> {
        let Some(content) = structure.text() else {
            return Ok(PatchedDocument {
                content: self.render(updates)?,
                appended: Vec::new(),
            });
        };

        let layout = scan(content)?;
        let resources_close = layout
            .resources_close
            .ok_or_else(|| xml_error("missing </resources> root"))?;
        let indent = layout
            .entries
            .iter()
            .find(|e| e.key.len() == 1)
            .map(|e| indent_at(content, e.element_start))
            .unwrap_or_else(|| DEFAULT_INDENT.to_string());

        // (position, replaced range end, replacement), applied back to front
        let mut edits: Vec<(usize, usize, String)> = Vec::new();
        let mut appended = Vec::new();
        let mut new_strings = String::new();
        let mut new_plural_items: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();

        for (key, value) in updates {
            if let Some(entry) = layout.entries.iter().find(|e| &e.key == key) {
                match &entry.span {
                    ValueSpan::Inner(range) => {
                        edits.push((range.start, range.end, self.escape_value(value)));
                    }
                    ValueSpan::SelfClosing { element, open_tag, close_name } => {
                        let replacement = format!("{}>{}</{}>", open_tag, self.escape_value(value), close_name);
                        edits.push((element.start, element.end, replacement));
                    }
                }
                continue;
            }

            appended.push(key.clone());
            match key.segments() {
                [plural, quantity] => new_plural_items
                    .entry(plural.clone())
                    .or_default()
                    .push((quantity.clone(), value.clone())),
                _ => {
                    new_strings.push_str(&format!("{}{}\n", indent, self.string_element(key, value)));
                }
            }
        }

        let mut new_blocks = String::new();
        for (plural, mut items) in new_plural_items {
            items.sort_by_key(|(quantity, _)| quantity_rank(quantity));
            let item_indent = layout
                .entries
                .iter()
                .find(|e| e.key.len() == 2 && e.key.segments()[0] == plural)
                .map(|e| indent_at(content, e.element_start))
                .unwrap_or_else(|| format!("{0}{0}", indent));
            let item_lines: String = items
                .iter()
                .map(|(quantity, text)| format!("{}{}\n", item_indent, self.item_element(quantity, text)))
                .collect();

            match layout.plurals.iter().find(|b| b.name == plural) {
                Some(block) => {
                    let (at, needs_newline) = line_insertion_point(content, block.close_start);
                    let prefix = if needs_newline { "\n" } else { "" };
                    edits.push((at, at, format!("{}{}", prefix, item_lines)));
                }
                None => {
                    new_blocks.push_str(&format!(
                        "{0}<plurals name=\"{1}\">\n{2}{0}</plurals>\n",
                        indent,
                        attr_escape(&plural),
                        item_lines
                    ));
                }
            }
        }

        let trailing = format!("{}{}", new_strings, new_blocks);
        if !trailing.is_empty() {
            let (at, needs_newline) = line_insertion_point(content, resources_close);
            let prefix = if needs_newline { "\n" } else { "" };
            edits.push((at, at, format!("{}{}", prefix, trailing)));
        }

        // Stable sort keeps insertion order for edits at the same position
        edits.sort_by(|a, b| b.0.cmp(&a.0));
        let mut patched = content.to_string();
        for (start, end, replacement) in edits {
            patched.replace_range(start..end, &replacement);
        }

        Ok(PatchedDocument { content: patched, appended })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<resources>
    <!-- Legal copy, reviewed by counsel -->
    <string name="terms">user&#160;agreement</string>
    <string name="internal" translatable="false">debug</string>
</resources>
"#;

    fn key(name: &str) -> KeyPath {
        KeyPath::new([name])
    }

    #[test]
    fn test_parse_decodes_entities_and_skips_untranslatable() {
        let handler = AndroidXmlHandler::new(true);
        let projection = handler.parse(TARGET, DocumentRole::Target).unwrap();
        assert_eq!(projection.len(), 1);
        assert_eq!(projection.get(&key("terms")), Some("user\u{a0}agreement"));
    }

    #[test]
    fn test_parse_android_escapes_and_plurals() {
        let handler = AndroidXmlHandler::new(true);
        let content = r#"<resources>
    <string name="quote">Say \"hi\"\nnow</string>
    <string name="empty"/>
    <plurals name="files">
        <item quantity="one">%d file</item>
        <item quantity="other">%d files</item>
    </plurals>
</resources>"#;
        let projection = handler.parse(content, DocumentRole::Source).unwrap();
        assert_eq!(projection.get(&key("quote")), Some("Say \"hi\"\nnow"));
        assert_eq!(projection.get(&key("empty")), Some(""));
        assert_eq!(projection.get(&KeyPath::new(["files", "other"])), Some("%d files"));
    }

    #[test]
    fn test_in_place_append_leaves_comment_and_entity_untouched() {
        let handler = AndroidXmlHandler::new(true);
        let structure = StructureHandle::from_text(TARGET);
        let patched = handler
            .patch(&structure, &[(key("welcome"), "Bienvenue".to_string())])
            .unwrap();

        let expected = r#"<?xml version="1.0" encoding="utf-8"?>
<resources>
    <!-- Legal copy, reviewed by counsel -->
    <string name="terms">user&#160;agreement</string>
    <string name="internal" translatable="false">debug</string>
    <string name="welcome">Bienvenue</string>
</resources>
"#;
        assert_eq!(patched.content, expected);
        assert_eq!(patched.appended, vec![key("welcome")]);
    }

    #[test]
    fn test_in_place_update_replaces_only_inner_text() {
        let handler = AndroidXmlHandler::new(true);
        let content = "<resources>\n  <string name=\"a\" formatted=\"false\">Old</string>\n  <string name=\"b\">Keep &amp; stay</string>\n</resources>\n";
        let patched = handler
            .patch(
                &StructureHandle::from_text(content),
                &[(key("a"), "Nouveau \"texte\" & plus".to_string())],
            )
            .unwrap();

        assert_eq!(
            patched.content,
            "<resources>\n  <string name=\"a\" formatted=\"false\">Nouveau \\\"texte\\\" &amp; plus</string>\n  <string name=\"b\">Keep &amp; stay</string>\n</resources>\n"
        );
        assert!(patched.appended.is_empty());
    }

    #[test]
    fn test_in_place_plural_items() {
        let handler = AndroidXmlHandler::new(true);
        let content = "<resources>\n    <plurals name=\"files\">\n        <item quantity=\"one\">%d fichier</item>\n    </plurals>\n</resources>\n";
        let patched = handler
            .patch(
                &StructureHandle::from_text(content),
                &[
                    (KeyPath::new(["files", "other"]), "%d fichiers".to_string()),
                    (KeyPath::new(["songs", "one"]), "%d chanson".to_string()),
                ],
            )
            .unwrap();

        let reparsed = handler.parse(&patched.content, DocumentRole::Target).unwrap();
        assert_eq!(reparsed.get(&KeyPath::new(["files", "one"])), Some("%d fichier"));
        assert_eq!(reparsed.get(&KeyPath::new(["files", "other"])), Some("%d fichiers"));
        assert_eq!(reparsed.get(&KeyPath::new(["songs", "one"])), Some("%d chanson"));
        assert!(patched.content.contains("        <item quantity=\"other\">%d fichiers</item>\n    </plurals>"));
    }

    #[test]
    fn test_apostrophes_escaped_only_without_normalization() {
        assert_eq!(AndroidXmlHandler::new(true).escape_value("l'app"), "l'app");
        assert_eq!(AndroidXmlHandler::new(false).escape_value("l'app"), "l\\'app");
        assert_eq!(AndroidXmlHandler::new(true).escape_value("a\u{a0}b &amp; <b>c</b>"), "a&#160;b &amp; <b>c</b>");
    }

    #[test]
    fn test_angle_brackets_in_text_stay_escaped() {
        let handler = AndroidXmlHandler::new(true);
        let content = "<resources>\n    <string name=\"k\">Press &lt;Enter&gt;</string>\n</resources>\n";
        let projection = handler.parse(content, DocumentRole::Source).unwrap();
        assert_eq!(projection.get(&key("k")), Some("Press <Enter>"));

        let value = "Appuyez sur <Entrée>";
        let patched = handler
            .patch(&StructureHandle::from_text(content), &[(key("k"), value.to_string())])
            .unwrap();
        assert!(patched.content.contains("<string name=\"k\">Appuyez sur &lt;Entrée&gt;</string>"));

        let reparsed = handler.parse(&patched.content, DocumentRole::Target).unwrap();
        assert_eq!(reparsed.get(&key("k")), Some(value));
    }

    #[test]
    fn test_balanced_markup_detection() {
        assert!(is_balanced_markup("<b>bold</b> and <br/>"));
        assert!(is_balanced_markup("<xliff:g id=\"n\">%d</xliff:g> items"));
        assert!(!is_balanced_markup("Press <Enter>"));
        assert!(!is_balanced_markup("a < b"));
        assert!(!is_balanced_markup("</b> stray"));
        assert!(!is_balanced_markup("plain"));
    }

    #[test]
    fn test_render_from_scratch() {
        let handler = AndroidXmlHandler::new(true);
        let rendered = handler
            .render(&[
                (key("title"), "Titre".to_string()),
                (KeyPath::new(["files", "other"]), "%d fichiers".to_string()),
                (KeyPath::new(["files", "one"]), "%d fichier".to_string()),
            ])
            .unwrap();

        assert_eq!(
            rendered,
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<resources>\n    <string name=\"title\">Titre</string>\n    <plurals name=\"files\">\n        <item quantity=\"one\">%d fichier</item>\n        <item quantity=\"other\">%d fichiers</item>\n    </plurals>\n</resources>\n"
        );
    }
}
