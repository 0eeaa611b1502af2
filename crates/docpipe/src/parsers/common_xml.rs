#![cfg(feature = "office")]

//! Shared XML walk for the ODF and OOXML families.
//!
//! Both families stream their content parts through the same descent: a
//! dispatch on the namespace-stripped tag name maps known elements onto
//! structural messages, and everything unknown recurses with text flowing
//! through. Decoded per-document state (list styles, the xlsx shared
//! string table) lives in [`XmlDocState`] for the duration of one parse.

use crate::error::Result;
use crate::message::{Comment, DateTime, List, Message, Styling};
use crate::parsers::Emitter;
use crate::xml_stream::{XmlEvent, XmlStream};
use ahash::AHashMap;

/// Where document text lives in the markup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TextPolicy {
    /// ODF: text nodes inside paragraphs are content.
    Direct,
    /// OOXML: only `<w:t>`/`<a:t>` elements carry content.
    Tagged,
}

/// Per-parse decoded state shared between parts.
#[derive(Default)]
pub struct XmlDocState {
    /// ODF list style name → list type (`decimal`, `disc`, `none`).
    pub list_styles: AHashMap<String, String>,
    /// xlsx shared strings by index.
    pub shared_strings: Vec<String>,
}

pub fn local_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

fn attr<'a>(attributes: &'a [(String, String)], wanted: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|(k, _)| local_name(k) == wanted)
        .map(|(_, v)| v.as_str())
}

/// Collect `text:list-style` definitions so lists can resolve their
/// numbering kind.
pub fn collect_odf_list_styles(content: &[u8], state: &mut XmlDocState) -> Result<()> {
    let mut stream = XmlStream::new(content);
    let mut current_style: Option<String> = None;
    loop {
        match stream.next_event()? {
            XmlEvent::Done => return Ok(()),
            XmlEvent::StartElement { name, attributes } => match local_name(&name) {
                "list-style" => {
                    current_style = attr(&attributes, "name").map(|s| s.to_string());
                }
                "list-level-style-number" => {
                    if let Some(style) = &current_style {
                        state.list_styles.insert(style.clone(), "decimal".to_string());
                    }
                }
                "list-level-style-bullet" => {
                    if let Some(style) = &current_style
                        && !state.list_styles.contains_key(style)
                    {
                        state.list_styles.insert(style.clone(), "disc".to_string());
                    }
                }
                _ => {}
            },
            XmlEvent::EndElement { name } => {
                if local_name(&name) == "list-style" {
                    current_style = None;
                }
            }
            _ => {}
        }
    }
}

/// Collect the xlsx shared string table (`xl/sharedStrings.xml`): one
/// entry per `<si>`, concatenating its text runs.
pub fn collect_shared_strings(content: &[u8], state: &mut XmlDocState) -> Result<()> {
    let mut stream = XmlStream::new(content);
    let mut in_si = false;
    let mut in_t = false;
    let mut current = String::new();
    loop {
        match stream.next_event()? {
            XmlEvent::Done => return Ok(()),
            XmlEvent::StartElement { name, .. } => match local_name(&name) {
                "si" => {
                    in_si = true;
                    current.clear();
                }
                "t" if in_si => in_t = true,
                _ => {}
            },
            XmlEvent::EndElement { name } => match local_name(&name) {
                "si" => {
                    in_si = false;
                    state.shared_strings.push(std::mem::take(&mut current));
                }
                "t" => in_t = false,
                _ => {}
            },
            XmlEvent::Text(text) | XmlEvent::CData(text) => {
                if in_t {
                    current.push_str(&text);
                }
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Structural {
    Paragraph,
    Span,
    List,
    ListItem,
    Table,
    TableRow,
    TableCell,
}

impl Structural {
    fn closer(self) -> Message {
        match self {
            Structural::Paragraph => Message::CloseParagraph,
            Structural::Span => Message::CloseSpan,
            Structural::List => Message::CloseList,
            Structural::ListItem => Message::CloseListItem,
            Structural::Table => Message::CloseTable,
            Structural::TableRow => Message::CloseTableRow,
            Structural::TableCell => Message::CloseTableCell,
        }
    }
}

/// Walk one content part, mapping known tags onto structural messages and
/// recursing through the rest.
pub fn walk_content(
    content: &[u8],
    state: &XmlDocState,
    policy: TextPolicy,
    emitter: &mut Emitter<'_, '_>,
) -> Result<()> {
    let mut stream = XmlStream::new(content);
    let mut open: Vec<(Structural, String)> = Vec::new();
    // Depth of tagged-text elements currently open.
    let mut text_depth = 0usize;
    let mut annotation: Option<Comment> = None;
    let mut annotation_field: Option<&'static str> = None;

    loop {
        if emitter.stopped() {
            return Ok(());
        }
        match stream.next_event()? {
            XmlEvent::Done => break,
            XmlEvent::Comment(_) => {}
            XmlEvent::Text(text) | XmlEvent::CData(text) => {
                if let Some(comment) = annotation.as_mut() {
                    match annotation_field {
                        Some("creator") => {
                            comment.author = Some(match comment.author.take() {
                                Some(mut existing) => {
                                    existing.push_str(&text);
                                    existing
                                }
                                None => text,
                            });
                        }
                        Some("date") => comment.time = Some(text),
                        _ => {
                            let body = comment.comment.get_or_insert_with(String::new);
                            body.push_str(&text);
                        }
                    }
                    continue;
                }
                let emit_it = match policy {
                    TextPolicy::Direct => !open.is_empty(),
                    TextPolicy::Tagged => text_depth > 0,
                };
                if emit_it && !text.is_empty() {
                    emitter.emit(Message::text(text))?;
                }
            }
            XmlEvent::StartElement { name, attributes } => {
                let local = local_name(&name).to_string();
                if annotation.is_some() {
                    match local.as_str() {
                        "creator" => annotation_field = Some("creator"),
                        "date" => annotation_field = Some("date"),
                        _ => {}
                    }
                    continue;
                }
                match local.as_str() {
                    "annotation" => {
                        annotation = Some(Comment::default());
                        annotation_field = None;
                    }
                    "p" | "h" => {
                        open_structural(
                            Structural::Paragraph,
                            Message::Paragraph(Styling::default()),
                            &name,
                            &mut open,
                            &mut stream,
                            emitter,
                        )?;
                    }
                    "span" => {
                        open_structural(
                            Structural::Span,
                            Message::Span(Styling::default()),
                            &name,
                            &mut open,
                            &mut stream,
                            emitter,
                        )?;
                    }
                    "list" => {
                        let list_type = attr(&attributes, "style-name")
                            .and_then(|style| state.list_styles.get(style))
                            .cloned()
                            .unwrap_or_else(|| "decimal".to_string());
                        open_structural(
                            Structural::List,
                            Message::List(List {
                                list_type,
                                styling: Styling::default(),
                            }),
                            &name,
                            &mut open,
                            &mut stream,
                            emitter,
                        )?;
                    }
                    "list-item" => {
                        open_structural(
                            Structural::ListItem,
                            Message::ListItem(Styling::default()),
                            &name,
                            &mut open,
                            &mut stream,
                            emitter,
                        )?;
                    }
                    "table" | "tbl" => {
                        open_structural(
                            Structural::Table,
                            Message::Table(Styling::default()),
                            &name,
                            &mut open,
                            &mut stream,
                            emitter,
                        )?;
                    }
                    "table-row" | "tr" => {
                        open_structural(
                            Structural::TableRow,
                            Message::TableRow(Styling::default()),
                            &name,
                            &mut open,
                            &mut stream,
                            emitter,
                        )?;
                    }
                    "table-cell" | "tc" => {
                        open_structural(
                            Structural::TableCell,
                            Message::TableCell(Styling::default()),
                            &name,
                            &mut open,
                            &mut stream,
                            emitter,
                        )?;
                    }
                    "line-break" | "br" => {
                        emitter.emit(Message::BreakLine(Styling::default()))?;
                    }
                    "tab" => {
                        emitter.emit(Message::text("\t"))?;
                    }
                    "s" => {
                        let count = attr(&attributes, "c")
                            .and_then(|c| c.parse::<usize>().ok())
                            .unwrap_or(1);
                        emitter.emit(Message::text(" ".repeat(count)))?;
                    }
                    "t" => text_depth += 1,
                    // Field instructions and deleted text carry no
                    // document content.
                    "instrText" | "delText" => {
                        stream.skip_element(&name)?;
                    }
                    _ => {}
                }
            }
            XmlEvent::EndElement { name } => {
                let local = local_name(&name).to_string();
                if annotation.is_some() {
                    match local.as_str() {
                        "annotation" => {
                            let comment = annotation.take().unwrap_or_default();
                            emitter.emit(Message::Comment(comment))?;
                        }
                        "creator" | "date" => annotation_field = None,
                        _ => {}
                    }
                    continue;
                }
                if local == "t" {
                    text_depth = text_depth.saturating_sub(1);
                    continue;
                }
                if let Some(position) = open.iter().rposition(|(_, n)| *n == name) {
                    while open.len() > position {
                        let (kind, _) = open.pop().expect("length checked above");
                        emitter.emit(kind.closer())?;
                    }
                }
            }
        }
    }
    while let Some((kind, _)) = open.pop() {
        emitter.emit(kind.closer())?;
    }
    Ok(())
}

fn open_structural(
    kind: Structural,
    message: Message,
    name: &str,
    open: &mut Vec<(Structural, String)>,
    stream: &mut XmlStream<'_>,
    emitter: &mut Emitter<'_, '_>,
) -> Result<()> {
    match emitter.emit(message)? {
        crate::message::Continuation::Skip => {
            stream.skip_element(name)?;
            emitter.emit(kind.closer())?;
        }
        _ => open.push((kind, name.to_string())),
    }
    Ok(())
}

/// Parse the ISO 8601 timestamps of ODF `meta.xml` and OOXML
/// `docProps/core.xml` (`2020-01-15T10:30:00Z` and offset variants).
pub fn parse_iso_datetime(value: &str) -> Option<DateTime> {
    let bytes = value.as_bytes();
    if bytes.len() < 19 || bytes[4] != b'-' || bytes[7] != b'-' || bytes[10] != b'T' {
        return None;
    }
    let digits = |range: std::ops::Range<usize>| -> Option<i64> {
        value.get(range)?.parse::<i64>().ok()
    };
    Some(DateTime {
        year: digits(0..4)? as i32,
        month: digits(5..7)? as u8,
        day: digits(8..10)? as u8,
        hour: digits(11..13)? as u8,
        minute: digits(14..16)? as u8,
        second: digits(17..19)? as u8,
    })
}
