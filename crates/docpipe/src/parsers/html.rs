#![cfg(feature = "office")]

//! HTML parser.
//!
//! Tokenizes HTML leniently, normalizes whitespace per inline formatting
//! context (runs collapse to one space, leading whitespace after a block
//! boundary is dropped, trailing whitespace before one is trimmed), and
//! emits block structure (paragraphs, sections, lists, tables) and inline
//! formatting (bold, italic, links, images). The encoding is sniffed from
//! meta tags or the XML declaration before falling back to detection.

use crate::charset;
use crate::data_source::DataSource;
use crate::error::Result;
use crate::message::{Document, Image, Link, List, Message, Style, Styling};
use crate::mime::MimeType;
use crate::parsers::{Emitter, Parser};
use crate::xml_stream::{XmlEvent, XmlStream};
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;

static SUPPORTED: &[MimeType] = &[MimeType::from_static(crate::mime::HTML_MIME_TYPE)];

static CHARSET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)charset\s*=\s*["']?([A-Za-z0-9_\-]+)"#).expect("charset pattern compiles")
});
static XML_ENCODING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<\?xml[^>]*encoding\s*=\s*["']([A-Za-z0-9_\-]+)["']"#)
        .expect("xml encoding pattern compiles")
});

/// Block-level elements end the inline formatting context.
/// `html`, `body` and table cells behave the same way here.
const BLOCK_LEVEL: &[&str] = &[
    "address", "article", "aside", "blockquote", "details", "dialog", "dd", "div", "dl", "dt",
    "fieldset", "figcaption", "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6",
    "header", "hgroup", "hr", "li", "main", "nav", "ol", "p", "pre", "section", "table", "ul",
    "html", "body", "td", "tr", "th", "caption",
];

const VOID_ELEMENTS: &[&str] = &["br", "img", "meta", "hr", "input", "link", "base", "col", "area"];

pub struct HtmlParser;

impl HtmlParser {
    pub fn new() -> Self {
        HtmlParser
    }
}

impl Default for HtmlParser {
    fn default() -> Self {
        Self::new()
    }
}

fn is_block_level(name: &str) -> bool {
    BLOCK_LEVEL.iter().any(|b| b.eq_ignore_ascii_case(name))
}

fn is_void(name: &str) -> bool {
    VOID_ELEMENTS.iter().any(|v| v.eq_ignore_ascii_case(name))
}

fn styling_from(attributes: &[(String, String)]) -> Styling {
    let mut styling = Styling::default();
    for (key, value) in attributes {
        match key.as_str() {
            "class" => {
                styling.classes = value.split_whitespace().map(|s| s.to_string()).collect();
            }
            "id" => styling.id = value.clone(),
            "style" => styling.style = value.clone(),
            _ => {}
        }
    }
    styling
}

fn attr<'a>(attributes: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Decode the input using a sniffed or detected charset.
fn to_utf8(bytes: &[u8]) -> String {
    let head = &bytes[..bytes.len().min(2048)];
    let head_text = String::from_utf8_lossy(head);
    let label = CHARSET_RE
        .captures(&head_text)
        .or_else(|| XML_ENCODING_RE.captures(&head_text))
        .map(|c| c[1].to_string());
    if let Some(label) = label
        && let Some(text) = charset::decode_with_label(bytes, &label)
    {
        return text;
    }
    charset::decode_detected(bytes).0
}

/// The inline formatting context; whitespace collapses inside one and
/// resets at block boundaries.
#[derive(Default)]
struct InlineContext {
    buffered: String,
    last_char: Option<char>,
}

impl InlineContext {
    fn add_text(&mut self, raw: &str) {
        for ch in raw.chars() {
            if ch.is_whitespace() {
                match self.last_char {
                    // Context empty or already ends with whitespace.
                    None => {}
                    Some(last) if last.is_whitespace() => {}
                    _ => {
                        self.buffered.push(' ');
                        self.last_char = Some(' ');
                    }
                }
            } else {
                self.buffered.push(ch);
                self.last_char = Some(ch);
            }
        }
    }

    fn take(&mut self, trim_right: bool) -> Option<String> {
        if trim_right {
            let trimmed = self.buffered.trim_end().len();
            self.buffered.truncate(trimmed);
            self.last_char = None;
        }
        if self.buffered.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.buffered))
    }
}

/// Mapping of one HTML tag onto a structural message kind.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Structural {
    Paragraph,
    Section,
    Span,
    Bold,
    Italic,
    Underline,
    Link,
    List,
    ListItem,
    Table,
    TableRow,
    TableCell,
    Caption,
    Header,
    Footer,
}

impl Structural {
    fn from_tag(name: &str) -> Option<Structural> {
        let name = name.to_ascii_lowercase();
        Some(match name.as_str() {
            "p" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => Structural::Paragraph,
            "div" | "article" | "section" | "main" | "aside" | "blockquote" => Structural::Section,
            "span" => Structural::Span,
            "b" | "strong" => Structural::Bold,
            "i" | "em" => Structural::Italic,
            "u" => Structural::Underline,
            "a" => Structural::Link,
            "ul" | "ol" => Structural::List,
            "li" => Structural::ListItem,
            "table" => Structural::Table,
            "tr" => Structural::TableRow,
            "td" | "th" => Structural::TableCell,
            "caption" => Structural::Caption,
            "header" => Structural::Header,
            "footer" => Structural::Footer,
            _ => return None,
        })
    }

    fn closer(self) -> Message {
        match self {
            Structural::Paragraph => Message::CloseParagraph,
            Structural::Section => Message::CloseSection,
            Structural::Span => Message::CloseSpan,
            Structural::Bold => Message::CloseBold,
            Structural::Italic => Message::CloseItalic,
            Structural::Underline => Message::CloseUnderline,
            Structural::Link => Message::CloseLink,
            Structural::List => Message::CloseList,
            Structural::ListItem => Message::CloseListItem,
            Structural::Table => Message::CloseTable,
            Structural::TableRow => Message::CloseTableRow,
            Structural::TableCell => Message::CloseTableCell,
            Structural::Caption => Message::CloseCaption,
            Structural::Header => Message::CloseHeader,
            Structural::Footer => Message::CloseFooter,
        }
    }
}

struct HtmlContext<'e, 'a, 'c> {
    emitter: &'e mut Emitter<'a, 'c>,
    inline: InlineContext,
    open: Vec<(Structural, String)>,
    in_script: bool,
    in_title: bool,
    in_style: bool,
    style_text: String,
    turn_off_ul_enumeration: bool,
    turn_off_ol_enumeration: bool,
}

impl<'e, 'a, 'c> HtmlContext<'e, 'a, 'c> {
    fn flush_text(&mut self, at_block_boundary: bool) -> Result<()> {
        if let Some(text) = self.inline.take(at_block_boundary) {
            self.emitter.emit(Message::text(text))?;
        }
        Ok(())
    }

    /// Scan collected CSS for `list-style: none` rules on list tags; the
    /// office suites' HTML export turns enumeration off this way while
    /// numbering items in text.
    fn parse_css(&mut self) {
        let css = &self.style_text;
        let mut search = 0usize;
        while let Some(found) = css[search..].find("list-style:") {
            let found = search + found;
            search = found + "list-style:".len();
            let value: String = css[search..]
                .chars()
                .take_while(|c| *c != ';' && *c != '}')
                .filter(|c| !c.is_whitespace())
                .collect();
            if value != "none" {
                continue;
            }
            let Some(brace) = css[..found].rfind('{') else {
                continue;
            };
            let selector = css[..brace]
                .rsplit(|c: char| c.is_whitespace() || c == ',' || c == '}')
                .find(|s| !s.is_empty())
                .unwrap_or("");
            match selector {
                "li" => {
                    self.turn_off_ul_enumeration = true;
                    self.turn_off_ol_enumeration = true;
                }
                "ul" => self.turn_off_ul_enumeration = true,
                "ol" => self.turn_off_ol_enumeration = true,
                _ => {}
            }
        }
    }
}

impl Parser for HtmlParser {
    fn name(&self) -> &'static str {
        "html-parser"
    }

    fn supported_mime_types(&self) -> &[MimeType] {
        SUPPORTED
    }

    fn parse(&self, data: &DataSource, emitter: &mut Emitter<'_, '_>) -> Result<()> {
        let text = to_utf8(data.span()?);
        if !emitter.open_document(Document::empty())? {
            return Ok(());
        }

        let mut ctx = HtmlContext {
            emitter: &mut *emitter,
            inline: InlineContext::default(),
            open: Vec::new(),
            in_script: false,
            in_title: false,
            in_style: false,
            style_text: String::new(),
            turn_off_ul_enumeration: false,
            turn_off_ol_enumeration: false,
        };
        let mut stream = XmlStream::lenient(text.as_bytes());
        loop {
            if ctx.emitter.stopped() {
                return Ok(());
            }
            match stream.next_event()? {
                XmlEvent::Done => break,
                XmlEvent::Comment(_) => {}
                XmlEvent::Text(text) | XmlEvent::CData(text) => {
                    if ctx.in_style {
                        ctx.style_text.push_str(&text);
                    } else if !ctx.in_script && !ctx.in_title {
                        ctx.inline.add_text(&text);
                    }
                }
                XmlEvent::StartElement { name, attributes } => {
                    handle_start(&mut ctx, &mut stream, &name, &attributes)?;
                }
                XmlEvent::EndElement { name } => {
                    handle_end(&mut ctx, &name)?;
                }
            }
        }
        // Recover from unclosed elements in tag soup.
        ctx.flush_text(true)?;
        while let Some((kind, _)) = ctx.open.pop() {
            ctx.emitter.emit(kind.closer())?;
        }
        emitter.emit(Message::CloseDocument)?;
        Ok(())
    }
}

fn handle_start(
    ctx: &mut HtmlContext<'_, '_, '_>,
    stream: &mut XmlStream<'_>,
    name: &str,
    attributes: &[(String, String)],
) -> Result<()> {
    ctx.flush_text(is_block_level(name))?;
    let lower = name.to_ascii_lowercase();
    match lower.as_str() {
        "script" => {
            ctx.in_script = true;
            return Ok(());
        }
        "style" => {
            ctx.in_style = true;
            return Ok(());
        }
        "title" => {
            ctx.in_title = true;
            return Ok(());
        }
        "br" => {
            ctx.inline.last_char = None;
            ctx.emitter.emit(Message::BreakLine(styling_from(attributes)))?;
            return Ok(());
        }
        "img" => {
            emit_image(ctx, attributes)?;
            return Ok(());
        }
        "head" | "meta" | "hr" | "input" | "link" | "base" | "col" | "area" => {
            return Ok(());
        }
        _ => {}
    }

    let Some(kind) = Structural::from_tag(&lower) else {
        return Ok(());
    };
    let styling = styling_from(attributes);
    let message = match kind {
        Structural::Paragraph => Message::Paragraph(styling),
        Structural::Section => Message::Section(styling),
        Structural::Span => Message::Span(styling),
        Structural::Bold => Message::Bold(styling),
        Structural::Italic => Message::Italic(styling),
        Structural::Underline => Message::Underline(styling),
        Structural::Link => Message::Link(Link {
            url: attr(attributes, "href").map(|s| s.to_string()),
            styling,
        }),
        Structural::List => {
            let list_type = if lower == "ol" {
                if ctx.turn_off_ol_enumeration { "none" } else { "decimal" }
            } else if ctx.turn_off_ul_enumeration {
                "none"
            } else {
                "disc"
            };
            Message::List(List {
                list_type: list_type.to_string(),
                styling,
            })
        }
        Structural::ListItem => Message::ListItem(styling),
        Structural::Table => Message::Table(styling),
        Structural::TableRow => Message::TableRow(styling),
        Structural::TableCell => Message::TableCell(styling),
        Structural::Caption => Message::Caption(styling),
        Structural::Header => Message::Header,
        Structural::Footer => Message::Footer,
    };
    if is_void(&lower) {
        // Not reachable for the current mapping, but keeps the invariant
        // that void elements never land on the open stack.
        ctx.emitter.emit(message)?;
        return Ok(());
    }
    match ctx.emitter.emit(message)? {
        crate::message::Continuation::Skip => {
            // The subtree is unwanted: consume it and emit the closer.
            stream.skip_element(name)?;
            ctx.emitter.emit(kind.closer())?;
        }
        _ => ctx.open.push((kind, lower)),
    }
    Ok(())
}

fn handle_end(ctx: &mut HtmlContext<'_, '_, '_>, name: &str) -> Result<()> {
    let lower = name.to_ascii_lowercase();
    match lower.as_str() {
        "script" => {
            ctx.in_script = false;
            return Ok(());
        }
        "style" => {
            ctx.in_style = false;
            ctx.parse_css();
            let css_text = std::mem::take(&mut ctx.style_text);
            ctx.emitter.emit(Message::Style(Style { css_text }))?;
            return Ok(());
        }
        "title" => {
            ctx.in_title = false;
            return Ok(());
        }
        _ => {}
    }
    ctx.flush_text(is_block_level(&lower))?;
    let Some(position) = ctx.open.iter().rposition(|(_, n)| *n == lower) else {
        return Ok(());
    };
    // Close intervening unclosed elements first (tag-soup recovery).
    while ctx.open.len() > position {
        let (kind, _) = ctx.open.pop().expect("length checked above");
        ctx.emitter.emit(kind.closer())?;
    }
    Ok(())
}

fn emit_image(ctx: &mut HtmlContext<'_, '_, '_>, attributes: &[(String, String)]) -> Result<()> {
    let src = attr(attributes, "src").unwrap_or_default();
    let alt = attr(attributes, "alt").map(|s| s.to_string());
    let source = match src.strip_prefix("data:") {
        Some(data_url) => {
            let payload = data_url.split_once("base64,").map(|(_, p)| p);
            match payload {
                Some(payload) => {
                    let bytes = base64::engine::general_purpose::STANDARD
                        .decode(payload.trim())
                        .unwrap_or_default();
                    DataSource::from_bytes(bytes)
                }
                None => DataSource::from_bytes(Vec::new()),
            }
        }
        None => DataSource::from_bytes(Vec::new()),
    };
    ctx.emitter.emit(Message::Image(Image {
        source,
        alt,
        position: None,
        structured_content: if src.is_empty() {
            None
        } else {
            Some(src.to_string())
        },
        styling: styling_from(attributes),
    }))?;
    Ok(())
}
