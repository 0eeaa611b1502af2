//! RTF parser.
//!
//! A control-word tokenizer with a group state stack. Destination groups
//! (font tables, stylesheets, embedded objects) are skipped; `\par`
//! closes the current paragraph; bold/italic/underline toggles wrap the
//! affected text runs in properly nested formatting pairs.

use crate::charset;
use crate::data_source::DataSource;
use crate::error::{DocpipeError, Result};
use crate::message::{Document, Message, Styling};
use crate::mime::MimeType;
use crate::parsers::{Emitter, Parser};
use encoding_rs::Encoding;

static SUPPORTED: &[MimeType] = &[
    MimeType::from_static(crate::mime::RTF_MIME_TYPE),
    MimeType::from_static("text/rtf"),
    MimeType::from_static("text/richtext"),
];

pub struct RtfParser;

impl RtfParser {
    pub fn new() -> Self {
        RtfParser
    }
}

impl Default for RtfParser {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Default, PartialEq)]
struct CharFormat {
    bold: bool,
    italic: bool,
    underline: bool,
}

#[derive(Clone, Copy)]
struct GroupState {
    format: CharFormat,
    /// Number of fallback bytes following a `\u` escape.
    unicode_skip: usize,
}

impl Default for GroupState {
    fn default() -> Self {
        GroupState {
            format: CharFormat::default(),
            unicode_skip: 1,
        }
    }
}

/// Destination control words whose whole group carries no document text.
const SKIPPED_DESTINATIONS: &[&str] = &[
    "fonttbl",
    "colortbl",
    "stylesheet",
    "info",
    "pict",
    "object",
    "themedata",
    "colorschememapping",
    "datastore",
    "latentstyles",
    "listtable",
    "listoverridetable",
    "rsidtbl",
    "generator",
    "xmlnstbl",
];

struct RtfContext<'e, 'a, 'c> {
    emitter: &'e mut Emitter<'a, 'c>,
    encoding: &'static Encoding,
    groups: Vec<GroupState>,
    pending: String,
    /// Raw (pre-decode) byte run collected from `\'hh` escapes and plain text.
    pending_bytes: Vec<u8>,
    paragraph_open: bool,
}

impl<'e, 'a, 'c> RtfContext<'e, 'a, 'c> {
    fn new(emitter: &'e mut Emitter<'a, 'c>) -> Self {
        RtfContext {
            emitter,
            encoding: encoding_rs::WINDOWS_1252,
            groups: vec![GroupState::default()],
            pending: String::new(),
            pending_bytes: Vec::new(),
            paragraph_open: false,
        }
    }

    fn state(&mut self) -> &mut GroupState {
        self.groups.last_mut().expect("group stack never empties")
    }

    fn decode_pending_bytes(&mut self) {
        if self.pending_bytes.is_empty() {
            return;
        }
        let (decoded, _, _) = self.encoding.decode(&self.pending_bytes);
        self.pending.push_str(&decoded);
        self.pending_bytes.clear();
    }

    fn push_char(&mut self, ch: char) {
        self.decode_pending_bytes();
        self.pending.push(ch);
    }

    fn push_byte(&mut self, byte: u8) {
        self.pending_bytes.push(byte);
    }

    fn flush_text(&mut self) -> Result<()> {
        self.decode_pending_bytes();
        if self.pending.is_empty() {
            return Ok(());
        }
        let text = std::mem::take(&mut self.pending);
        if !self.paragraph_open {
            self.emitter.emit(Message::Paragraph(Styling::default()))?;
            self.paragraph_open = true;
        }
        let format = self.groups.last().map(|g| g.format).unwrap_or_default();
        if format.bold {
            self.emitter.emit(Message::Bold(Styling::default()))?;
        }
        if format.italic {
            self.emitter.emit(Message::Italic(Styling::default()))?;
        }
        if format.underline {
            self.emitter.emit(Message::Underline(Styling::default()))?;
        }
        self.emitter.emit(Message::text(text))?;
        if format.underline {
            self.emitter.emit(Message::CloseUnderline)?;
        }
        if format.italic {
            self.emitter.emit(Message::CloseItalic)?;
        }
        if format.bold {
            self.emitter.emit(Message::CloseBold)?;
        }
        Ok(())
    }

    fn close_paragraph(&mut self) -> Result<()> {
        self.flush_text()?;
        if self.paragraph_open {
            self.emitter.emit(Message::CloseParagraph)?;
            self.paragraph_open = false;
        }
        Ok(())
    }

    fn break_line(&mut self) -> Result<()> {
        self.flush_text()?;
        if !self.paragraph_open {
            self.emitter.emit(Message::Paragraph(Styling::default()))?;
            self.paragraph_open = true;
        }
        self.emitter.emit(Message::BreakLine(Styling::default()))?;
        Ok(())
    }
}

impl Parser for RtfParser {
    fn name(&self) -> &'static str {
        "rtf-parser"
    }

    fn supported_mime_types(&self) -> &[MimeType] {
        SUPPORTED
    }

    fn understands(&self, data: &DataSource) -> bool {
        if data.has_highest_confidence_mime_type_in(SUPPORTED) {
            return true;
        }
        matches!(data.peek(5), Ok(head) if head.starts_with(b"{\\rtf"))
    }

    fn parse(&self, data: &DataSource, emitter: &mut Emitter<'_, '_>) -> Result<()> {
        let bytes = data.span()?;
        if !bytes.starts_with(b"{\\rtf") {
            return Err(DocpipeError::uninterpretable_data(
                "missing {\\rtf header",
            ));
        }
        if !emitter.open_document(Document::empty())? {
            return Ok(());
        }
        let mut ctx = RtfContext::new(emitter);
        parse_group(bytes, &mut ctx)?;
        ctx.close_paragraph()?;
        ctx.emitter.emit(Message::CloseDocument)?;
        Ok(())
    }
}

fn parse_group(bytes: &[u8], ctx: &mut RtfContext<'_, '_, '_>) -> Result<()> {
    let mut i = 0usize;
    while i < bytes.len() {
        if ctx.emitter.stopped() {
            return Ok(());
        }
        match bytes[i] {
            b'{' => {
                let inherited = *ctx.groups.last().expect("group stack never empties");
                ctx.groups.push(inherited);
                i += 1;
            }
            b'}' => {
                ctx.flush_text()?;
                if ctx.groups.len() > 1 {
                    ctx.groups.pop();
                }
                i += 1;
            }
            b'\\' => {
                i += 1;
                if i >= bytes.len() {
                    break;
                }
                match bytes[i] {
                    b'\'' => {
                        // \'hh - a byte in the current codepage.
                        if i + 2 < bytes.len()
                            && let Ok(hex) = std::str::from_utf8(&bytes[i + 1..i + 3])
                            && let Ok(byte) = u8::from_str_radix(hex, 16)
                        {
                            ctx.push_byte(byte);
                        }
                        i += 3;
                    }
                    b'\\' | b'{' | b'}' => {
                        ctx.push_char(bytes[i] as char);
                        i += 1;
                    }
                    b'~' => {
                        ctx.push_char('\u{A0}');
                        i += 1;
                    }
                    b'*' => {
                        // \* introduces an ignorable destination.
                        skip_current_group(bytes, &mut i, ctx);
                    }
                    _ => {
                        let (word, numeric, next) = read_control_word(bytes, i);
                        i = next;
                        handle_control_word(bytes, &mut i, ctx, &word, numeric)?;
                    }
                }
            }
            b'\r' | b'\n' => i += 1,
            other => {
                ctx.push_byte(other);
                i += 1;
            }
        }
    }
    Ok(())
}

/// Read the alphabetic control word at `start` and its optional signed
/// numeric argument; a single trailing space is consumed.
fn read_control_word(bytes: &[u8], start: usize) -> (String, Option<i32>, usize) {
    let mut i = start;
    let mut word = String::new();
    while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
        word.push(bytes[i] as char);
        i += 1;
    }
    let mut numeric = None;
    let negative = i < bytes.len() && bytes[i] == b'-';
    if negative {
        i += 1;
    }
    let digits_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i > digits_start
        && let Ok(value) = std::str::from_utf8(&bytes[digits_start..i])
            .unwrap_or("")
            .parse::<i32>()
    {
        numeric = Some(if negative { -value } else { value });
    }
    if i < bytes.len() && bytes[i] == b' ' {
        i += 1;
    }
    (word, numeric, i)
}

/// Skip to the end of the group that is currently open at position `i`
/// (the matching unbalanced `}`), popping the state pushed for it.
fn skip_current_group(bytes: &[u8], i: &mut usize, ctx: &mut RtfContext<'_, '_, '_>) {
    let mut depth = 1usize;
    while *i < bytes.len() && depth > 0 {
        match bytes[*i] {
            b'{' => depth += 1,
            b'}' => depth -= 1,
            b'\\' => {
                *i += 1;
            }
            _ => {}
        }
        *i += 1;
    }
    if ctx.groups.len() > 1 {
        ctx.groups.pop();
    }
}

fn handle_control_word(
    bytes: &[u8],
    i: &mut usize,
    ctx: &mut RtfContext<'_, '_, '_>,
    word: &str,
    numeric: Option<i32>,
) -> Result<()> {
    match word {
        "par" | "sect" | "page" => ctx.close_paragraph()?,
        "line" => ctx.break_line()?,
        "tab" => ctx.push_char('\t'),
        "emdash" => ctx.push_char('\u{2014}'),
        "endash" => ctx.push_char('\u{2013}'),
        "b" => {
            ctx.flush_text()?;
            ctx.state().format.bold = numeric != Some(0);
        }
        "i" => {
            ctx.flush_text()?;
            ctx.state().format.italic = numeric != Some(0);
        }
        "ul" => {
            ctx.flush_text()?;
            ctx.state().format.underline = numeric != Some(0);
        }
        "ulnone" => {
            ctx.flush_text()?;
            ctx.state().format.underline = false;
        }
        "ansicpg" => {
            if let Some(cp) = numeric
                && let Some(encoding) = charset::encoding_for_codepage(cp as u16)
            {
                ctx.encoding = encoding;
            }
        }
        "uc" => {
            if let Some(n) = numeric
                && n >= 0
            {
                ctx.state().unicode_skip = n as usize;
            }
        }
        "u" => {
            if let Some(code) = numeric {
                // Negative values encode the 16-bit range above 0x7FFF.
                let code = if code < 0 { code + 65_536 } else { code };
                if let Some(ch) = char::from_u32(code as u32) {
                    ctx.push_char(ch);
                }
                let skip = ctx.groups.last().map(|g| g.unicode_skip).unwrap_or(1);
                skip_unicode_fallback(bytes, i, skip);
            }
        }
        destination if SKIPPED_DESTINATIONS.contains(&destination) => {
            skip_current_group(bytes, i, ctx);
        }
        _ => {}
    }
    Ok(())
}

/// Consume the fallback characters that follow a `\u` escape.
fn skip_unicode_fallback(bytes: &[u8], i: &mut usize, count: usize) {
    let mut remaining = count;
    while remaining > 0 && *i < bytes.len() {
        if bytes[*i] == b'\\' && *i + 3 < bytes.len() && bytes[*i + 1] == b'\'' {
            *i += 4;
        } else if bytes[*i] == b'{' || bytes[*i] == b'}' {
            break;
        } else {
            *i += 1;
        }
        remaining -= 1;
    }
}
