#![cfg(feature = "pdf")]

//! PDF parser.
//!
//! Drives PDFium (serialized behind the process-wide mutex) to enumerate
//! pages and their text with bounding boxes and font sizes. Characters
//! merge into runs, runs sort into reading order (y descending with an
//! adaptive tolerance from the larger of the two font sizes or heights,
//! then x ascending), and the emission pass applies the line-break and
//! word-gap heuristics: a vertical gap over 65% of the line height breaks
//! ⌈gap/line-height⌉ times, an x regression on the same line breaks once,
//! and a horizontal gap wider than font-size/3.5 becomes a single space.

use crate::data_source::DataSource;
use crate::error::{DocpipeError, Result};
use crate::locks::PDFIUM_MUTEX;
use crate::message::{DateTime, Document, Message, Metadata, Position, Styling, Text};
use crate::mime::MimeType;
use crate::parsers::{Emitter, Parser};
use pdfium_render::prelude::*;
use std::sync::Arc;

static SUPPORTED: &[MimeType] = &[MimeType::from_static(crate::mime::PDF_MIME_TYPE)];

/// Vertical gap factor above which lines are considered separated.
const LINE_GAP_FACTOR: f32 = 0.65;
/// Fraction of the font size a horizontal gap must exceed to count as a
/// missing space between runs.
const WORD_GAP_DIVISOR: f32 = 3.5;

pub struct PdfParser;

impl PdfParser {
    pub fn new() -> Self {
        PdfParser
    }
}

impl Default for PdfParser {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq)]
struct CharBox {
    ch: char,
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    font_size: f32,
}

#[derive(Debug, Clone, PartialEq)]
struct TextRun {
    text: String,
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    font_size: f32,
}

impl TextRun {
    fn right(&self) -> f32 {
        self.x + self.width
    }
}

/// Merge characters (in extraction order) into contiguous baseline runs.
fn merge_chars_into_runs(chars: Vec<CharBox>) -> Vec<TextRun> {
    let mut runs: Vec<TextRun> = Vec::new();
    for c in chars {
        let extend = match runs.last() {
            Some(run) => {
                let same_baseline = (run.y - c.y).abs() <= 0.2 * run.font_size.max(c.font_size);
                let contiguous = c.x >= run.x && (c.x - run.right()).abs() <= c.font_size.max(1.0);
                same_baseline && contiguous
            }
            None => false,
        };
        if extend {
            let run = runs.last_mut().expect("checked above");
            run.text.push(c.ch);
            run.width = (c.x + c.width - run.x).max(run.width);
            run.height = run.height.max(c.height);
            run.font_size = run.font_size.max(c.font_size);
        } else {
            runs.push(TextRun {
                text: c.ch.to_string(),
                x: c.x,
                y: c.y,
                width: c.width,
                height: c.height,
                font_size: c.font_size,
            });
        }
    }
    runs
}

fn adaptive_tolerance(a: &TextRun, b: &TextRun) -> f32 {
    0.5 * a
        .font_size
        .max(b.font_size)
        .max(a.height)
        .max(b.height)
}

/// Reading order: top of the page first (y descending in PDF space), left
/// to right within a line.
fn sort_reading_order(runs: &mut [TextRun]) {
    runs.sort_by(|a, b| {
        let tolerance = adaptive_tolerance(a, b);
        if (a.y - b.y).abs() <= tolerance {
            a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal)
        } else {
            b.y.partial_cmp(&a.y).unwrap_or(std::cmp::Ordering::Equal)
        }
    });
}

fn ends_with_whitespace(s: &str) -> bool {
    s.chars().next_back().map(|c| c.is_whitespace()).unwrap_or(false)
}

fn begins_with_whitespace(s: &str) -> bool {
    s.chars().next().map(|c| c.is_whitespace()).unwrap_or(false)
}

/// Emit one page worth of sorted runs with the break/space heuristics.
fn emit_runs(runs: &[TextRun], emitter: &mut Emitter<'_, '_>) -> Result<()> {
    let mut previous: Option<&TextRun> = None;
    if runs.is_empty() {
        return Ok(());
    }
    if emitter.emit(Message::Paragraph(Styling::default()))? == crate::message::Continuation::Skip
    {
        emitter.emit(Message::CloseParagraph)?;
        return Ok(());
    }
    for run in runs {
        if emitter.stopped() {
            return Ok(());
        }
        if let Some(prev) = previous {
            let tolerance = adaptive_tolerance(prev, run);
            let same_line = (prev.y - run.y).abs() <= tolerance;
            if same_line {
                if run.x < prev.x {
                    emitter.emit(Message::BreakLine(Styling::default()))?;
                } else {
                    let gap = run.x - prev.right();
                    if gap > run.font_size.max(prev.font_size) / WORD_GAP_DIVISOR
                        && !ends_with_whitespace(&prev.text)
                        && !begins_with_whitespace(&run.text)
                    {
                        emitter.emit(Message::text(" "))?;
                    }
                }
            } else {
                let line_height = prev
                    .height
                    .max(run.height)
                    .max(run.font_size)
                    .max(prev.font_size)
                    .max(1.0);
                let gap = prev.y - run.y;
                if gap > LINE_GAP_FACTOR * line_height {
                    let breaks = (gap / line_height).round() as usize;
                    for _ in 0..breaks.max(1) {
                        emitter.emit(Message::BreakLine(Styling::default()))?;
                    }
                } else {
                    emitter.emit(Message::BreakLine(Styling::default()))?;
                }
            }
        }
        emitter.emit(Message::Text(Text {
            text: run.text.clone(),
            position: Some(Position {
                x: Some(run.x),
                y: Some(run.y),
                width: Some(run.width),
                height: Some(run.height),
            }),
            font_size: Some(run.font_size),
        }))?;
        previous = Some(run);
    }
    emitter.emit(Message::CloseParagraph)?;
    Ok(())
}

/// PDF timestamps look like `D:20200101120000Z` or carry an offset.
fn parse_pdf_date(value: &str) -> Option<DateTime> {
    let digits = value.strip_prefix("D:").unwrap_or(value);
    let field = |range: std::ops::Range<usize>| -> Option<i64> {
        digits.get(range)?.parse::<i64>().ok()
    };
    Some(DateTime {
        year: field(0..4)? as i32,
        month: field(4..6).unwrap_or(1) as u8,
        day: field(6..8).unwrap_or(1) as u8,
        hour: field(8..10).unwrap_or(0) as u8,
        minute: field(10..12).unwrap_or(0) as u8,
        second: field(12..14).unwrap_or(0) as u8,
    })
}

fn looks_like_password_error(error: &PdfiumError) -> bool {
    let rendered = error.to_string();
    rendered.contains("assword")
}

impl Parser for PdfParser {
    fn name(&self) -> &'static str {
        "pdf-parser"
    }

    fn supported_mime_types(&self) -> &[MimeType] {
        SUPPORTED
    }

    fn understands(&self, data: &DataSource) -> bool {
        data.has_highest_confidence_mime_type_in(SUPPORTED)
            && matches!(data.peek(5), Ok(head) if head.starts_with(b"%PDF-"))
    }

    fn parse(&self, data: &DataSource, emitter: &mut Emitter<'_, '_>) -> Result<()> {
        let bytes = data.span()?;
        let _pdfium_guard = PDFIUM_MUTEX.lock();
        let bindings = Pdfium::bind_to_system_library().map_err(|e| {
            DocpipeError::external_library(format!("PDFium could not be loaded: {e}"))
        })?;
        let pdfium = Pdfium::new(bindings);
        let document = pdfium.load_pdf_from_byte_slice(bytes, None).map_err(|e| {
            if looks_like_password_error(&e) {
                DocpipeError::file_encrypted("PDF password protection")
            } else {
                DocpipeError::uninterpretable_data(format!("PDF could not be opened: {e}"))
            }
        })?;

        let metadata = extract_metadata(&document);
        if !emitter.open_document(Document::new(Arc::new(move || {
            metadata.clone()
        })))? {
            return Ok(());
        }

        let page_count = document.pages().len();
        for index in 0..page_count {
            // Downstream stop requests take effect at page boundaries.
            if emitter.stopped() {
                return Ok(());
            }
            let page = match document.pages().get(index) {
                Ok(page) => page,
                Err(e) => {
                    emitter.emit(Message::error(DocpipeError::external_library(format!(
                        "page {index} could not be loaded: {e}"
                    ))))?;
                    continue;
                }
            };
            match emitter.emit(Message::Page)? {
                crate::message::Continuation::Skip => {
                    emitter.emit(Message::ClosePage)?;
                    continue;
                }
                crate::message::Continuation::Stop => return Ok(()),
                crate::message::Continuation::Proceed => {}
            }
            match collect_chars(&page) {
                Ok(chars) => {
                    let mut runs = merge_chars_into_runs(chars);
                    sort_reading_order(&mut runs);
                    emit_runs(&runs, emitter)?;
                }
                Err(e) => {
                    emitter.emit(Message::error(e))?;
                }
            }
            emitter.emit(Message::ClosePage)?;
        }

        emitter.emit(Message::CloseDocument)?;
        Ok(())
    }
}

fn collect_chars(page: &PdfPage<'_>) -> Result<Vec<CharBox>> {
    let page_text = page.text().map_err(|e| {
        DocpipeError::external_library(format!("page text could not be loaded: {e}"))
    })?;
    let chars = page_text.chars();
    let count = chars.len();
    let mut boxes = Vec::with_capacity(count as usize);
    for index in 0..count {
        let Ok(pdf_char) = chars.get(index) else {
            continue;
        };
        let Some(ch) = pdf_char.unicode_char() else {
            continue;
        };
        let font_size = pdf_char.unscaled_font_size().value;
        let font_size = if font_size > 0.0 { font_size } else { 12.0 };
        let Ok(bounds) = pdf_char.loose_bounds() else {
            continue;
        };
        boxes.push(CharBox {
            ch,
            x: bounds.left().value,
            y: bounds.bottom().value,
            width: bounds.width().value,
            height: bounds.height().value,
            font_size,
        });
    }
    Ok(boxes)
}

fn extract_metadata(document: &PdfDocument<'_>) -> Metadata {
    let tags = document.metadata();
    let mut metadata = Metadata {
        page_count: Some(document.pages().len() as usize),
        ..Default::default()
    };
    if let Some(author) = tags.get(PdfDocumentMetadataTagType::Author) {
        let value = author.value().to_string();
        if !value.is_empty() {
            metadata.author = Some(value);
        }
    }
    if let Some(created) = tags.get(PdfDocumentMetadataTagType::CreationDate) {
        metadata.creation_date = parse_pdf_date(created.value());
    }
    if let Some(modified) = tags.get(PdfDocumentMetadataTagType::ModificationDate) {
        metadata.last_modification_date = parse_pdf_date(modified.value());
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MessageCallbacks;
    use crate::message::Continuation;

    fn run_of(text: &str, x: f32, y: f32, font_size: f32) -> TextRun {
        TextRun {
            text: text.to_string(),
            x,
            y,
            width: text.len() as f32 * font_size * 0.5,
            height: font_size,
            font_size,
        }
    }

    fn collect_emissions(runs: &[TextRun]) -> Vec<Message> {
        let mut collected = Vec::new();
        let mut further = |m: Message| {
            collected.push(m);
            Ok(Continuation::Proceed)
        };
        let mut back = |_m: Message| Ok(Continuation::Proceed);
        let mut callbacks = MessageCallbacks::new(&mut further, &mut back);
        let mut emitter = crate::parsers::Emitter::new(&mut callbacks);
        emit_runs(runs, &mut emitter).unwrap();
        drop(callbacks);
        collected
    }

    fn rendered(messages: &[Message]) -> String {
        messages
            .iter()
            .filter_map(|m| match m {
                Message::Text(t) => Some(t.text.clone()),
                Message::BreakLine(_) => Some("\n".to_string()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_reading_order_sorts_lines_top_down() {
        let mut runs = vec![
            run_of("bottom", 72.0, 100.0, 12.0),
            run_of("top", 72.0, 700.0, 12.0),
            run_of("middle", 72.0, 400.0, 12.0),
        ];
        sort_reading_order(&mut runs);
        let texts: Vec<_> = runs.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["top", "middle", "bottom"]);
    }

    #[test]
    fn test_same_line_sorted_by_x() {
        let mut runs = vec![
            run_of("World", 108.0, 720.0, 12.0),
            run_of("Hello", 72.0, 720.0, 12.0),
        ];
        sort_reading_order(&mut runs);
        assert_eq!(runs[0].text, "Hello");
        assert_eq!(runs[1].text, "World");
    }

    #[test]
    fn test_word_gap_inserts_single_space() {
        // "Hello" at x=72, five chars at width 6 each ends at 102; "World"
        // at 108 leaves a 6pt gap, above 12/3.5.
        let hello = TextRun {
            text: "Hello".to_string(),
            x: 72.0,
            y: 720.0,
            width: 30.0,
            height: 12.0,
            font_size: 12.0,
        };
        let world = TextRun {
            text: "World".to_string(),
            x: 108.0,
            y: 720.0,
            width: 30.0,
            height: 12.0,
            font_size: 12.0,
        };
        let messages = collect_emissions(&[hello, world]);
        assert_eq!(rendered(&messages), "Hello World");
    }

    #[test]
    fn test_small_gap_keeps_runs_joined() {
        let a = TextRun {
            text: "jo".to_string(),
            x: 72.0,
            y: 720.0,
            width: 12.0,
            height: 12.0,
            font_size: 12.0,
        };
        let b = TextRun {
            text: "ined".to_string(),
            x: 85.0,
            y: 720.0,
            width: 24.0,
            height: 12.0,
            font_size: 12.0,
        };
        let messages = collect_emissions(&[a, b]);
        assert_eq!(rendered(&messages), "joined");
    }

    #[test]
    fn test_line_advance_emits_break() {
        let first = run_of("first", 72.0, 720.0, 12.0);
        let second = run_of("second", 72.0, 706.0, 12.0);
        let messages = collect_emissions(&[first, second]);
        assert_eq!(rendered(&messages), "first\nsecond");
    }

    #[test]
    fn test_large_vertical_gap_emits_multiple_breaks() {
        let first = run_of("first", 72.0, 720.0, 12.0);
        // A 36pt baseline gap at 12pt line height rounds to three breaks.
        let second = run_of("second", 72.0, 684.0, 12.0);
        let messages = collect_emissions(&[first, second]);
        assert_eq!(rendered(&messages), "first\n\n\nsecond");
    }

    #[test]
    fn test_x_regression_on_same_line_breaks_once() {
        let right = run_of("right", 300.0, 720.0, 12.0);
        let left = TextRun {
            text: "left".to_string(),
            x: 72.0,
            y: 721.0,
            width: 24.0,
            height: 12.0,
            font_size: 12.0,
        };
        let messages = collect_emissions(&[right, left]);
        assert_eq!(rendered(&messages), "right\nleft");
    }

    #[test]
    fn test_empty_page_emits_nothing() {
        let messages = collect_emissions(&[]);
        assert!(messages.is_empty());
    }

    #[test]
    fn test_merge_chars_into_runs() {
        let chars = vec![
            CharBox { ch: 'H', x: 72.0, y: 720.0, width: 6.0, height: 12.0, font_size: 12.0 },
            CharBox { ch: 'i', x: 78.0, y: 720.0, width: 4.0, height: 12.0, font_size: 12.0 },
            // Far away: a new run.
            CharBox { ch: 'X', x: 300.0, y: 720.0, width: 6.0, height: 12.0, font_size: 12.0 },
        ];
        let runs = merge_chars_into_runs(chars);
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].text, "Hi");
        assert_eq!(runs[1].text, "X");
    }

    #[test]
    fn test_parse_pdf_date() {
        assert_eq!(
            parse_pdf_date("D:20200101120000Z"),
            Some(DateTime::new(2020, 1, 1, 12, 0, 0))
        );
        assert_eq!(
            parse_pdf_date("D:2020"),
            Some(DateTime::new(2020, 1, 1, 0, 0, 0))
        );
        assert_eq!(parse_pdf_date("garbage"), None);
    }
}
