#![cfg(feature = "office")]

//! PPT (PowerPoint 97-2003) parser.
//!
//! Walks the record tree of the `PowerPoint Document` OLE stream. Every
//! record has an 8-byte header; container records (version nibble 0xF)
//! hold child records, text lives in `TextCharsAtom` (UTF-16LE) and
//! `TextBytesAtom` (8-bit) leaves. The `CurrentUser` stream's header
//! token distinguishes encrypted decks.

use crate::data_source::DataSource;
use crate::error::{DocpipeError, Result};
use crate::locks::PARSER_MUTEX;
use crate::message::{Document, Message, Styling};
use crate::mime::MimeType;
use crate::parsers::{Emitter, Parser, oshared};
use std::io::{Cursor, Read};
use std::sync::Arc;

static SUPPORTED: &[MimeType] = &[
    MimeType::from_static(crate::mime::PPT_MIME_TYPE),
    MimeType::from_static("application/vnd.ms-powerpoint.presentation.macroenabled.12"),
    MimeType::from_static("application/vnd.ms-powerpoint.template.macroenabled.12"),
    MimeType::from_static("application/vnd.ms-powerpoint.slideshow.macroenabled.12"),
];

/// Unicode (UTF-16LE) text atom.
const RT_TEXT_CHARS_ATOM: u16 = 0x0FA0;
/// ANSI text atom.
const RT_TEXT_BYTES_ATOM: u16 = 0x0FA8;

/// `CurrentUser` header token of an unencrypted deck.
const HEADER_TOKEN_PLAIN: u32 = 0xE391_C05F;
/// Header token marking an encrypted deck.
const HEADER_TOKEN_ENCRYPTED: u32 = 0xF3D1_C4DF;

pub struct PptParser;

impl PptParser {
    pub fn new() -> Self {
        PptParser
    }
}

impl Default for PptParser {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_text_bytes(bytes: &[u8]) -> String {
    let (text, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
    text.into_owned()
}

fn decode_text_chars(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// PowerPoint text atoms separate lines with CR and may carry vertical
/// tabs for soft breaks.
fn normalize(text: &str) -> String {
    text.replace('\r', "\n").replace('\u{B}', "\n")
}

/// Collect the text atoms of one record run, containers first.
fn collect_text(buf: &[u8], texts: &mut Vec<String>) {
    let mut pos = 0usize;
    while pos + 8 <= buf.len() {
        let ver_and_instance = u16::from_le_bytes([buf[pos], buf[pos + 1]]);
        let rec_type = u16::from_le_bytes([buf[pos + 2], buf[pos + 3]]);
        let rec_len = u32::from_le_bytes([
            buf[pos + 4],
            buf[pos + 5],
            buf[pos + 6],
            buf[pos + 7],
        ]) as usize;
        pos += 8;
        let end = (pos + rec_len).min(buf.len());
        let payload = &buf[pos..end];
        if ver_and_instance & 0x000F == 0x000F {
            collect_text(payload, texts);
        } else {
            match rec_type {
                RT_TEXT_CHARS_ATOM => {
                    let text = normalize(&decode_text_chars(payload));
                    if !text.trim().is_empty() {
                        texts.push(text);
                    }
                }
                RT_TEXT_BYTES_ATOM => {
                    let text = normalize(&decode_text_bytes(payload));
                    if !text.trim().is_empty() {
                        texts.push(text);
                    }
                }
                _ => {}
            }
        }
        pos = end;
    }
}

fn assert_deck_not_encrypted<F: Read + std::io::Seek>(
    comp: &mut cfb::CompoundFile<F>,
) -> Result<()> {
    let Ok(mut stream) = comp.open_stream("Current User") else {
        return Ok(());
    };
    let mut buf = Vec::new();
    if stream.read_to_end(&mut buf).is_err() || buf.len() < 16 {
        return Ok(());
    }
    // CurrentUserAtom: record header, size, then the header token.
    let token = u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]);
    if token == HEADER_TOKEN_ENCRYPTED {
        return Err(DocpipeError::file_encrypted("PowerPoint deck encryption"));
    }
    if token != HEADER_TOKEN_PLAIN {
        tracing::debug!(token = format!("0x{token:08X}"), "unexpected CurrentUser token");
    }
    Ok(())
}

const OLE_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

impl Parser for PptParser {
    fn name(&self) -> &'static str {
        "ppt-parser"
    }

    fn supported_mime_types(&self) -> &[MimeType] {
        SUPPORTED
    }

    fn understands(&self, data: &DataSource) -> bool {
        data.has_highest_confidence_mime_type_in(SUPPORTED)
            && matches!(data.peek(8), Ok(head) if head == OLE_MAGIC)
    }

    fn parse(&self, data: &DataSource, emitter: &mut Emitter<'_, '_>) -> Result<()> {
        let cursor = Cursor::new(data.span()?.to_vec());
        let mut comp = cfb::CompoundFile::open(cursor).map_err(|e| {
            DocpipeError::uninterpretable_data_with_source("not an OLE compound document", e)
        })?;
        assert_deck_not_encrypted(&mut comp)?;
        let metadata = oshared::summary_metadata(&mut comp);
        if !emitter.open_document(Document::new(Arc::new(move || {
            metadata.clone()
        })))? {
            return Ok(());
        }

        let texts = {
            let _decode_guard = PARSER_MUTEX.lock();
            let mut stream = comp.open_stream("PowerPoint Document").map_err(|e| {
                DocpipeError::uninterpretable_data_with_source(
                    "missing PowerPoint Document stream",
                    e,
                )
            })?;
            let mut buf = Vec::new();
            stream.read_to_end(&mut buf)?;
            let mut texts = Vec::new();
            collect_text(&buf, &mut texts);
            texts
        };

        for text in texts {
            if emitter.stopped() {
                return Ok(());
            }
            if emitter.emit(Message::Paragraph(Styling::default()))?
                == crate::message::Continuation::Proceed
            {
                for (index, line) in text.split('\n').filter(|l| !l.is_empty()).enumerate() {
                    if index > 0 {
                        emitter.emit(Message::BreakLine(Styling::default()))?;
                    }
                    emitter.emit(Message::text(line))?;
                }
            }
            emitter.emit(Message::CloseParagraph)?;
        }

        emitter.emit(Message::CloseDocument)?;
        Ok(())
    }
}
