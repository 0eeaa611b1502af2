#![cfg(feature = "office")]

//! DOC (Word 97-2003) parser.
//!
//! Reads the FIB from the `WordDocument` stream, follows the CLX in the
//! `0Table`/`1Table` stream to the piece table, and walks the pieces
//! (CP1252-compressed or UTF-16LE). Paragraph marks become paragraph
//! messages, cell marks become tabs. The FIB encryption flag fails the
//! parse with a file-encrypted error.

use crate::data_source::DataSource;
use crate::error::{DocpipeError, Result};
use crate::locks::PARSER_MUTEX;
use crate::message::{Document, Message, Styling};
use crate::mime::MimeType;
use crate::parsers::{Emitter, Parser, oshared};
use std::io::{Cursor, Read};
use std::sync::Arc;

static SUPPORTED: &[MimeType] = &[
    MimeType::from_static(crate::mime::DOC_MIME_TYPE),
    MimeType::from_static("application/vnd.ms-word"),
];

const WORD_MAGIC: u16 = 0xA5EC;

pub struct DocParser;

impl DocParser {
    pub fn new() -> Self {
        DocParser
    }
}

impl Default for DocParser {
    fn default() -> Self {
        Self::new()
    }
}

fn u16_at(buf: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_le_bytes(buf.get(at..at + 2)?.try_into().ok()?))
}

fn u32_at(buf: &[u8], at: usize) -> Option<u32> {
    Some(u32::from_le_bytes(buf.get(at..at + 4)?.try_into().ok()?))
}

fn decode_cp1252(bytes: &[u8]) -> String {
    let (text, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
    text.into_owned()
}

/// The pieces of the File Information Block the text walk needs.
struct Fib {
    n_fib: u16,
    ccp_text: usize,
    total_cp: usize,
    fc_clx: usize,
    lcb_clx: usize,
    uses_1table: bool,
}

fn parse_fib(word_doc: &[u8]) -> Result<Fib> {
    let w_ident = u16_at(word_doc, 0)
        .ok_or_else(|| DocpipeError::uninterpretable_data("WordDocument stream too short"))?;
    if w_ident != WORD_MAGIC {
        return Err(DocpipeError::uninterpretable_data(format!(
            "invalid Word magic number 0x{w_ident:04X}"
        )));
    }
    let n_fib = u16_at(word_doc, 2)
        .ok_or_else(|| DocpipeError::uninterpretable_data("FIB too short for nFib"))?;
    let flags = u16_at(word_doc, 0x0A)
        .ok_or_else(|| DocpipeError::uninterpretable_data("FIB too short for flags"))?;
    if flags & 0x0100 != 0 {
        return Err(DocpipeError::file_encrypted("Word document encryption"));
    }
    let uses_1table = flags & 0x0200 != 0;

    // The variable-length FIB: csw counted words, cslw counted longs,
    // then the FC/LCB table.
    let csw_offset = 32;
    let csw = u16_at(word_doc, csw_offset)
        .ok_or_else(|| DocpipeError::uninterpretable_data("FIB too short for csw"))? as usize;
    let cslw_offset = csw_offset + 2 + csw * 2;
    let cslw = u16_at(word_doc, cslw_offset)
        .ok_or_else(|| DocpipeError::uninterpretable_data("FIB too short for cslw"))? as usize;
    let rg_lw_offset = cslw_offset + 2;

    // ccpText is the fourth long; the following six longs count the other
    // document parts (footnotes, headers, annotations, ...).
    let ccp_text = u32_at(word_doc, rg_lw_offset + 3 * 4)
        .ok_or_else(|| DocpipeError::uninterpretable_data("FIB too short for ccpText"))?
        as usize;
    let mut total_cp = ccp_text;
    for index in 4..=9 {
        if let Some(count) = u32_at(word_doc, rg_lw_offset + index * 4) {
            total_cp += count as usize;
        }
    }
    if total_cp > 0 {
        total_cp += 1;
    }

    let fc_lcb_offset = rg_lw_offset + cslw * 4 + 2;
    let fc_clx = u32_at(word_doc, fc_lcb_offset + 66 * 8).unwrap_or(0) as usize;
    let lcb_clx = u32_at(word_doc, fc_lcb_offset + 66 * 8 + 4).unwrap_or(0) as usize;

    Ok(Fib {
        n_fib,
        ccp_text,
        total_cp,
        fc_clx,
        lcb_clx,
        uses_1table,
    })
}

/// Find the PlcPcd inside the CLX, skipping property modifier entries.
fn plc_pcd<'t>(clx: &'t [u8]) -> Option<&'t [u8]> {
    let mut pos = 0usize;
    while pos < clx.len() {
        match clx[pos] {
            0x02 => {
                let lcb = u32_at(clx, pos + 1)? as usize;
                let start = pos + 5;
                return clx.get(start..(start + lcb).min(clx.len()));
            }
            0x01 => {
                let cb_grpprl = u16_at(clx, pos + 1)? as usize;
                pos += 3 + cb_grpprl;
            }
            _ => return None,
        }
    }
    None
}

fn text_from_piece_table(word_doc: &[u8], plc_pcd: &[u8], fib: &Fib) -> String {
    // (n+1) CPs of 4 bytes followed by n PCDs of 8 bytes.
    if plc_pcd.len() < 16 {
        return String::new();
    }
    let n = (plc_pcd.len() - 4) / 12;
    let mut result = String::with_capacity(fib.ccp_text);
    for i in 0..n {
        let Some(cp_start) = u32_at(plc_pcd, i * 4).map(|v| v as usize) else {
            break;
        };
        let Some(cp_end) = u32_at(plc_pcd, (i + 1) * 4).map(|v| v as usize) else {
            break;
        };
        if cp_start >= fib.total_cp || cp_start >= fib.ccp_text {
            break;
        }
        let pcd_offset = (n + 1) * 4 + i * 8;
        let Some(fc_raw) = u32_at(plc_pcd, pcd_offset + 2) else {
            break;
        };
        let char_count = cp_end.saturating_sub(cp_start);
        let chars_to_read = char_count.min(fib.ccp_text - cp_start);

        let compressed = fc_raw & 0x4000_0000 != 0;
        if compressed {
            let byte_offset = (fc_raw & 0x3FFF_FFFF) as usize / 2;
            if let Some(bytes) = word_doc.get(byte_offset..byte_offset + chars_to_read) {
                result.push_str(&decode_cp1252(bytes));
            }
        } else {
            let byte_offset = (fc_raw & 0x3FFF_FFFF) as usize;
            if let Some(bytes) = word_doc.get(byte_offset..byte_offset + chars_to_read * 2) {
                for chunk in bytes.chunks_exact(2) {
                    let unit = u16::from_le_bytes([chunk[0], chunk[1]]);
                    if let Some(ch) = char::from_u32(unit as u32) {
                        result.push(ch);
                    }
                }
            }
        }
    }
    result
}

/// Text stored contiguously at fcMin, used by files without a CLX.
fn text_contiguous(word_doc: &[u8], ccp_text: usize) -> String {
    let Some(fc_min) = u32_at(word_doc, 0x18).map(|v| v as usize) else {
        return String::new();
    };
    let Some(fc_mac) = u32_at(word_doc, 0x1C).map(|v| v as usize) else {
        return String::new();
    };
    if fc_min == 0 || fc_min >= word_doc.len() {
        return String::new();
    }
    let data_len = fc_mac.saturating_sub(fc_min).min(word_doc.len() - fc_min);
    let text_data = &word_doc[fc_min..fc_min + data_len];
    let null_count = text_data.iter().filter(|b| **b == 0).count();
    let is_unicode = data_len >= ccp_text * 2 || null_count > data_len / 4;
    if is_unicode {
        let units: Vec<u16> = text_data
            .chunks_exact(2)
            .take(ccp_text)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        decode_cp1252(&text_data[..text_data.len().min(ccp_text)])
    }
}

/// Resolve Word's in-text control characters: paragraph marks, cell and
/// row delimiters, page breaks, field codes.
fn normalize(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\r' => result.push('\n'),
            '\x07' => result.push('\t'),
            '\x0B' | '\x0C' => result.push('\n'),
            '\x01' | '\x08' | '\x13' | '\x14' | '\x15' => {}
            c if c < '\x20' && c != '\n' && c != '\t' => {}
            c => result.push(c),
        }
    }
    result
}

fn extract_text(word_doc: &[u8], table_stream: &[u8], fib: &Fib) -> Result<String> {
    if fib.n_fib < 101 {
        // Pre-Word 97: text follows the FIB directly.
        let ccp_text = u32_at(word_doc, 0x4C).unwrap_or(0) as usize;
        let fc_min = u32_at(word_doc, 0x18).unwrap_or(0) as usize;
        if fc_min == 0 || fc_min + ccp_text > word_doc.len() {
            return Err(DocpipeError::uninterpretable_data(
                "text range outside the WordDocument stream",
            ));
        }
        return Ok(normalize(&decode_cp1252(&word_doc[fc_min..fc_min + ccp_text])));
    }
    if fib.fc_clx == 0 || fib.lcb_clx == 0 {
        return Ok(normalize(&text_contiguous(word_doc, fib.ccp_text)));
    }
    let Some(clx) = table_stream.get(fib.fc_clx..fib.fc_clx + fib.lcb_clx) else {
        return Err(DocpipeError::uninterpretable_data(
            "CLX extends beyond the table stream",
        ));
    };
    match plc_pcd(clx) {
        Some(plc) => Ok(normalize(&text_from_piece_table(word_doc, plc, fib))),
        None => Ok(normalize(&text_contiguous(word_doc, fib.ccp_text))),
    }
}

const OLE_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

impl Parser for DocParser {
    fn name(&self) -> &'static str {
        "doc-parser"
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
        let metadata = oshared::summary_metadata(&mut comp);
        if !emitter.open_document(Document::new(Arc::new(move || {
            metadata.clone()
        })))? {
            return Ok(());
        }

        let text = {
            let _decode_guard = PARSER_MUTEX.lock();
            let word_doc = read_stream(&mut comp, "WordDocument")?;
            let fib = parse_fib(&word_doc)?;
            let table_stream = if fib.n_fib >= 101 {
                let name = if fib.uses_1table { "1Table" } else { "0Table" };
                read_stream(&mut comp, name).unwrap_or_default()
            } else {
                Vec::new()
            };
            extract_text(&word_doc, &table_stream, &fib)?
        };

        for line in text.split('\n') {
            if emitter.stopped() {
                return Ok(());
            }
            if line.is_empty() {
                continue;
            }
            if emitter.emit(Message::Paragraph(Styling::default()))? == crate::message::Continuation::Proceed {
                emitter.emit(Message::text(line))?;
            }
            emitter.emit(Message::CloseParagraph)?;
        }

        emitter.emit(Message::CloseDocument)?;
        Ok(())
    }
}

fn read_stream<F: Read + std::io::Seek>(
    comp: &mut cfb::CompoundFile<F>,
    name: &str,
) -> Result<Vec<u8>> {
    let mut stream = comp.open_stream(name).map_err(|e| {
        DocpipeError::uninterpretable_data_with_source(format!("missing {name} stream"), e)
    })?;
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf)?;
    Ok(buf)
}
