#![cfg(feature = "office")]

//! XLSB (binary workbook) parser.
//!
//! The BIFF12 framing inside the zip package: each record carries a
//! 1-2 byte id and a 1-4 byte 7-bit-varint length. The shared string
//! table comes from `xl/sharedStrings.bin`, cells from the worksheet
//! parts, with the same tab/newline row cursor as the BIFF parser.

use crate::data_source::DataSource;
use crate::error::{DocpipeError, Result};
use crate::message::{Document, Message};
use crate::mime::MimeType;
use crate::parsers::{Emitter, Parser};
use std::io::{Cursor, Read};
use zip::ZipArchive;

static SUPPORTED: &[MimeType] = &[MimeType::from_static(crate::mime::XLSB_MIME_TYPE)];

const BRT_ROW_HDR: u16 = 0x0000;
const BRT_CELL_RK: u16 = 0x0002;
const BRT_CELL_BOOL: u16 = 0x0004;
const BRT_CELL_REAL: u16 = 0x0005;
const BRT_CELL_ST: u16 = 0x0006;
const BRT_CELL_ISST: u16 = 0x0007;
const BRT_SST_ITEM: u16 = 0x0013;

pub struct XlsbParser;

impl XlsbParser {
    pub fn new() -> Self {
        XlsbParser
    }
}

impl Default for XlsbParser {
    fn default() -> Self {
        Self::new()
    }
}

/// One BIFF12 record.
struct Record<'b> {
    id: u16,
    payload: &'b [u8],
}

/// Iterate the BIFF12 stream framing.
struct RecordIter<'b> {
    buf: &'b [u8],
    pos: usize,
}

impl<'b> RecordIter<'b> {
    fn new(buf: &'b [u8]) -> Self {
        RecordIter { buf, pos: 0 }
    }
}

impl<'b> Iterator for RecordIter<'b> {
    type Item = Record<'b>;

    fn next(&mut self) -> Option<Record<'b>> {
        let buf = self.buf;
        if self.pos >= buf.len() {
            return None;
        }
        // Record id: 7 bits per byte, at most two bytes.
        let b0 = buf[self.pos];
        self.pos += 1;
        let id = if b0 & 0x80 != 0 {
            let b1 = *buf.get(self.pos)?;
            self.pos += 1;
            ((b0 & 0x7F) as u16) | (((b1 & 0x7F) as u16) << 7)
        } else {
            b0 as u16
        };
        // Record length: 7-bit varint, at most four bytes.
        let mut len = 0usize;
        for shift in 0..4 {
            let byte = *buf.get(self.pos)?;
            self.pos += 1;
            len |= ((byte & 0x7F) as usize) << (7 * shift);
            if byte & 0x80 == 0 {
                break;
            }
        }
        let payload = buf.get(self.pos..self.pos + len)?;
        self.pos += len;
        Some(Record { id, payload })
    }
}

fn u32_at(buf: &[u8], at: usize) -> Option<u32> {
    Some(u32::from_le_bytes(buf.get(at..at + 4)?.try_into().ok()?))
}

/// `XLWideString`: a character count followed by UTF-16LE units.
fn wide_string(buf: &[u8], at: usize) -> Option<String> {
    let count = u32_at(buf, at)? as usize;
    let bytes = buf.get(at + 4..at + 4 + count * 2)?;
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    Some(String::from_utf16_lossy(&units))
}

fn rk_to_string(raw: i32) -> String {
    let mut number = if raw & 0x02 != 0 {
        (raw >> 2) as f64
    } else {
        f64::from_bits(((raw as u32 as u64) & 0xFFFF_FFFC) << 32)
    };
    if raw & 0x01 != 0 {
        number *= 0.01;
    }
    if number.fract() == 0.0 && number.abs() < 1e15 {
        format!("{}", number as i64)
    } else {
        format!("{}", number)
    }
}

#[derive(Default)]
struct SheetCursor {
    last_row: i32,
    last_col: i32,
    current_row: i32,
}

impl SheetCursor {
    fn cell(&mut self, col: i32, content: &str, text: &mut String) {
        while self.current_row > self.last_row {
            text.push('\n');
            self.last_row += 1;
            self.last_col = 0;
        }
        if col > 0 && col <= self.last_col {
            text.push('\t');
        }
        while col > self.last_col {
            text.push('\t');
            self.last_col += 1;
        }
        text.push_str(content);
    }
}

fn decode_sheet(buf: &[u8], shared_strings: &[String], text: &mut String) {
    let mut cursor = SheetCursor::default();
    for record in RecordIter::new(buf) {
        match record.id {
            BRT_ROW_HDR => {
                if let Some(row) = u32_at(record.payload, 0) {
                    cursor.current_row = row as i32;
                }
            }
            BRT_CELL_ISST => {
                let (Some(col), Some(index)) =
                    (u32_at(record.payload, 0), u32_at(record.payload, 8))
                else {
                    continue;
                };
                if let Some(entry) = shared_strings.get(index as usize) {
                    let entry = entry.clone();
                    cursor.cell(col as i32, &entry, text);
                }
            }
            BRT_CELL_ST => {
                let Some(col) = u32_at(record.payload, 0) else {
                    continue;
                };
                if let Some(content) = wide_string(record.payload, 8) {
                    cursor.cell(col as i32, &content, text);
                }
            }
            BRT_CELL_RK => {
                let (Some(col), Some(raw)) =
                    (u32_at(record.payload, 0), u32_at(record.payload, 8))
                else {
                    continue;
                };
                cursor.cell(col as i32, &rk_to_string(raw as i32), text);
            }
            BRT_CELL_REAL => {
                let Some(col) = u32_at(record.payload, 0) else {
                    continue;
                };
                let Some(bytes) = record.payload.get(8..16) else {
                    continue;
                };
                let number = f64::from_le_bytes(bytes.try_into().expect("length checked"));
                let rendered = if number.fract() == 0.0 && number.abs() < 1e15 {
                    format!("{}", number as i64)
                } else {
                    format!("{}", number)
                };
                cursor.cell(col as i32, &rendered, text);
            }
            BRT_CELL_BOOL => {
                let Some(col) = u32_at(record.payload, 0) else {
                    continue;
                };
                let value = record.payload.get(8).copied().unwrap_or(0);
                cursor.cell(col as i32, if value != 0 { "TRUE" } else { "FALSE" }, text);
            }
            _ => {}
        }
    }
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
}

fn decode_shared_strings(buf: &[u8]) -> Vec<String> {
    let mut strings = Vec::new();
    for record in RecordIter::new(buf) {
        if record.id == BRT_SST_ITEM {
            // One flags byte precedes the string of a rich SST item.
            if let Some(entry) = wide_string(record.payload, 1) {
                strings.push(entry);
            }
        }
    }
    strings
}

fn sorted_numeric(mut names: Vec<String>) -> Vec<String> {
    fn number_of(name: &str) -> u32 {
        name.chars()
            .filter(|c| c.is_ascii_digit())
            .collect::<String>()
            .parse()
            .unwrap_or(0)
    }
    names.sort_by_key(|n| number_of(n));
    names
}

impl Parser for XlsbParser {
    fn name(&self) -> &'static str {
        "xlsb-parser"
    }

    fn supported_mime_types(&self) -> &[MimeType] {
        SUPPORTED
    }

    fn understands(&self, data: &DataSource) -> bool {
        if !matches!(data.peek(4), Ok(head) if head == b"PK\x03\x04") {
            return false;
        }
        if data.has_highest_confidence_mime_type_in(SUPPORTED) {
            return true;
        }
        let Ok(bytes) = data.span() else {
            return false;
        };
        match ZipArchive::new(Cursor::new(bytes.to_vec())) {
            Ok(archive) => archive.file_names().any(|n| n == "xl/workbook.bin"),
            Err(_) => false,
        }
    }

    fn parse(&self, data: &DataSource, emitter: &mut Emitter<'_, '_>) -> Result<()> {
        let bytes = data.span()?;
        let mut archive = ZipArchive::new(Cursor::new(bytes.to_vec())).map_err(|e| {
            DocpipeError::uninterpretable_data_with_source("broken workbook package", e)
        })?;
        if archive.by_name("xl/workbook.bin").is_err() {
            return Err(DocpipeError::uninterpretable_data(
                "package carries no binary workbook part",
            ));
        }

        if !emitter.open_document(Document::empty())? {
            return Ok(());
        }

        let shared_strings = match read_part(&mut archive, "xl/sharedStrings.bin") {
            Some(buf) => decode_shared_strings(&buf),
            None => Vec::new(),
        };

        let sheet_names = sorted_numeric(
            archive
                .file_names()
                .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".bin"))
                .map(|n| n.to_string())
                .collect(),
        );
        let mut text = String::new();
        for sheet in sheet_names {
            if emitter.stopped() {
                return Ok(());
            }
            if let Some(buf) = read_part(&mut archive, &sheet) {
                decode_sheet(&buf, &shared_strings, &mut text);
            }
        }

        emitter.emit(Message::text(text))?;
        emitter.emit(Message::CloseDocument)?;
        Ok(())
    }
}

fn read_part(archive: &mut ZipArchive<Cursor<Vec<u8>>>, name: &str) -> Option<Vec<u8>> {
    let mut entry = archive.by_name(name).ok()?;
    let mut buf = Vec::new();
    entry.read_to_end(&mut buf).ok()?;
    Some(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Pipeline;
    use crate::mime::confidence;
    use crate::parsers::ParserElement;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn record(id: u16, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        if id < 0x80 {
            out.push(id as u8);
        } else {
            out.push((id & 0x7F) as u8 | 0x80);
            out.push((id >> 7) as u8);
        }
        let mut len = payload.len();
        loop {
            let mut byte = (len & 0x7F) as u8;
            len >>= 7;
            if len > 0 {
                byte |= 0x80;
            }
            out.push(byte);
            if len == 0 {
                break;
            }
        }
        out.extend_from_slice(payload);
        out
    }

    fn wide(text: &str) -> Vec<u8> {
        let mut out = (text.encode_utf16().count() as u32).to_le_bytes().to_vec();
        out.extend(text.encode_utf16().flat_map(|u| u.to_le_bytes()));
        out
    }

    fn package(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in entries {
            writer
                .start_file(name.to_string(), SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn run_xlsb(bytes: Vec<u8>) -> Vec<Message> {
        let mut data = DataSource::from_bytes(bytes);
        data.add_mime_type(MimeType::from(crate::mime::XLSB_MIME_TYPE), confidence::VERY_HIGH);
        let mut pipeline = Pipeline::new().then(ParserElement::new(XlsbParser::new()));
        pipeline.process(Message::Data(data)).unwrap().emitted
    }

    fn sheet_text(messages: &[Message]) -> String {
        messages
            .iter()
            .find_map(|m| match m {
                Message::Text(t) => Some(t.text.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    #[test]
    fn test_shared_and_inline_strings() {
        let mut sst = Vec::new();
        let mut item = vec![0u8];
        item.extend(wide("shared one"));
        sst.extend(record(BRT_SST_ITEM, &item));

        let mut sheet = Vec::new();
        sheet.extend(record(BRT_ROW_HDR, &0u32.to_le_bytes()));
        // ISST cell at column 0 referencing entry 0.
        let mut isst = Vec::new();
        isst.extend_from_slice(&0u32.to_le_bytes());
        isst.extend_from_slice(&0u32.to_le_bytes());
        isst.extend_from_slice(&0u32.to_le_bytes());
        sheet.extend(record(BRT_CELL_ISST, &isst));
        // Inline string at column 1.
        let mut st = Vec::new();
        st.extend_from_slice(&1u32.to_le_bytes());
        st.extend_from_slice(&0u32.to_le_bytes());
        st.extend(wide("inline"));
        sheet.extend(record(BRT_CELL_ST, &st));

        let bytes = package(&[
            ("xl/workbook.bin", &record(0x0083, &[])),
            ("xl/sharedStrings.bin", &sst),
            ("xl/worksheets/sheet1.bin", &sheet),
        ]);
        let messages = run_xlsb(bytes);
        assert_eq!(sheet_text(&messages), "shared one\tinline\n");
    }

    #[test]
    fn test_numbers_and_rows() {
        let mut sheet = Vec::new();
        sheet.extend(record(BRT_ROW_HDR, &0u32.to_le_bytes()));
        let mut real = Vec::new();
        real.extend_from_slice(&0u32.to_le_bytes());
        real.extend_from_slice(&0u32.to_le_bytes());
        real.extend_from_slice(&2.5f64.to_le_bytes());
        sheet.extend(record(BRT_CELL_REAL, &real));
        sheet.extend(record(BRT_ROW_HDR, &1u32.to_le_bytes()));
        let mut rk = Vec::new();
        rk.extend_from_slice(&0u32.to_le_bytes());
        rk.extend_from_slice(&0u32.to_le_bytes());
        rk.extend_from_slice(&(((7i32) << 2) | 0x02).to_le_bytes());
        sheet.extend(record(BRT_CELL_RK, &rk));

        let bytes = package(&[
            ("xl/workbook.bin", &[]),
            ("xl/worksheets/sheet1.bin", &sheet),
        ]);
        let messages = run_xlsb(bytes);
        assert_eq!(sheet_text(&messages), "2.5\n7\n");
    }

    #[test]
    fn test_two_byte_record_ids_roundtrip() {
        let encoded = record(BRT_SST_ITEM | 0x100, b"xy");
        let records: Vec<_> = RecordIter::new(&encoded).collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, BRT_SST_ITEM | 0x100);
        assert_eq!(records[0].payload, b"xy");
    }

    #[test]
    fn test_missing_workbook_part() {
        let bytes = package(&[("xl/other.bin", &[])]);
        let messages = run_xlsb(bytes);
        assert!(messages.iter().any(|m| m.is_error()));
    }
}
