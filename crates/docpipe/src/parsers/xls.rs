#![cfg(feature = "office")]

//! XLS (BIFF) parser.
//!
//! Decodes the record stream of the `Workbook` (or `Book`) OLE stream:
//! BIFF2 through BIFF8 version handling from the BOF record, a shared
//! string table accumulated across `CONTINUE` records (the character size
//! may flip between 8-bit and 16-bit at every record boundary), XF and
//! FORMAT tables for date detection, and a per-row cursor emitting
//! tab/newline cell separators. A `FILEPASS` record fails the parse with
//! a file-encrypted error naming the scheme.

use crate::charset;
use crate::data_source::DataSource;
use crate::error::{DocpipeError, Result};
use crate::locks::PARSER_MUTEX;
use crate::message::{DateTime, Document, Message};
use crate::mime::MimeType;
use crate::parsers::{Emitter, Parser, oshared};
use encoding_rs::Encoding;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::collections::HashSet;
use std::io::{Cursor, Read};
use std::sync::Arc;

const XLS_BOF: u16 = 0x809;
const XLS_CODEPAGE: u16 = 0x42;
const XLS_BLANK: u16 = 0x201;
const XLS_CONTINUE: u16 = 0x3C;
const XLS_DATE_1904: u16 = 0x22;
const XLS_FILEPASS: u16 = 0x2F;
const XLS_FORMAT: u16 = 0x41E;
const XLS_FORMULA: u16 = 0x06;
const XLS_INTEGER_CELL: u16 = 0x202;
const XLS_LABEL: u16 = 0x204;
const XLS_RSTRING: u16 = 0xD6;
const XLS_LABEL_SST: u16 = 0xFD;
const XLS_MULBLANK: u16 = 0xBE;
const XLS_MULRK: u16 = 0xBD;
const XLS_NUMBER: u16 = 0x203;
const XLS_RK: u16 = 0x27E;
const XLS_SST: u16 = 0xFC;
const XLS_STRING: u16 = 0x207;
const XLS_XF: u16 = 0xE0;
const XLS_EOF: u16 = 0x0A;

const BOF_BIFF_2: u16 = 0x009;
const BOF_BIFF_3: u16 = 0x209;
const BOF_BIFF_4: u16 = 0x0409;

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
enum BiffVersion {
    Biff2,
    Biff3,
    Biff4,
    Biff5,
    Biff8,
}

static SUPPORTED: &[MimeType] = &[
    MimeType::from_static(crate::mime::XLS_MIME_TYPE),
    MimeType::from_static("application/vnd.ms-excel.sheet.macroenabled.12"),
    MimeType::from_static("application/vnd.ms-excel.template.macroenabled.12"),
];

/// Number-format ids with a standard date/time rendering.
static STANDARD_DATE_FORMATS: Lazy<HashMap<u16, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert(0x0E, "%m-%d-%y");
    m.insert(0x0F, "%d-%b-%y");
    m.insert(0x10, "%d-%b");
    m.insert(0x11, "%b-%d");
    m.insert(0x12, "%l:%M %p");
    m.insert(0x13, "%l:%M:%S %p");
    m.insert(0x14, "%H:%M");
    m.insert(0x15, "%H:%M:%S");
    m.insert(0x16, "%m-%d-%y %H:%M");
    m.insert(0x2D, "%M:%S");
    m.insert(0x2E, "%H:%M:%S");
    m.insert(0x2F, "%M:%S");
    m.insert(0xA4, "%m.%d.%Y %l:%M:%S %p");
    m
});

const MONTH_ABBREVIATIONS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Minimal strftime covering the standard XLS date format patterns.
fn format_date(dt: &DateTime, pattern: &str) -> String {
    let mut out = String::new();
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('Y') => out.push_str(&format!("{:04}", dt.year)),
            Some('y') => out.push_str(&format!("{:02}", dt.year.rem_euclid(100))),
            Some('m') => out.push_str(&format!("{:02}", dt.month)),
            Some('d') => out.push_str(&format!("{:02}", dt.day)),
            Some('b') => out.push_str(
                MONTH_ABBREVIATIONS
                    .get(dt.month.saturating_sub(1) as usize)
                    .unwrap_or(&"???"),
            ),
            Some('H') => out.push_str(&format!("{:02}", dt.hour)),
            Some('l') => {
                let hour12 = match dt.hour % 12 {
                    0 => 12,
                    h => h,
                };
                out.push_str(&hour12.to_string());
            }
            Some('M') => out.push_str(&format!("{:02}", dt.minute)),
            Some('S') => out.push_str(&format!("{:02}", dt.second)),
            Some('p') => out.push_str(if dt.hour < 12 { "AM" } else { "PM" }),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// Shortest sensible rendering of a cell number.
fn format_plain_number(number: f64) -> String {
    if number.fract() == 0.0 && number.abs() < 1e15 {
        format!("{}", number as i64)
    } else {
        format!("{}", number)
    }
}

struct XlsContext<'p, 'e, 'a> {
    emitter: &'p mut Emitter<'e, 'a>,
    /// `None` decodes as ASCII.
    encoding: Option<&'static Encoding>,
    biff_version: BiffVersion,
    xf_records: Vec<u16>,
    date_shift: f64,
    shared_strings: Vec<String>,
    sst_buf: Vec<u8>,
    sst_record_sizes: Vec<usize>,
    prev_rec_type: u16,
    last_string_formula_row: i32,
    last_string_formula_col: i32,
    defined_num_format_ids: HashSet<u16>,
    last_row: i32,
    last_col: i32,
}

impl<'p, 'e, 'a> XlsContext<'p, 'e, 'a> {
    fn new(emitter: &'p mut Emitter<'e, 'a>) -> Self {
        XlsContext {
            emitter,
            encoding: charset::encoding_for_codepage(1251),
            biff_version: BiffVersion::Biff8,
            xf_records: Vec::new(),
            date_shift: 25569.0,
            shared_strings: Vec::new(),
            sst_buf: Vec::new(),
            sst_record_sizes: Vec::new(),
            prev_rec_type: 0,
            last_string_formula_row: -1,
            last_string_formula_col: -1,
            defined_num_format_ids: HashSet::new(),
            last_row: 0,
            last_col: 0,
        }
    }

    fn recoverable(&mut self, message: impl Into<String>) -> Result<()> {
        self.emitter
            .emit(Message::error(DocpipeError::uninterpretable_data(message.into())))?;
        Ok(())
    }

    fn decode_byte(&self, byte: u8) -> String {
        match self.encoding {
            None => (byte as char).to_string(),
            Some(encoding) => {
                let bytes = [byte];
                let (text, _, _) = encoding.decode(&bytes);
                text.into_owned()
            }
        }
    }

    fn standard_date_format(&mut self, xf_index: usize) -> Result<&'static str> {
        if xf_index >= self.xf_records.len() {
            self.recoverable(format!("incorrect format code {xf_index}"))?;
            return Ok("");
        }
        let num_format_id = self.xf_records[xf_index];
        if self.defined_num_format_ids.contains(&num_format_id) {
            return Ok("");
        }
        Ok(STANDARD_DATE_FORMATS
            .get(&num_format_id)
            .copied()
            .unwrap_or(""))
    }

    fn xls_date_to_string(&self, xls_date: f64, pattern: &str) -> String {
        let unix = ((xls_date - self.date_shift) * 86_400.0).round() as i64;
        format_date(&DateTime::from_unix_timestamp(unix), pattern)
    }

    fn format_number(&mut self, number: f64, xf_index: usize) -> Result<String> {
        let pattern = self.standard_date_format(xf_index)?;
        if pattern.is_empty() {
            Ok(format_plain_number(number))
        } else {
            Ok(self.xls_date_to_string(number, pattern))
        }
    }

    fn parse_xnum(&mut self, src: &[u8], xf_index: usize) -> Result<String> {
        let Some(bytes) = src.get(..8) else {
            self.recoverable("number cell shorter than 8 bytes")?;
            return Ok(String::new());
        };
        let number = f64::from_le_bytes(bytes.try_into().expect("slice length checked"));
        self.format_number(number, xf_index)
    }

    fn parse_rk(&mut self, src: &[u8], xf_index: usize) -> Result<String> {
        let Some(bytes) = src.get(..4) else {
            self.recoverable("RK value shorter than 4 bytes")?;
            return Ok(String::new());
        };
        let raw = i32::from_le_bytes(bytes.try_into().expect("slice length checked"));
        let mut number = if raw & 0x02 != 0 {
            (raw >> 2) as f64
        } else {
            f64::from_bits(((raw as u32 as u64) & 0xFFFF_FFFC) << 32)
        };
        if raw & 0x01 != 0 {
            number *= 0.01;
        }
        self.format_number(number, xf_index)
    }

    /// Decode an `XLUnicodeString`, tracking CONTINUE record boundaries:
    /// at each boundary a fresh option-flags byte appears and the
    /// character size may switch between 8-bit and 16-bit.
    fn parse_unicode_string(
        &mut self,
        src: &[u8],
        pos: &mut usize,
        record_sizes: &[usize],
        record_index: &mut usize,
        record_pos: &mut usize,
    ) -> Result<String> {
        if *record_index < record_sizes.len() && *record_pos >= record_sizes[*record_index] {
            let diff = *record_pos - record_sizes[*record_index];
            if diff > 0 {
                self.recoverable("string starts after record boundary")?;
            }
            *record_pos = diff;
            *record_index += 1;
        }
        if src.len() < *pos + 2 {
            self.recoverable("unexpected end of buffer")?;
            *pos = src.len();
            return Ok(String::new());
        }
        let count = u16::from_le_bytes([src[*pos], src[*pos + 1]]) as usize;
        *pos += 2;
        *record_pos += 2;

        let mut flags = 0u8;
        if self.biff_version >= BiffVersion::Biff8 {
            if *pos >= src.len() {
                self.recoverable("unexpected end of buffer")?;
                return Ok(String::new());
            }
            flags = src[*pos];
            *pos += 1;
            *record_pos += 1;
        }
        let mut char_size = if flags & 0x01 != 0 { 2usize } else { 1 };

        let mut after_text_block_len = 0usize;
        if flags & 0x08 != 0 {
            // Rich text: a formatting-run count precedes the text.
            if src.len() < *pos + 2 {
                self.recoverable("unexpected end of buffer")?;
                *pos = src.len();
                return Ok(String::new());
            }
            after_text_block_len += 4 * u16::from_le_bytes([src[*pos], src[*pos + 1]]) as usize;
            *pos += 2;
            *record_pos += 2;
        }
        if flags & 0x04 != 0 {
            // Far-East block size.
            if src.len() < *pos + 4 {
                self.recoverable("unexpected end of buffer")?;
                *pos = src.len();
                return Ok(String::new());
            }
            after_text_block_len +=
                i32::from_le_bytes(src[*pos..*pos + 4].try_into().expect("length checked")).max(0)
                    as usize;
            *pos += 4;
            *record_pos += 4;
        }

        let mut dest = String::new();
        let mut read_chars = 0usize;
        while read_chars < count {
            if *pos >= src.len() {
                self.recoverable("unexpected end of buffer")?;
                return Ok(dest);
            }
            if *record_index < record_sizes.len() {
                if *record_pos > record_sizes[*record_index] {
                    self.recoverable("record boundary crossed")?;
                }
                if *record_pos == record_sizes[*record_index] {
                    *record_index += 1;
                    *record_pos = 0;
                    let boundary_flags = src[*pos];
                    if boundary_flags > 1 {
                        self.recoverable(format!(
                            "incorrect string flags {boundary_flags} at record boundary"
                        ))?;
                    }
                    char_size = if boundary_flags & 0x01 != 0 { 2 } else { 1 };
                    *pos += 1;
                    *record_pos += 1;
                    continue;
                }
            }
            if char_size == 2 {
                if *pos + 2 > src.len() {
                    self.recoverable("unexpected end of buffer")?;
                    return Ok(dest);
                }
                let mut code = u16::from_le_bytes([src[*pos], src[*pos + 1]]) as u32;
                *pos += 2;
                *record_pos += 2;
                if code == 0 {
                    read_chars += 1;
                    continue;
                }
                if (0xD800..0xDC00).contains(&code) {
                    if *pos + 2 > src.len() {
                        self.recoverable("unexpected end of buffer")?;
                        return Ok(dest);
                    }
                    let low = u16::from_le_bytes([src[*pos], src[*pos + 1]]) as u32;
                    *pos += 2;
                    *record_pos += 2;
                    code = 0x10000 + ((code - 0xD800) << 10) + (low & 0x3FF);
                }
                if let Some(ch) = char::from_u32(code) {
                    dest.push(ch);
                }
            } else {
                let byte = src[*pos];
                *pos += 1;
                *record_pos += 1;
                dest.push_str(&self.decode_byte(byte));
            }
            read_chars += 1;
        }
        *pos += after_text_block_len;
        *record_pos += after_text_block_len;
        Ok(dest)
    }

    fn parse_shared_string_table(&mut self) -> Result<()> {
        let sst_buf = std::mem::take(&mut self.sst_buf);
        if sst_buf.len() < 8 {
            self.recoverable(format!(
                "shared string table too short ({} bytes)",
                sst_buf.len()
            ))?;
            self.sst_buf = sst_buf;
            return Ok(());
        }
        let sst_size =
            i32::from_le_bytes(sst_buf[4..8].try_into().expect("length checked")).max(0) as usize;
        let record_sizes = self.sst_record_sizes.clone();
        let mut pos = 8usize;
        let mut record_index = 0usize;
        let mut record_pos = 8usize;
        self.shared_strings.clear();
        while pos < sst_buf.len() && self.shared_strings.len() <= sst_size {
            let entry = self.parse_unicode_string(
                &sst_buf,
                &mut pos,
                &record_sizes,
                &mut record_index,
                &mut record_pos,
            )?;
            self.shared_strings.push(entry);
        }
        self.sst_buf = sst_buf;
        Ok(())
    }

    fn cell_text(&mut self, row: i32, col: i32, content: &str) -> String {
        let mut out = String::new();
        while row > self.last_row {
            out.push('\n');
            self.last_row += 1;
            self.last_col = 0;
        }
        if col > 0 && col <= self.last_col {
            out.push('\t');
        }
        while col > self.last_col {
            out.push('\t');
            self.last_col += 1;
        }
        out.push_str(content);
        out
    }

    fn row_col(rec: &[u8]) -> (i32, i32) {
        let row = u16::from_le_bytes([rec[0], rec[1]]) as i32;
        let col = u16::from_le_bytes([rec[2], rec[3]]) as i32;
        (row, col)
    }

    fn process_record(&mut self, rec_type: u16, rec: &[u8], text: &mut String) -> Result<()> {
        if rec_type != XLS_CONTINUE && self.prev_rec_type == XLS_SST {
            self.parse_shared_string_table()?;
        }
        match rec_type {
            XLS_BLANK => {
                if rec.len() < 4 {
                    self.recoverable("BLANK record shorter than 4 bytes")?;
                } else {
                    let (row, col) = Self::row_col(rec);
                    let cell = self.cell_text(row, col, "");
                    text.push_str(&cell);
                }
            }
            XLS_BOF => {
                self.last_row = 0;
                self.last_col = 0;
            }
            XLS_CODEPAGE => {
                if rec.len() == 2 {
                    let codepage = u16::from_le_bytes([rec[0], rec[1]]);
                    if codepage == 1200 {
                        // UTF-16 cells carry their own flag.
                    } else if codepage == 367 {
                        self.encoding = None;
                    } else if let Some(encoding) = charset::encoding_for_codepage(codepage) {
                        self.encoding = Some(encoding);
                    }
                }
            }
            XLS_CONTINUE => {
                if self.prev_rec_type != XLS_SST {
                    return Ok(()); // does not update prev_rec_type
                }
                self.sst_buf.extend_from_slice(rec);
                self.sst_record_sizes.push(rec.len());
                return Ok(()); // keep prev_rec_type == SST
            }
            XLS_DATE_1904 => self.date_shift = 24_107.0,
            XLS_EOF => text.push('\n'),
            XLS_FILEPASS => {
                if rec.len() >= 2 {
                    let encryption_type = u16::from_le_bytes([rec[0], rec[1]]);
                    if encryption_type == 0x0000 {
                        return Err(DocpipeError::file_encrypted("XOR obfuscation"));
                    }
                    if encryption_type == 0x0001 && rec.len() >= 4 {
                        let header_type = u16::from_le_bytes([rec[2], rec[3]]);
                        return Err(match header_type {
                            0x0001 => DocpipeError::file_encrypted("RC4 encryption"),
                            0x0002 | 0x0003 => {
                                DocpipeError::file_encrypted("RC4 CryptoAPI encryption")
                            }
                            _ => DocpipeError::file_encrypted("unknown RC4 encryption"),
                        });
                    }
                }
                return Err(DocpipeError::file_encrypted("unknown scheme"));
            }
            XLS_FORMAT => {
                if rec.len() < 2 {
                    self.recoverable("FORMAT record shorter than 2 bytes")?;
                } else {
                    let num_format_id = u16::from_le_bytes([rec[0], rec[1]]);
                    self.defined_num_format_ids.insert(num_format_id);
                }
            }
            XLS_FORMULA => {
                if rec.len() < 14 {
                    self.recoverable("FORMULA record shorter than 14 bytes")?;
                } else {
                    self.last_string_formula_row = -1;
                    let (row, col) = Self::row_col(rec);
                    if rec[12] == 0xFF && rec[13] == 0xFF {
                        match rec[6] {
                            0 => {
                                self.last_string_formula_row = row;
                                self.last_string_formula_col = col;
                            }
                            1 => text.push_str(if rec[8] != 0 { "TRUE" } else { "FALSE" }),
                            2 => text.push_str("ERROR"),
                            _ => {}
                        }
                    } else {
                        let xf_index = u16::from_le_bytes([rec[4], rec[5]]) as usize;
                        let number = self.parse_xnum(&rec[6..], xf_index)?;
                        let cell = self.cell_text(row, col, &number);
                        text.push_str(&cell);
                    }
                }
            }
            XLS_INTEGER_CELL => {
                if rec.len() < 9 {
                    self.recoverable("INTEGER record shorter than 9 bytes")?;
                } else {
                    let (row, col) = Self::row_col(rec);
                    let value = u16::from_le_bytes([rec[7], rec[8]]).to_string();
                    let cell = self.cell_text(row, col, &value);
                    text.push_str(&cell);
                }
            }
            XLS_RSTRING | XLS_LABEL => {
                if rec.len() < 6 {
                    self.recoverable("LABEL record shorter than 6 bytes")?;
                } else {
                    self.last_string_formula_row = -1;
                    let (row, col) = Self::row_col(rec);
                    let sizes = [rec.len() - 6];
                    let mut pos = 6usize;
                    let mut record_index = 0usize;
                    let mut record_pos = 0usize;
                    let content = self.parse_unicode_string(
                        rec,
                        &mut pos,
                        &sizes,
                        &mut record_index,
                        &mut record_pos,
                    )?;
                    let cell = self.cell_text(row, col, &content);
                    text.push_str(&cell);
                }
            }
            XLS_LABEL_SST => {
                if rec.len() < 8 {
                    self.recoverable("LABEL_SST record shorter than 8 bytes")?;
                } else {
                    self.last_string_formula_row = -1;
                    let (row, col) = Self::row_col(rec);
                    let sst_index = u16::from_le_bytes([rec[6], rec[7]]) as usize;
                    match self.shared_strings.get(sst_index) {
                        Some(entry) => {
                            let entry = entry.clone();
                            let cell = self.cell_text(row, col, &entry);
                            text.push_str(&cell);
                        }
                        None => self.recoverable(format!(
                            "shared string index {sst_index} out of range ({})",
                            self.shared_strings.len()
                        ))?,
                    }
                }
            }
            XLS_MULBLANK => {
                if rec.len() < 4 {
                    self.recoverable("MULBLANK record shorter than 4 bytes")?;
                } else {
                    let row = u16::from_le_bytes([rec[0], rec[1]]) as i32;
                    let start_col = u16::from_le_bytes([rec[2], rec[3]]) as i32;
                    let end_col =
                        u16::from_le_bytes([rec[rec.len() - 2], rec[rec.len() - 1]]) as i32;
                    for col in start_col..=end_col {
                        let cell = self.cell_text(row, col, "");
                        text.push_str(&cell);
                    }
                }
            }
            XLS_MULRK => {
                if rec.len() < 4 {
                    self.recoverable("MULRK record shorter than 4 bytes")?;
                } else {
                    self.last_string_formula_row = -1;
                    let row = u16::from_le_bytes([rec[0], rec[1]]) as i32;
                    let start_col = u16::from_le_bytes([rec[2], rec[3]]) as i32;
                    let end_col =
                        u16::from_le_bytes([rec[rec.len() - 2], rec[rec.len() - 1]]) as i32;
                    let min_size = 4 + 6 * (end_col - start_col + 1) as usize;
                    if rec.len() < min_size {
                        self.recoverable(format!(
                            "MULRK record shorter than its minimum size {min_size}"
                        ))?;
                    } else {
                        let mut offset = 4usize;
                        for col in start_col..=end_col {
                            let xf_index =
                                u16::from_le_bytes([rec[offset], rec[offset + 1]]) as usize;
                            let value = self.parse_rk(&rec[offset + 2..], xf_index)?;
                            let cell = self.cell_text(row, col, &value);
                            text.push_str(&cell);
                            offset += 6;
                        }
                    }
                }
            }
            XLS_NUMBER | 0x03 | 0x103 | 0x303 => {
                if rec.len() < 14 {
                    self.recoverable("NUMBER record shorter than 14 bytes")?;
                } else {
                    self.last_string_formula_row = -1;
                    let (row, col) = Self::row_col(rec);
                    let xf_index = u16::from_le_bytes([rec[4], rec[5]]) as usize;
                    let number = self.parse_xnum(&rec[6..], xf_index)?;
                    let cell = self.cell_text(row, col, &number);
                    text.push_str(&cell);
                }
            }
            XLS_RK => {
                if rec.len() < 10 {
                    self.recoverable("RK record shorter than 10 bytes")?;
                } else {
                    self.last_string_formula_row = -1;
                    let (row, col) = Self::row_col(rec);
                    let xf_index = u16::from_le_bytes([rec[4], rec[5]]) as usize;
                    let value = self.parse_rk(&rec[6..], xf_index)?;
                    let cell = self.cell_text(row, col, &value);
                    text.push_str(&cell);
                }
            }
            XLS_SST => {
                self.sst_buf.clear();
                self.sst_record_sizes.clear();
                self.shared_strings.clear();
                self.sst_buf.extend_from_slice(rec);
                self.sst_record_sizes.push(rec.len());
            }
            XLS_STRING => {
                if self.last_string_formula_row < 0 {
                    self.recoverable("STRING record without preceding string formula")?;
                } else {
                    let sizes = [rec.len()];
                    let mut pos = 0usize;
                    let mut record_index = 0usize;
                    let mut record_pos = 0usize;
                    let content = self.parse_unicode_string(
                        rec,
                        &mut pos,
                        &sizes,
                        &mut record_index,
                        &mut record_pos,
                    )?;
                    let row = self.last_string_formula_row;
                    let col = self.last_string_formula_col;
                    let cell = self.cell_text(row, col, &content);
                    text.push_str(&cell);
                }
            }
            XLS_XF | 0x43 => {
                if rec.len() < 4 {
                    self.recoverable("XF record shorter than 4 bytes")?;
                } else {
                    self.xf_records
                        .push(u16::from_le_bytes([rec[2], rec[3]]));
                }
            }
            _ => {}
        }
        self.prev_rec_type = rec_type;
        Ok(())
    }

    /// Decode the whole workbook stream into tab/newline separated text.
    fn parse_workbook(&mut self, stream: &[u8], text: &mut String) -> Result<()> {
        let mut pos = 0usize;

        // Locate the BOF record and pick the BIFF version from it.
        loop {
            if pos + 4 > stream.len() {
                return Err(DocpipeError::uninterpretable_data("BOF record not found"));
            }
            let rec_type = u16::from_le_bytes([stream[pos], stream[pos + 1]]);
            let rec_len = u16::from_le_bytes([stream[pos + 2], stream[pos + 3]]) as usize;
            pos += 4;
            if pos + rec_len > stream.len() {
                return Err(DocpipeError::uninterpretable_data("truncated BOF record"));
            }
            let payload = &stream[pos..pos + rec_len];
            pos += rec_len;
            match rec_type {
                XLS_BOF => {
                    if rec_len != 8 && rec_len != 16 {
                        return Err(DocpipeError::uninterpretable_data(format!(
                            "invalid BOF record size {rec_len}"
                        )));
                    }
                    let biff_ver = u16::from_le_bytes([payload[0], payload[1]]);
                    self.biff_version = if biff_ver == 0x600 {
                        BiffVersion::Biff8
                    } else {
                        BiffVersion::Biff5
                    };
                    break;
                }
                BOF_BIFF_2 => {
                    self.biff_version = BiffVersion::Biff2;
                    break;
                }
                BOF_BIFF_3 => {
                    self.biff_version = BiffVersion::Biff3;
                    break;
                }
                BOF_BIFF_4 => {
                    self.biff_version = BiffVersion::Biff4;
                    break;
                }
                _ => continue,
            }
        }
        tracing::debug!(version = ?self.biff_version, "workbook globals");

        let mut eof_rec_found = false;
        loop {
            if self.emitter.stopped() {
                return Ok(());
            }
            if pos + 2 > stream.len() {
                self.process_record(XLS_EOF, &[], text)?;
                return Ok(());
            }
            let rec_type = u16::from_le_bytes([stream[pos], stream[pos + 1]]);
            pos += 2;
            if pos + 2 > stream.len() {
                if text.is_empty() {
                    return Err(DocpipeError::uninterpretable_data(
                        "record length could not be read",
                    ));
                }
                self.recoverable("record length could not be read")?;
                break;
            }
            let rec_len = u16::from_le_bytes([stream[pos], stream[pos + 1]]) as usize;
            pos += 2;
            let rec: &[u8] = if rec_len > 0 {
                if pos + rec_len > stream.len() {
                    self.recoverable("truncated record at end of stream")?;
                    &stream[pos..]
                } else {
                    &stream[pos..pos + rec_len]
                }
            } else {
                &[]
            };
            pos += rec_len.min(stream.len() - pos);
            if eof_rec_found && rec_type != XLS_BOF {
                break;
            }
            let rec = rec.to_vec();
            self.process_record(rec_type, &rec, text)?;
            eof_rec_found = rec_type == XLS_EOF;
        }
        Ok(())
    }
}

pub struct XlsParser;

impl XlsParser {
    pub fn new() -> Self {
        XlsParser
    }
}

impl Default for XlsParser {
    fn default() -> Self {
        Self::new()
    }
}

const OLE_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

impl Parser for XlsParser {
    fn name(&self) -> &'static str {
        "xls-parser"
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

        let workbook = read_workbook_stream(&mut comp)?;
        let mut text = String::new();
        {
            let _decode_guard = PARSER_MUTEX.lock();
            let mut ctx = XlsContext::new(emitter);
            ctx.parse_workbook(&workbook, &mut text)?;
        }
        emitter.emit(Message::text(text))?;
        emitter.emit(Message::CloseDocument)?;
        Ok(())
    }
}

fn read_workbook_stream<F: Read + std::io::Seek>(
    comp: &mut cfb::CompoundFile<F>,
) -> Result<Vec<u8>> {
    for name in ["Workbook", "Book"] {
        if let Ok(mut stream) = comp.open_stream(name) {
            let mut buf = Vec::new();
            stream.read_to_end(&mut buf)?;
            return Ok(buf);
        }
    }
    Err(DocpipeError::uninterpretable_data(
        "neither Workbook nor Book stream present",
    ))
}
