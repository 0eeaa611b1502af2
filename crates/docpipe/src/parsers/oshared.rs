#![cfg(feature = "office")]

//! Shared OLE property-set reading for the legacy Office parsers.
//!
//! The `\x05SummaryInformation` stream of a compound document carries
//! author, timestamps and counts as a property set. Timestamps are
//! FILETIME values interpreted as UTC.

use crate::message::{DateTime, Metadata};
use std::io::{Read, Seek};

const SUMMARY_INFORMATION_STREAM: &str = "\u{5}SummaryInformation";

const PID_AUTHOR: u32 = 4;
const PID_LAST_AUTHOR: u32 = 8;
const PID_CREATE_DTM: u32 = 12;
const PID_LAST_SAVE_DTM: u32 = 13;
const PID_PAGE_COUNT: u32 = 14;
const PID_WORD_COUNT: u32 = 15;

const VT_I2: u32 = 2;
const VT_I4: u32 = 3;
const VT_LPSTR: u32 = 30;
const VT_FILETIME: u32 = 64;

/// Seconds between 1601-01-01 and the Unix epoch.
const FILETIME_UNIX_OFFSET: i64 = 11_644_473_600;

fn read_u16(buf: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_le_bytes(buf.get(at..at + 2)?.try_into().ok()?))
}

fn read_u32(buf: &[u8], at: usize) -> Option<u32> {
    Some(u32::from_le_bytes(buf.get(at..at + 4)?.try_into().ok()?))
}

fn read_u64(buf: &[u8], at: usize) -> Option<u64> {
    Some(u64::from_le_bytes(buf.get(at..at + 8)?.try_into().ok()?))
}

fn filetime_to_datetime(filetime: u64) -> Option<DateTime> {
    if filetime == 0 {
        return None;
    }
    let unix = (filetime / 10_000_000) as i64 - FILETIME_UNIX_OFFSET;
    Some(DateTime::from_unix_timestamp(unix))
}

#[derive(Debug)]
enum PropertyValue {
    Integer(i64),
    Text(String),
    Time(DateTime),
}

fn read_property(section: &[u8], offset: usize) -> Option<PropertyValue> {
    let vt = read_u32(section, offset)?;
    let value_at = offset + 4;
    match vt {
        VT_I2 => Some(PropertyValue::Integer(read_u16(section, value_at)? as i16 as i64)),
        VT_I4 => Some(PropertyValue::Integer(read_u32(section, value_at)? as i32 as i64)),
        VT_LPSTR => {
            let len = read_u32(section, value_at)? as usize;
            let bytes = section.get(value_at + 4..value_at + 4 + len)?;
            let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
            Some(PropertyValue::Text(
                String::from_utf8_lossy(&bytes[..end]).into_owned(),
            ))
        }
        VT_FILETIME => filetime_to_datetime(read_u64(section, value_at)?).map(PropertyValue::Time),
        _ => None,
    }
}

fn parse_property_set(buf: &[u8], metadata: &mut Metadata) -> Option<()> {
    let byte_order = read_u16(buf, 0)?;
    if byte_order != 0xFFFE {
        return None;
    }
    let set_count = read_u32(buf, 24)?;
    if set_count == 0 {
        return None;
    }
    let section_offset = read_u32(buf, 44)? as usize;
    let section = buf.get(section_offset..)?;
    let property_count = read_u32(section, 4)? as usize;
    for index in 0..property_count {
        let entry_at = 8 + index * 8;
        let pid = read_u32(section, entry_at)?;
        let value_offset = read_u32(section, entry_at + 4)? as usize;
        let Some(value) = read_property(section, value_offset) else {
            continue;
        };
        match (pid, value) {
            (PID_AUTHOR, PropertyValue::Text(text)) if !text.is_empty() => {
                metadata.author = Some(text);
            }
            (PID_LAST_AUTHOR, PropertyValue::Text(text)) if !text.is_empty() => {
                metadata.last_modified_by = Some(text);
            }
            (PID_CREATE_DTM, PropertyValue::Time(time)) => {
                metadata.creation_date = Some(time);
            }
            (PID_LAST_SAVE_DTM, PropertyValue::Time(time)) => {
                metadata.last_modification_date = Some(time);
            }
            (PID_PAGE_COUNT, PropertyValue::Integer(count)) if count >= 0 => {
                metadata.page_count = Some(count as usize);
            }
            (PID_WORD_COUNT, PropertyValue::Integer(count)) if count >= 0 => {
                metadata.word_count = Some(count as usize);
            }
            _ => {}
        }
    }
    Some(())
}

/// Read document metadata from the summary-information stream, returning
/// whatever subset the stream carries. A missing or corrupt stream yields
/// empty metadata.
pub fn summary_metadata<F: Read + Seek>(comp: &mut cfb::CompoundFile<F>) -> Metadata {
    let mut metadata = Metadata::default();
    let Ok(mut stream) = comp.open_stream(SUMMARY_INFORMATION_STREAM) else {
        return metadata;
    };
    let mut buf = Vec::new();
    if stream.read_to_end(&mut buf).is_err() {
        return metadata;
    }
    if parse_property_set(&buf, &mut metadata).is_none() {
        tracing::debug!("summary information stream could not be decoded");
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a minimal property set with the given (pid, value) entries.
    fn property_set(entries: &[(u32, Vec<u8>)]) -> Vec<u8> {
        let mut buf = vec![0u8; 48];
        buf[0] = 0xFE;
        buf[1] = 0xFF;
        buf[24..28].copy_from_slice(&1u32.to_le_bytes());
        buf[44..48].copy_from_slice(&48u32.to_le_bytes());
        // Section header: size placeholder + count + id/offset table.
        let count = entries.len() as u32;
        let mut section = Vec::new();
        section.extend_from_slice(&0u32.to_le_bytes());
        section.extend_from_slice(&count.to_le_bytes());
        let table_len = 8 + entries.len() * 8;
        let mut values = Vec::new();
        for (pid, value) in entries {
            section.extend_from_slice(&pid.to_le_bytes());
            section.extend_from_slice(&((table_len + values.len()) as u32).to_le_bytes());
            values.extend_from_slice(value);
        }
        section.extend_from_slice(&values);
        buf.extend_from_slice(&section);
        buf
    }

    fn lpstr(text: &str) -> Vec<u8> {
        let mut value = VT_LPSTR.to_le_bytes().to_vec();
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        value.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        value.extend_from_slice(&bytes);
        value
    }

    fn filetime(unix: i64) -> Vec<u8> {
        let mut value = VT_FILETIME.to_le_bytes().to_vec();
        let ft = ((unix + FILETIME_UNIX_OFFSET) as u64) * 10_000_000;
        value.extend_from_slice(&ft.to_le_bytes());
        value
    }

    fn vt_i4(v: i32) -> Vec<u8> {
        let mut value = VT_I4.to_le_bytes().to_vec();
        value.extend_from_slice(&v.to_le_bytes());
        value
    }

    #[test]
    fn test_parse_author_and_dates() {
        let buf = property_set(&[
            (PID_AUTHOR, lpstr("someone")),
            (PID_CREATE_DTM, filetime(1_577_836_800)),
            (PID_PAGE_COUNT, vt_i4(7)),
        ]);
        let mut metadata = Metadata::default();
        parse_property_set(&buf, &mut metadata).unwrap();
        assert_eq!(metadata.author.as_deref(), Some("someone"));
        assert_eq!(
            metadata.creation_date,
            Some(DateTime::new(2020, 1, 1, 0, 0, 0))
        );
        assert_eq!(metadata.page_count, Some(7));
    }

    #[test]
    fn test_wrong_byte_order_rejected() {
        let mut buf = property_set(&[(PID_AUTHOR, lpstr("x"))]);
        buf[0] = 0x00;
        buf[1] = 0x00;
        let mut metadata = Metadata::default();
        assert!(parse_property_set(&buf, &mut metadata).is_none());
        assert!(metadata.author.is_none());
    }

    #[test]
    fn test_truncated_stream_is_harmless() {
        let mut metadata = Metadata::default();
        assert!(parse_property_set(&[0xFE, 0xFF], &mut metadata).is_none());
    }

    #[test]
    fn test_filetime_zero_is_absent() {
        assert!(filetime_to_datetime(0).is_none());
    }
}
