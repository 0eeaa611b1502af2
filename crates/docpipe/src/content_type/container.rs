//! Zip-container probes: OOXML, zipped OpenDocument, XLSB and iWork
//! packages all arrive as `application/zip` from the signature stage and
//! are told apart by their part lists.

use crate::data_source::DataSource;
use crate::mime::{MimeType, confidence};
use std::io::{Cursor, Read};
use zip::ZipArchive;

use crate::mime::*;

fn looks_like_zip(data: &DataSource) -> bool {
    matches!(data.peek(4), Ok(head) if head == b"PK\x03\x04")
}

fn open_archive(data: &DataSource) -> Option<ZipArchive<Cursor<Vec<u8>>>> {
    let bytes = data.span().ok()?.to_vec();
    ZipArchive::new(Cursor::new(bytes)).ok()
}

/// Office Open XML containers and zipped OpenDocument packages.
///
/// The workbook part list also distinguishes binary XLSB workbooks from
/// plain XLSX ones.
pub fn ooxml(data: &mut DataSource) {
    if !looks_like_zip(data) {
        return;
    }
    if data.highest_mime_type_confidence() >= confidence::HIGHEST {
        return;
    }
    let Some(mut archive) = open_archive(data) else {
        return;
    };

    // A zipped OpenDocument package declares itself in its `mimetype` part.
    if let Ok(mut entry) = archive.by_name("mimetype") {
        let mut declared = String::new();
        if entry.take(256).read_to_string(&mut declared).is_ok() {
            let declared = declared.trim();
            if declared.starts_with("application/vnd.oasis.opendocument") {
                data.add_mime_type(MimeType::new(declared), confidence::HIGHEST);
                return;
            }
        }
    }

    let names: Vec<String> = (0..archive.len())
        .filter_map(|i| archive.by_index(i).ok().map(|e| e.name().to_string()))
        .collect();

    let has = |name: &str| names.iter().any(|n| n == name);
    if has("xl/workbook.bin") {
        data.add_mime_type(MimeType::from_static(XLSB_MIME_TYPE), confidence::VERY_HIGH);
    } else if has("xl/workbook.xml") {
        data.add_mime_type(MimeType::from_static(XLSX_MIME_TYPE), confidence::VERY_HIGH);
    } else if has("word/document.xml") {
        data.add_mime_type(MimeType::from_static(DOCX_MIME_TYPE), confidence::VERY_HIGH);
    } else if has("ppt/presentation.xml") {
        data.add_mime_type(MimeType::from_static(PPTX_MIME_TYPE), confidence::VERY_HIGH);
    }
}

/// iWork packages: a zip with a version-history plist and one main XML
/// part whose root element namespace names the application.
pub fn iwork(data: &mut DataSource) {
    if !looks_like_zip(data) {
        return;
    }
    if data.highest_mime_type_confidence() >= confidence::HIGHEST {
        return;
    }
    let Some(mut archive) = open_archive(data) else {
        return;
    };

    let names: Vec<String> = (0..archive.len())
        .filter_map(|i| archive.by_index(i).ok().map(|e| e.name().to_string()))
        .collect();
    let has = |name: &str| names.iter().any(|n| n == name);

    if !(has("buildVersionHistory.plist")
        || has("index.xml")
        || has("index.apxl")
        || has("presentation.apxl"))
    {
        return;
    }

    if has("presentation.apxl") || has("index.apxl") {
        data.add_mime_type(MimeType::from_static(KEYNOTE_MIME_TYPE), confidence::VERY_HIGH);
        return;
    }
    if has("index.xml") {
        let mut head = String::new();
        if let Ok(entry) = archive.by_name("index.xml") {
            let _ = entry.take(1024).read_to_string(&mut head);
        }
        if head.contains("sl:document") {
            data.add_mime_type(MimeType::from_static(PAGES_MIME_TYPE), confidence::VERY_HIGH);
        } else if head.contains("ls:document") {
            data.add_mime_type(MimeType::from_static(NUMBERS_MIME_TYPE), confidence::VERY_HIGH);
        } else if has("buildVersionHistory.plist") {
            data.add_mime_type(MimeType::new("application/x-iwork-document"), confidence::MEDIUM);
        }
    }
}
