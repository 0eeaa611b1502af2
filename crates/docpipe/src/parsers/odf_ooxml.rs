#![cfg(feature = "office")]

//! Zipped ODF and OOXML parser.
//!
//! Discovers the content parts of the package (content.xml for ODF,
//! word/document.xml, xl/worksheets, ppt/slides for OOXML), feeds them
//! through the shared XML walk, and reads metadata from meta.xml or
//! docProps. ODF packages with encryption-data in their manifest and
//! OOXML workbooks wrapped in an OLE `EncryptedPackage` fail with a
//! file-encrypted error.

use crate::data_source::DataSource;
use crate::error::{DocpipeError, Result};
use crate::message::{Document, Message, Metadata, Styling, Text};
use crate::mime::MimeType;
use crate::parsers::common_xml::{
    TextPolicy, XmlDocState, collect_odf_list_styles, collect_shared_strings, local_name,
    parse_iso_datetime, walk_content,
};
use crate::parsers::{Emitter, Parser};
use crate::xml_stream::{XmlEvent, XmlStream};
use std::io::{Cursor, Read};
use std::sync::Arc;
use zip::ZipArchive;

static SUPPORTED: &[MimeType] = &[
    MimeType::from_static(crate::mime::DOCX_MIME_TYPE),
    MimeType::from_static(crate::mime::XLSX_MIME_TYPE),
    MimeType::from_static(crate::mime::PPTX_MIME_TYPE),
    MimeType::from_static("application/vnd.ms-word.document.macroenabled.12"),
    MimeType::from_static("application/vnd.ms-excel.sheet.macroenabled.12"),
    MimeType::from_static("application/vnd.ms-powerpoint.presentation.macroenabled.12"),
    MimeType::from_static("application/vnd.openxmlformats-officedocument.presentationml.slideshow"),
    MimeType::from_static(crate::mime::ODT_MIME_TYPE),
    MimeType::from_static(crate::mime::ODS_MIME_TYPE),
    MimeType::from_static(crate::mime::ODP_MIME_TYPE),
    MimeType::from_static(crate::mime::ODG_MIME_TYPE),
    MimeType::from_static("application/vnd.oasis.opendocument.text-template"),
];

pub struct OdfOoxmlParser;

impl OdfOoxmlParser {
    pub fn new() -> Self {
        OdfOoxmlParser
    }
}

impl Default for OdfOoxmlParser {
    fn default() -> Self {
        Self::new()
    }
}

type Archive = ZipArchive<Cursor<Vec<u8>>>;

fn read_part(archive: &mut Archive, name: &str) -> Option<Vec<u8>> {
    let mut entry = archive.by_name(name).ok()?;
    let mut buf = Vec::new();
    entry.read_to_end(&mut buf).ok()?;
    Some(buf)
}

fn part_names(archive: &Archive) -> Vec<String> {
    archive.file_names().map(|n| n.to_string()).collect()
}

/// ODF manifests mark encrypted members with `encryption-data` elements.
fn assert_odf_not_encrypted(archive: &mut Archive) -> Result<()> {
    let Some(manifest) = read_part(archive, "META-INF/manifest.xml") else {
        return Ok(());
    };
    let mut stream = XmlStream::new(&manifest);
    loop {
        match stream.next_event() {
            Ok(XmlEvent::Done) | Err(_) => return Ok(()),
            Ok(XmlEvent::StartElement { name, .. }) => {
                if local_name(&name) == "encryption-data" {
                    return Err(DocpipeError::file_encrypted("ODF package encryption"));
                }
            }
            Ok(_) => {}
        }
    }
}

fn metadata_from_odf(meta: &[u8]) -> Metadata {
    let mut metadata = Metadata::default();
    let mut stream = XmlStream::new(meta);
    let mut field: Option<String> = None;
    loop {
        match stream.next_event() {
            Ok(XmlEvent::Done) | Err(_) => break,
            Ok(XmlEvent::StartElement { name, .. }) => {
                field = Some(local_name(&name).to_string());
            }
            Ok(XmlEvent::EndElement { .. }) => field = None,
            Ok(XmlEvent::Text(text)) => match field.as_deref() {
                Some("initial-creator") if metadata.author.is_none() => {
                    metadata.author = Some(text);
                }
                Some("creator") => metadata.last_modified_by = Some(text),
                Some("creation-date") => metadata.creation_date = parse_iso_datetime(&text),
                Some("date") => metadata.last_modification_date = parse_iso_datetime(&text),
                Some("document-statistic") => {}
                _ => {}
            },
            Ok(_) => {}
        }
    }
    metadata
}

fn metadata_from_ooxml(core: Option<&[u8]>, app: Option<&[u8]>) -> Metadata {
    let mut metadata = Metadata::default();
    if let Some(core) = core {
        let mut stream = XmlStream::new(core);
        let mut field: Option<String> = None;
        loop {
            match stream.next_event() {
                Ok(XmlEvent::Done) | Err(_) => break,
                Ok(XmlEvent::StartElement { name, .. }) => {
                    field = Some(local_name(&name).to_string());
                }
                Ok(XmlEvent::EndElement { .. }) => field = None,
                Ok(XmlEvent::Text(text)) => match field.as_deref() {
                    Some("creator") => metadata.author = Some(text),
                    Some("lastModifiedBy") => metadata.last_modified_by = Some(text),
                    Some("created") => metadata.creation_date = parse_iso_datetime(&text),
                    Some("modified") => metadata.last_modification_date = parse_iso_datetime(&text),
                    _ => {}
                },
                Ok(_) => {}
            }
        }
    }
    if let Some(app) = app {
        let mut stream = XmlStream::new(app);
        let mut field: Option<String> = None;
        loop {
            match stream.next_event() {
                Ok(XmlEvent::Done) | Err(_) => break,
                Ok(XmlEvent::StartElement { name, .. }) => {
                    field = Some(local_name(&name).to_string());
                }
                Ok(XmlEvent::EndElement { .. }) => field = None,
                Ok(XmlEvent::Text(text)) => match field.as_deref() {
                    Some("Pages") => metadata.page_count = text.trim().parse().ok(),
                    Some("Words") => metadata.word_count = text.trim().parse().ok(),
                    _ => {}
                },
                Ok(_) => {}
            }
        }
    }
    metadata
}

/// Stream one xlsx worksheet as a table: rows from `<row>`, cells from
/// `<c>` with shared-string, inline-string and numeric payloads.
fn walk_worksheet(
    content: &[u8],
    state: &XmlDocState,
    emitter: &mut Emitter<'_, '_>,
) -> Result<()> {
    let mut stream = XmlStream::new(content);
    let mut in_sheet_data = false;
    let mut in_row = false;
    let mut cell_type = String::new();
    let mut in_value = false;
    let mut in_inline_t = false;
    let mut value = String::new();
    emitter.emit(Message::Table(Styling::default()))?;
    loop {
        if emitter.stopped() {
            return Ok(());
        }
        match stream.next_event()? {
            XmlEvent::Done => break,
            XmlEvent::StartElement { name, attributes } => match local_name(&name) {
                "sheetData" => in_sheet_data = true,
                "row" if in_sheet_data => {
                    in_row = true;
                    emitter.emit(Message::TableRow(Styling::default()))?;
                }
                "c" if in_row => {
                    cell_type = attributes
                        .iter()
                        .find(|(k, _)| k == "t")
                        .map(|(_, v)| v.clone())
                        .unwrap_or_default();
                    value.clear();
                    emitter.emit(Message::TableCell(Styling::default()))?;
                }
                "v" => in_value = true,
                "t" => in_inline_t = true,
                _ => {}
            },
            XmlEvent::EndElement { name } => match local_name(&name) {
                "sheetData" => in_sheet_data = false,
                "row" => {
                    if in_row {
                        in_row = false;
                        emitter.emit(Message::CloseTableRow)?;
                    }
                }
                "c" => {
                    let content = if cell_type == "s" {
                        value
                            .trim()
                            .parse::<usize>()
                            .ok()
                            .and_then(|index| state.shared_strings.get(index))
                            .cloned()
                            .unwrap_or_default()
                    } else {
                        value.clone()
                    };
                    if !content.is_empty() {
                        emitter.emit(Message::Text(Text::new(content)))?;
                    }
                    emitter.emit(Message::CloseTableCell)?;
                }
                "v" => in_value = false,
                "t" => in_inline_t = false,
                _ => {}
            },
            XmlEvent::Text(text) | XmlEvent::CData(text) => {
                if in_value || in_inline_t {
                    value.push_str(&text);
                }
            }
            _ => {}
        }
    }
    emitter.emit(Message::CloseTable)?;
    Ok(())
}

/// Emit the comments part (`word/comments.xml`) as `Comment` messages.
fn emit_docx_comments(content: &[u8], emitter: &mut Emitter<'_, '_>) -> Result<()> {
    let mut stream = XmlStream::new(content);
    let mut current: Option<crate::message::Comment> = None;
    let mut in_t = false;
    loop {
        match stream.next_event()? {
            XmlEvent::Done => break,
            XmlEvent::StartElement { name, attributes } => match local_name(&name) {
                "comment" => {
                    let mut comment = crate::message::Comment::default();
                    for (key, value) in &attributes {
                        match local_name(key) {
                            "author" => comment.author = Some(value.clone()),
                            "date" => comment.time = Some(value.clone()),
                            _ => {}
                        }
                    }
                    current = Some(comment);
                }
                "t" => in_t = true,
                _ => {}
            },
            XmlEvent::EndElement { name } => match local_name(&name) {
                "comment" => {
                    if let Some(comment) = current.take() {
                        emitter.emit(Message::Comment(comment))?;
                    }
                }
                "t" => in_t = false,
                _ => {}
            },
            XmlEvent::Text(text) => {
                if in_t && let Some(comment) = current.as_mut() {
                    comment
                        .comment
                        .get_or_insert_with(String::new)
                        .push_str(&text);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Numeric sort for `sheet2.xml` vs `sheet10.xml`.
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

const OLE_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

impl Parser for OdfOoxmlParser {
    fn name(&self) -> &'static str {
        "odf-ooxml-parser"
    }

    fn supported_mime_types(&self) -> &[MimeType] {
        SUPPORTED
    }

    fn understands(&self, data: &DataSource) -> bool {
        match data.peek(8) {
            // An OOXML document inside an OLE wrapper is the encrypted
            // form; this parser owns reporting it.
            Ok(head) if head == OLE_MAGIC => {
                data.has_highest_confidence_mime_type_in(SUPPORTED)
            }
            Ok(head) if head.starts_with(b"PK\x03\x04") => {
                if data.has_highest_confidence_mime_type_in(SUPPORTED) {
                    return true;
                }
                let Ok(bytes) = data.span() else {
                    return false;
                };
                match ZipArchive::new(Cursor::new(bytes.to_vec())) {
                    Ok(archive) => archive.file_names().any(|n| {
                        n == "content.xml"
                            || n == "word/document.xml"
                            || n == "xl/workbook.xml"
                            || n == "ppt/presentation.xml"
                    }),
                    Err(_) => false,
                }
            }
            _ => false,
        }
    }

    fn parse(&self, data: &DataSource, emitter: &mut Emitter<'_, '_>) -> Result<()> {
        let bytes = data.span()?;
        if bytes.starts_with(&OLE_MAGIC) {
            return Err(DocpipeError::file_encrypted("OOXML package encryption"));
        }
        let mut archive = ZipArchive::new(Cursor::new(bytes.to_vec())).map_err(|e| {
            DocpipeError::uninterpretable_data_with_source("broken document package", e)
        })?;
        let names = part_names(&archive);
        let has = |name: &str| names.iter().any(|n| n == name);

        if has("mimetype") || has("content.xml") {
            self.parse_odf(&mut archive, emitter)
        } else if has("word/document.xml") {
            self.parse_docx(&mut archive, emitter)
        } else if has("xl/workbook.xml") {
            self.parse_xlsx(&mut archive, &names, emitter)
        } else if has("ppt/presentation.xml") {
            self.parse_pptx(&mut archive, &names, emitter)
        } else {
            Err(DocpipeError::uninterpretable_data(
                "package carries no known content part",
            ))
        }
    }
}

impl OdfOoxmlParser {
    fn parse_odf(&self, archive: &mut Archive, emitter: &mut Emitter<'_, '_>) -> Result<()> {
        assert_odf_not_encrypted(archive)?;
        let metadata = read_part(archive, "meta.xml")
            .map(|meta| metadata_from_odf(&meta))
            .unwrap_or_default();
        if !emitter.open_document(Document::new(Arc::new(move || {
            metadata.clone()
        })))? {
            return Ok(());
        }

        let mut state = XmlDocState::default();
        if let Some(styles) = read_part(archive, "styles.xml") {
            collect_odf_list_styles(&styles, &mut state)?;
        }
        let content = read_part(archive, "content.xml").ok_or_else(|| {
            DocpipeError::uninterpretable_data("ODF package without content.xml")
        })?;
        collect_odf_list_styles(&content, &mut state)?;
        walk_content(&content, &state, TextPolicy::Direct, emitter)?;

        emitter.emit(Message::CloseDocument)?;
        Ok(())
    }

    fn parse_docx(&self, archive: &mut Archive, emitter: &mut Emitter<'_, '_>) -> Result<()> {
        let metadata = self.ooxml_metadata(archive);
        if !emitter.open_document(Document::new(Arc::new(move || {
            metadata.clone()
        })))? {
            return Ok(());
        }

        let state = XmlDocState::default();
        let content = read_part(archive, "word/document.xml").ok_or_else(|| {
            DocpipeError::uninterpretable_data("OOXML package without word/document.xml")
        })?;
        walk_content(&content, &state, TextPolicy::Tagged, emitter)?;
        if let Some(comments) = read_part(archive, "word/comments.xml") {
            emit_docx_comments(&comments, emitter)?;
        }

        emitter.emit(Message::CloseDocument)?;
        Ok(())
    }

    fn parse_xlsx(
        &self,
        archive: &mut Archive,
        names: &[String],
        emitter: &mut Emitter<'_, '_>,
    ) -> Result<()> {
        let metadata = self.ooxml_metadata(archive);
        if !emitter.open_document(Document::new(Arc::new(move || {
            metadata.clone()
        })))? {
            return Ok(());
        }

        let mut state = XmlDocState::default();
        if let Some(shared) = read_part(archive, "xl/sharedStrings.xml") {
            collect_shared_strings(&shared, &mut state)?;
        }
        let sheets = sorted_numeric(
            names
                .iter()
                .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
                .cloned()
                .collect(),
        );
        for sheet in sheets {
            if emitter.stopped() {
                return Ok(());
            }
            let Some(content) = read_part(archive, &sheet) else {
                continue;
            };
            walk_worksheet(&content, &state, emitter)?;
        }

        emitter.emit(Message::CloseDocument)?;
        Ok(())
    }

    fn parse_pptx(
        &self,
        archive: &mut Archive,
        names: &[String],
        emitter: &mut Emitter<'_, '_>,
    ) -> Result<()> {
        let metadata = self.ooxml_metadata(archive);
        if !emitter.open_document(Document::new(Arc::new(move || {
            metadata.clone()
        })))? {
            return Ok(());
        }

        let state = XmlDocState::default();
        let slides = sorted_numeric(
            names
                .iter()
                .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
                .cloned()
                .collect(),
        );
        for slide in slides {
            if emitter.stopped() {
                return Ok(());
            }
            let Some(content) = read_part(archive, &slide) else {
                continue;
            };
            if emitter.emit(Message::Page)? == crate::message::Continuation::Skip {
                emitter.emit(Message::ClosePage)?;
                continue;
            }
            walk_content(&content, &state, TextPolicy::Tagged, emitter)?;
            emitter.emit(Message::ClosePage)?;
        }

        emitter.emit(Message::CloseDocument)?;
        Ok(())
    }

    fn ooxml_metadata(&self, archive: &mut Archive) -> Metadata {
        let core = read_part(archive, "docProps/core.xml");
        let app = read_part(archive, "docProps/app.xml");
        metadata_from_ooxml(core.as_deref(), app.as_deref())
    }
}
