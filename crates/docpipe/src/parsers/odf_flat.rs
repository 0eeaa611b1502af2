#![cfg(feature = "office")]

//! Flat-XML OpenDocument parser.
//!
//! The single-file ODF variant: one XML document carrying meta, styles
//! and body. Shares the content walk and list-style collection with the
//! zipped parser.

use crate::data_source::DataSource;
use crate::error::{DocpipeError, Result};
use crate::message::{Document, Message, Metadata};
use crate::mime::MimeType;
use crate::parsers::common_xml::{
    TextPolicy, XmlDocState, collect_odf_list_styles, local_name, parse_iso_datetime,
    walk_content,
};
use crate::parsers::{Emitter, Parser};
use crate::xml_stream::{XmlEvent, XmlStream};
use std::sync::Arc;

static SUPPORTED: &[MimeType] = &[
    MimeType::from_static("application/vnd.oasis.opendocument.text-flat-xml"),
    MimeType::from_static("application/vnd.oasis.opendocument.spreadsheet-flat-xml"),
    MimeType::from_static("application/vnd.oasis.opendocument.presentation-flat-xml"),
    MimeType::from_static("application/vnd.oasis.opendocument.graphics-flat-xml"),
];

pub struct OdfFlatParser;

impl OdfFlatParser {
    pub fn new() -> Self {
        OdfFlatParser
    }
}

impl Default for OdfFlatParser {
    fn default() -> Self {
        Self::new()
    }
}

fn metadata_of(content: &[u8]) -> Metadata {
    let mut metadata = parse_meta_block(content);
    // Presentations and drawings carry no page-count statistic; their
    // slide/page elements are the count.
    if metadata.page_count.is_none() {
        let text = String::from_utf8_lossy(content);
        if text.contains("<office:presentation") || text.contains("<office:drawing") {
            let pages = text.matches("<draw:page ").count();
            if pages > 0 {
                metadata.page_count = Some(pages);
            }
        }
    }
    metadata
}

fn parse_meta_block(content: &[u8]) -> Metadata {
    let mut metadata = Metadata::default();
    let mut stream = XmlStream::new(content);
    let mut in_meta = false;
    let mut field: Option<String> = None;
    loop {
        match stream.next_event() {
            Ok(XmlEvent::Done) | Err(_) => break,
            Ok(XmlEvent::StartElement { name, .. }) => {
                let local = local_name(&name).to_string();
                if local == "meta" {
                    in_meta = true;
                } else if in_meta {
                    field = Some(local);
                }
            }
            Ok(XmlEvent::EndElement { name }) => {
                if local_name(&name) == "meta" {
                    in_meta = false;
                }
                field = None;
            }
            Ok(XmlEvent::Text(text)) => {
                if in_meta {
                    match field.as_deref() {
                        Some("initial-creator") => metadata.author = Some(text),
                        Some("creator") => metadata.last_modified_by = Some(text),
                        Some("creation-date") => {
                            metadata.creation_date = parse_iso_datetime(&text);
                        }
                        Some("date") => {
                            metadata.last_modification_date = parse_iso_datetime(&text);
                        }
                        _ => {}
                    }
                }
            }
            Ok(_) => {}
        }
    }
    metadata
}

impl Parser for OdfFlatParser {
    fn name(&self) -> &'static str {
        "odf-flat-parser"
    }

    fn supported_mime_types(&self) -> &[MimeType] {
        SUPPORTED
    }

    fn parse(&self, data: &DataSource, emitter: &mut Emitter<'_, '_>) -> Result<()> {
        let content = data.span()?;
        if !content
            .windows(b"office:document".len())
            .any(|w| w == b"office:document")
        {
            return Err(DocpipeError::uninterpretable_data(
                "not a flat OpenDocument file",
            ));
        }
        let metadata = metadata_of(content);
        if !emitter.open_document(Document::new(Arc::new(move || {
            metadata.clone()
        })))? {
            return Ok(());
        }

        let mut state = XmlDocState::default();
        collect_odf_list_styles(content, &mut state)?;
        walk_content(content, &state, TextPolicy::Direct, emitter)?;

        emitter.emit(Message::CloseDocument)?;
        Ok(())
    }
}
