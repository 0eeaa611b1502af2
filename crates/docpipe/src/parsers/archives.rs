#![cfg(feature = "archives")]

//! Archive parser.
//!
//! Iterates zip and tar entries and re-emits every member as a `File`
//! message wrapping its decompressed bytes; downstream detection and
//! parsing re-enter recursively, so an archive of documents streams as a
//! sequence of parsed documents.

use crate::data_source::{DataSource, UnseekableStream};
use crate::error::{DocpipeError, Result};
use crate::message::{Continuation, FileMessage, Message};
use crate::mime::MimeType;
use crate::parsers::{Emitter, Parser};
use std::io::{Cursor, Read};

static SUPPORTED: &[MimeType] = &[
    MimeType::from_static(crate::mime::ZIP_MIME_TYPE),
    MimeType::from_static(crate::mime::TAR_MIME_TYPE),
];

pub struct ArchivesParser;

impl ArchivesParser {
    pub fn new() -> Self {
        ArchivesParser
    }
}

impl Default for ArchivesParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for ArchivesParser {
    fn name(&self) -> &'static str {
        "archives-parser"
    }

    fn supported_mime_types(&self) -> &[MimeType] {
        SUPPORTED
    }

    fn parse(&self, data: &DataSource, emitter: &mut Emitter<'_, '_>) -> Result<()> {
        let bytes = data.span()?;
        if bytes.starts_with(b"PK\x03\x04") {
            parse_zip(bytes, emitter)
        } else {
            parse_tar(bytes, emitter)
        }
    }
}

fn emit_entry(name: String, bytes: Vec<u8>, emitter: &mut Emitter<'_, '_>) -> Result<Continuation> {
    tracing::debug!(entry = name.as_str(), size = bytes.len(), "archive member");
    emitter.emit(Message::File(FileMessage::from_stream(
        UnseekableStream::new(Cursor::new(bytes)),
        Some(name),
    )))
}

fn parse_zip(bytes: &[u8], emitter: &mut Emitter<'_, '_>) -> Result<()> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).map_err(|e| {
        DocpipeError::uninterpretable_data_with_source("broken zip archive", e)
    })?;
    for index in 0..archive.len() {
        if emitter.stopped() {
            return Ok(());
        }
        let mut entry = match archive.by_index(index) {
            Ok(entry) => entry,
            Err(e) => {
                emitter.emit(Message::error(DocpipeError::uninterpretable_data_with_source(
                    format!("unreadable zip member {index}"),
                    e,
                )))?;
                continue;
            }
        };
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let mut content = Vec::new();
        if let Err(e) = entry.read_to_end(&mut content) {
            emitter.emit(Message::error(DocpipeError::uninterpretable_data_with_source(
                format!("unreadable zip member {name}"),
                e,
            )))?;
            continue;
        }
        emit_entry(name, content, emitter)?;
    }
    Ok(())
}

fn parse_tar(bytes: &[u8], emitter: &mut Emitter<'_, '_>) -> Result<()> {
    let mut archive = tar::Archive::new(Cursor::new(bytes));
    let entries = archive.entries().map_err(|e| {
        DocpipeError::uninterpretable_data_with_source("broken tar archive", e)
    })?;
    for entry in entries {
        if emitter.stopped() {
            return Ok(());
        }
        let mut entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                emitter.emit(Message::error(DocpipeError::uninterpretable_data_with_source(
                    "unreadable tar member",
                    e,
                )))?;
                continue;
            }
        };
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let mut content = Vec::new();
        if let Err(e) = entry.read_to_end(&mut content) {
            emitter.emit(Message::error(DocpipeError::uninterpretable_data_with_source(
                format!("unreadable tar member {name}"),
                e,
            )))?;
            continue;
        }
        emit_entry(name, content, emitter)?;
    }
    Ok(())
}
