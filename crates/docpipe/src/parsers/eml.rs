//! EML (RFC 822) parser.
//!
//! Walks the MIME part tree: inline text parts are emitted directly (HTML
//! bodies re-enter the pipeline as `.html` data sources), attachments are
//! announced with an `Attachment` pair and their bytes re-emitted for
//! recursive parsing unless the consumer skips them. Header fields feed
//! the document metadata.

use crate::data_source::{DataSource, FileExtension};
use crate::error::{DocpipeError, Result};
use crate::message::{
    Attachment, Continuation, DateTime, Document, EmailAttrs, Message, Metadata,
};
use crate::mime::MimeType;
use crate::parsers::{Emitter, Parser};
use mail_parser::{Address, MessageParser, MimeHeaders, PartType};
use std::sync::Arc;

static SUPPORTED: &[MimeType] = &[MimeType::from_static(crate::mime::EML_MIME_TYPE)];

pub struct EmlParser;

impl EmlParser {
    pub fn new() -> Self {
        EmlParser
    }
}

impl Default for EmlParser {
    fn default() -> Self {
        Self::new()
    }
}

fn format_addresses(address: Option<&Address<'_>>) -> String {
    let Some(address) = address else {
        return String::new();
    };
    address
        .iter()
        .filter_map(|addr| {
            let email = addr.address()?;
            Some(match &addr.name {
                Some(name) => format!("{name} <{email}>"),
                None => email.to_string(),
            })
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn broken_down(date: &mail_parser::DateTime) -> DateTime {
    DateTime {
        year: date.year as i32,
        month: date.month,
        day: date.day,
        hour: date.hour,
        minute: date.minute,
        second: date.second,
    }
}

fn metadata_of(message: &mail_parser::Message<'_>) -> Metadata {
    let from = format_addresses(message.from());
    let date = message.date().map(broken_down);
    let mut email_attrs = EmailAttrs {
        from: from.clone(),
        date: date.unwrap_or_default(),
        ..Default::default()
    };
    let to = format_addresses(message.to());
    if !to.is_empty() {
        email_attrs.to = Some(to);
    }
    if let Some(subject) = message.subject() {
        email_attrs.subject = Some(subject.to_string());
    }
    let reply_to = format_addresses(message.reply_to());
    if !reply_to.is_empty() {
        email_attrs.reply_to = Some(reply_to);
    }
    let sender = format_addresses(message.sender());
    if !sender.is_empty() {
        email_attrs.sender = Some(sender);
    }
    Metadata {
        author: if from.is_empty() { None } else { Some(from) },
        creation_date: date,
        email_attrs: Some(email_attrs),
        ..Default::default()
    }
}

fn is_attachment(part: &mail_parser::MessagePart<'_>) -> bool {
    part.content_disposition()
        .map(|cd| cd.ctype().eq_ignore_ascii_case("attachment"))
        .unwrap_or(false)
}

fn emit_attachment(
    part: &mail_parser::MessagePart<'_>,
    forced_extension: Option<&str>,
    emitter: &mut Emitter<'_, '_>,
) -> Result<()> {
    let name = part.attachment_name().map(|s| s.to_string());
    let bytes = part.contents();
    let extension = forced_extension
        .map(FileExtension::new)
        .or_else(|| {
            name.as_deref()
                .and_then(|n| FileExtension::from_path(std::path::Path::new(n)))
        });
    let continuation = emitter.emit(Message::Attachment(Attachment {
        name,
        size: bytes.len(),
        extension: extension.clone(),
    }))?;
    if continuation == Continuation::Proceed {
        let mut source = DataSource::from_bytes(bytes.to_vec());
        if let Some(extension) = extension {
            source = source.with_file_extension(extension);
        }
        emitter.emit(Message::Data(source))?;
    }
    emitter.emit(Message::CloseAttachment)?;
    Ok(())
}

fn walk_part(
    message: &mail_parser::Message<'_>,
    part_id: usize,
    emitter: &mut Emitter<'_, '_>,
) -> Result<()> {
    if emitter.stopped() {
        return Ok(());
    }
    let Some(part) = message.parts.get(part_id) else {
        return Ok(());
    };
    match &part.body {
        PartType::Multipart(children) => {
            let subtype = part
                .content_type()
                .and_then(|ct| ct.subtype())
                .unwrap_or("");
            if subtype.eq_ignore_ascii_case("alternative") {
                let html_children: Vec<usize> = children
                    .iter()
                    .copied()
                    .map(|id| id as usize)
                    .filter(|id| {
                        matches!(
                            message.parts.get(*id).map(|p| &p.body),
                            Some(PartType::Html(_))
                        )
                    })
                    .collect();
                if !html_children.is_empty() {
                    for id in html_children {
                        walk_part(message, id, emitter)?;
                    }
                } else if let Some(first) = children.first() {
                    walk_part(message, *first as usize, emitter)?;
                }
            } else {
                for id in children {
                    walk_part(message, *id as usize, emitter)?;
                }
            }
        }
        PartType::Text(text) => {
            if is_attachment(part) {
                emit_attachment(part, None, emitter)?;
            } else {
                emitter.emit(Message::text(text.replace('\r', "")))?;
                emitter.emit(Message::text("\n\n"))?;
            }
        }
        PartType::Html(html) => {
            if is_attachment(part) {
                emit_attachment(part, None, emitter)?;
            } else {
                let source = DataSource::from_bytes(html.replace('\r', "").into_bytes())
                    .with_file_extension(FileExtension::new("html"));
                emitter.emit(Message::Data(source))?;
                emitter.emit(Message::text("\n\n"))?;
            }
        }
        PartType::Binary(_) | PartType::InlineBinary(_) => {
            emit_attachment(part, None, emitter)?;
        }
        PartType::Message(_) => {
            emit_attachment(part, Some("eml"), emitter)?;
        }
    }
    Ok(())
}

impl Parser for EmlParser {
    fn name(&self) -> &'static str {
        "eml-parser"
    }

    fn supported_mime_types(&self) -> &[MimeType] {
        SUPPORTED
    }

    fn understands(&self, data: &DataSource) -> bool {
        let Ok(bytes) = data.span() else {
            return false;
        };
        match MessageParser::default().parse(bytes) {
            Some(message) => message.from().is_some() && message.date().is_some(),
            None => false,
        }
    }

    fn parse(&self, data: &DataSource, emitter: &mut Emitter<'_, '_>) -> Result<()> {
        let bytes = data.span()?;
        let message = MessageParser::default()
            .parse(bytes)
            .ok_or_else(|| DocpipeError::uninterpretable_data("not an RFC 822 message"))?;
        if message.from().is_none() && message.date().is_none() {
            return Err(DocpipeError::uninterpretable_data(
                "message carries neither From nor Date",
            ));
        }
        let metadata = metadata_of(&message);
        if !emitter.open_document(Document::new(Arc::new(move || {
            metadata.clone()
        })))? {
            return Ok(());
        }
        walk_part(&message, 0, emitter)?;
        emitter.emit(Message::CloseDocument)?;
        Ok(())
    }
}
