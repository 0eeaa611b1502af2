//! Outlook `.msg` parser.
//!
//! Decodes the CFBF property streams through `msg_parser` and emits the
//! mail structure: `Mail` with subject, `MailBody` around the message
//! text, and an `Attachment` pair per attachment with the payload
//! re-emitted for recursive parsing.

use crate::data_source::{DataSource, FileExtension};
use crate::error::{DocpipeError, Result};
use crate::message::{
    Attachment, Continuation, Document, EmailAttrs, Mail, Message, Metadata,
};
use crate::mime::MimeType;
use crate::parsers::{Emitter, Parser};
use std::sync::Arc;

static SUPPORTED: &[MimeType] = &[
    MimeType::from_static(crate::mime::OUTLOOK_MIME_TYPE),
    MimeType::from_static(crate::mime::MS_MSG_MIME_TYPE),
];

pub struct MsgParser;

impl MsgParser {
    pub fn new() -> Self {
        MsgParser
    }
}

impl Default for MsgParser {
    fn default() -> Self {
        Self::new()
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn metadata_of(outlook: &msg_parser::Outlook) -> Metadata {
    let from = outlook.sender.email.clone();
    let to = outlook
        .to
        .iter()
        .map(|p| p.email.clone())
        .filter(|e| !e.is_empty())
        .collect::<Vec<String>>()
        .join(", ");
    let mut email_attrs = EmailAttrs {
        from: from.clone(),
        ..Default::default()
    };
    if !to.is_empty() {
        email_attrs.to = Some(to);
    }
    email_attrs.subject = non_empty(&outlook.subject);
    Metadata {
        author: non_empty(&from),
        email_attrs: Some(email_attrs),
        ..Default::default()
    }
}

impl Parser for MsgParser {
    fn name(&self) -> &'static str {
        "msg-parser"
    }

    fn supported_mime_types(&self) -> &[MimeType] {
        SUPPORTED
    }

    fn understands(&self, data: &DataSource) -> bool {
        if !data.has_highest_confidence_mime_type_in(SUPPORTED) {
            return false;
        }
        // A PST store shares the extension-derived type but not the CFBF
        // container.
        matches!(data.peek(8), Ok(head) if head == [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1])
    }

    fn parse(&self, data: &DataSource, emitter: &mut Emitter<'_, '_>) -> Result<()> {
        let bytes = data.span()?;
        let outlook = msg_parser::Outlook::from_slice(bytes).map_err(|e| {
            DocpipeError::external_library(format!("Outlook message decoding failed: {e}"))
        })?;

        let metadata = metadata_of(&outlook);
        if !emitter.open_document(Document::new(Arc::new(move || {
            metadata.clone()
        })))? {
            return Ok(());
        }

        let continuation = emitter.emit(Message::Mail(Mail {
            subject: non_empty(&outlook.subject),
            date: None,
            level: Some(0),
        }))?;

        if continuation == Continuation::Proceed {
            let body_continuation = emitter.emit(Message::MailBody)?;
            if body_continuation == Continuation::Proceed && !outlook.body.is_empty() {
                emitter.emit(Message::text(outlook.body.replace('\r', "")))?;
            }
            emitter.emit(Message::CloseMailBody)?;

            for attachment in &outlook.attachments {
                if emitter.stopped() {
                    return Ok(());
                }
                let name = if !attachment.file_name.is_empty() {
                    Some(attachment.file_name.clone())
                } else if !attachment.display_name.is_empty() {
                    Some(attachment.display_name.clone())
                } else {
                    None
                };
                let extension = if attachment.extension.is_empty() {
                    name.as_deref()
                        .and_then(|n| FileExtension::from_path(std::path::Path::new(n)))
                } else {
                    Some(FileExtension::new(&attachment.extension))
                };
                let payload = if attachment.payload.is_empty() {
                    None
                } else {
                    decode_hex(&attachment.payload)
                };
                let size = payload.as_ref().map(|p| p.len()).unwrap_or(0);
                let att_continuation = emitter.emit(Message::Attachment(Attachment {
                    name,
                    size,
                    extension: extension.clone(),
                }))?;
                if att_continuation == Continuation::Proceed
                    && let Some(payload) = payload
                {
                    let mut source = DataSource::from_bytes(payload);
                    if let Some(extension) = extension {
                        source = source.with_file_extension(extension);
                    }
                    emitter.emit(Message::Data(source))?;
                }
                emitter.emit(Message::CloseAttachment)?;
            }
        }

        emitter.emit(Message::CloseMail)?;
        emitter.emit(Message::CloseDocument)?;
        Ok(())
    }
}

/// Attachment payloads arrive hex-encoded from the property stream.
fn decode_hex(payload: &str) -> Option<Vec<u8>> {
    if payload.len() % 2 != 0 {
        return None;
    }
    payload
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            let hex = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(hex, 16).ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_hex() {
        assert_eq!(decode_hex("68656c6c6f"), Some(b"hello".to_vec()));
        assert_eq!(decode_hex("zz"), None);
        assert_eq!(decode_hex("abc"), None);
        assert_eq!(decode_hex(""), Some(Vec::new()));
    }

    #[test]
    fn test_understands_requires_cfbf_magic() {
        let parser = MsgParser::new();
        let mut pst_like = DataSource::from_static_bytes(b"!BDN rest");
        pst_like.add_mime_type(
            MimeType::from(crate::mime::OUTLOOK_MIME_TYPE),
            crate::mime::confidence::HIGH,
        );
        assert!(!parser.understands(&pst_like));

        let bytes: &'static [u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1, 0, 0];
        let mut msg_like = DataSource::from_static_bytes(bytes);
        msg_like.add_mime_type(
            MimeType::from(crate::mime::OUTLOOK_MIME_TYPE),
            crate::mime::confidence::HIGH,
        );
        assert!(parser.understands(&msg_like));
    }

    #[test]
    fn test_truncated_container_is_an_error() {
        use crate::chain::Pipeline;
        use crate::parsers::ParserElement;
        let mut bytes = vec![0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
        bytes.extend(vec![0u8; 64]);
        let mut data = DataSource::from_bytes(bytes);
        data.add_mime_type(
            MimeType::from(crate::mime::OUTLOOK_MIME_TYPE),
            crate::mime::confidence::HIGH,
        );
        let mut pipeline = Pipeline::new().then(ParserElement::new(MsgParser::new()));
        let run = pipeline.process(Message::Data(data)).unwrap();
        assert!(run.emitted[0].is_error());
    }
}
