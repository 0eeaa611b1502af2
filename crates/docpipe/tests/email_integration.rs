#![cfg(all(feature = "email", feature = "office"))]

//! EML end-to-end scenarios, including recursive body and attachment
//! parsing.

use docpipe::chain::{ChainElement, MessageCallbacks, Pipeline};
use docpipe::data_source::{DataSource, FileExtension};
use docpipe::message::{Continuation, DateTime, Message};
use docpipe::parsers::ParseDetectedFormat;
use docpipe::content_type;

struct Recorder {
    seen: std::sync::Arc<parking_lot::Mutex<Vec<Message>>>,
}

impl ChainElement for Recorder {
    fn process(
        &mut self,
        message: Message,
        callbacks: &mut MessageCallbacks<'_>,
    ) -> docpipe::Result<Continuation> {
        self.seen.lock().push(message.clone());
        callbacks.further(message)
    }

    fn is_leaf(&self) -> bool {
        true
    }
}

fn parse_eml(bytes: &[u8]) -> Vec<Message> {
    let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
    let mut pipeline = Pipeline::new()
        .then(content_type::Detector)
        .then(ParseDetectedFormat::new())
        .then(Recorder { seen: seen.clone() });
    let source =
        DataSource::from_bytes(bytes.to_vec()).with_file_extension(FileExtension::new("eml"));
    pipeline.process(Message::Data(source)).unwrap();
    let collected = seen.lock().clone();
    collected
}

#[test]
fn test_simple_eml_scenario() {
    let eml = b"From: a@b\r\n\
Date: Wed, 1 Jan 2020 00:00:00 +0000\r\n\
Subject: hi\r\n\
Content-Type: text/plain\r\n\
\r\n\
hello\r\n";
    let messages = parse_eml(eml);

    let Message::Document(document) = &messages[0] else {
        panic!("expected a document first");
    };
    let metadata = document.metadata();
    assert_eq!(metadata.author.as_deref(), Some("a@b"));
    assert_eq!(metadata.creation_date, Some(DateTime::new(2020, 1, 1, 0, 0, 0)));
    let email = metadata.email_attrs.expect("mail metadata");
    assert_eq!(email.from, "a@b");
    assert_eq!(email.subject.as_deref(), Some("hi"));
    assert_eq!(email.date, DateTime::new(2020, 1, 1, 0, 0, 0));

    let texts: Vec<_> = messages
        .iter()
        .filter_map(|m| match m {
            Message::Text(t) => Some(t.text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(texts.first().map(|t| t.trim_end()), Some("hello"));
    assert_eq!(texts.last().copied(), Some("\n\n"));
    assert_eq!(messages.last().unwrap().tag_name(), "close_document");
}

#[test]
fn test_html_body_is_parsed_recursively() {
    let eml = b"From: a@b\r\n\
Date: Wed, 1 Jan 2020 00:00:00 +0000\r\n\
Subject: html body\r\n\
Content-Type: text/html\r\n\
\r\n\
<html><body><p>rich <b>content</b></p></body></html>\r\n";
    let messages = parse_eml(eml);
    let names: Vec<_> = messages.iter().map(|m| m.tag_name()).collect();
    // The HTML body re-entered the pipeline: a nested document with
    // paragraph structure appears inside the mail document.
    assert_eq!(names.iter().filter(|n| **n == "document").count(), 2);
    assert!(names.contains(&"bold"));
    let texts: Vec<_> = messages
        .iter()
        .filter_map(|m| match m {
            Message::Text(t) => Some(t.text.as_str()),
            _ => None,
        })
        .collect();
    assert!(texts.contains(&"rich "));
    assert!(texts.contains(&"content"));
}

#[test]
fn test_attachment_is_parsed_between_its_markers() {
    let eml = b"From: a@b\r\n\
Date: Wed, 1 Jan 2020 00:00:00 +0000\r\n\
Subject: att\r\n\
Content-Type: multipart/mixed; boundary=\"B\"\r\n\
\r\n\
--B\r\n\
Content-Type: text/plain\r\n\
\r\n\
body text\r\n\
--B\r\n\
Content-Type: text/plain\r\n\
Content-Disposition: attachment; filename=\"notes.txt\"\r\n\
\r\n\
attachment text\r\n\
--B--\r\n";
    let messages = parse_eml(eml);
    let names: Vec<_> = messages.iter().map(|m| m.tag_name()).collect();
    let open_at = names.iter().position(|n| *n == "attachment").unwrap();
    let close_at = names.iter().position(|n| *n == "close_attachment").unwrap();
    // The attachment's parsed document sits strictly between the pair.
    let inner_document = names[open_at..close_at]
        .iter()
        .filter(|n| **n == "document")
        .count();
    assert_eq!(inner_document, 1);
    let texts: Vec<_> = messages
        .iter()
        .filter_map(|m| match m {
            Message::Text(t) => Some(t.text.clone()),
            _ => None,
        })
        .collect();
    assert!(texts.iter().any(|t| t.contains("attachment text")));
}

#[test]
fn test_skipping_attachments_drops_their_content() {
    struct SkipAttachments;
    impl ChainElement for SkipAttachments {
        fn process(
            &mut self,
            message: Message,
            callbacks: &mut MessageCallbacks<'_>,
        ) -> docpipe::Result<Continuation> {
            let skip = matches!(message, Message::Attachment(_));
            callbacks.further(message)?;
            Ok(if skip { Continuation::Skip } else { Continuation::Proceed })
        }
    }

    let eml = b"From: a@b\r\n\
Date: Wed, 1 Jan 2020 00:00:00 +0000\r\n\
Content-Type: multipart/mixed; boundary=\"B\"\r\n\
\r\n\
--B\r\n\
Content-Type: text/plain\r\n\
\r\n\
kept body\r\n\
--B\r\n\
Content-Type: text/plain\r\n\
Content-Disposition: attachment; filename=\"notes.txt\"\r\n\
\r\n\
dropped attachment\r\n\
--B--\r\n";
    let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
    let mut pipeline = Pipeline::new()
        .then(content_type::Detector)
        .then(ParseDetectedFormat::new())
        .then(SkipAttachments)
        .then(Recorder { seen: seen.clone() });
    let source =
        DataSource::from_bytes(eml.to_vec()).with_file_extension(FileExtension::new("eml"));
    pipeline.process(Message::Data(source)).unwrap();
    let collected = seen.lock().clone();
    let texts: Vec<_> = collected
        .iter()
        .filter_map(|m| match m {
            Message::Text(t) => Some(t.text.clone()),
            _ => None,
        })
        .collect();
    assert!(texts.iter().any(|t| t.contains("kept body")));
    assert!(!texts.iter().any(|t| t.contains("dropped attachment")));
    // The closer still arrives.
    let names: Vec<_> = collected.iter().map(|m| m.tag_name()).collect();
    assert!(names.contains(&"close_attachment"));
}
