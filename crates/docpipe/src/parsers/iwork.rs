#![cfg(feature = "office")]

//! iWork parser (Pages, Numbers, Keynote '08/'09 packages).
//!
//! Reads the package's main XML part (`index.xml`, `index.apxl` or
//! `presentation.apxl`), picks the sub-format from the root element's
//! namespace prefix (`sl:` Pages, `ls:` Numbers, `key:` Keynote), and
//! collects textual elements with their drawable positions. Elements are
//! sorted by (y, x) for page-local reading order; footnotes queue up and
//! flush after the body. A package whose root element cannot be parsed is
//! treated as encrypted, which is how these packages present themselves.

use crate::data_source::DataSource;
use crate::error::{DocpipeError, Result};
use crate::message::{Document, Message, Styling};
use crate::mime::MimeType;
use crate::parsers::common_xml::local_name;
use crate::parsers::{Emitter, Parser};
use crate::xml_stream::{XmlEvent, XmlStream};
use std::io::{Cursor, Read};
use zip::ZipArchive;

static SUPPORTED: &[MimeType] = &[
    MimeType::from_static(crate::mime::PAGES_MIME_TYPE),
    MimeType::from_static(crate::mime::NUMBERS_MIME_TYPE),
    MimeType::from_static(crate::mime::KEYNOTE_MIME_TYPE),
    MimeType::from_static("application/x-iwork-pages-sffpages"),
    MimeType::from_static("application/x-iwork-numbers-sffnumbers"),
    MimeType::from_static("application/x-iwork-keynote-sffkey"),
    MimeType::from_static("application/x-iwork-document"),
];

const MAIN_PARTS: &[&str] = &["index.apxl", "presentation.apxl", "index.xml"];

#[derive(Debug, Clone, Copy, PartialEq)]
enum SubFormat {
    Pages,
    Numbers,
    Keynote,
}

pub struct IWorkParser;

impl IWorkParser {
    pub fn new() -> Self {
        IWorkParser
    }
}

impl Default for IWorkParser {
    fn default() -> Self {
        Self::new()
    }
}

/// One piece of document text with its page-local placement.
struct TextualElement {
    y: f32,
    x: f32,
    order: usize,
    text: String,
}

#[derive(Default)]
struct PageCollector {
    elements: Vec<TextualElement>,
    footnotes: Vec<String>,
    footnote_count: usize,
}

impl PageCollector {
    /// Reading order is top-to-bottom then left-to-right, stable for
    /// unpositioned (flowed) text.
    fn flush(&mut self, emitter: &mut Emitter<'_, '_>) -> Result<()> {
        let mut elements = std::mem::take(&mut self.elements);
        elements.sort_by(|a, b| {
            (a.y, a.x, a.order)
                .partial_cmp(&(b.y, b.x, b.order))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for element in elements {
            if emitter.stopped() {
                return Ok(());
            }
            if element.text.trim().is_empty() {
                continue;
            }
            if emitter.emit(Message::Paragraph(Styling::default()))?
                == crate::message::Continuation::Proceed
            {
                emitter.emit(Message::text(element.text))?;
            }
            emitter.emit(Message::CloseParagraph)?;
        }
        for footnote in std::mem::take(&mut self.footnotes) {
            if footnote.trim().is_empty() {
                continue;
            }
            if emitter.emit(Message::Paragraph(Styling::default()))?
                == crate::message::Continuation::Proceed
            {
                emitter.emit(Message::text(footnote))?;
            }
            emitter.emit(Message::CloseParagraph)?;
        }
        Ok(())
    }
}

fn attr<'a>(attributes: &'a [(String, String)], wanted: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|(k, _)| local_name(k) == wanted)
        .map(|(_, v)| v.as_str())
}

impl Parser for IWorkParser {
    fn name(&self) -> &'static str {
        "iwork-parser"
    }

    fn supported_mime_types(&self) -> &[MimeType] {
        SUPPORTED
    }

    fn understands(&self, data: &DataSource) -> bool {
        if !data.has_highest_confidence_mime_type_in(SUPPORTED) {
            return false;
        }
        matches!(data.peek(4), Ok(head) if head == b"PK\x03\x04")
    }

    fn parse(&self, data: &DataSource, emitter: &mut Emitter<'_, '_>) -> Result<()> {
        let bytes = data.span()?;
        let mut archive = ZipArchive::new(Cursor::new(bytes.to_vec())).map_err(|e| {
            DocpipeError::uninterpretable_data_with_source("broken iWork package", e)
        })?;
        let mut main = None;
        for part in MAIN_PARTS {
            if let Ok(mut entry) = archive.by_name(part) {
                let mut buf = Vec::new();
                entry.read_to_end(&mut buf)?;
                main = Some(buf);
                break;
            }
        }
        let Some(content) = main else {
            return Err(DocpipeError::uninterpretable_data(
                "package carries no index part",
            ));
        };

        let mut stream = XmlStream::new(&content);
        // These packages encrypt the index part in place; an unparsable
        // root element is the encryption signal.
        let root = loop {
            match stream.next_event() {
                Ok(XmlEvent::StartElement { name, .. }) => break name,
                Ok(XmlEvent::Done) => {
                    return Err(DocpipeError::file_encrypted("iWork package encryption"));
                }
                Err(_) => {
                    return Err(DocpipeError::file_encrypted("iWork package encryption"));
                }
                Ok(_) => continue,
            }
        };
        let format = match root.split(':').next() {
            Some("sl") => SubFormat::Pages,
            Some("ls") => SubFormat::Numbers,
            Some("key") => SubFormat::Keynote,
            _ => {
                return Err(DocpipeError::uninterpretable_data(format!(
                    "unrecognized iWork root element {root}"
                )));
            }
        };
        tracing::debug!(?format, "iWork package");

        if !emitter.open_document(Document::empty())? {
            return Ok(());
        }
        self.walk(&mut stream, emitter)?;
        emitter.emit(Message::CloseDocument)?;
        Ok(())
    }
}

impl IWorkParser {
    fn walk(
        &self,
        stream: &mut XmlStream<'_>,
        emitter: &mut Emitter<'_, '_>,
    ) -> Result<()> {
        let mut collector = PageCollector::default();
        let mut current: Option<TextualElement> = None;
        let mut order = 0usize;
        // Innermost drawable position, carried down to its text.
        let mut position_stack: Vec<(f32, f32)> = Vec::new();
        let mut in_footnote = false;
        let mut footnote_text = String::new();
        let mut page_open = false;

        loop {
            if emitter.stopped() {
                return Ok(());
            }
            match stream.next_event()? {
                XmlEvent::Done => break,
                XmlEvent::StartElement { name, attributes } => {
                    match local_name(&name) {
                        "slide" | "page" => {
                            if page_open {
                                collector.flush(emitter)?;
                                emitter.emit(Message::ClosePage)?;
                            }
                            page_open = true;
                            if emitter.emit(Message::Page)? == crate::message::Continuation::Skip {
                                stream.skip_element(&name)?;
                                emitter.emit(Message::ClosePage)?;
                                page_open = false;
                            }
                        }
                        "position" => {
                            let x = attr(&attributes, "x")
                                .and_then(|v| v.parse::<f32>().ok())
                                .unwrap_or(0.0);
                            let y = attr(&attributes, "y")
                                .and_then(|v| v.parse::<f32>().ok())
                                .unwrap_or(0.0);
                            if let Some(slot) = position_stack.last_mut() {
                                *slot = (x, y);
                            }
                        }
                        "drawable-shape" | "sticky-note" | "tabular-info" | "media" => {
                            position_stack.push((0.0, 0.0));
                        }
                        "footnote" => {
                            in_footnote = true;
                            footnote_text.clear();
                            collector.footnote_count += 1;
                        }
                        "footnote-mark" => {
                            if let Some(element) = current.as_mut() {
                                element
                                    .text
                                    .push_str(&format!("({})", collector.footnote_count + 1));
                            }
                        }
                        "p" => {
                            if !in_footnote {
                                let (x, y) =
                                    position_stack.last().copied().unwrap_or((0.0, 0.0));
                                current = Some(TextualElement {
                                    y,
                                    x,
                                    order,
                                    text: String::new(),
                                });
                                order += 1;
                            }
                        }
                        "br" | "crbr" | "lnbr" => {
                            if let Some(element) = current.as_mut() {
                                element.text.push('\n');
                            } else if in_footnote {
                                footnote_text.push('\n');
                            }
                        }
                        "tab" => {
                            if let Some(element) = current.as_mut() {
                                element.text.push('\t');
                            }
                        }
                        // Numbers stores short cell text in attributes.
                        "ct" => {
                            if let Some(text) = attr(&attributes, "s")
                                && !text.is_empty()
                            {
                                let (x, y) =
                                    position_stack.last().copied().unwrap_or((0.0, 0.0));
                                collector.elements.push(TextualElement {
                                    y,
                                    x,
                                    order,
                                    text: text.to_string(),
                                });
                                order += 1;
                            }
                        }
                        _ => {}
                    }
                }
                XmlEvent::EndElement { name } => match local_name(&name) {
                    "slide" | "page" => {
                        if page_open {
                            collector.flush(emitter)?;
                            emitter.emit(Message::ClosePage)?;
                            page_open = false;
                        }
                    }
                    "drawable-shape" | "sticky-note" | "tabular-info" | "media" => {
                        position_stack.pop();
                    }
                    "footnote" => {
                        in_footnote = false;
                        collector
                            .footnotes
                            .push(format!("({}) {}", collector.footnote_count, footnote_text));
                        footnote_text.clear();
                    }
                    "p" => {
                        if !in_footnote
                            && let Some(element) = current.take()
                        {
                            collector.elements.push(element);
                        }
                    }
                    _ => {}
                },
                XmlEvent::Text(text) | XmlEvent::CData(text) => {
                    if in_footnote {
                        footnote_text.push_str(&text);
                    } else if let Some(element) = current.as_mut() {
                        element.text.push_str(&text);
                    }
                }
                _ => {}
            }
        }
        if page_open {
            collector.flush(emitter)?;
            emitter.emit(Message::ClosePage)?;
        } else {
            collector.flush(emitter)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Pipeline;
    use crate::mime::confidence;
    use crate::parsers::ParserElement;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn package(main_name: &str, main_content: &[u8]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("buildVersionHistory.plist", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"<plist/>").unwrap();
        writer
            .start_file(main_name.to_string(), SimpleFileOptions::default())
            .unwrap();
        writer.write_all(main_content).unwrap();
        writer.finish().unwrap().into_inner()
    }

    fn run_iwork(bytes: Vec<u8>, mime: &'static str) -> Vec<Message> {
        let mut data = DataSource::from_bytes(bytes);
        data.add_mime_type(MimeType::from(mime), confidence::VERY_HIGH);
        let mut pipeline = Pipeline::new().then(ParserElement::new(IWorkParser::new()));
        pipeline.process(Message::Data(data)).unwrap().emitted
    }

    fn texts(messages: &[Message]) -> Vec<&str> {
        messages
            .iter()
            .filter_map(|m| match m {
                Message::Text(t) => Some(t.text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_pages_flowed_text() {
        let content = b"<sl:document xmlns:sl=\"sl\"><sl:section-prototypes/>\
<sf:text-body><sf:p>First paragraph</sf:p><sf:p>Second paragraph</sf:p></sf:text-body>\
</sl:document>";
        let messages = run_iwork(
            package("index.xml", content),
            crate::mime::PAGES_MIME_TYPE,
        );
        assert_eq!(texts(&messages), vec!["First paragraph", "Second paragraph"]);
    }

    #[test]
    fn test_keynote_slides_sorted_by_position() {
        let content = b"<key:presentation xmlns:key=\"key\"><key:slide-list><key:slide>\
<sf:drawable-shape><sf:geometry><sf:position sfa:x=\"100\" sfa:y=\"500\"/></sf:geometry>\
<sf:text-body><sf:p>lower box</sf:p></sf:text-body></sf:drawable-shape>\
<sf:drawable-shape><sf:geometry><sf:position sfa:x=\"100\" sfa:y=\"50\"/></sf:geometry>\
<sf:text-body><sf:p>title box</sf:p></sf:text-body></sf:drawable-shape>\
</key:slide></key:slide-list></key:presentation>";
        let messages = run_iwork(
            package("index.apxl", content),
            crate::mime::KEYNOTE_MIME_TYPE,
        );
        assert_eq!(texts(&messages), vec!["title box", "lower box"]);
        let names: Vec<_> = messages.iter().map(|m| m.tag_name()).collect();
        assert!(names.contains(&"page"));
        assert!(names.contains(&"close_page"));
    }

    #[test]
    fn test_numbers_cell_text() {
        let content = b"<ls:document xmlns:ls=\"ls\"><ls:workspace>\
<sf:tabular-info><sf:geometry><sf:position sfa:x=\"0\" sfa:y=\"0\"/></sf:geometry>\
<sf:ct sfa:s=\"cell value\"/></sf:tabular-info>\
</ls:workspace></ls:document>";
        let messages = run_iwork(
            package("index.xml", content),
            crate::mime::NUMBERS_MIME_TYPE,
        );
        assert_eq!(texts(&messages), vec!["cell value"]);
    }

    #[test]
    fn test_footnote_queued_after_body() {
        let content = b"<sl:document xmlns:sl=\"sl\"><sf:text-body>\
<sf:p>body<sf:footnote><sf:p>the note</sf:p></sf:footnote></sf:p>\
</sf:text-body></sl:document>";
        let messages = run_iwork(
            package("index.xml", content),
            crate::mime::PAGES_MIME_TYPE,
        );
        let all = texts(&messages).join("|");
        let body_at = all.find("body").unwrap();
        let note_at = all.find("the note").unwrap();
        assert!(body_at < note_at);
    }

    #[test]
    fn test_unparsable_root_reports_encryption() {
        let messages = run_iwork(
            package("index.xml", &[0xFF, 0xFE, 0x00, 0x12, 0x34]),
            crate::mime::PAGES_MIME_TYPE,
        );
        let error = messages
            .iter()
            .find_map(|m| match m {
                Message::Error(e) => Some(e),
                _ => None,
            })
            .expect("encryption error expected");
        assert_eq!(error.kind(), crate::error::ErrorKind::FileEncrypted);
    }

    #[test]
    fn test_unknown_root_is_uninterpretable() {
        let messages = run_iwork(
            package("index.xml", b"<other:document xmlns:other=\"o\"/>"),
            crate::mime::PAGES_MIME_TYPE,
        );
        let error = messages
            .iter()
            .find_map(|m| match m {
                Message::Error(e) => Some(e),
                _ => None,
            })
            .expect("error expected");
        assert_eq!(error.kind(), crate::error::ErrorKind::UninterpretableData);
    }
}
