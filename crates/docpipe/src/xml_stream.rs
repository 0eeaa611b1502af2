#![cfg(feature = "office")]

//! Pull-style wrapper over the `quick-xml` reader.
//!
//! Office parsers consume XML parts as a flat event stream: start and end
//! elements with their attributes, and text runs with entities resolved.
//! The lenient mode tolerates the tag soup found in real-world HTML
//! (mismatched end tags, HTML-only entities).

use crate::error::{DocpipeError, Result};
use quick_xml::Reader;
use quick_xml::escape::{resolve_predefined_entity, unescape, unescape_with};
use quick_xml::events::{BytesRef, Event};

#[derive(Debug, Clone, PartialEq)]
pub enum XmlEvent {
    /// `<name attr="v">`; empty elements are expanded, so a matching
    /// `EndElement` always follows.
    StartElement {
        name: String,
        attributes: Vec<(String, String)>,
    },
    EndElement {
        name: String,
    },
    Text(String),
    /// CDATA content, verbatim.
    CData(String),
    Comment(String),
    Done,
}

pub struct XmlStream<'a> {
    reader: Reader<&'a [u8]>,
    lenient: bool,
    consecutive_errors: u32,
    pending: Option<Event<'a>>,
}

/// Lenient parsing gives up after this many errors in a row; a sticky
/// reader error would otherwise never reach end of input.
const LENIENT_ERROR_LIMIT: u32 = 1000;

impl<'a> XmlStream<'a> {
    /// Strict stream for well-formed XML parts.
    pub fn new(content: &'a [u8]) -> Self {
        let mut reader = Reader::from_reader(content);
        let config = reader.config_mut();
        config.expand_empty_elements = true;
        config.check_end_names = true;
        XmlStream {
            reader,
            lenient: false,
            consecutive_errors: 0,
            pending: None,
        }
    }

    /// Lenient stream for HTML-ish input.
    pub fn lenient(content: &'a [u8]) -> Self {
        let mut reader = Reader::from_reader(content);
        let config = reader.config_mut();
        config.expand_empty_elements = true;
        config.check_end_names = false;
        XmlStream {
            reader,
            lenient: true,
            consecutive_errors: 0,
            pending: None,
        }
    }

    /// The next event, or `Done` at end of input.
    ///
    /// The underlying reader splits `&entity;`/`&#N;` references out of text
    /// runs into their own events, so text and references are accumulated
    /// here into a single `XmlEvent::Text` before the terminating event
    /// (stashed in `pending`) is returned on the following call.
    pub fn next_event(&mut self) -> Result<XmlEvent> {
        let mut text_buf: Option<String> = None;
        loop {
            let event = if let Some(pending) = self.pending.take() {
                pending
            } else {
                match self.reader.read_event() {
                    Ok(event) => {
                        self.consecutive_errors = 0;
                        event
                    }
                    Err(e) if self.lenient => {
                        self.consecutive_errors += 1;
                        if self.consecutive_errors > LENIENT_ERROR_LIMIT {
                            Event::Eof
                        } else {
                            tracing::debug!(error = %e, "skipping malformed markup");
                            continue;
                        }
                    }
                    Err(e) => {
                        return Err(DocpipeError::uninterpretable_data_with_source(
                            "malformed XML",
                            e,
                        ));
                    }
                }
            };
            match event {
                Event::Text(t) => {
                    let text = self.decode_text(&t)?;
                    text_buf.get_or_insert_with(String::new).push_str(&text);
                }
                Event::GeneralRef(r) => {
                    let text = self.resolve_general_ref(&r)?;
                    text_buf.get_or_insert_with(String::new).push_str(&text);
                }
                other => {
                    if let Some(text) = text_buf {
                        self.pending = Some(other);
                        return Ok(XmlEvent::Text(text));
                    }
                    return Ok(match other {
                        Event::Start(e) => XmlEvent::StartElement {
                            name: qname_to_string(e.name().as_ref()),
                            attributes: self.attributes(&e),
                        },
                        Event::Empty(e) => {
                            // expand_empty_elements leaves this unreachable, kept
                            // for completeness of the match.
                            XmlEvent::StartElement {
                                name: qname_to_string(e.name().as_ref()),
                                attributes: self.attributes(&e),
                            }
                        }
                        Event::End(e) => XmlEvent::EndElement {
                            name: qname_to_string(e.name().as_ref()),
                        },
                        Event::CData(t) => {
                            XmlEvent::CData(String::from_utf8_lossy(t.as_ref()).into_owned())
                        }
                        Event::Comment(t) => {
                            XmlEvent::Comment(String::from_utf8_lossy(t.as_ref()).into_owned())
                        }
                        Event::Decl(_) | Event::PI(_) | Event::DocType(_) => continue,
                        Event::Eof => XmlEvent::Done,
                        Event::Text(_) | Event::GeneralRef(_) => unreachable!(),
                    });
                }
            }
        }
    }

    fn decode_text(&self, t: &quick_xml::events::BytesText<'_>) -> Result<String> {
        if self.lenient {
            Ok(match t.decode() {
                Ok(decoded) => match unescape_with(&decoded, html_entity) {
                    Ok(text) => text.into_owned(),
                    Err(_) => decoded.into_owned(),
                },
                Err(_) => String::from_utf8_lossy(t.as_ref()).into_owned(),
            })
        } else {
            let decoded = match t.decode() {
                Ok(decoded) => decoded,
                Err(e) => {
                    return Err(DocpipeError::uninterpretable_data_with_source(
                        "undecodable XML text",
                        e,
                    ));
                }
            };
            match unescape(&decoded) {
                Ok(text) => Ok(text.into_owned()),
                Err(e) => Err(DocpipeError::uninterpretable_data_with_source(
                    "undecodable XML text",
                    e,
                )),
            }
        }
    }

    fn resolve_general_ref(&self, r: &BytesRef<'_>) -> Result<String> {
        match r.resolve_char_ref() {
            Ok(Some(ch)) => return Ok(ch.to_string()),
            Ok(None) => {}
            Err(e) => {
                if self.lenient {
                    return Ok(String::new());
                }
                return Err(DocpipeError::uninterpretable_data_with_source(
                    "undecodable XML character reference",
                    e,
                ));
            }
        }
        let name = match r.decode() {
            Ok(name) => name,
            Err(e) => {
                return Err(DocpipeError::uninterpretable_data_with_source(
                    "undecodable XML entity reference",
                    e,
                ));
            }
        };
        if self.lenient {
            if let Some(value) = html_entity(&name) {
                return Ok(value.to_string());
            }
            if let Some(value) = resolve_predefined_entity(&name) {
                return Ok(value.to_string());
            }
            Ok(format!("&{name};"))
        } else {
            match resolve_predefined_entity(&name) {
                Some(value) => Ok(value.to_string()),
                None => Err(DocpipeError::uninterpretable_data(format!(
                    "unknown XML entity reference &{name};"
                ))),
            }
        }
    }

    fn attributes(&self, element: &quick_xml::events::BytesStart<'_>) -> Vec<(String, String)> {
        element
            .attributes()
            .filter_map(|attr| attr.ok())
            .map(|attr| {
                let key = qname_to_string(attr.key.as_ref());
                let value = match attr.unescape_value() {
                    Ok(v) => v.into_owned(),
                    Err(_) => String::from_utf8_lossy(&attr.value).into_owned(),
                };
                (key, value)
            })
            .collect()
    }

    /// Skip everything up to and including the end tag matching the most
    /// recently returned start tag named `name`.
    pub fn skip_element(&mut self, name: &str) -> Result<()> {
        let mut depth = 1usize;
        loop {
            match self.next_event()? {
                XmlEvent::StartElement { name: n, .. } if n == name => depth += 1,
                XmlEvent::EndElement { name: n } if n == name => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                XmlEvent::Done => return Ok(()),
                _ => {}
            }
        }
    }
}

fn qname_to_string(name: &[u8]) -> String {
    String::from_utf8_lossy(name).into_owned()
}

/// Resolver for HTML-only named entities that XML unescaping rejects.
fn html_entity(name: &str) -> Option<&'static str> {
    Some(match name {
        "nbsp" => "\u{A0}",
        "copy" => "©",
        "reg" => "®",
        "trade" => "™",
        "mdash" => "—",
        "ndash" => "–",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201C}",
        "rdquo" => "\u{201D}",
        "hellip" => "…",
        "bull" => "•",
        "middot" => "·",
        "laquo" => "«",
        "raquo" => "»",
        "deg" => "°",
        "plusmn" => "±",
        "times" => "×",
        "divide" => "÷",
        "euro" => "€",
        "pound" => "£",
        "yen" => "¥",
        "cent" => "¢",
        "sect" => "§",
        "para" => "¶",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(content: &[u8]) -> Vec<XmlEvent> {
        let mut stream = XmlStream::new(content);
        let mut events = Vec::new();
        loop {
            let event = stream.next_event().unwrap();
            if event == XmlEvent::Done {
                break;
            }
            events.push(event);
        }
        events
    }

    #[test]
    fn test_basic_events() {
        let events = collect(b"<root a=\"1\"><child>text</child></root>");
        assert_eq!(
            events[0],
            XmlEvent::StartElement {
                name: "root".to_string(),
                attributes: vec![("a".to_string(), "1".to_string())],
            }
        );
        assert!(matches!(&events[1], XmlEvent::StartElement { name, .. } if name == "child"));
        assert_eq!(events[2], XmlEvent::Text("text".to_string()));
        assert!(matches!(&events[3], XmlEvent::EndElement { name } if name == "child"));
    }

    #[test]
    fn test_empty_elements_are_expanded() {
        let events = collect(b"<root><br/></root>");
        assert!(matches!(&events[1], XmlEvent::StartElement { name, .. } if name == "br"));
        assert!(matches!(&events[2], XmlEvent::EndElement { name } if name == "br"));
    }

    #[test]
    fn test_entities_resolved() {
        let events = collect(b"<r>a &amp; b &#65;</r>");
        assert_eq!(events[1], XmlEvent::Text("a & b A".to_string()));
    }

    #[test]
    fn test_lenient_html_entities() {
        let mut stream = XmlStream::lenient(b"<p>a&nbsp;b</p>");
        assert!(matches!(stream.next_event().unwrap(), XmlEvent::StartElement { .. }));
        assert_eq!(
            stream.next_event().unwrap(),
            XmlEvent::Text("a\u{A0}b".to_string())
        );
    }

    #[test]
    fn test_lenient_tolerates_mismatched_tags() {
        let mut stream = XmlStream::lenient(b"<b>text</i>");
        assert!(matches!(stream.next_event().unwrap(), XmlEvent::StartElement { .. }));
        assert_eq!(stream.next_event().unwrap(), XmlEvent::Text("text".to_string()));
        assert!(matches!(stream.next_event().unwrap(), XmlEvent::EndElement { .. }));
    }

    #[test]
    fn test_strict_rejects_malformed() {
        let mut stream = XmlStream::new(b"<a><b></a>");
        let mut result = Ok(XmlEvent::Done);
        for _ in 0..4 {
            result = stream.next_event();
            if result.is_err() {
                break;
            }
        }
        assert!(result.is_err());
    }

    #[test]
    fn test_skip_element() {
        let mut stream = XmlStream::new(b"<root><skip><inner>x</inner></skip><keep>y</keep></root>");
        loop {
            match stream.next_event().unwrap() {
                XmlEvent::StartElement { name, .. } if name == "skip" => {
                    stream.skip_element("skip").unwrap();
                    break;
                }
                _ => {}
            }
        }
        assert!(matches!(
            stream.next_event().unwrap(),
            XmlEvent::StartElement { name, .. } if name == "keep"
        ));
    }
}
