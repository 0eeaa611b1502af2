//! Plain-text parser.
//!
//! Decodes the input to UTF-8 (detecting the charset, with a
//! printable-sequence fallback for binary junk) and emits paragraphs and
//! line breaks controlled by the `TXTParser::parse_paragraphs` and
//! `TXTParser::parse_lines` parameters.

use crate::charset;
use crate::data_source::DataSource;
use crate::error::Result;
use crate::message::{Continuation, Document, Message, Styling};
use crate::mime::MimeType;
use crate::parameters::ParserParameters;
use crate::parsers::{Emitter, Parser};

pub const PARSE_PARAGRAPHS_PARAM: &str = "TXTParser::parse_paragraphs";
pub const PARSE_LINES_PARAM: &str = "TXTParser::parse_lines";

static SUPPORTED: &[MimeType] = &[
    MimeType::from_static(crate::mime::PLAIN_TEXT_MIME_TYPE),
    MimeType::from_static(crate::mime::ASP_MIME_TYPE),
    MimeType::from_static(crate::mime::ASPDOTNET_MIME_TYPE),
    MimeType::from_static(crate::mime::XML_MIME_TYPE),
];

pub struct TxtParser {
    parse_paragraphs: bool,
    parse_lines: bool,
}

impl TxtParser {
    pub fn new() -> Self {
        TxtParser {
            parse_paragraphs: true,
            parse_lines: true,
        }
    }

    pub fn with_parameters(parameters: &ParserParameters) -> Self {
        TxtParser {
            parse_paragraphs: parameters.get::<bool>(PARSE_PARAGRAPHS_PARAM).unwrap_or(true),
            parse_lines: parameters.get::<bool>(PARSE_LINES_PARAM).unwrap_or(true),
        }
    }
}

impl Default for TxtParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Ratio of control/replacement characters above which the input is
/// treated as binary.
const BINARY_JUNK_RATIO: f64 = 0.1;

fn decode(data: &DataSource) -> Result<String> {
    let bytes = data.span()?;
    let (text, _had_errors) = charset::decode_detected(bytes);
    let total = text.chars().count().max(1);
    let junk = text
        .chars()
        .filter(|c| (c.is_control() && *c != '\n' && *c != '\r' && *c != '\t') || *c == '\u{FFFD}')
        .count();
    if junk as f64 / total as f64 > BINARY_JUNK_RATIO {
        tracing::debug!("input looks binary, extracting printable sequences");
        Ok(charset::sequences_of_printable_characters(&text, 4, '\n'))
    } else {
        Ok(text)
    }
}

#[derive(PartialEq)]
enum ParagraphState {
    Outside,
    Empty,
    Filled,
}

impl Parser for TxtParser {
    fn name(&self) -> &'static str {
        "txt-parser"
    }

    fn supported_mime_types(&self) -> &[MimeType] {
        SUPPORTED
    }

    fn parse(&self, data: &DataSource, emitter: &mut Emitter<'_, '_>) -> Result<()> {
        let text = decode(data)?;
        if !emitter.open_document(Document::empty())? {
            return Ok(());
        }

        if self.parse_paragraphs || self.parse_lines {
            self.parse_structured(&text, emitter)?;
        } else if emitter.emit(Message::text(text))? == Continuation::Stop {
            return Ok(());
        }

        emitter.emit(Message::CloseDocument)?;
        Ok(())
    }
}

impl TxtParser {
    fn parse_structured(&self, text: &str, emitter: &mut Emitter<'_, '_>) -> Result<()> {
        let mut state = ParagraphState::Outside;
        let mut last_eol = String::new();
        let mut pos = 0usize;
        // A skipped paragraph suppresses its lines but keeps the closer.
        let mut skip_paragraph = false;
        loop {
            if emitter.stopped() {
                return Ok(());
            }
            let eol_pos = text[pos..].find(['\r', '\n']).map(|i| pos + i);
            let mut eol = match eol_pos {
                Some(i) => text[i..i + 1].to_string(),
                None => String::new(),
            };
            if eol == "\r"
                && let Some(i) = eol_pos
                && text[i + 1..].starts_with('\n')
            {
                eol.push('\n');
            }
            let line = match eol_pos {
                Some(i) => &text[pos..i],
                None => &text[pos..],
            };

            if self.parse_paragraphs {
                if state == ParagraphState::Outside {
                    skip_paragraph = emitter.emit(Message::Paragraph(Styling::default()))?
                        == Continuation::Skip;
                    state = ParagraphState::Empty;
                }
                if line.is_empty() {
                    emitter.emit(Message::CloseParagraph)?;
                    state = ParagraphState::Outside;
                } else {
                    if state == ParagraphState::Filled && !skip_paragraph {
                        if self.parse_lines {
                            emitter.emit(Message::BreakLine(Styling::default()))?;
                        } else {
                            emitter.emit(Message::text(last_eol.clone()))?;
                        }
                    }
                    if !skip_paragraph {
                        emitter.emit(Message::text(line))?;
                    }
                    state = ParagraphState::Filled;
                }
            } else {
                if !line.is_empty() {
                    emitter.emit(Message::text(line))?;
                }
                if !eol.is_empty() {
                    if self.parse_lines {
                        emitter.emit(Message::BreakLine(Styling::default()))?;
                    } else {
                        emitter.emit(Message::text(eol.clone()))?;
                    }
                }
            }

            match eol_pos {
                None => break,
                Some(i) => pos = i + eol.len(),
            }
            last_eol = eol;
        }
        if self.parse_paragraphs && state != ParagraphState::Outside {
            emitter.emit(Message::CloseParagraph)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Pipeline;
    use crate::parsers::ParserElement;
    use crate::mime::confidence;

    fn run_txt(input: &[u8], parse_paragraphs: bool, parse_lines: bool) -> Vec<Message> {
        let mut data = DataSource::from_bytes(input.to_vec());
        data.add_mime_type(
            MimeType::from(crate::mime::PLAIN_TEXT_MIME_TYPE),
            confidence::HIGH,
        );
        let parser = TxtParser {
            parse_paragraphs,
            parse_lines,
        };
        let mut pipeline = Pipeline::new().then(ParserElement::new(parser));
        pipeline.process(Message::Data(data)).unwrap().emitted
    }

    fn names(messages: &[Message]) -> Vec<&'static str> {
        messages.iter().map(|m| m.tag_name()).collect()
    }

    #[test]
    fn test_two_paragraphs() {
        let messages = run_txt(b"A\n\nB\n", true, true);
        assert_eq!(
            names(&messages),
            vec![
                "document",
                "paragraph",
                "text",
                "close_paragraph",
                "paragraph",
                "text",
                "close_paragraph",
                "close_document",
            ]
        );
        let texts: Vec<_> = messages
            .iter()
            .filter_map(|m| match m {
                Message::Text(t) => Some(t.text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["A", "B"]);
    }

    #[test]
    fn test_lines_within_paragraph() {
        let messages = run_txt(b"A\nB", true, true);
        assert_eq!(
            names(&messages),
            vec![
                "document",
                "paragraph",
                "text",
                "break_line",
                "text",
                "close_paragraph",
                "close_document",
            ]
        );
    }

    #[test]
    fn test_no_paragraphs_no_lines_emits_raw_text() {
        let messages = run_txt(b"A\nB\n", false, false);
        assert_eq!(names(&messages), vec!["document", "text", "close_document"]);
        let Message::Text(t) = &messages[1] else { panic!() };
        assert_eq!(t.text, "A\nB\n");
    }

    #[test]
    fn test_lines_only() {
        let messages = run_txt(b"A\nB\n", false, true);
        assert_eq!(
            names(&messages),
            vec!["document", "text", "break_line", "text", "break_line", "close_document"]
        );
    }

    #[test]
    fn test_crlf_handling() {
        let messages = run_txt(b"A\r\n\r\nB\r\n", true, true);
        let texts: Vec<_> = messages
            .iter()
            .filter_map(|m| match m {
                Message::Text(t) => Some(t.text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["A", "B"]);
    }

    #[test]
    fn test_utf8_input_passes_through() {
        let messages = run_txt("zażółć gęślą jaźń".as_bytes(), false, false);
        let Message::Text(t) = &messages[1] else { panic!() };
        assert_eq!(t.text, "zażółć gęślą jaźń");
    }

    #[test]
    fn test_non_utf8_input_is_transcoded() {
        // Latin-1 "café" repeated enough for the detector to lock on.
        let mut bytes = Vec::new();
        for _ in 0..32 {
            bytes.extend_from_slice(&[b'c', b'a', b'f', 0xE9, b' ']);
        }
        let messages = run_txt(&bytes, false, false);
        let Message::Text(t) = &messages[1] else { panic!() };
        assert!(t.text.contains("café"));
    }

    #[test]
    fn test_binary_input_falls_back_to_printable_sequences() {
        let mut bytes = vec![0u8; 64];
        bytes.extend_from_slice(b"readable sequence");
        bytes.extend(vec![0u8; 64]);
        let messages = run_txt(&bytes, false, false);
        let Message::Text(t) = &messages[1] else { panic!() };
        assert!(t.text.contains("readable sequence"));
        assert!(!t.text.contains('\u{0}'));
    }
}
