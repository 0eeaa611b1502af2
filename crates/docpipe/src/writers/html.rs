//! HTML rendering of the message stream.

use crate::chain::{ChainElement, MessageCallbacks};
use crate::data_source::DataSource;
use crate::error::Result;
use crate::message::{Continuation, Message, Metadata, Styling};

fn encoded(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
    out
}

fn styling_attrs(styling: &Styling) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    if !styling.classes.is_empty() {
        attrs.push(("class".to_string(), styling.classes.join(" ")));
    }
    if !styling.id.is_empty() {
        attrs.push(("id".to_string(), styling.id.clone()));
    }
    if !styling.style.is_empty() {
        attrs.push(("style".to_string(), styling.style.clone()));
    }
    attrs
}

fn tag_with_attrs(name: &str, attrs: &[(String, String)], out: &mut String) {
    out.push('<');
    out.push_str(name);
    for (key, value) in attrs {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        out.push_str(&encoded(value));
        out.push('"');
    }
    out.push('>');
}

/// Stateful HTML writer. Opens `<html>/<head>/<body>` on the outermost
/// `Document`, maps each structural message to its tag, escapes text, and
/// closes the scaffolding on the outermost `CloseDocument`.
#[derive(Default)]
pub struct HtmlWriter {
    header_open: bool,
    nested_docs: i32,
}

impl HtmlWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_header(&mut self, metadata: &Metadata, out: &mut String) {
        out.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
        if let Some(author) = &metadata.author {
            out.push_str(&format!("<meta name=\"author\" content=\"{}\">\n", encoded(author)));
        }
        if let Some(date) = &metadata.creation_date {
            out.push_str(&format!("<meta name=\"creation-date\" content=\"{}\">\n", date));
        }
        if let Some(by) = &metadata.last_modified_by {
            out.push_str(&format!(
                "<meta name=\"last-modified-by\" content=\"{}\">\n",
                encoded(by)
            ));
        }
        if let Some(date) = &metadata.last_modification_date {
            out.push_str(&format!(
                "<meta name=\"last-modification-date\" content=\"{}\">\n",
                date
            ));
        }
        if let Some(email) = &metadata.email_attrs {
            out.push_str(&format!("<meta name=\"from\" content=\"{}\">\n", encoded(&email.from)));
            out.push_str(&format!("<meta name=\"date\" content=\"{}\">\n", email.date));
            if let Some(to) = &email.to {
                out.push_str(&format!("<meta name=\"to\" content=\"{}\">\n", encoded(to)));
            }
            if let Some(subject) = &email.subject {
                out.push_str(&format!("<meta name=\"subject\" content=\"{}\">\n", encoded(subject)));
            }
            if let Some(reply_to) = &email.reply_to {
                out.push_str(&format!("<meta name=\"reply-to\" content=\"{}\">\n", encoded(reply_to)));
            }
            if let Some(sender) = &email.sender {
                out.push_str(&format!("<meta name=\"sender\" content=\"{}\">\n", encoded(sender)));
            }
        }
        self.header_open = true;
    }

    fn close_header(&mut self, out: &mut String) {
        if self.header_open {
            out.push_str("</head>\n<body>\n");
            self.header_open = false;
        }
    }

    /// Render one message into `out`.
    pub fn write_to(&mut self, message: &Message, out: &mut String) {
        if !matches!(
            message,
            Message::Style(_) | Message::Document(_) | Message::CloseDocument
        ) {
            self.close_header(out);
        }
        match message {
            Message::Document(document) => {
                self.nested_docs += 1;
                if self.nested_docs == 1 {
                    let metadata = document.metadata();
                    self.write_header(&metadata, out);
                }
            }
            Message::CloseDocument => {
                self.nested_docs -= 1;
                if self.nested_docs == 0 {
                    self.close_header(out);
                    out.push_str("</body>\n</html>\n");
                }
            }
            Message::Paragraph(s) => tag_with_attrs("p", &styling_attrs(s), out),
            Message::CloseParagraph => out.push_str("</p>"),
            Message::Section(s) => tag_with_attrs("div", &styling_attrs(s), out),
            Message::CloseSection => out.push_str("</div>"),
            Message::Span(s) => tag_with_attrs("span", &styling_attrs(s), out),
            Message::CloseSpan => out.push_str("</span>"),
            Message::Bold(s) => tag_with_attrs("b", &styling_attrs(s), out),
            Message::CloseBold => out.push_str("</b>"),
            Message::Italic(s) => tag_with_attrs("i", &styling_attrs(s), out),
            Message::CloseItalic => out.push_str("</i>"),
            Message::Underline(s) => tag_with_attrs("u", &styling_attrs(s), out),
            Message::CloseUnderline => out.push_str("</u>"),
            Message::Table(s) => tag_with_attrs("table", &styling_attrs(s), out),
            Message::CloseTable => out.push_str("</table>"),
            Message::TableRow(s) => tag_with_attrs("tr", &styling_attrs(s), out),
            Message::CloseTableRow => out.push_str("</tr>"),
            Message::TableCell(s) => tag_with_attrs("td", &styling_attrs(s), out),
            Message::CloseTableCell => out.push_str("</td>"),
            Message::Caption(s) => tag_with_attrs("caption", &styling_attrs(s), out),
            Message::CloseCaption => out.push_str("</caption>"),
            Message::BreakLine(s) => tag_with_attrs("br", &styling_attrs(s), out),
            Message::Text(text) => out.push_str(&encoded(&text.text)),
            Message::Link(link) => {
                let mut attrs = styling_attrs(&link.styling);
                if let Some(url) = &link.url {
                    attrs.push(("href".to_string(), url.clone()));
                }
                tag_with_attrs("a", &attrs, out);
            }
            Message::CloseLink => out.push_str("</a>"),
            Message::Image(image) => {
                let mut attrs = styling_attrs(&image.styling);
                attrs.push(("alt".to_string(), image.alt.clone().unwrap_or_default()));
                tag_with_attrs("img", &attrs, out);
            }
            Message::List(list) => {
                let mut attrs = styling_attrs(&list.styling);
                let list_type = match list.list_type.as_str() {
                    t @ ("decimal" | "disc" | "none") => t.to_string(),
                    custom => format!("\"{custom}\""),
                };
                let style = match attrs.iter_mut().find(|(k, _)| k == "style") {
                    Some((_, style)) => {
                        style.push_str("; ");
                        style.push_str(&format!("list-style-type: {list_type}"));
                        None
                    }
                    None => Some(("style".to_string(), format!("list-style-type: {list_type}"))),
                };
                if let Some(style) = style {
                    attrs.push(style);
                }
                tag_with_attrs("ul", &attrs, out);
            }
            Message::CloseList => out.push_str("</ul>"),
            Message::ListItem(_) => out.push_str("<li>"),
            Message::CloseListItem => out.push_str("</li>"),
            Message::Header => out.push_str("<header>"),
            Message::CloseHeader => out.push_str("</header>"),
            Message::Footer => out.push_str("<footer>"),
            Message::CloseFooter => out.push_str("</footer>"),
            Message::Style(style) => {
                out.push_str("<style type=\"text/css\">");
                out.push_str(&style.css_text);
                out.push_str("</style>\n");
            }
            Message::Comment(comment) => {
                out.push_str("<!-- ");
                if let Some(author) = &comment.author {
                    out.push_str(&encoded(author));
                    out.push_str(": ");
                }
                if let Some(text) = &comment.comment {
                    out.push_str(&encoded(text));
                }
                out.push_str(" -->");
            }
            Message::Error(error) => {
                out.push_str(&format!("<!-- error: {} -->", encoded(&error.to_string())));
            }
            _ => {}
        }
    }
}

/// Terminal element rendering the stream as a standalone HTML document.
#[derive(Default)]
pub struct HtmlExporter {
    writer: HtmlWriter,
    buffer: String,
    started: bool,
}

impl HtmlExporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChainElement for HtmlExporter {
    fn process(
        &mut self,
        message: Message,
        callbacks: &mut MessageCallbacks<'_>,
    ) -> Result<Continuation> {
        if matches!(message, Message::Data(_) | Message::File(_)) {
            return callbacks.further(message);
        }
        if matches!(message, Message::Document(_)) && !self.started {
            self.buffer.clear();
            self.writer = HtmlWriter::new();
            self.started = true;
        }
        self.writer.write_to(&message, &mut self.buffer);
        if matches!(message, Message::CloseDocument) && self.writer.nested_docs == 0 {
            self.started = false;
            let rendered = std::mem::take(&mut self.buffer);
            return callbacks.further(Message::Data(DataSource::from_bytes(rendered.into_bytes())));
        }
        Ok(Continuation::Proceed)
    }

    fn is_leaf(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "html-exporter"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Document, EmailAttrs, Link, Text};
    use std::sync::Arc;

    fn render(messages: Vec<Message>) -> String {
        let mut writer = HtmlWriter::new();
        let mut out = String::new();
        for m in messages {
            writer.write_to(&m, &mut out);
        }
        out
    }

    #[test]
    fn test_scaffolding_and_escaping() {
        let out = render(vec![
            Message::Document(Document::empty()),
            Message::Paragraph(Styling::default()),
            Message::Text(Text::new("a < b & c")),
            Message::CloseParagraph,
            Message::CloseDocument,
        ]);
        assert!(out.starts_with("<!DOCTYPE html>"));
        assert!(out.contains("<p>a &lt; b &amp; c</p>"));
        assert!(out.ends_with("</body>\n</html>\n"));
    }

    #[test]
    fn test_metadata_written_into_head() {
        let document = Document::new(Arc::new(|| Metadata {
            author: Some("someone".to_string()),
            email_attrs: Some(EmailAttrs {
                from: "a@b".to_string(),
                subject: Some("hi".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }));
        let out = render(vec![
            Message::Document(document),
            Message::text("x"),
            Message::CloseDocument,
        ]);
        assert!(out.contains("<meta name=\"author\" content=\"someone\">"));
        assert!(out.contains("<meta name=\"from\" content=\"a@b\">"));
        assert!(out.contains("<meta name=\"subject\" content=\"hi\">"));
        let head_end = out.find("</head>").unwrap();
        assert!(out.find("author").unwrap() < head_end);
    }

    #[test]
    fn test_nested_documents_share_one_scaffolding() {
        let out = render(vec![
            Message::Document(Document::empty()),
            Message::text("outer"),
            Message::Document(Document::empty()),
            Message::text("inner"),
            Message::CloseDocument,
            Message::CloseDocument,
        ]);
        assert_eq!(out.matches("<html>").count(), 1);
        assert_eq!(out.matches("</html>").count(), 1);
    }

    #[test]
    fn test_link_rendering() {
        let out = render(vec![
            Message::Document(Document::empty()),
            Message::Link(Link {
                url: Some("https://example.com".to_string()),
                styling: Styling::default(),
            }),
            Message::text("here"),
            Message::CloseLink,
            Message::CloseDocument,
        ]);
        assert!(out.contains("<a href=\"https://example.com\">here</a>"));
    }

    #[test]
    fn test_custom_list_type() {
        let out = render(vec![
            Message::Document(Document::empty()),
            Message::List(crate::message::List {
                list_type: "disc".to_string(),
                styling: Styling::default(),
            }),
            Message::ListItem(Styling::default()),
            Message::text("x"),
            Message::CloseListItem,
            Message::CloseList,
            Message::CloseDocument,
        ]);
        assert!(out.contains("list-style-type: disc"));
        assert!(out.contains("<li>x</li>"));
    }

    #[test]
    fn test_error_rendered_as_comment() {
        let out = render(vec![
            Message::Document(Document::empty()),
            Message::error(crate::error::DocpipeError::uninterpretable_data("bad row")),
            Message::CloseDocument,
        ]);
        assert!(out.contains("<!-- error: uninterpretable data: bad row -->"));
    }

    #[test]
    fn test_exporter_emits_final_data_source() {
        use crate::chain::Pipeline;
        let mut pipeline = Pipeline::new().then(HtmlExporter::new());
        pipeline.process(Message::Document(Document::empty())).unwrap();
        pipeline.process(Message::text("body")).unwrap();
        let run = pipeline.process(Message::CloseDocument).unwrap();
        assert_eq!(run.emitted.len(), 1);
        match &run.emitted[0] {
            Message::Data(data) => {
                let html = data.string(None).unwrap();
                assert!(html.contains("body"));
                assert!(html.contains("</html>"));
            }
            other => panic!("expected data source, got {}", other.tag_name()),
        }
    }
}
