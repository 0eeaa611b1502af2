//! Plain-text rendering of the message stream.

use crate::chain::{ChainElement, MessageCallbacks};
use crate::data_source::DataSource;
use crate::error::Result;
use crate::message::{Continuation, Message};

/// Stateful plain-text writer. Paragraph-level separation is deferred
/// until content actually arrives, so skipped (empty) structural regions
/// leave no trace in the output.
#[derive(Default)]
pub struct PlainTextWriter {
    /// A paragraph-like region opened but no content written yet.
    pending_block: bool,
    /// Counters of nested ordered lists; `None` entries are unordered.
    list_counters: Vec<Option<usize>>,
}

impl PlainTextWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn begin_block(&mut self) {
        self.pending_block = true;
    }

    fn flush_block_separator(&mut self, out: &mut String) {
        if self.pending_block {
            if !out.is_empty() {
                out.push('\n');
            }
            self.pending_block = false;
        }
    }

    fn end_block(&mut self, out: &mut String) {
        if self.pending_block {
            // Nothing was written inside; an empty region renders as nothing.
            self.pending_block = false;
            return;
        }
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
    }

    /// Render one message into `out`.
    pub fn write_to(&mut self, message: &Message, out: &mut String) {
        match message {
            Message::Text(text) => {
                self.flush_block_separator(out);
                out.push_str(&text.text);
            }
            Message::BreakLine(_) => {
                self.flush_block_separator(out);
                out.push('\n');
            }
            Message::Paragraph(_) | Message::Section(_) | Message::Caption(_) => {
                self.begin_block();
            }
            Message::CloseParagraph | Message::CloseSection | Message::CloseCaption => {
                self.end_block(out);
            }
            Message::ClosePage => {
                self.end_block(out);
            }
            Message::Header | Message::Footer => self.begin_block(),
            Message::CloseHeader | Message::CloseFooter => self.end_block(out),
            Message::List(list) => {
                self.flush_block_separator(out);
                let counter = match list.list_type.as_str() {
                    "decimal" => Some(0),
                    _ => None,
                };
                self.list_counters.push(counter);
            }
            Message::CloseList => {
                self.list_counters.pop();
                if !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Message::ListItem(_) => {
                self.flush_block_separator(out);
                match self.list_counters.last_mut() {
                    Some(Some(counter)) => {
                        *counter += 1;
                        out.push_str(&format!("{}. ", counter));
                    }
                    Some(None) => out.push_str("* "),
                    None => {}
                }
            }
            Message::CloseListItem => {
                if !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Message::Table(_) => {
                self.flush_block_separator(out);
            }
            Message::CloseTableCell => {
                out.push('\t');
            }
            Message::CloseTableRow => {
                if out.ends_with('\t') {
                    out.pop();
                }
                out.push('\n');
            }
            Message::CloseTable => {
                if !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Message::Image(image) => {
                if let Some(alt) = &image.alt {
                    self.flush_block_separator(out);
                    out.push_str(alt);
                }
            }
            Message::Link(link) => {
                if link.url.is_some() {
                    self.flush_block_separator(out);
                }
            }
            Message::Comment(comment) => {
                if let Some(text) = &comment.comment {
                    self.flush_block_separator(out);
                    out.push_str(text);
                    out.push('\n');
                }
            }
            Message::Attachment(attachment) => {
                if let Some(name) = &attachment.name {
                    self.flush_block_separator(out);
                    out.push_str(name);
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}

/// Terminal element rendering everything between the outermost `Document`
/// and `CloseDocument` as UTF-8 plain text.
#[derive(Default)]
pub struct PlainTextExporter {
    writer: PlainTextWriter,
    buffer: String,
    nested_docs: i32,
}

impl PlainTextExporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChainElement for PlainTextExporter {
    fn process(
        &mut self,
        message: Message,
        callbacks: &mut MessageCallbacks<'_>,
    ) -> Result<Continuation> {
        match &message {
            Message::Error(_) => return callbacks.further(message),
            Message::Document(_) => {
                if self.nested_docs == 0 {
                    self.buffer.clear();
                    self.writer = PlainTextWriter::new();
                }
                self.nested_docs += 1;
            }
            Message::CloseDocument => {
                self.nested_docs -= 1;
                if self.nested_docs == 0 {
                    let rendered = std::mem::take(&mut self.buffer);
                    return callbacks.further(Message::Data(DataSource::from_bytes(
                        rendered.into_bytes(),
                    )));
                }
            }
            _ => self.writer.write_to(&message, &mut self.buffer),
        }
        Ok(Continuation::Proceed)
    }

    fn is_leaf(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "plain-text-exporter"
    }
}
