//! CSV rendering of tables in the message stream.

use crate::chain::{ChainElement, MessageCallbacks};
use crate::data_source::DataSource;
use crate::error::Result;
use crate::message::{Continuation, Message};

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Writer active only between `Table` and `CloseTable`: buffers cell text
/// until the row closes, then emits one CRLF-terminated CSV line.
#[derive(Default)]
pub struct CsvWriter {
    in_table: bool,
    current_row: Vec<String>,
    current_cell: String,
}

impl CsvWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render one message into `out`.
    pub fn write_to(&mut self, message: &Message, out: &mut String) {
        if !self.in_table && !matches!(message, Message::Table(_)) {
            return;
        }
        match message {
            Message::Table(_) => self.in_table = true,
            Message::CloseTable => self.in_table = false,
            Message::CloseTableRow => {
                let row = std::mem::take(&mut self.current_row);
                let line: Vec<String> = row.iter().map(|c| csv_field(c)).collect();
                out.push_str(&line.join(","));
                out.push_str("\r\n");
            }
            Message::CloseTableCell => {
                self.current_row.push(std::mem::take(&mut self.current_cell));
            }
            Message::Text(text) => self.current_cell.push_str(&text.text),
            _ => {}
        }
    }
}

/// Terminal element rendering every table in the stream as CSV.
#[derive(Default)]
pub struct CsvExporter {
    writer: CsvWriter,
    buffer: String,
    nested_docs: i32,
}

impl CsvExporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChainElement for CsvExporter {
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
                    self.writer = CsvWriter::new();
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
        "csv-exporter"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Styling;

    fn render(messages: Vec<Message>) -> String {
        let mut writer = CsvWriter::new();
        let mut out = String::new();
        for m in messages {
            writer.write_to(&m, &mut out);
        }
        out
    }

    fn cell(text: &str) -> Vec<Message> {
        vec![
            Message::TableCell(Styling::default()),
            Message::text(text),
            Message::CloseTableCell,
        ]
    }

    #[test]
    fn test_rows_with_crlf() {
        let mut messages = vec![Message::Table(Styling::default())];
        messages.push(Message::TableRow(Styling::default()));
        messages.extend(cell("a"));
        messages.extend(cell("b"));
        messages.push(Message::CloseTableRow);
        messages.push(Message::TableRow(Styling::default()));
        messages.extend(cell("c"));
        messages.extend(cell("d"));
        messages.push(Message::CloseTableRow);
        messages.push(Message::CloseTable);
        assert_eq!(render(messages), "a,b\r\nc,d\r\n");
    }

    #[test]
    fn test_text_outside_tables_is_ignored() {
        let out = render(vec![
            Message::text("ignored"),
            Message::Table(Styling::default()),
            Message::TableRow(Styling::default()),
            Message::TableCell(Styling::default()),
            Message::text("kept"),
            Message::CloseTableCell,
            Message::CloseTableRow,
            Message::CloseTable,
            Message::text("also ignored"),
        ]);
        assert_eq!(out, "kept\r\n");
    }

    #[test]
    fn test_fields_are_quoted_when_needed() {
        let mut messages = vec![
            Message::Table(Styling::default()),
            Message::TableRow(Styling::default()),
        ];
        messages.extend(cell("a,b"));
        messages.extend(cell("say \"hi\""));
        messages.push(Message::CloseTableRow);
        messages.push(Message::CloseTable);
        assert_eq!(render(messages), "\"a,b\",\"say \"\"hi\"\"\"\r\n");
    }
}
