//! The polymorphic message stream.
//!
//! Parsers decompose binary documents into a flat sequence of [`Message`]
//! values: structural openers and closers, text runs, tables, mail
//! structures and metadata. Downstream consumers match exhaustively on the
//! enum. Openers and closers always nest; a producer must never emit an
//! unmatched closer.

use crate::data_source::{DataSource, FileExtension, UnseekableStream};
use crate::error::DocpipeError;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Return value of a consumer callback, steering the producer.
///
/// `Proceed` advances normally. `Skip` returned from a structural opener
/// asks the producer not to emit the children of that opener (the matching
/// closer is still emitted); for non-structural messages it is equivalent
/// to `Proceed`. `Stop` terminates the producer at its next safe point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    Proceed,
    Skip,
    Stop,
}

/// CSS-ish attributes attached to structural messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Styling {
    pub classes: Vec<String>,
    pub id: String,
    pub style: String,
}

/// Placement of text or images in the source coordinate space.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Position {
    pub x: Option<f32>,
    pub y: Option<f32>,
    pub width: Option<f32>,
    pub height: Option<f32>,
}

/// A broken-down calendar value (UTC unless stated otherwise by the format).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DateTime {
    pub year: i32,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl DateTime {
    pub fn new(year: i32, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Self {
        DateTime { year, month, day, hour, minute, second }
    }

    /// Convert seconds since the Unix epoch, UTC.
    pub fn from_unix_timestamp(ts: i64) -> Self {
        let days = ts.div_euclid(86_400);
        let secs = ts.rem_euclid(86_400);
        let (year, month, day) = civil_from_days(days);
        DateTime {
            year,
            month,
            day,
            hour: (secs / 3600) as u8,
            minute: (secs % 3600 / 60) as u8,
            second: (secs % 60) as u8,
        }
    }
}

impl std::fmt::Display for DateTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

// Days-to-civil conversion from Howard Hinnant's chrono algorithms.
fn civil_from_days(z: i64) -> (i32, u8, u8) {
    let z = z + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u8;
    let m = (if mp < 10 { mp + 3 } else { mp - 9 }) as u8;
    let y = if m <= 2 { y + 1 } else { y };
    (y as i32, m, d)
}

/// Mail header attributes carried inside [`Metadata`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EmailAttrs {
    pub from: String,
    pub date: DateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
}

/// Document metadata, produced lazily through the callback attached to
/// [`Document`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<DateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modification_date: Option<DateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_attrs: Option<EmailAttrs>,
}

/// Lazy metadata supplier attached to a [`Document`] message. The closure
/// captures shared references into the parser's decoded state and remains
/// valid until the matching `CloseDocument`.
pub type MetadataCallback = Arc<dyn Fn() -> Metadata + Send + Sync>;

/// Begins a document. Metadata is evaluated lazily by interested
/// consumers (e.g. the HTML exporter writes it into `<head>`).
#[derive(Clone)]
pub struct Document {
    pub metadata: MetadataCallback,
}

impl Document {
    pub fn new(metadata: MetadataCallback) -> Self {
        Document { metadata }
    }

    /// A document without metadata.
    pub fn empty() -> Self {
        Document {
            metadata: Arc::new(Metadata::default),
        }
    }

    pub fn metadata(&self) -> Metadata {
        (self.metadata)()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document").finish_non_exhaustive()
    }
}

/// A text run, with placement and font size where the source format
/// provides them (PDF, iWork).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Text {
    pub text: String,
    pub position: Option<Position>,
    pub font_size: Option<f32>,
}

impl Text {
    pub fn new<S: Into<String>>(text: S) -> Self {
        Text {
            text: text.into(),
            position: None,
            font_size: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Link {
    pub url: Option<String>,
    pub styling: Styling,
}

/// An embedded image. `source` holds the image bytes as a nested
/// [`DataSource`]; `structured_content` carries any text alternative the
/// format supplies beyond `alt`.
#[derive(Debug, Clone)]
pub struct Image {
    pub source: DataSource,
    pub alt: Option<String>,
    pub position: Option<Position>,
    pub structured_content: Option<String>,
    pub styling: Styling,
}

#[derive(Debug, Clone, Default)]
pub struct Style {
    pub css_text: String,
}

#[derive(Debug, Clone)]
pub struct List {
    /// `"decimal"`, `"disc"`, `"none"` or a custom bullet string.
    pub list_type: String,
    pub styling: Styling,
}

impl Default for List {
    fn default() -> Self {
        List {
            list_type: "decimal".to_string(),
            styling: Styling::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Comment {
    pub author: Option<String>,
    pub time: Option<String>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Mail {
    pub subject: Option<String>,
    /// Seconds since the Unix epoch.
    pub date: Option<u32>,
    pub level: Option<i32>,
}

#[derive(Debug, Clone, Default)]
pub struct Attachment {
    pub name: Option<String>,
    pub size: usize,
    pub extension: Option<FileExtension>,
}

#[derive(Debug, Clone, Default)]
pub struct Folder {
    pub name: Option<String>,
    pub level: Option<i32>,
}

/// Source of a [`FileMessage`]: a filesystem path or an already-open
/// stream handle.
#[derive(Clone)]
pub enum FileSource {
    Path(PathBuf),
    Stream(UnseekableStream),
}

/// Recursive-entry transport: an archive member or attachment handed back
/// into the pipeline for detection and parsing.
#[derive(Clone)]
pub struct FileMessage {
    pub source: FileSource,
    pub name: Option<String>,
}

impl FileMessage {
    pub fn from_path<P: Into<PathBuf>>(path: P) -> Self {
        FileMessage {
            source: FileSource::Path(path.into()),
            name: None,
        }
    }

    pub fn from_stream(stream: UnseekableStream, name: Option<String>) -> Self {
        FileMessage {
            source: FileSource::Stream(stream),
            name,
        }
    }

    pub fn access_name(&self) -> String {
        match &self.source {
            FileSource::Path(path) => path.display().to_string(),
            FileSource::Stream(_) => self.name.clone().unwrap_or_default(),
        }
    }

    /// Convert into a [`DataSource`], carrying over the extension hint
    /// from the file name.
    pub fn into_data_source(self) -> DataSource {
        let extension = std::path::Path::new(&self.access_name())
            .extension()
            .and_then(|e| e.to_str())
            .map(FileExtension::new);
        let source = match self.source {
            FileSource::Path(path) => DataSource::from_path(path),
            FileSource::Stream(stream) => DataSource::from_shared_unseekable(stream),
        };
        match extension {
            Some(ext) => source.with_file_extension(ext),
            None => source,
        }
    }
}

impl std::fmt::Debug for FileMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileMessage")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// One element of the message stream. See the module docs for the
/// nesting contract.
#[derive(Debug, Clone)]
pub enum Message {
    // Transport
    Data(DataSource),
    File(FileMessage),

    // Document structure
    Document(Document),
    CloseDocument,
    Page,
    ClosePage,
    Paragraph(Styling),
    CloseParagraph,
    Section(Styling),
    CloseSection,
    Span(Styling),
    CloseSpan,
    Bold(Styling),
    CloseBold,
    Italic(Styling),
    CloseItalic,
    Underline(Styling),
    CloseUnderline,
    BreakLine(Styling),
    Text(Text),
    Link(Link),
    CloseLink,
    Image(Image),
    Style(Style),
    List(List),
    CloseList,
    ListItem(Styling),
    CloseListItem,
    Table(Styling),
    CloseTable,
    TableRow(Styling),
    CloseTableRow,
    TableCell(Styling),
    CloseTableCell,
    Caption(Styling),
    CloseCaption,
    Header,
    CloseHeader,
    Footer,
    CloseFooter,
    Comment(Comment),

    // Mail structure
    Mail(Mail),
    CloseMail,
    MailBody,
    CloseMailBody,
    Attachment(Attachment),
    CloseAttachment,
    Folder(Folder),
    CloseFolder,

    // Errors travel in-band so exporters can surface them.
    Error(Arc<DocpipeError>),
}

impl Message {
    pub fn text<S: Into<String>>(text: S) -> Self {
        Message::Text(Text::new(text))
    }

    pub fn error(err: DocpipeError) -> Self {
        Message::Error(Arc::new(err))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Message::Error(_))
    }

    /// Stable snake_case name of the variant; closers are the opener name
    /// prefixed with `close_`.
    pub fn tag_name(&self) -> &'static str {
        match self {
            Message::Data(_) => "data_source",
            Message::File(_) => "file",
            Message::Document(_) => "document",
            Message::CloseDocument => "close_document",
            Message::Page => "page",
            Message::ClosePage => "close_page",
            Message::Paragraph(_) => "paragraph",
            Message::CloseParagraph => "close_paragraph",
            Message::Section(_) => "section",
            Message::CloseSection => "close_section",
            Message::Span(_) => "span",
            Message::CloseSpan => "close_span",
            Message::Bold(_) => "bold",
            Message::CloseBold => "close_bold",
            Message::Italic(_) => "italic",
            Message::CloseItalic => "close_italic",
            Message::Underline(_) => "underline",
            Message::CloseUnderline => "close_underline",
            Message::BreakLine(_) => "break_line",
            Message::Text(_) => "text",
            Message::Link(_) => "link",
            Message::CloseLink => "close_link",
            Message::Image(_) => "image",
            Message::Style(_) => "style",
            Message::List(_) => "list",
            Message::CloseList => "close_list",
            Message::ListItem(_) => "list_item",
            Message::CloseListItem => "close_list_item",
            Message::Table(_) => "table",
            Message::CloseTable => "close_table",
            Message::TableRow(_) => "table_row",
            Message::CloseTableRow => "close_table_row",
            Message::TableCell(_) => "table_cell",
            Message::CloseTableCell => "close_table_cell",
            Message::Caption(_) => "caption",
            Message::CloseCaption => "close_caption",
            Message::Header => "header",
            Message::CloseHeader => "close_header",
            Message::Footer => "footer",
            Message::CloseFooter => "close_footer",
            Message::Comment(_) => "comment",
            Message::Mail(_) => "mail",
            Message::CloseMail => "close_mail",
            Message::MailBody => "mail_body",
            Message::CloseMailBody => "close_mail_body",
            Message::Attachment(_) => "attachment",
            Message::CloseAttachment => "close_attachment",
            Message::Folder(_) => "folder",
            Message::CloseFolder => "close_folder",
            Message::Error(_) => "error",
        }
    }

    /// True for messages that open a structural region with a matching
    /// closer.
    pub fn is_structural_opener(&self) -> bool {
        matches!(
            self,
            Message::Document(_)
                | Message::Page
                | Message::Paragraph(_)
                | Message::Section(_)
                | Message::Span(_)
                | Message::Bold(_)
                | Message::Italic(_)
                | Message::Underline(_)
                | Message::Link(_)
                | Message::List(_)
                | Message::ListItem(_)
                | Message::Table(_)
                | Message::TableRow(_)
                | Message::TableCell(_)
                | Message::Caption(_)
                | Message::Header
                | Message::Footer
                | Message::Mail(_)
                | Message::MailBody
                | Message::Attachment(_)
                | Message::Folder(_)
        )
    }

    pub fn is_structural_closer(&self) -> bool {
        self.tag_name().starts_with("close_")
    }
}
