//! Writers render the message stream into bytes; exporters are the
//! terminal chain elements wrapping them.
//!
//! Each exporter accumulates output across incoming messages and, on the
//! outermost `CloseDocument`, emits a single `DataSource` carrying the
//! rendered bytes. Exporters are the only leaf elements.

pub mod csv;
pub mod html;
pub mod metadata;
pub mod plain_text;

pub use csv::CsvExporter;
pub use html::HtmlExporter;
pub use metadata::MetadataExporter;
pub use plain_text::PlainTextExporter;
