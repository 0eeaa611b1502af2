//! Docpipe - Document Processing Pipeline
//!
//! Docpipe turns heterogeneous binary documents (Office files, PDFs,
//! e-mail containers, archives, plain text) into a uniform stream of
//! semantic messages - paragraphs, text runs, tables, lists, mail
//! structures, metadata - that exporters and analyzers consume.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use docpipe::extract_plain_text_from_path;
//!
//! # fn main() -> docpipe::Result<()> {
//! let text = extract_plain_text_from_path("document.docx")?;
//! println!("{text}");
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **DataSource** (`data_source`): a uniform binary-input handle that
//!   lazily materializes file bytes from paths, buffers and streams, and
//!   accumulates MIME-type evidence
//! - **Detection** (`content_type`): the confidence-scored cascade from
//!   file extensions over magic-byte signatures to format probes
//! - **Pipeline** (`chain`, `message`): typed messages flowing through
//!   chained elements with proceed/skip/stop continuation control
//! - **Parsers** (`parsers`): format decoders emitting the message stream
//! - **Exporters** (`writers`): plain text, HTML, CSV and metadata sinks

#![deny(unsafe_code)]

pub mod chain;
pub mod charset;
pub mod content_type;
pub mod data_source;
pub mod error;
pub mod locks;
pub mod message;
pub mod mime;
pub mod parameters;
pub mod parsers;
pub mod writers;

#[cfg(feature = "office")]
pub mod xml_stream;

pub use chain::{ChainElement, MessageCallbacks, Pipeline, PipelineRun, Transformer};
pub use data_source::{DataSource, FileExtension, LengthLimit, SourceId, UnseekableStream};
pub use error::{DocpipeError, ErrorKind, Result};
pub use message::{Continuation, Message, Metadata};
pub use mime::{Confidence, MimeType, confidence};
pub use parameters::ParserParameters;
pub use parsers::{Parser, ParserElement, ParserProvider, ParseDetectedFormat};
pub use writers::{CsvExporter, HtmlExporter, MetadataExporter, PlainTextExporter};

/// Build the default document pipeline: detection, dispatch and the
/// given terminal exporter.
pub fn pipeline_with_exporter<E: ChainElement + 'static>(exporter: E) -> Pipeline {
    Pipeline::new()
        .then(content_type::Detector)
        .then(ParseDetectedFormat::new())
        .then(exporter)
}

fn run_to_plain_text(source: DataSource) -> Result<String> {
    let mut pipeline = pipeline_with_exporter(PlainTextExporter::new());
    pipeline.validate()?;
    let run = pipeline.process(Message::Data(source))?;
    let mut output = String::new();
    let mut first_error = None;
    for message in run.emitted {
        match message {
            Message::Data(data) => output.push_str(&data.string(None)?),
            Message::Error(error) => {
                if first_error.is_none() {
                    first_error = Some(error);
                }
            }
            _ => {}
        }
    }
    // Nothing rendered and something failed: surface the failure instead
    // of an empty string.
    if output.is_empty()
        && let Some(error) = first_error
    {
        return Err(match error.kind() {
            ErrorKind::FileEncrypted => DocpipeError::file_encrypted(error.to_string()),
            ErrorKind::UnknownFormat => DocpipeError::UnknownFormat(error.to_string()),
            _ => DocpipeError::uninterpretable_data(error.to_string()),
        });
    }
    Ok(output)
}

/// Parse the file at `path` and render it as plain text.
pub fn extract_plain_text_from_path<P: Into<std::path::PathBuf>>(path: P) -> Result<String> {
    run_to_plain_text(DataSource::from_path(path))
}

/// Parse an in-memory document and render it as plain text. The optional
/// extension hint feeds the detection cascade.
pub fn extract_plain_text(bytes: Vec<u8>, extension: Option<&str>) -> Result<String> {
    let mut source = DataSource::from_bytes(bytes);
    if let Some(extension) = extension {
        source = source.with_file_extension(FileExtension::new(extension));
    }
    run_to_plain_text(source)
}
