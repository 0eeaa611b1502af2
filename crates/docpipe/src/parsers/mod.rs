//! Parser trait, dispatch, and the format-detecting meta element.
//!
//! Every format parser follows the same skeleton: gate on the detected
//! MIME type, refuse encrypted containers, emit `Document` with a lazy
//! metadata callback, drive the format decoder, emit `CloseDocument`.
//! Unrecoverable decoder failures surface as in-band error messages plus
//! an implicit `CloseDocument` for any document left open; the pipeline
//! itself never aborts.

use crate::chain::{ChainElement, MessageCallbacks};
use crate::data_source::DataSource;
use crate::error::{DocpipeError, Result};
use crate::message::{Continuation, Message};
use crate::mime::MimeType;
use crate::parameters::ParserParameters;

pub mod txt;

#[cfg(feature = "office")]
pub mod html;

#[cfg(feature = "email")]
pub mod eml;
#[cfg(feature = "email")]
pub mod msg;

#[cfg(feature = "office")]
pub mod common_xml;
#[cfg(feature = "office")]
pub mod doc;
#[cfg(feature = "office")]
pub mod iwork;
#[cfg(feature = "office")]
pub mod odf_flat;
#[cfg(feature = "office")]
pub mod odf_ooxml;
#[cfg(feature = "office")]
pub mod oshared;
#[cfg(feature = "office")]
pub mod ppt;
#[cfg(feature = "office")]
pub mod xls;
#[cfg(feature = "office")]
pub mod xlsb;

pub mod rtf;

#[cfg(feature = "pdf")]
pub mod pdf;

#[cfg(feature = "archives")]
pub mod archives;

/// Emission handle passed to [`Parser::parse`].
///
/// Normalizes `Skip` to `Proceed` for non-structural messages and latches
/// `Stop` so a producer that missed a stop signal cannot keep pushing.
pub struct Emitter<'a, 'c> {
    callbacks: &'a mut MessageCallbacks<'c>,
    stopped: bool,
    document_depth: i32,
}

impl<'a, 'c> Emitter<'a, 'c> {
    pub fn new(callbacks: &'a mut MessageCallbacks<'c>) -> Self {
        Emitter {
            callbacks,
            stopped: false,
            document_depth: 0,
        }
    }

    /// Emit a message downstream and return the consumer's continuation.
    pub fn emit(&mut self, message: Message) -> Result<Continuation> {
        if self.stopped {
            return Ok(Continuation::Stop);
        }
        match &message {
            Message::Document(_) => self.document_depth += 1,
            Message::CloseDocument => self.document_depth -= 1,
            _ => {}
        }
        let structural = message.is_structural_opener();
        let continuation = self.callbacks.further(message)?;
        let continuation = match continuation {
            Continuation::Skip if !structural => Continuation::Proceed,
            other => other,
        };
        if continuation == Continuation::Stop {
            self.stopped = true;
        }
        Ok(continuation)
    }

    /// Emit a message upstream.
    pub fn emit_back(&mut self, message: Message) -> Result<Continuation> {
        self.callbacks.back(message)
    }

    /// Emit the document opener. When the consumer skips or stops at the
    /// document boundary, the matching closer is emitted (for skip) and
    /// `false` comes back so the parser leaves the body unproduced.
    pub fn open_document(&mut self, document: crate::message::Document) -> Result<bool> {
        match self.emit(Message::Document(document))? {
            Continuation::Proceed => Ok(true),
            Continuation::Skip => {
                self.emit(Message::CloseDocument)?;
                Ok(false)
            }
            Continuation::Stop => Ok(false),
        }
    }

    /// True once a downstream consumer returned `Stop`.
    pub fn stopped(&self) -> bool {
        self.stopped
    }

    fn document_depth(&self) -> i32 {
        self.document_depth
    }
}

/// A format parser: recognizes one or more MIME types and decomposes
/// matching inputs into the message stream.
///
/// Parsers are stateless across invocations; per-parse state lives on the
/// stack of `parse`.
pub trait Parser: Send + Sync {
    fn name(&self) -> &'static str;

    /// The MIME types this parser claims.
    fn supported_mime_types(&self) -> &[MimeType];

    /// Whether this parser can handle `data`. The default matches the
    /// highest-confidence hypothesis against [`Parser::supported_mime_types`];
    /// parsers may probe the bytes and be stricter.
    fn understands(&self, data: &DataSource) -> bool {
        data.has_highest_confidence_mime_type_in(self.supported_mime_types())
    }

    /// Decompose `data` into messages.
    fn parse(&self, data: &DataSource, emitter: &mut Emitter<'_, '_>) -> Result<()>;
}

/// Run `parser` over `data` with the chain-boundary error policy applied.
pub(crate) fn run_parser(
    parser: &dyn Parser,
    data: &DataSource,
    callbacks: &mut MessageCallbacks<'_>,
) -> Result<Continuation> {
    tracing::debug!(parser = parser.name(), "parsing");
    if let Err(e) = data.assert_not_encrypted() {
        callbacks.further(Message::error(e))?;
        return Ok(Continuation::Proceed);
    }
    let mut emitter = Emitter::new(callbacks);
    match parser.parse(data, &mut emitter) {
        Ok(()) => Ok(if emitter.stopped() {
            Continuation::Stop
        } else {
            Continuation::Proceed
        }),
        Err(e) => {
            let open_documents = emitter.document_depth();
            tracing::warn!(parser = parser.name(), error = %e, "parser failed");
            callbacks.further(Message::error(e))?;
            for _ in 0..open_documents {
                callbacks.further(Message::CloseDocument)?;
            }
            Ok(Continuation::Proceed)
        }
    }
}

/// Chain element adapter wrapping a single parser.
///
/// Data sources the parser does not understand are forwarded unchanged.
pub struct ParserElement {
    parser: Box<dyn Parser>,
}

impl ParserElement {
    pub fn new<P: Parser + 'static>(parser: P) -> Self {
        ParserElement {
            parser: Box::new(parser),
        }
    }
}

impl ChainElement for ParserElement {
    fn process(
        &mut self,
        message: Message,
        callbacks: &mut MessageCallbacks<'_>,
    ) -> Result<Continuation> {
        let data = match message {
            Message::Data(data) => data,
            other => return callbacks.further(other),
        };
        if !self.parser.understands(&data) {
            return callbacks.further(Message::Data(data));
        }
        run_parser(self.parser.as_ref(), &data, callbacks)
    }

    fn name(&self) -> &'static str {
        self.parser.name()
    }
}

type ParserFactory = Box<dyn Fn(&ParserParameters) -> Box<dyn Parser> + Send + Sync>;

/// A collection of parser factories, each tagged with the MIME types it
/// handles. Lookup returns the first factory claiming the type.
pub struct ParserProvider {
    factories: Vec<ParserFactory>,
}

impl ParserProvider {
    pub fn new() -> Self {
        ParserProvider { factories: Vec::new() }
    }

    pub fn register<F>(&mut self, factory: F)
    where
        F: Fn(&ParserParameters) -> Box<dyn Parser> + Send + Sync + 'static,
    {
        self.factories.push(Box::new(factory));
    }

    /// The built-in parsers for all enabled formats.
    pub fn basic() -> Self {
        let mut provider = ParserProvider::new();

        provider.register(|parameters| Box::new(txt::TxtParser::with_parameters(parameters)));
        provider.register(|_| Box::new(rtf::RtfParser::new()));

        #[cfg(feature = "office")]
        provider.register(|_| Box::new(html::HtmlParser::new()));

        #[cfg(feature = "email")]
        {
            provider.register(|_| Box::new(eml::EmlParser::new()));
            provider.register(|_| Box::new(msg::MsgParser::new()));
        }

        #[cfg(feature = "office")]
        {
            provider.register(|_| Box::new(xls::XlsParser::new()));
            provider.register(|_| Box::new(xlsb::XlsbParser::new()));
            provider.register(|_| Box::new(doc::DocParser::new()));
            provider.register(|_| Box::new(ppt::PptParser::new()));
            provider.register(|_| Box::new(odf_ooxml::OdfOoxmlParser::new()));
            provider.register(|_| Box::new(odf_flat::OdfFlatParser::new()));
            provider.register(|_| Box::new(iwork::IWorkParser::new()));
        }

        #[cfg(feature = "pdf")]
        provider.register(|_| Box::new(pdf::PdfParser::new()));

        #[cfg(feature = "archives")]
        provider.register(|_| Box::new(archives::ArchivesParser::new()));

        provider
    }

    /// The first parser claiming `mime`, or none.
    pub fn find_by_mime_type(
        &self,
        mime: &MimeType,
        parameters: &ParserParameters,
    ) -> Option<Box<dyn Parser>> {
        for factory in &self.factories {
            let parser = factory(parameters);
            if parser.supported_mime_types().contains(mime) {
                return Some(parser);
            }
        }
        None
    }

    /// Fall back to a data-based probe across all registered parsers.
    pub fn find_by_data(
        &self,
        data: &DataSource,
        parameters: &ParserParameters,
    ) -> Option<Box<dyn Parser>> {
        for factory in &self.factories {
            let parser = factory(parameters);
            if parser.understands(data) {
                return Some(parser);
            }
        }
        None
    }
}

impl Default for ParserProvider {
    fn default() -> Self {
        Self::basic()
    }
}

/// Meta element that detects the content type of passing data sources and
/// dispatches to the first registered parser claiming the detected type.
///
/// Inputs nobody claims produce an `unknown_format` error message, and the
/// original data source is forwarded downstream so it can be logged or
/// handled by an application element.
pub struct ParseDetectedFormat {
    providers: Vec<ParserProvider>,
    parameters: ParserParameters,
}

impl ParseDetectedFormat {
    pub fn new() -> Self {
        ParseDetectedFormat {
            providers: vec![ParserProvider::basic()],
            parameters: ParserParameters::new(),
        }
    }

    pub fn with_parameters(parameters: ParserParameters) -> Self {
        ParseDetectedFormat {
            providers: vec![ParserProvider::basic()],
            parameters,
        }
    }

    /// Add an additional provider consulted after the built-in one.
    pub fn add_provider(mut self, provider: ParserProvider) -> Self {
        self.providers.push(provider);
        self
    }

    fn find_parser(&self, data: &DataSource) -> Option<Box<dyn Parser>> {
        for mime in data.highest_confidence_mime_types() {
            for provider in &self.providers {
                if let Some(parser) = provider.find_by_mime_type(&mime, &self.parameters) {
                    // The claimed type may still be the wrong container
                    // (an OLE workbook type on a zip package); let the
                    // data probe reject it and fall through.
                    if parser.understands(data) {
                        return Some(parser);
                    }
                }
            }
        }
        for provider in &self.providers {
            if let Some(parser) = provider.find_by_data(data, &self.parameters) {
                return Some(parser);
            }
        }
        None
    }
}

impl Default for ParseDetectedFormat {
    fn default() -> Self {
        Self::new()
    }
}

/// Nested parses (attachments inside e-mails, archive members, mail
/// bodies re-entering as HTML) recurse through the dispatcher; this bounds
/// pathological nesting.
const MAX_NESTED_PARSE_DEPTH: usize = 16;

impl ParseDetectedFormat {
    /// Detect, dispatch and parse one source; data sources the selected
    /// parser emits re-enter this function one level deeper, so their
    /// message sequences appear in place in the outer stream.
    fn handle_source(
        &self,
        mut data: DataSource,
        emit: &mut crate::chain::EmitFn<'_>,
        depth: usize,
    ) -> Result<Continuation> {
        if data.highest_mime_type_confidence() == 0 {
            crate::content_type::detect(&mut data);
        }
        let Some(parser) = self.find_parser(&data) else {
            let top = data
                .highest_confidence_mime_types()
                .first()
                .map(|m| m.to_string())
                .unwrap_or_else(|| "unrecognized content".to_string());
            emit(Message::error(DocpipeError::UnknownFormat(top)))?;
            return emit(Message::Data(data));
        };
        if depth >= MAX_NESTED_PARSE_DEPTH {
            emit(Message::error(DocpipeError::resource_exhausted(format!(
                "nested parse depth limit of {MAX_NESTED_PARSE_DEPTH} reached"
            ))))?;
            return emit(Message::Data(data));
        }
        let mut wrapped = |message: Message| -> Result<Continuation> {
            match message {
                Message::Data(inner) => self.handle_source(inner, &mut *emit, depth + 1),
                Message::File(file) => {
                    self.handle_source(file.into_data_source(), &mut *emit, depth + 1)
                }
                other => emit(other),
            }
        };
        let mut drop_back = |message: Message| -> Result<Continuation> {
            tracing::debug!(tag = message.tag_name(), "reverse emission at dispatch boundary");
            Ok(Continuation::Proceed)
        };
        let mut callbacks = MessageCallbacks::new(&mut wrapped, &mut drop_back);
        run_parser(parser.as_ref(), &data, &mut callbacks)
    }
}

impl ChainElement for ParseDetectedFormat {
    fn process(
        &mut self,
        message: Message,
        callbacks: &mut MessageCallbacks<'_>,
    ) -> Result<Continuation> {
        let data = match message {
            Message::Data(data) => data,
            Message::File(file) => file.into_data_source(),
            other => return callbacks.further(other),
        };
        let (further, _back) = callbacks.split();
        self.handle_source(data, further, 0)
    }

    fn name(&self) -> &'static str {
        "parse-detected-format"
    }
}
