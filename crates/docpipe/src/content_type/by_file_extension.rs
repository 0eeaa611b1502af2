//! Content-type detection from the originating file extension.

use crate::data_source::DataSource;
use crate::message::{Continuation, Message};
use crate::mime::{MimeType, confidence};
use ahash::AHashMap;
use once_cell::sync::Lazy;

use crate::mime::*;

static EXT_TO_MIME: Lazy<AHashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = AHashMap::new();

    m.insert("txt", PLAIN_TEXT_MIME_TYPE);
    m.insert("text", PLAIN_TEXT_MIME_TYPE);
    m.insert("log", PLAIN_TEXT_MIME_TYPE);

    m.insert("html", HTML_MIME_TYPE);
    m.insert("htm", HTML_MIME_TYPE);
    m.insert("xhtml", HTML_MIME_TYPE);
    m.insert("xml", XML_MIME_TYPE);
    m.insert("asp", ASP_MIME_TYPE);
    m.insert("aspx", ASPDOTNET_MIME_TYPE);

    m.insert("pdf", PDF_MIME_TYPE);
    m.insert("rtf", RTF_MIME_TYPE);

    m.insert("doc", DOC_MIME_TYPE);
    m.insert("dot", DOC_MIME_TYPE);
    m.insert("docx", DOCX_MIME_TYPE);
    m.insert("docm", "application/vnd.ms-word.document.macroenabled.12");
    m.insert("xls", XLS_MIME_TYPE);
    m.insert("xlt", XLS_MIME_TYPE);
    m.insert("xlsx", XLSX_MIME_TYPE);
    m.insert("xlsm", "application/vnd.ms-excel.sheet.macroenabled.12");
    m.insert("xltm", "application/vnd.ms-excel.template.macroenabled.12");
    m.insert("xlsb", XLSB_MIME_TYPE);
    m.insert("ppt", PPT_MIME_TYPE);
    m.insert("pps", PPT_MIME_TYPE);
    m.insert("pptx", PPTX_MIME_TYPE);
    m.insert("pptm", "application/vnd.ms-powerpoint.presentation.macroenabled.12");
    m.insert("ppsx", "application/vnd.openxmlformats-officedocument.presentationml.slideshow");

    m.insert("odt", ODT_MIME_TYPE);
    m.insert("ods", ODS_MIME_TYPE);
    m.insert("odp", ODP_MIME_TYPE);
    m.insert("odg", ODG_MIME_TYPE);
    m.insert("ott", "application/vnd.oasis.opendocument.text-template");
    m.insert("fodt", "application/vnd.oasis.opendocument.text-flat-xml");
    m.insert("fods", "application/vnd.oasis.opendocument.spreadsheet-flat-xml");
    m.insert("fodp", "application/vnd.oasis.opendocument.presentation-flat-xml");
    m.insert("fodg", "application/vnd.oasis.opendocument.graphics-flat-xml");

    m.insert("pages", PAGES_MIME_TYPE);
    m.insert("numbers", NUMBERS_MIME_TYPE);
    m.insert("key", KEYNOTE_MIME_TYPE);

    m.insert("eml", EML_MIME_TYPE);
    m.insert("msg", OUTLOOK_MIME_TYPE);
    m.insert("pst", OUTLOOK_MIME_TYPE);
    m.insert("ost", OUTLOOK_MIME_TYPE);

    m.insert("zip", ZIP_MIME_TYPE);
    m.insert("tar", TAR_MIME_TYPE);
    m.insert("gz", "application/gzip");
    m.insert("tgz", TAR_MIME_TYPE);

    m.insert("png", "image/png");
    m.insert("jpg", "image/jpeg");
    m.insert("jpeg", "image/jpeg");
    m.insert("tiff", "image/tiff");
    m.insert("tif", "image/tiff");
    m.insert("bmp", "image/bmp");
    m.insert("webp", "image/webp");
    m.insert("gif", "image/gif");

    m
});

/// Record a high-confidence hypothesis for a known extension. Unknown
/// extensions produce nothing.
pub fn detect(data: &mut DataSource) {
    let Some(extension) = data.file_extension() else {
        return;
    };
    if let Some(mime) = EXT_TO_MIME.get(extension.bare()) {
        tracing::debug!(extension = extension.as_str(), mime, "extension hypothesis");
        data.add_mime_type(MimeType::from_static(mime), confidence::HIGH);
    }
}

/// Chain element form of [`detect`].
pub struct Detector;

impl crate::chain::ChainElement for Detector {
    fn process(
        &mut self,
        message: Message,
        callbacks: &mut crate::chain::MessageCallbacks<'_>,
    ) -> crate::error::Result<Continuation> {
        match message {
            Message::Data(mut data) => {
                detect(&mut data);
                callbacks.further(Message::Data(data))
            }
            other => callbacks.further(other),
        }
    }

    fn name(&self) -> &'static str {
        "content-type-by-file-extension"
    }
}
