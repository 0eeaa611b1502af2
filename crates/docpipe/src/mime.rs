//! MIME types and detection confidence.
//!
//! [`MimeType`] is a `type/subtype` string with case-insensitive equality
//! over ASCII. [`confidence`] holds the named certainty levels detectors
//! attach to their hypotheses.

use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};

pub const PLAIN_TEXT_MIME_TYPE: &str = "text/plain";
pub const HTML_MIME_TYPE: &str = "text/html";
pub const XML_MIME_TYPE: &str = "text/xml";
pub const ASP_MIME_TYPE: &str = "text/asp";
pub const ASPDOTNET_MIME_TYPE: &str = "text/aspdotnet";

pub const PDF_MIME_TYPE: &str = "application/pdf";
pub const RTF_MIME_TYPE: &str = "application/rtf";

pub const DOC_MIME_TYPE: &str = "application/msword";
pub const DOCX_MIME_TYPE: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const XLS_MIME_TYPE: &str = "application/vnd.ms-excel";
pub const XLSX_MIME_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const XLSB_MIME_TYPE: &str = "application/vnd.ms-excel.sheet.binary.macroenabled.12";
pub const PPT_MIME_TYPE: &str = "application/vnd.ms-powerpoint";
pub const PPTX_MIME_TYPE: &str = "application/vnd.openxmlformats-officedocument.presentationml.presentation";

pub const ODT_MIME_TYPE: &str = "application/vnd.oasis.opendocument.text";
pub const ODS_MIME_TYPE: &str = "application/vnd.oasis.opendocument.spreadsheet";
pub const ODP_MIME_TYPE: &str = "application/vnd.oasis.opendocument.presentation";
pub const ODG_MIME_TYPE: &str = "application/vnd.oasis.opendocument.graphics";

pub const EML_MIME_TYPE: &str = "message/rfc822";
pub const OUTLOOK_MIME_TYPE: &str = "application/vnd.ms-outlook";
pub const OUTLOOK_PST_MIME_TYPE: &str = "application/vnd.ms-outlook-pst";
pub const MS_MSG_MIME_TYPE: &str = "application/x-ms-msg";

pub const ZIP_MIME_TYPE: &str = "application/zip";
pub const TAR_MIME_TYPE: &str = "application/x-tar";

pub const PAGES_MIME_TYPE: &str = "application/vnd.apple.pages";
pub const NUMBERS_MIME_TYPE: &str = "application/vnd.apple.numbers";
pub const KEYNOTE_MIME_TYPE: &str = "application/vnd.apple.keynote";

/// Encrypted-container marker recorded by detectors and parsers and checked
/// by `DataSource::assert_not_encrypted`.
pub const ENCRYPTED_MIME_TYPE: &str = "application/encrypted";

/// Detector certainty about a MIME hypothesis, in `[0, 100]`.
pub type Confidence = u8;

/// Named confidence levels.
pub mod confidence {
    use super::Confidence;

    pub const NONE: Confidence = 0;
    pub const LOW: Confidence = 30;
    pub const MEDIUM: Confidence = 60;
    pub const HIGH: Confidence = 80;
    pub const VERY_HIGH: Confidence = 90;
    pub const HIGHEST: Confidence = 99;
    pub const CERTAIN: Confidence = 100;
}

/// A `type/subtype` content-type string.
///
/// Equality and hashing are case-insensitive over ASCII, so
/// `"text/HTML" == "text/html"`.
#[derive(Debug, Clone)]
pub struct MimeType(Cow<'static, str>);

impl MimeType {
    pub const fn from_static(v: &'static str) -> Self {
        MimeType(Cow::Borrowed(v))
    }

    pub fn new<S: Into<String>>(v: S) -> Self {
        MimeType(Cow::Owned(v.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `type` half, up to the first `/`.
    pub fn media_type(&self) -> &str {
        self.0.split('/').next().unwrap_or("")
    }

    /// The `subtype` half, after the first `/`.
    pub fn subtype(&self) -> &str {
        self.0.splitn(2, '/').nth(1).unwrap_or("")
    }

    /// True for hypotheses that mark the source as password protected.
    pub fn is_encrypted_marker(&self) -> bool {
        self == &MimeType::from_static(ENCRYPTED_MIME_TYPE)
            || self.subtype().to_ascii_lowercase().ends_with("encrypted")
    }
}

impl PartialEq for MimeType {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for MimeType {}

impl Hash for MimeType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.0.as_bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for MimeType {
    fn from(v: &'static str) -> Self {
        MimeType(Cow::Borrowed(v))
    }
}

impl From<String> for MimeType {
    fn from(v: String) -> Self {
        MimeType(Cow::Owned(v))
    }
}
