//! The content-type detection cascade.
//!
//! [`detect`] composes the individual detectors in a fixed order: file
//! extension, magic-byte signatures, then the heuristic probes (ASP, HTML,
//! iWork, ODF flat, Outlook, OOXML containers). Later stages rely on the
//! hypotheses of earlier ones; no stage ever removes a hypothesis, so the
//! highest recorded confidence is monotonically non-decreasing across
//! repeated calls.

pub mod by_file_extension;
pub mod by_signature;
#[cfg(feature = "office")]
pub mod container;
pub mod probes;

use crate::data_source::DataSource;
use crate::message::{Continuation, Message};

pub use by_signature::AllowMultiple;

/// Run the full detection cascade over `data`.
pub fn detect(data: &mut DataSource) {
    by_file_extension::detect(data);
    by_signature::detect(data, AllowMultiple(false));
    probes::asp(data);
    probes::html(data);
    #[cfg(feature = "office")]
    container::iwork(data);
    probes::odf_flat(data);
    probes::outlook(data);
    #[cfg(feature = "office")]
    container::ooxml(data);
}

/// Chain element running the full cascade on passing data sources.
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
                tracing::debug!(
                    highest = data.highest_mime_type_confidence(),
                    "content type cascade finished"
                );
                callbacks.further(Message::Data(data))
            }
            other => callbacks.further(other),
        }
    }

    fn name(&self) -> &'static str {
        "content-type-detector"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_source::FileExtension;
    use crate::mime::{self, MimeType, confidence};

    #[test]
    fn test_cascade_html_scenario() {
        // Signature stage sees the tag, the HTML probe escalates it.
        let mut data =
            DataSource::from_static_bytes(b"<html><body><p>Hello <b>World</b></p></body></html>");
        detect(&mut data);
        assert_eq!(
            data.mime_type_confidence(&MimeType::from(mime::HTML_MIME_TYPE)),
            confidence::HIGHEST
        );
    }

    #[test]
    fn test_cascade_unknown_bytes() {
        let mut data = DataSource::from_static_bytes(&[0x00, 0x01, 0x02, 0x7F]);
        detect(&mut data);
        assert_eq!(data.highest_mime_type_confidence(), 0);
    }

    #[test]
    fn test_cascade_monotonic_over_repeats() {
        let mut data = DataSource::from_static_bytes(b"%PDF-1.7")
            .with_file_extension(FileExtension::new("pdf"));
        detect(&mut data);
        let first = data.highest_mime_type_confidence();
        detect(&mut data);
        assert!(data.highest_mime_type_confidence() >= first);
    }

    #[test]
    fn test_extension_and_signature_agree() {
        let mut data = DataSource::from_static_bytes(b"%PDF-1.4 ...")
            .with_file_extension(FileExtension::new("pdf"));
        detect(&mut data);
        assert_eq!(
            data.mime_type_confidence(&MimeType::from(mime::PDF_MIME_TYPE)),
            confidence::HIGHEST
        );
        assert!(data.has_highest_confidence_mime_type_in(&[MimeType::from(mime::PDF_MIME_TYPE)]));
    }
}
