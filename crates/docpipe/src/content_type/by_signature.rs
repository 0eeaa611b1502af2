//! Content-type detection from magic-byte signatures.
//!
//! The database holds byte patterns with optional masks, anchored either
//! at a fixed offset or searched anywhere within the first
//! [`SIGNATURE_WINDOW`] bytes. Confidence reflects signature specificity.
//! Matching adds hypotheses; it never removes one.

use crate::data_source::DataSource;
use crate::message::{Continuation, Message};
use crate::mime::{Confidence, MimeType, confidence};
use once_cell::sync::Lazy;

use crate::mime::*;

/// Detectors only inspect this many leading bytes.
pub const SIGNATURE_WINDOW: usize = 2048;

/// Controls whether additional, less specific hypotheses of the same
/// pattern are recorded. A local flag: it does not propagate into nested
/// detector invocations.
#[derive(Debug, Clone, Copy)]
pub struct AllowMultiple(pub bool);

#[derive(Debug, Clone, Copy)]
enum Anchor {
    /// Pattern must appear at this byte offset.
    At(usize),
    /// Pattern may appear anywhere in the window.
    Anywhere,
}

#[derive(Debug, Clone, Copy)]
pub struct Signature {
    pattern: &'static [u8],
    /// Bitmask applied to the input before comparison; `None` means exact.
    mask: Option<&'static [u8]>,
    anchor: Anchor,
    mime: &'static str,
    confidence: Confidence,
    /// Recorded only when the caller passed `AllowMultiple(true)`.
    multiple_only: bool,
}

impl Signature {
    const fn at(offset: usize, pattern: &'static [u8], mime: &'static str, confidence: Confidence) -> Self {
        Signature {
            pattern,
            mask: None,
            anchor: Anchor::At(offset),
            mime,
            confidence,
            multiple_only: false,
        }
    }

    const fn anywhere(pattern: &'static [u8], mime: &'static str, confidence: Confidence) -> Self {
        Signature {
            pattern,
            mask: None,
            anchor: Anchor::Anywhere,
            mime,
            confidence,
            multiple_only: false,
        }
    }

    const fn masked(
        offset: usize,
        pattern: &'static [u8],
        mask: &'static [u8],
        mime: &'static str,
        confidence: Confidence,
    ) -> Self {
        Signature {
            pattern,
            mask: Some(mask),
            anchor: Anchor::At(offset),
            mime,
            confidence,
            multiple_only: false,
        }
    }

    const fn multiple(mut self) -> Self {
        self.multiple_only = true;
        self
    }

    fn matches(&self, window: &[u8]) -> bool {
        match self.anchor {
            Anchor::At(offset) => {
                let end = offset + self.pattern.len();
                if window.len() < end {
                    return false;
                }
                matches_masked(&window[offset..end], self.pattern, self.mask)
            }
            Anchor::Anywhere => match self.mask {
                None => memchr::memmem::find(window, self.pattern).is_some(),
                Some(_) => window
                    .windows(self.pattern.len())
                    .any(|w| matches_masked(w, self.pattern, self.mask)),
            },
        }
    }
}

fn matches_masked(input: &[u8], pattern: &[u8], mask: Option<&[u8]>) -> bool {
    match mask {
        None => input == pattern,
        Some(mask) => input
            .iter()
            .zip(pattern.iter().zip(mask.iter()))
            .all(|(i, (p, m))| i & m == p & m),
    }
}

const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// The built-in signature database.
pub static DATABASE: Lazy<Vec<Signature>> = Lazy::new(|| {
    vec![
        Signature::at(0, b"%PDF-", PDF_MIME_TYPE, confidence::HIGHEST),
        Signature::at(0, b"{\\rtf", RTF_MIME_TYPE, confidence::HIGHEST),
        Signature::at(0, b"PK\x03\x04", ZIP_MIME_TYPE, confidence::HIGH),
        Signature::at(0, OLE_MAGIC, "application/x-ole-storage", confidence::HIGH),
        // An OLE container may hold an Outlook message; recorded only for
        // callers that asked for every hypothesis.
        Signature::at(0, OLE_MAGIC, MS_MSG_MIME_TYPE, confidence::MEDIUM).multiple(),
        // PST personal folder file.
        Signature::at(0, b"!BDN", OUTLOOK_MIME_TYPE, confidence::HIGH),
        // XML declaration, with and without a UTF-8 BOM.
        Signature::at(0, b"<?xml", XML_MIME_TYPE, confidence::HIGH),
        Signature::at(0, b"\xEF\xBB\xBF<?xml", XML_MIME_TYPE, confidence::HIGH),
        // HTML without an XML declaration.
        Signature::anywhere(b"<html", HTML_MIME_TYPE, confidence::MEDIUM),
        Signature::anywhere(b"<HTML", HTML_MIME_TYPE, confidence::MEDIUM),
        Signature::anywhere(b"<!DOCTYPE html", HTML_MIME_TYPE, confidence::MEDIUM),
        Signature::anywhere(b"<!DOCTYPE HTML", HTML_MIME_TYPE, confidence::MEDIUM),
        // RFC 822 header block openers.
        Signature::at(0, b"Return-Path:", EML_MIME_TYPE, confidence::HIGH),
        Signature::at(0, b"Received:", EML_MIME_TYPE, confidence::HIGH),
        Signature::at(0, b"Delivered-To:", EML_MIME_TYPE, confidence::HIGH),
        Signature::at(0, b"From: ", EML_MIME_TYPE, confidence::MEDIUM),
        Signature::at(0, b"Message-ID:", EML_MIME_TYPE, confidence::MEDIUM),
        // Images.
        Signature::at(0, b"\x89PNG\r\n\x1a\n", "image/png", confidence::HIGHEST),
        Signature::at(0, &[0xFF, 0xD8, 0xFF], "image/jpeg", confidence::HIGHEST),
        Signature::masked(
            0,
            b"GIF8\x00a",
            &[0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0xFF],
            "image/gif",
            confidence::HIGHEST,
        ),
        Signature::at(0, b"II*\x00", "image/tiff", confidence::HIGHEST),
        Signature::at(0, b"MM\x00*", "image/tiff", confidence::HIGHEST),
        Signature::at(0, b"BM", "image/bmp", confidence::MEDIUM),
        Signature::masked(
            0,
            b"RIFF\x00\x00\x00\x00WEBP",
            &[0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF],
            "image/webp",
            confidence::HIGHEST,
        ),
        // Archives.
        Signature::at(0, &[0x1F, 0x8B], "application/gzip", confidence::HIGH),
        Signature::at(257, b"ustar", TAR_MIME_TYPE, confidence::HIGHEST),
    ]
});

/// Test the leading bytes against the signature database.
pub fn detect(data: &mut DataSource, allow_multiple: AllowMultiple) {
    let head = match data.peek(SIGNATURE_WINDOW) {
        Ok(head) => head,
        Err(e) => {
            tracing::warn!(error = %e, "could not read signature window");
            return;
        }
    };
    for signature in DATABASE.iter() {
        if signature.multiple_only && !allow_multiple.0 {
            continue;
        }
        if signature.matches(&head) {
            tracing::debug!(mime = signature.mime, "signature hypothesis");
            data.add_mime_type(MimeType::from_static(signature.mime), signature.confidence);
        }
    }
}

/// Chain element form of [`detect`] with default (single) matching.
pub struct Detector;

impl crate::chain::ChainElement for Detector {
    fn process(
        &mut self,
        message: Message,
        callbacks: &mut crate::chain::MessageCallbacks<'_>,
    ) -> crate::error::Result<Continuation> {
        match message {
            Message::Data(mut data) => {
                detect(&mut data, AllowMultiple(false));
                callbacks.further(Message::Data(data))
            }
            other => callbacks.further(other),
        }
    }

    fn name(&self) -> &'static str {
        "content-type-by-signature"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mime;

    fn detected(bytes: &'static [u8]) -> DataSource {
        let mut data = DataSource::from_static_bytes(bytes);
        detect(&mut data, AllowMultiple(false));
        data
    }

    #[test]
    fn test_pdf_signature() {
        let data = detected(b"%PDF-1.7 rest");
        assert_eq!(
            data.mime_type_confidence(&MimeType::from(mime::PDF_MIME_TYPE)),
            confidence::HIGHEST
        );
    }

    #[test]
    fn test_zip_signature() {
        let data = detected(b"PK\x03\x04\x14\x00\x06\x00rest");
        assert_eq!(
            data.mime_type_confidence(&MimeType::from(mime::ZIP_MIME_TYPE)),
            confidence::HIGH
        );
    }

    #[test]
    fn test_masked_gif_signature() {
        let data = detected(b"GIF89a...");
        assert_eq!(
            data.mime_type_confidence(&MimeType::from("image/gif")),
            confidence::HIGHEST
        );
        let data = detected(b"GIF87a...");
        assert_eq!(
            data.mime_type_confidence(&MimeType::from("image/gif")),
            confidence::HIGHEST
        );
        let data = detected(b"GIF88a...");
        assert_eq!(data.mime_type_confidence(&MimeType::from("image/gif")), 0);
    }

    #[test]
    fn test_offset_anchored_tar() {
        let mut bytes = vec![0u8; 512];
        bytes[257..262].copy_from_slice(b"ustar");
        let mut data = DataSource::from_bytes(bytes);
        detect(&mut data, AllowMultiple(false));
        assert_eq!(
            data.mime_type_confidence(&MimeType::from(mime::TAR_MIME_TYPE)),
            confidence::HIGHEST
        );
    }

    #[test]
    fn test_html_anywhere() {
        let data = detected(b"<html><body><p>Hello <b>World</b></p></body></html>");
        assert!(
            data.mime_type_confidence(&MimeType::from(mime::HTML_MIME_TYPE)) >= confidence::MEDIUM
        );
    }

    #[test]
    fn test_ole_multiple_only_hypothesis() {
        let bytes: &'static [u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1, 0, 0];
        let mut single = DataSource::from_static_bytes(bytes);
        detect(&mut single, AllowMultiple(false));
        assert_eq!(
            single.mime_type_confidence(&MimeType::from(mime::MS_MSG_MIME_TYPE)),
            0
        );
        let mut multiple = DataSource::from_static_bytes(bytes);
        detect(&mut multiple, AllowMultiple(true));
        assert_eq!(
            multiple.mime_type_confidence(&MimeType::from(mime::MS_MSG_MIME_TYPE)),
            confidence::MEDIUM
        );
        assert_eq!(
            multiple.mime_type_confidence(&MimeType::from("application/x-ole-storage")),
            confidence::HIGH
        );
    }

    #[test]
    fn test_no_match_on_unknown_bytes() {
        let data = detected(&[0x00, 0x01, 0x02, 0x03]);
        assert_eq!(data.highest_mime_type_confidence(), 0);
    }

    #[test]
    fn test_matching_is_monotonic() {
        let mut data = DataSource::from_static_bytes(b"%PDF-1.4");
        detect(&mut data, AllowMultiple(false));
        let first = data.highest_mime_type_confidence();
        detect(&mut data, AllowMultiple(false));
        assert_eq!(data.highest_mime_type_confidence(), first);
    }
}
