//! Format-specific heuristic probes.
//!
//! Probes run after the extension and signature stages and rely on the
//! hypotheses those stages recorded. None of them ever removes a
//! hypothesis.

use crate::content_type::by_signature::{self, AllowMultiple};
use crate::data_source::{DataSource, LengthLimit};
use crate::mime::{MimeType, confidence};

use crate::mime::*;

/// ASP/ASP.NET directive scan, gated on an existing `text/html` hypothesis.
pub fn asp(data: &mut DataSource) {
    if data.mime_types().next().is_some()
        && data.mime_type_confidence(&MimeType::from_static(HTML_MIME_TYPE)) < confidence::MEDIUM
    {
        return;
    }
    let Ok(head) = data.string(Some(LengthLimit(2048))) else {
        return;
    };
    let aspdotnet_markers = [
        "<%@ Page",
        "<%@page",
        "<%@ Control",
        "<%@control",
        "runat=\"server\"",
        "<script language=\"C#\" runat=\"server\">",
        "<script language=\"VB\" runat=\"server\">",
        "<%#",
    ];
    if aspdotnet_markers.iter().any(|m| head.contains(m)) {
        data.add_mime_type(MimeType::from_static(ASPDOTNET_MIME_TYPE), confidence::HIGHEST);
    } else if head.contains("<%") || head.contains("<%=") || head.contains("<!-- #include") {
        data.add_mime_type(MimeType::from_static(ASP_MIME_TYPE), confidence::HIGHEST);
    }
}

/// Upgrade XML-ish or weakly HTML-ish inputs that carry an `<html` root.
pub fn html(data: &mut DataSource) {
    let xmlish = data.mime_type_confidence(&MimeType::from_static(XML_MIME_TYPE));
    let htmlish = data.mime_type_confidence(&MimeType::from_static(HTML_MIME_TYPE));
    if xmlish.max(htmlish) < confidence::MEDIUM {
        return;
    }
    if data.highest_mime_type_confidence() >= confidence::HIGHEST {
        return;
    }
    let Ok(head) = data.string(Some(LengthLimit(1024))) else {
        return;
    };
    if head.contains("<html") || head.contains("<HTML") {
        data.add_mime_type(MimeType::from_static(HTML_MIME_TYPE), confidence::HIGHEST);
    }
}

const ODF_FLAT_TYPES: [(&str, &str); 4] = [
    (ODT_MIME_TYPE, "application/vnd.oasis.opendocument.text-flat-xml"),
    (ODS_MIME_TYPE, "application/vnd.oasis.opendocument.spreadsheet-flat-xml"),
    (ODP_MIME_TYPE, "application/vnd.oasis.opendocument.presentation-flat-xml"),
    (ODG_MIME_TYPE, "application/vnd.oasis.opendocument.graphics-flat-xml"),
];

/// Flat-XML OpenDocument roots. Runs on strong XML evidence or on a
/// flat-ODF extension hint, and escalates the confirmed root above the
/// generic XML hypothesis so dispatch is unambiguous.
pub fn odf_flat(data: &mut DataSource) {
    let flat_evidence = ODF_FLAT_TYPES
        .iter()
        .map(|(_, flat)| data.mime_type_confidence(&MimeType::new(*flat)))
        .max()
        .unwrap_or(0);
    if data.mime_type_confidence(&MimeType::from_static(XML_MIME_TYPE)) < confidence::VERY_HIGH
        && flat_evidence < confidence::MEDIUM
    {
        return;
    }
    if data.highest_mime_type_confidence() >= confidence::HIGHEST {
        return;
    }
    let Ok(head) = data.string(Some(LengthLimit(1024))) else {
        return;
    };
    if !head.contains("office:document") {
        return;
    }
    for (marker, flat) in ODF_FLAT_TYPES {
        if head.contains(marker) {
            data.add_mime_type(MimeType::new(flat), confidence::HIGHEST);
            return;
        }
    }
    // `office:document` with no declared subtype: confirm the strongest
    // prior hypothesis, defaulting to the text variant.
    let flat = ODF_FLAT_TYPES
        .iter()
        .find(|(_, flat)| data.mime_type_confidence(&MimeType::new(*flat)) >= confidence::MEDIUM)
        .map(|(_, flat)| *flat)
        .unwrap_or("application/vnd.oasis.opendocument.text-flat-xml");
    data.add_mime_type(MimeType::new(flat), confidence::HIGHEST);
}

/// Distinguish Outlook message files from personal folder stores.
///
/// Runs the signature stage again with every hypothesis enabled; the flag
/// is local and does not propagate further. A suspected Outlook input
/// without the inner CFBF message hypothesis is a PST store.
pub fn outlook(data: &mut DataSource) {
    if data.mime_type_confidence(&MimeType::from_static(OUTLOOK_MIME_TYPE)) < confidence::MEDIUM {
        return;
    }
    if data.highest_mime_type_confidence() >= confidence::HIGHEST {
        return;
    }
    by_signature::detect(data, AllowMultiple(true));
    if data.mime_type_confidence(&MimeType::from_static(MS_MSG_MIME_TYPE)) < confidence::MEDIUM {
        data.add_mime_type(MimeType::from_static(OUTLOOK_PST_MIME_TYPE), confidence::VERY_HIGH);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_source::FileExtension;

    #[test]
    fn test_asp_requires_html_hypothesis() {
        let mut data = DataSource::from_static_str("<%@ Page Language=\"C#\" %>");
        data.add_mime_type(MimeType::from_static(PLAIN_TEXT_MIME_TYPE), confidence::HIGH);
        asp(&mut data);
        assert_eq!(
            data.mime_type_confidence(&MimeType::from(ASPDOTNET_MIME_TYPE)),
            0
        );

        let mut data = DataSource::from_static_str("<%@ Page Language=\"C#\" %>");
        data.add_mime_type(MimeType::from_static(HTML_MIME_TYPE), confidence::MEDIUM);
        asp(&mut data);
        assert_eq!(
            data.mime_type_confidence(&MimeType::from(ASPDOTNET_MIME_TYPE)),
            confidence::HIGHEST
        );
    }

    #[test]
    fn test_asp_runs_on_untyped_data() {
        // With no hypotheses at all the probe may still inspect the bytes.
        let mut data = DataSource::from_static_str("<% Response.Write(\"x\") %>");
        asp(&mut data);
        assert_eq!(
            data.mime_type_confidence(&MimeType::from(ASP_MIME_TYPE)),
            confidence::HIGHEST
        );
    }

    #[test]
    fn test_classic_asp_vs_aspdotnet() {
        let mut data = DataSource::from_static_str("<html><% include %></html>");
        data.add_mime_type(MimeType::from_static(HTML_MIME_TYPE), confidence::MEDIUM);
        asp(&mut data);
        assert_eq!(
            data.mime_type_confidence(&MimeType::from(ASP_MIME_TYPE)),
            confidence::HIGHEST
        );
        assert_eq!(
            data.mime_type_confidence(&MimeType::from(ASPDOTNET_MIME_TYPE)),
            0
        );
    }

    #[test]
    fn test_html_probe_upgrades_xml() {
        let mut data = DataSource::from_static_str("<?xml version=\"1.0\"?><html><body/></html>");
        data.add_mime_type(MimeType::from_static(XML_MIME_TYPE), confidence::HIGH);
        html(&mut data);
        assert_eq!(
            data.mime_type_confidence(&MimeType::from(HTML_MIME_TYPE)),
            confidence::HIGHEST
        );
    }

    #[test]
    fn test_html_probe_respects_stronger_candidate() {
        let mut data = DataSource::from_static_str("<html/>");
        data.add_mime_type(MimeType::from_static(XML_MIME_TYPE), confidence::MEDIUM);
        data.add_mime_type(MimeType::from_static(PDF_MIME_TYPE), confidence::HIGHEST);
        html(&mut data);
        assert_eq!(
            data.mime_type_confidence(&MimeType::from(HTML_MIME_TYPE)),
            0
        );
    }

    #[test]
    fn test_odf_flat_probe() {
        let mut data = DataSource::from_static_str(
            "<?xml version=\"1.0\"?><office:document \
             office:mimetype=\"application/vnd.oasis.opendocument.spreadsheet\">",
        );
        data.add_mime_type(MimeType::from_static(XML_MIME_TYPE), confidence::VERY_HIGH);
        odf_flat(&mut data);
        assert_eq!(
            data.mime_type_confidence(&MimeType::from(
                "application/vnd.oasis.opendocument.spreadsheet-flat-xml"
            )),
            confidence::HIGHEST
        );
    }

    #[test]
    fn test_odf_flat_needs_strong_xml_evidence() {
        let mut data = DataSource::from_static_str("<office:document>");
        data.add_mime_type(MimeType::from_static(XML_MIME_TYPE), confidence::MEDIUM);
        odf_flat(&mut data);
        assert_eq!(data.highest_mime_type_confidence(), confidence::MEDIUM);
    }

    #[test]
    fn test_outlook_pst_escalation() {
        // "!BDN" magic: signature stage sees a PST store, not an inner message.
        let mut data = DataSource::from_static_bytes(b"!BDN rest of header")
            .with_file_extension(FileExtension::new("pst"));
        data.add_mime_type(MimeType::from_static(OUTLOOK_MIME_TYPE), confidence::HIGH);
        outlook(&mut data);
        assert_eq!(
            data.mime_type_confidence(&MimeType::from(OUTLOOK_PST_MIME_TYPE)),
            confidence::VERY_HIGH
        );
    }

    #[test]
    fn test_outlook_msg_not_escalated() {
        let bytes: &'static [u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1, 0, 0];
        let mut data = DataSource::from_static_bytes(bytes);
        data.add_mime_type(MimeType::from_static(OUTLOOK_MIME_TYPE), confidence::HIGH);
        outlook(&mut data);
        assert_eq!(
            data.mime_type_confidence(&MimeType::from(OUTLOOK_PST_MIME_TYPE)),
            0
        );
        assert_eq!(
            data.mime_type_confidence(&MimeType::from(MS_MSG_MIME_TYPE)),
            confidence::MEDIUM
        );
    }
}
