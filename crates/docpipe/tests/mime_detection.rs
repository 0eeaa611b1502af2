//! Detection cascade behavior over whole inputs.

use docpipe::data_source::{DataSource, FileExtension};
use docpipe::mime::{MimeType, confidence};
use docpipe::{content_type, mime};

#[test]
fn test_extension_and_signature_stack_up() {
    let mut data = DataSource::from_bytes(b"%PDF-1.7 ...".to_vec())
        .with_file_extension(FileExtension::new("pdf"));
    content_type::detect(&mut data);
    assert_eq!(
        data.mime_type_confidence(&MimeType::from(mime::PDF_MIME_TYPE)),
        confidence::HIGHEST
    );
}

#[test]
fn test_html_probe_bumps_signature_hypothesis() {
    let mut data =
        DataSource::from_bytes(b"<html><body><p>Hello <b>World</b></p></body></html>".to_vec());
    content_type::detect(&mut data);
    assert_eq!(
        data.mime_type_confidence(&MimeType::from(mime::HTML_MIME_TYPE)),
        confidence::HIGHEST
    );
    assert!(data.has_highest_confidence_mime_type_in(&[MimeType::from(mime::HTML_MIME_TYPE)]));
}

#[test]
fn test_confidence_is_monotone_across_repeated_detection() {
    let mut data = DataSource::from_bytes(b"<?xml version=\"1.0\"?><html/>".to_vec());
    let mut last = 0;
    for _ in 0..3 {
        content_type::detect(&mut data);
        let highest = data.highest_mime_type_confidence();
        assert!(highest >= last);
        last = highest;
    }
}

#[test]
fn test_unknown_bytes_have_no_hypotheses() {
    let mut data = DataSource::from_bytes(vec![0x00, 0x01, 0x02, 0x03]);
    content_type::detect(&mut data);
    assert_eq!(data.highest_mime_type_confidence(), 0);
}

#[cfg(feature = "office")]
#[test]
fn test_ooxml_zip_scenario() {
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    writer
        .start_file("[Content_Types].xml", SimpleFileOptions::default())
        .unwrap();
    writer
        .write_all(b"<Types><Override PartName=\"/word/document.xml\"/></Types>")
        .unwrap();
    writer
        .start_file("word/document.xml", SimpleFileOptions::default())
        .unwrap();
    writer
        .write_all(b"<w:document><w:body><w:p><w:r><w:t>hi</w:t></w:r></w:p></w:body></w:document>")
        .unwrap();
    let bytes = writer.finish().unwrap().into_inner();
    assert_eq!(&bytes[0..4], b"PK\x03\x04");

    let mut data = DataSource::from_bytes(bytes);
    content_type::detect(&mut data);
    assert!(
        data.mime_type_confidence(&MimeType::from(mime::DOCX_MIME_TYPE)) >= confidence::HIGH
    );
    assert!(data.has_highest_confidence_mime_type_in(&[MimeType::from(mime::DOCX_MIME_TYPE)]));
}

#[test]
fn test_eml_signature() {
    let mut data = DataSource::from_bytes(
        b"Return-Path: <a@b>\r\nFrom: a@b\r\nSubject: x\r\n\r\nbody".to_vec(),
    );
    content_type::detect(&mut data);
    assert!(
        data.mime_type_confidence(&MimeType::from(mime::EML_MIME_TYPE)) >= confidence::MEDIUM
    );
}

#[test]
fn test_outlook_extension_triggers_probe() {
    // A PST store: extension says Outlook, the signature stage cannot
    // find the inner CFBF message, so the probe escalates to PST.
    let mut bytes = b"!BDN".to_vec();
    bytes.extend(vec![0u8; 64]);
    let mut data = DataSource::from_bytes(bytes).with_file_extension(FileExtension::new("pst"));
    content_type::detect(&mut data);
    assert_eq!(
        data.mime_type_confidence(&MimeType::from(mime::OUTLOOK_PST_MIME_TYPE)),
        confidence::VERY_HIGH
    );
}

#[test]
fn test_detector_chain_element_annotates_passing_sources() {
    use docpipe::chain::Pipeline;
    use docpipe::message::Message;

    let mut pipeline = Pipeline::new().then(content_type::Detector);
    let run = pipeline
        .process(Message::Data(DataSource::from_bytes(b"%PDF-1.4".to_vec())))
        .unwrap();
    let Message::Data(data) = &run.emitted[0] else {
        panic!("expected the data source to pass through");
    };
    assert!(data.has_highest_confidence_mime_type_in(&[MimeType::from(mime::PDF_MIME_TYPE)]));
}
