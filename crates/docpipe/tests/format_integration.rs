#![cfg(feature = "office")]

//! Format-specific end-to-end scenarios through detection and export.

use docpipe::chain::{ChainElement, MessageCallbacks, Pipeline};
use docpipe::data_source::{DataSource, FileExtension};
use docpipe::message::{Continuation, Message};
use docpipe::parsers::ParseDetectedFormat;
use docpipe::writers::{CsvExporter, HtmlExporter, MetadataExporter};
use docpipe::content_type;
use std::io::Write;
use zip::write::SimpleFileOptions;

fn docx_package(document: &[u8]) -> Vec<u8> {
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
    writer.write_all(document).unwrap();
    writer.finish().unwrap().into_inner()
}

struct Recorder {
    seen: std::sync::Arc<parking_lot::Mutex<Vec<Message>>>,
}

impl ChainElement for Recorder {
    fn process(
        &mut self,
        message: Message,
        callbacks: &mut MessageCallbacks<'_>,
    ) -> docpipe::Result<Continuation> {
        self.seen.lock().push(message.clone());
        callbacks.further(message)
    }

    fn is_leaf(&self) -> bool {
        true
    }
}

fn parse_collecting(source: DataSource) -> Vec<Message> {
    let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
    let mut pipeline = Pipeline::new()
        .then(content_type::Detector)
        .then(ParseDetectedFormat::new())
        .then(Recorder { seen: seen.clone() });
    pipeline.process(Message::Data(source)).unwrap();
    let collected = seen.lock().clone();
    collected
}

#[test]
fn test_docx_zip_scenario() {
    // A zip signature plus a word/document.xml part drives dispatch into
    // the OOXML parser; the first <w:t> surfaces inside a paragraph pair.
    let bytes = docx_package(
        b"<w:document><w:body><w:p><w:r><w:t>first run</w:t></w:r></w:p></w:body></w:document>",
    );
    assert_eq!(&bytes[..8][..4], b"PK\x03\x04");
    let messages = parse_collecting(DataSource::from_bytes(bytes));
    let names: Vec<_> = messages.iter().map(|m| m.tag_name()).collect();
    assert_eq!(names[0], "document");
    let paragraph_at = names.iter().position(|n| *n == "paragraph").unwrap();
    let text_at = names.iter().position(|n| *n == "text").unwrap();
    let close_at = names.iter().position(|n| *n == "close_paragraph").unwrap();
    assert!(paragraph_at < text_at && text_at < close_at);
    let Message::Text(text) = &messages[text_at] else { panic!() };
    assert_eq!(text.text, "first run");
}

#[test]
fn test_xlsx_to_csv_export() {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    writer
        .start_file("xl/workbook.xml", SimpleFileOptions::default())
        .unwrap();
    writer.write_all(b"<workbook/>").unwrap();
    writer
        .start_file("xl/sharedStrings.xml", SimpleFileOptions::default())
        .unwrap();
    writer
        .write_all(b"<sst><si><t>name</t></si><si><t>value</t></si></sst>")
        .unwrap();
    writer
        .start_file("xl/worksheets/sheet1.xml", SimpleFileOptions::default())
        .unwrap();
    writer
        .write_all(
            b"<worksheet><sheetData>\
<row><c t=\"s\"><v>0</v></c><c t=\"s\"><v>1</v></c></row>\
<row><c><v>1</v></c><c><v>2</v></c></row>\
</sheetData></worksheet>",
        )
        .unwrap();
    let bytes = writer.finish().unwrap().into_inner();

    let mut pipeline = Pipeline::new()
        .then(content_type::Detector)
        .then(ParseDetectedFormat::new())
        .then(CsvExporter::new());
    let run = pipeline
        .process(Message::Data(DataSource::from_bytes(bytes)))
        .unwrap();
    let Some(Message::Data(data)) = run
        .emitted
        .iter()
        .find(|m| matches!(m, Message::Data(_)))
    else {
        panic!("expected rendered CSV");
    };
    assert_eq!(data.string(None).unwrap(), "name,value\r\n1,2\r\n");
}

#[test]
fn test_html_export_writes_metadata_head() {
    let bytes = {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        writer
            .start_file("word/document.xml", SimpleFileOptions::default())
            .unwrap();
        writer
            .write_all(
                b"<w:document><w:body><w:p><w:r><w:t>body text</w:t></w:r></w:p></w:body></w:document>",
            )
            .unwrap();
        writer
            .start_file("docProps/core.xml", SimpleFileOptions::default())
            .unwrap();
        writer
            .write_all(b"<cp:coreProperties><dc:creator>writer</dc:creator></cp:coreProperties>")
            .unwrap();
        writer.finish().unwrap().into_inner()
    };
    let mut pipeline = Pipeline::new()
        .then(content_type::Detector)
        .then(ParseDetectedFormat::new())
        .then(HtmlExporter::new());
    let run = pipeline
        .process(Message::Data(DataSource::from_bytes(bytes)))
        .unwrap();
    let Some(Message::Data(data)) = run
        .emitted
        .iter()
        .find(|m| matches!(m, Message::Data(_)))
    else {
        panic!("expected rendered HTML");
    };
    let html = data.string(None).unwrap();
    assert!(html.contains("<meta name=\"author\" content=\"writer\">"));
    assert!(html.contains("body text"));
    assert!(html.trim_end().ends_with("</html>"));
}

#[test]
fn test_metadata_export_is_json() {
    let bytes = {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        writer
            .start_file("word/document.xml", SimpleFileOptions::default())
            .unwrap();
        writer
            .write_all(b"<w:document><w:body><w:p><w:r><w:t>x</w:t></w:r></w:p></w:body></w:document>")
            .unwrap();
        writer
            .start_file("docProps/app.xml", SimpleFileOptions::default())
            .unwrap();
        writer
            .write_all(b"<Properties><Pages>2</Pages><Words>10</Words></Properties>")
            .unwrap();
        writer.finish().unwrap().into_inner()
    };
    let mut pipeline = Pipeline::new()
        .then(content_type::Detector)
        .then(ParseDetectedFormat::new())
        .then(MetadataExporter::new());
    let run = pipeline
        .process(Message::Data(DataSource::from_bytes(bytes)))
        .unwrap();
    let Some(Message::Data(data)) = run
        .emitted
        .iter()
        .find(|m| matches!(m, Message::Data(_)))
    else {
        panic!("expected metadata JSON");
    };
    let json: serde_json::Value = serde_json::from_str(&data.string(None).unwrap()).unwrap();
    assert_eq!(json["page_count"], 2);
    assert_eq!(json["word_count"], 10);
}

#[test]
fn test_flat_odf_detected_and_parsed() {
    let content = b"<?xml version=\"1.0\"?>\
<office:document office:mimetype=\"application/vnd.oasis.opendocument.text\" \
xmlns:office=\"o\"><office:body><office:text>\
<text:p>flat odf text</text:p></office:text></office:body></office:document>";
    let source =
        DataSource::from_bytes(content.to_vec()).with_file_extension(FileExtension::new("fodt"));
    let messages = parse_collecting(source);
    let texts: Vec<_> = messages
        .iter()
        .filter_map(|m| match m {
            Message::Text(t) => Some(t.text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(texts, vec!["flat odf text"]);
}

#[cfg(feature = "email")]
#[test]
fn test_msg_mime_dispatch_prefers_cfbf_probe() {
    // A PST signature with a .msg extension must not reach the MSG
    // parser; its data probe requires the CFBF container.
    let mut bytes = b"!BDN".to_vec();
    bytes.extend(vec![0u8; 32]);
    let source =
        DataSource::from_bytes(bytes).with_file_extension(FileExtension::new("msg"));
    let messages = parse_collecting(source);
    // Nothing claims a PST store: unknown format, source forwarded.
    assert!(messages.iter().any(|m| m.is_error()));
    assert!(messages.iter().any(|m| matches!(m, Message::Data(_))));
}
