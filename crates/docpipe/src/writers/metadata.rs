//! Metadata-only export.
//!
//! Evaluates the lazy metadata callback of each top-level document and
//! renders the result as pretty JSON.

use crate::chain::{ChainElement, MessageCallbacks};
use crate::data_source::DataSource;
use crate::error::{DocpipeError, Result};
use crate::message::{Continuation, Message, Metadata};

/// Terminal element emitting one JSON document per parsed document.
#[derive(Default)]
pub struct MetadataExporter {
    metadata: Option<Metadata>,
    nested_docs: i32,
}

impl MetadataExporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChainElement for MetadataExporter {
    fn process(
        &mut self,
        message: Message,
        callbacks: &mut MessageCallbacks<'_>,
    ) -> Result<Continuation> {
        match &message {
            Message::Document(document) => {
                if self.nested_docs == 0 {
                    self.metadata = Some(document.metadata());
                }
                self.nested_docs += 1;
            }
            Message::CloseDocument => {
                self.nested_docs -= 1;
                if self.nested_docs == 0 {
                    let metadata = self.metadata.take().unwrap_or_default();
                    let json = serde_json::to_string_pretty(&metadata).map_err(|e| {
                        DocpipeError::external_library_with_source("metadata serialization", e)
                    })?;
                    return callbacks.further(Message::Data(DataSource::from_bytes(
                        json.into_bytes(),
                    )));
                }
            }
            Message::Error(_) => return callbacks.further(message),
            _ => {}
        }
        Ok(Continuation::Proceed)
    }

    fn is_leaf(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "metadata-exporter"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Pipeline;
    use crate::message::{DateTime, Document};
    use std::sync::Arc;

    #[test]
    fn test_metadata_rendered_as_json() {
        let document = Document::new(Arc::new(|| Metadata {
            author: Some("someone".to_string()),
            creation_date: Some(DateTime::new(2020, 1, 1, 0, 0, 0)),
            page_count: Some(3),
            ..Default::default()
        }));
        let mut pipeline = Pipeline::new().then(MetadataExporter::new());
        pipeline.process(Message::Document(document)).unwrap();
        pipeline.process(Message::text("ignored")).unwrap();
        let run = pipeline.process(Message::CloseDocument).unwrap();
        let Message::Data(data) = &run.emitted[0] else {
            panic!("expected data source");
        };
        let json: serde_json::Value =
            serde_json::from_str(&data.string(None).unwrap()).unwrap();
        assert_eq!(json["author"], "someone");
        assert_eq!(json["page_count"], 3);
        assert_eq!(json["creation_date"]["year"], 2020);
    }

    #[test]
    fn test_inner_document_metadata_is_not_exported() {
        let outer = Document::new(Arc::new(|| Metadata {
            author: Some("outer".to_string()),
            ..Default::default()
        }));
        let inner = Document::new(Arc::new(|| Metadata {
            author: Some("inner".to_string()),
            ..Default::default()
        }));
        let mut pipeline = Pipeline::new().then(MetadataExporter::new());
        pipeline.process(Message::Document(outer)).unwrap();
        pipeline.process(Message::Document(inner)).unwrap();
        pipeline.process(Message::CloseDocument).unwrap();
        let run = pipeline.process(Message::CloseDocument).unwrap();
        let Message::Data(data) = &run.emitted[0] else {
            panic!("expected data source");
        };
        assert!(data.string(None).unwrap().contains("outer"));
    }
}
