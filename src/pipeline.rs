//! The decode-and-upload pipeline.
//!
//! One invocation per message-created event: extract the base64 field from
//! the document snapshot, strictly decode it, stream the bytes to object
//! storage under a key derived from the message id, then merge the
//! `decoded` flag onto the document. Nothing is marked on failure, so an
//! uncommitted (redelivered) event retries the full sequence.

use crate::decoder::{decode_payload, DecodeError};
use crate::document_store::MessageStore;
use crate::kafka_consumer::{MessageCreatedEvent, PAYLOAD_FIELD};
use crate::uploader::{object_key, ObjectSink, IMAGE_CONTENT_TYPE};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Errors that can occur while processing a message-created event
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("message {message_id} is missing required field `{field}`")]
    MissingField {
        message_id: String,
        field: &'static str,
    },

    #[error("failed to decode payload of message {message_id}: {source}")]
    Decode {
        message_id: String,
        #[source]
        source: DecodeError,
    },

    #[error("failed to upload object {key} for message {message_id}: {source}")]
    Upload {
        message_id: String,
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to mark message {message_id} as decoded: {source}")]
    Store {
        message_id: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Decode-and-upload pipeline over an object sink and a message store
pub struct DecodePipeline {
    sink: Arc<dyn ObjectSink>,
    store: Arc<dyn MessageStore>,
    key_prefix: String,
}

impl DecodePipeline {
    /// Create a new pipeline writing objects under `key_prefix`
    pub fn new(sink: Arc<dyn ObjectSink>, store: Arc<dyn MessageStore>, key_prefix: String) -> Self {
        Self {
            sink,
            store,
            key_prefix,
        }
    }

    /// Process one message-created event end to end.
    ///
    /// Returns the object key the decoded payload was stored under. The
    /// `decoded` flag is merged onto the document only after the storage
    /// service confirms the upload; no retry happens here.
    #[instrument(skip(self, event), fields(message_id = %event.message_id))]
    pub async fn handle_created(&self, event: &MessageCreatedEvent) -> Result<String, PipelineError> {
        let message_id = &event.message_id;

        let payload = event
            .base64_payload()
            .ok_or_else(|| PipelineError::MissingField {
                message_id: message_id.clone(),
                field: PAYLOAD_FIELD,
            })?;

        let bytes = decode_payload(payload).map_err(|source| PipelineError::Decode {
            message_id: message_id.clone(),
            source,
        })?;

        let key = object_key(&self.key_prefix, message_id);
        let size_bytes = bytes.len();

        debug!(key = %key, size_bytes, "Uploading decoded payload");

        let start = Instant::now();
        self.sink
            .put_object(&key, IMAGE_CONTENT_TYPE, bytes)
            .await
            .map_err(|source| PipelineError::Upload {
                message_id: message_id.clone(),
                key: key.clone(),
                source,
            })?;
        metrics::histogram!("decoder.upload.duration_seconds")
            .record(start.elapsed().as_secs_f64());

        self.store
            .mark_decoded(message_id)
            .await
            .map_err(|source| PipelineError::Store {
                message_id: message_id.clone(),
                source,
            })?;

        metrics::counter!("decoder.payloads.uploaded").increment(1);
        metrics::counter!("decoder.bytes.uploaded").increment(size_bytes as u64);

        info!(key = %key, size_bytes, "Decoded payload stored and message marked");

        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document_store::MockMessageStore;
    use crate::uploader::MockObjectSink;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn event(message_id: &str, fields: serde_json::Value) -> MessageCreatedEvent {
        MessageCreatedEvent {
            message_id: message_id.to_string(),
            collection: "messages".to_string(),
            fields,
        }
    }

    /// Object sink that keeps uploads in memory for byte-level assertions
    #[derive(Default)]
    struct MemorySink {
        objects: Mutex<HashMap<String, (String, Vec<u8>)>>,
    }

    #[async_trait]
    impl ObjectSink for MemorySink {
        async fn put_object(
            &self,
            key: &str,
            content_type: &str,
            body: Vec<u8>,
        ) -> anyhow::Result<()> {
            self.objects
                .lock()
                .unwrap()
                .insert(key.to_string(), (content_type.to_string(), body));
            Ok(())
        }
    }

    /// Message store that applies the merge-update semantics in memory
    struct MemoryStore {
        documents: Mutex<HashMap<String, serde_json::Value>>,
    }

    impl MemoryStore {
        fn with_document(id: &str, fields: serde_json::Value) -> Self {
            let mut documents = HashMap::new();
            documents.insert(id.to_string(), fields);
            Self {
                documents: Mutex::new(documents),
            }
        }

        fn fields(&self, id: &str) -> serde_json::Value {
            self.documents.lock().unwrap().get(id).cloned().unwrap()
        }
    }

    #[async_trait]
    impl MessageStore for MemoryStore {
        async fn mark_decoded(&self, message_id: &str) -> anyhow::Result<()> {
            let mut documents = self.documents.lock().unwrap();
            if let Some(fields) = documents.get_mut(message_id) {
                fields
                    .as_object_mut()
                    .unwrap()
                    .insert("decoded".to_string(), json!(true));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_jpeg_fragment_round_trip() {
        // base64 of [0xFF, 0xD8, 0xFF]
        let sink = Arc::new(MemorySink::default());
        let store = Arc::new(MemoryStore::with_document(
            "msg-001",
            json!({ "base64Payload": "/9j/", "sender": "device-42" }),
        ));
        let pipeline = DecodePipeline::new(sink.clone(), store.clone(), "images".to_string());

        let key = pipeline
            .handle_created(&event("msg-001", json!({ "base64Payload": "/9j/" })))
            .await
            .unwrap();

        assert_eq!(key, "images/msg-001.jpg");
        let objects = sink.objects.lock().unwrap();
        let (content_type, body) = objects.get("images/msg-001.jpg").unwrap();
        assert_eq!(content_type, "image/jpeg");
        assert_eq!(body, &vec![0xFF, 0xD8, 0xFF]);
        drop(objects);

        let fields = store.fields("msg-001");
        assert_eq!(fields["decoded"], json!(true));
        assert_eq!(fields["sender"], json!("device-42"), "other fields preserved");
    }

    #[tokio::test]
    async fn test_malformed_payload_never_reaches_storage() {
        let mut sink = MockObjectSink::new();
        sink.expect_put_object().times(0);
        let mut store = MockMessageStore::new();
        store.expect_mark_decoded().times(0);

        let pipeline =
            DecodePipeline::new(Arc::new(sink), Arc::new(store), "images".to_string());

        let err = pipeline
            .handle_created(&event("msg-bad", json!({ "base64Payload": "not base64!!" })))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_empty_payload_is_rejected() {
        let mut sink = MockObjectSink::new();
        sink.expect_put_object().times(0);
        let mut store = MockMessageStore::new();
        store.expect_mark_decoded().times(0);

        let pipeline =
            DecodePipeline::new(Arc::new(sink), Arc::new(store), "images".to_string());

        let err = pipeline
            .handle_created(&event("msg-empty", json!({ "base64Payload": "" })))
            .await
            .unwrap_err();

        match err {
            PipelineError::Decode { source, .. } => {
                assert!(matches!(source, DecodeError::Empty))
            }
            other => panic!("expected Decode error, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_payload_field_fails_fast() {
        let mut sink = MockObjectSink::new();
        sink.expect_put_object().times(0);
        let mut store = MockMessageStore::new();
        store.expect_mark_decoded().times(0);

        let pipeline =
            DecodePipeline::new(Arc::new(sink), Arc::new(store), "images".to_string());

        let err = pipeline
            .handle_created(&event("msg-nofield", json!({ "sender": "device-42" })))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::MissingField {
                field: "base64Payload",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_upload_failure_leaves_document_unmarked() {
        let mut sink = MockObjectSink::new();
        sink.expect_put_object()
            .times(1)
            .returning(|_, _, _| Err(anyhow!("write stream error")));
        let mut store = MockMessageStore::new();
        store.expect_mark_decoded().times(0);

        let pipeline =
            DecodePipeline::new(Arc::new(sink), Arc::new(store), "images".to_string());

        let err = pipeline
            .handle_created(&event("msg-fail", json!({ "base64Payload": "/9j/" })))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Upload { .. }));
    }

    #[tokio::test]
    async fn test_redelivery_is_idempotent() {
        let sink = Arc::new(MemorySink::default());
        let store = Arc::new(MemoryStore::with_document(
            "msg-dup",
            json!({ "base64Payload": "/9j/", "priority": 3 }),
        ));
        let pipeline = DecodePipeline::new(sink.clone(), store.clone(), "images".to_string());
        let evt = event("msg-dup", json!({ "base64Payload": "/9j/" }));

        let first = pipeline.handle_created(&evt).await.unwrap();
        let second = pipeline.handle_created(&evt).await.unwrap();

        // Same destination, same bytes, flag set once is equivalent to twice
        assert_eq!(first, second);
        let fields = store.fields("msg-dup");
        assert_eq!(fields["decoded"], json!(true));
        assert_eq!(fields["priority"], json!(3));
    }

    #[tokio::test]
    async fn test_concurrent_messages_land_under_distinct_keys() {
        // The derived key removes the fixed-destination overwrite race:
        // both uploads survive instead of last-write-wins.
        let sink = Arc::new(MemorySink::default());
        let store_a = Arc::new(MemoryStore::with_document("msg-a", json!({})));
        let store_b = Arc::new(MemoryStore::with_document("msg-b", json!({})));
        let pipeline_a = DecodePipeline::new(sink.clone(), store_a, "images".to_string());
        let pipeline_b = DecodePipeline::new(sink.clone(), store_b, "images".to_string());

        let evt_a = event("msg-a", json!({ "base64Payload": "/9j/" }));
        // base64 of "Hello World"
        let evt_b = event("msg-b", json!({ "base64Payload": "SGVsbG8gV29ybGQ=" }));

        let (res_a, res_b) = tokio::join!(
            pipeline_a.handle_created(&evt_a),
            pipeline_b.handle_created(&evt_b)
        );
        let (key_a, key_b) = (res_a.unwrap(), res_b.unwrap());

        assert_ne!(key_a, key_b);
        let objects = sink.objects.lock().unwrap();
        assert_eq!(objects.get(&key_a).unwrap().1, vec![0xFF, 0xD8, 0xFF]);
        assert_eq!(objects.get(&key_b).unwrap().1, b"Hello World".to_vec());
    }
}
