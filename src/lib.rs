//! Decoder Service
//!
//! Event-triggered decode-and-upload pipeline. The service consumes
//! message-created events from Kafka, strictly decodes the base64 image
//! payload embedded in the document snapshot, streams the raw bytes to an
//! S3 bucket under a key derived from the message id, and then merges a
//! `decoded: true` flag onto the originating document in PostgreSQL.
//!
//! ## Architecture
//!
//! ```text
//! Kafka Topic                 S3 Bucket                 PostgreSQL
//! ┌──────────────┐           ┌──────────────┐          ┌──────────────┐
//! │ messages.    │           │ images/      │          │ messages     │
//! │ created      │──────────▶│   {id}.jpg   │          │ (JSONB)      │
//! └──────────────┘           └──────────────┘          └──────────────┘
//!        │                          ▲                         ▲
//!        ▼                          │                         │
//! ┌──────────────┐           ┌──────────────┐          ┌──────────────┐
//! │ Decode       │──────────▶│ S3           │          │ Document     │
//! │ Pipeline     │           │ Uploader     │          │ Store        │
//! └──────────────┘           └──────────────┘          └──────────────┘
//! ```
//!
//! ## Delivery semantics
//!
//! The pipeline performs no internal retry. Correctness under transient
//! failure depends entirely on the consumer group's at-least-once
//! redelivery: offsets are committed only after the full
//! decode → upload → mark sequence succeeds, so a failed event is
//! delivered again. Duplicate delivery is safe end to end: the object key
//! is a pure function of the message id (re-upload writes identical
//! bytes to the same key) and the `decoded` flag is an idempotent merge
//! update that leaves all other document fields untouched.

pub mod config;
pub mod decoder;
pub mod document_store;
pub mod kafka_consumer;
pub mod pipeline;
pub mod uploader;

pub use config::Config;
pub use decoder::{decode_payload, DecodeError};
pub use document_store::{DocumentStore, MessageDocument, MessageStore};
pub use kafka_consumer::{DecoderKafkaConsumer, MessageCreatedEvent, PAYLOAD_FIELD};
pub use pipeline::{DecodePipeline, PipelineError};
pub use uploader::{object_key, ObjectSink, S3Uploader, IMAGE_CONTENT_TYPE};
