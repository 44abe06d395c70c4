use crate::config::S3Config;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ChecksumAlgorithm;
use aws_sdk_s3::Client as S3Client;
use tracing::{debug, info, instrument};

/// Content type recorded on every decoded payload object
pub const IMAGE_CONTENT_TYPE: &str = "image/jpeg";

/// Destination for decoded payload bytes.
///
/// The pipeline writes through this trait so tests can substitute an
/// in-memory or failing sink for the real bucket.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectSink: Send + Sync {
    /// Write `body` to the bucket under `key` with the given content type.
    /// Resolves only once the storage service confirms the write; any
    /// transfer or integrity failure is the operation's failure.
    async fn put_object(&self, key: &str, content_type: &str, body: Vec<u8>) -> Result<()>;
}

/// S3 uploader for decoded message payloads
pub struct S3Uploader {
    client: S3Client,
    bucket: String,
}

impl S3Uploader {
    /// Create a new S3 uploader
    pub async fn new(config: &S3Config) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let s3_config = s3_config_builder.build();
        let client = S3Client::from_conf(s3_config);

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 uploader initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
        })
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectSink for S3Uploader {
    #[instrument(skip(self, body), fields(key = %key, size_bytes = body.len()))]
    async fn put_object(&self, key: &str, content_type: &str, body: Vec<u8>) -> Result<()> {
        debug!("Uploading decoded payload");

        // The SDK streams the body and computes the checksum; the service
        // rejects the put if the transferred bytes do not match.
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .checksum_algorithm(ChecksumAlgorithm::Sha256)
            .send()
            .await
            .context("Failed to upload decoded payload to S3")?;

        Ok(())
    }
}

/// Generate the object key for a message's decoded payload.
/// Format: {prefix}/{message_id}.jpg
///
/// The key is derived from the message identifier so concurrent uploads for
/// different messages never target the same object, and every upload stays
/// independently addressable.
pub fn object_key(prefix: &str, message_id: &str) -> String {
    format!(
        "{}/{}.jpg",
        prefix.trim_end_matches('/'),
        sanitize_path_component(message_id)
    )
}

/// Sanitize a path component to prevent path traversal
fn sanitize_path_component(component: &str) -> String {
    component
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_derived_from_message_id() {
        assert_eq!(object_key("images", "msg-001"), "images/msg-001.jpg");
        assert_eq!(object_key("images/", "msg-001"), "images/msg-001.jpg");
    }

    #[test]
    fn test_object_key_distinct_per_message() {
        // Distinct documents never share a destination, so concurrent
        // uploads cannot overwrite each other.
        let a = object_key("images", "msg-a");
        let b = object_key("images", "msg-b");
        assert_ne!(a, b);
    }

    #[test]
    fn test_sanitize_path_component() {
        assert_eq!(sanitize_path_component("msg-001"), "msg-001");
        assert_eq!(sanitize_path_component("a/b"), "a_b");
        assert_eq!(sanitize_path_component("a..b"), "a__b");
        assert_eq!(sanitize_path_component("hello world"), "hello_world");
    }
}
