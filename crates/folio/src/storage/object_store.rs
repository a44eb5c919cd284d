use std::path::Path;

use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use secrecy::ExposeSecret;
use tracing::debug;

use crate::config::StorageConfig;
use crate::error::ConfigError;

/// A transport-level failure, tagged with whether a retry can help.
/// Server-side hiccups and network faults are transient; auth, quota, and
/// malformed-request failures are not.
#[derive(Debug, Clone)]
pub struct TransportError {
    pub transient: bool,
    pub message: String,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Thin wrapper around the S3 client, scoped to one bucket.
#[derive(Clone)]
pub struct ObjectStore {
    client: Client,
    bucket: String,
}

impl ObjectStore {
    pub fn new(config: &StorageConfig) -> Result<Self, ConfigError> {
        let access_key = config.access_key.resolve().map_err(|e| ConfigError::Secret {
            name: "storage.access_key".to_string(),
            source: e,
        })?;
        let secret_key = config.secret_key.resolve().map_err(|e| ConfigError::Secret {
            name: "storage.secret_key".to_string(),
            source: e,
        })?;

        let credentials = Credentials::new(
            access_key.expose_secret(),
            secret_key.expose_secret(),
            None,
            None,
            "folio-storage",
        );

        // Retries are handled by the caller with its own backoff budget;
        // stacking the SDK's retry layer on top would multiply attempts.
        let mut builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .retry_config(aws_sdk_s3::config::retry::RetryConfig::disabled())
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub async fn put_file(
        &self,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<(), TransportError> {
        let body = ByteStream::from_path(path).await.map_err(|e| TransportError {
            transient: false,
            message: format!("failed to read '{}': {}", path.display(), e),
        })?;

        debug!("Uploading {} to s3://{}/{}", path.display(), self.bucket, key);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(body)
            .send()
            .await
            .map_err(classify)?;

        Ok(())
    }

    pub async fn put_bytes(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<(), TransportError> {
        debug!("Uploading {} bytes to s3://{}/{}", data.len(), self.bucket, key);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(classify)?;

        Ok(())
    }

    /// Size of the stored object, or None when the key does not exist.
    pub async fn head_size(&self, key: &str) -> Result<Option<i64>, TransportError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(resp) => Ok(Some(resp.content_length().unwrap_or(0))),
            Err(SdkError::ServiceError(ctx)) if ctx.err().is_not_found() => Ok(None),
            Err(e) => Err(classify(e)),
        }
    }
}

fn classify<E: ProvideErrorMetadata>(err: SdkError<E>) -> TransportError {
    match &err {
        SdkError::TimeoutError(_) => TransportError {
            transient: true,
            message: "request timed out".to_string(),
        },
        SdkError::DispatchFailure(_) => TransportError {
            transient: true,
            message: "request could not be dispatched".to_string(),
        },
        SdkError::ResponseError(_) => TransportError {
            transient: true,
            message: "response could not be read".to_string(),
        },
        SdkError::ServiceError(ctx) => {
            let status = ctx.raw().status();
            let code = ctx.err().code().unwrap_or("");
            let transient = status.is_server_error()
                || status.as_u16() == 429
                || code == "SlowDown"
                || code == "RequestTimeout";
            TransportError {
                transient,
                message: format!(
                    "service error {} ({})",
                    status.as_u16(),
                    ctx.err().message().unwrap_or(code)
                ),
            }
        }
        _ => TransportError {
            transient: false,
            message: "request could not be constructed".to_string(),
        },
    }
}
