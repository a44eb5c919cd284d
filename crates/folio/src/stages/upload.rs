//! Object-storage upload for a fully derived bag.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::bag::Bag;
use crate::config::{Config, UploadConfig};
use crate::error::UploadError;
use crate::pipeline::error::StageError;
use crate::stages::manifest::MANIFEST_FILENAME;
use crate::storage::{ObjectStore, TransportError};

/// One file to push: a local path and its deterministic storage key.
/// Keys are derived from the origin identifier and object/page identifiers,
/// never from the internal bag id, so recreated manifests and re-ingested
/// bags land at the same public locations.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub local: PathBuf,
    pub key: String,
}

/// Pushes every derivative, PDF, and the manifest to the bucket.
///
/// Each artifact is skipped when already present at the expected size,
/// retried with bounded exponential backoff on transient transport failures,
/// and verified by a post-write head check. Only full success advances the
/// bag; a partial upload fails the stage and the re-run picks up where it
/// left off.
pub struct Uploader {
    store: ObjectStore,
    retry: UploadConfig,
}

impl Uploader {
    pub fn new(config: &Config, store: ObjectStore) -> Self {
        Self {
            store,
            retry: config.upload.clone(),
        }
    }

    pub async fn run(&self, bag: &mut Bag) -> Result<(), StageError> {
        for artifact in artifacts_for(bag)? {
            let size = std::fs::metadata(&artifact.local)
                .map_err(|e| UploadError::MissingArtifact {
                    path: artifact.local.clone(),
                    source: e,
                })?
                .len() as i64;

            // Already confirmed present at the right size: a cheap retry.
            match self.store.head_size(&artifact.key).await {
                Ok(Some(remote)) if remote == size => {
                    debug!(key = %artifact.key, "Artifact already uploaded, skipping");
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    // The pre-check is an optimization; upload anyway.
                    warn!(key = %artifact.key, error = %e, "Head check failed before upload");
                }
            }

            put_file_with_retry(
                &self.store,
                &self.retry,
                &artifact.key,
                &artifact.local,
                &content_type(&artifact.local),
            )
            .await?;

            verify_uploaded(&self.store, &artifact.key, size).await?;
            debug!(key = %artifact.key, size, "Uploaded artifact");
        }

        Ok(())
    }
}

/// Enumerates the bag's artifact set in deterministic order:
/// page derivatives, object PDFs, then the manifest.
pub fn artifacts_for(bag: &Bag) -> Result<Vec<Artifact>, StageError> {
    let origin = bag
        .origin_identifier
        .as_deref()
        .ok_or_else(|| StageError::Inconsistent {
            bag: bag.id.clone(),
            detail: "no origin identifier recorded".to_string(),
        })?;
    let derivative_path =
        bag.derivative_path
            .as_deref()
            .ok_or_else(|| StageError::Inconsistent {
                bag: bag.id.clone(),
                detail: "no derivative path recorded".to_string(),
            })?;

    let mut artifacts = Vec::new();

    for object in &bag.objects {
        for page in &object.pages {
            let local = page
                .derivative_file
                .clone()
                .ok_or_else(|| StageError::Inconsistent {
                    bag: bag.id.clone(),
                    detail: format!(
                        "page {}/{} has no derivative recorded",
                        object.local_identifier, page.sequence_number
                    ),
                })?;
            artifacts.push(Artifact {
                local,
                key: format!(
                    "{}/{}/{:04}.jp2",
                    origin, object.local_identifier, page.sequence_number
                ),
            });
        }
    }

    for object in &bag.objects {
        artifacts.push(Artifact {
            local: derivative_path
                .join("pdfs")
                .join(format!("{}.pdf", object.local_identifier)),
            key: format!(
                "{}/{}/{}.pdf",
                origin, object.local_identifier, object.local_identifier
            ),
        });
    }

    artifacts.push(Artifact {
        local: derivative_path.join(MANIFEST_FILENAME),
        key: manifest_key(origin),
    });

    Ok(artifacts)
}

pub fn manifest_key(origin: &str) -> String {
    format!("{}/{}", origin, MANIFEST_FILENAME)
}

fn content_type(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some("jp2") => "image/jp2".to_string(),
        _ => mime_guess::from_path(path)
            .first()
            .map(|m| m.to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string()),
    }
}

pub(crate) async fn verify_uploaded(
    store: &ObjectStore,
    key: &str,
    expected: i64,
) -> Result<(), UploadError> {
    let actual = store
        .head_size(key)
        .await
        .map_err(|e| UploadError::Failed {
            key: key.to_string(),
            reason: format!("verification head failed: {}", e),
        })?
        .unwrap_or(-1);

    if actual != expected {
        return Err(UploadError::VerificationFailed {
            key: key.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

pub(crate) async fn put_file_with_retry(
    store: &ObjectStore,
    retry: &UploadConfig,
    key: &str,
    local: &Path,
    content_type: &str,
) -> Result<(), UploadError> {
    with_retry(retry, key, || store.put_file(key, local, content_type)).await
}

pub(crate) async fn put_bytes_with_retry(
    store: &ObjectStore,
    retry: &UploadConfig,
    key: &str,
    data: &[u8],
    content_type: &str,
) -> Result<(), UploadError> {
    with_retry(retry, key, || {
        store.put_bytes(key, data.to_vec(), content_type)
    })
    .await
}

/// Bounded exponential backoff around one artifact. Transient failures
/// (network faults, 5xx, throttling) are retried up to `max_attempts`;
/// non-transient failures (auth, quota, malformed request) surface
/// immediately without burning retries.
async fn with_retry<F, Fut>(
    retry: &UploadConfig,
    key: &str,
    mut put: F,
) -> Result<(), UploadError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), TransportError>>,
{
    let mut delay = Duration::from_millis(retry.base_delay_ms);
    let max_delay = Duration::from_millis(retry.max_delay_ms);

    for attempt in 1..=retry.max_attempts {
        match put().await {
            Ok(()) => return Ok(()),
            Err(e) if !e.transient => {
                return Err(UploadError::Failed {
                    key: key.to_string(),
                    reason: e.message,
                });
            }
            Err(e) if attempt == retry.max_attempts => {
                return Err(UploadError::RetriesExhausted {
                    key: key.to_string(),
                    attempts: attempt,
                    reason: e.message,
                });
            }
            Err(e) => {
                warn!(
                    key,
                    attempt,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Transient upload failure, backing off"
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, max_delay);
            }
        }
    }

    // max_attempts >= 1 is enforced at config load; the loop always returns.
    Err(UploadError::RetriesExhausted {
        key: key.to_string(),
        attempts: retry.max_attempts,
        reason: "no attempts made".to_string(),
    })
}
