use thiserror::Error;

use crate::bag::BagState;
use crate::error::{
    DescribeError, ManifestError, StorageError, ToolError, UploadError, ValidationError,
};
use crate::registry::DatabaseError;

/// Everything a stage invocation can fail with. Recorded on the bag record
/// and returned to the caller; see the taxonomy notes on each variant.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("Bag '{0}' not found")]
    NotFound(String),

    #[error("No manifest has been recorded for origin '{0}'")]
    UnknownOrigin(String),

    /// Stage invoked out of order. Caller error, never retried automatically;
    /// this is what makes redundant invocations safe no-ops.
    #[error("Stage '{stage}' requires state '{expected}' but bag is at '{actual}'")]
    PreconditionFailed {
        stage: &'static str,
        expected: BagState,
        actual: BagState,
    },

    #[error("Stage '{stage}' has failed {attempts} times; refusing to re-enter")]
    RetriesExhausted { stage: &'static str, attempts: u32 },

    /// The registry record violates an invariant the state implies
    /// (e.g. a prepared bag without an origin identifier).
    #[error("Bag '{bag}' registry record is inconsistent: {detail}")]
    Inconsistent { bag: String, detail: String },

    #[error("Encoding failed for page '{page}': {source}")]
    EncodeFailed {
        page: String,
        #[source]
        source: ToolError,
    },

    #[error("PDF assembly failed for object '{object}': {source}")]
    AssemblyFailed {
        object: String,
        #[source]
        source: ToolError,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Describe(#[from] DescribeError),

    #[error(transparent)]
    Registry(#[from] DatabaseError),
}
