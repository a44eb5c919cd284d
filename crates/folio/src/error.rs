use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FolioError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Description service error: {0}")]
    Describe(#[from] DescribeError),

    #[error("Database error: {0}")]
    Database(#[from] crate::registry::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Failed to resolve secret '{name}': {source}")]
    Secret {
        name: String,
        #[source]
        source: crate::secrets::SecretError,
    },
}

/// Input-side failures: the bag itself is bad and an operator has to fix it.
/// Never retried automatically.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Malformed bag: {reason}")]
    MalformedBag { reason: String },

    #[error("Origin identifier missing from '{path}'")]
    MissingIdentifier { path: PathBuf },

    #[error("Ambiguous page ordering in object '{object}': sequence {sequence} occurs twice")]
    AmbiguousOrdering { object: String, sequence: u32 },
}

/// Failures from external binaries (encoder, assembler, OCR).
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with {status}: {stderr}")]
    NonZeroExit {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("'{program}' timed out after {secs}s")]
    TimedOut { program: String, secs: u64 },

    #[error("'{program}' produced no output at '{path}'")]
    MissingOutput { program: String, path: PathBuf },

    #[error("'{program}' produced invalid output at '{path}': {detail}")]
    BadOutput {
        program: String,
        path: PathBuf,
        detail: String,
    },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to rename '{from}' to '{to}': {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove '{path}': {source}")]
    RemoveTree {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Upload of '{key}' failed: {reason}")]
    Failed { key: String, reason: String },

    #[error("Upload of '{key}' still failing after {attempts} attempts: {reason}")]
    RetriesExhausted {
        key: String,
        attempts: u32,
        reason: String,
    },

    #[error("Uploaded '{key}' but verification found size {actual} (expected {expected})")]
    VerificationFailed {
        key: String,
        expected: i64,
        actual: i64,
    },

    #[error("Artifact '{path}' missing on disk: {source}")]
    MissingArtifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Object '{object}' has no pages")]
    EmptyObject { object: String },

    #[error("Failed to serialize manifest: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum DescribeError {
    #[error("Description lookup for '{identifier}' failed: {source}")]
    Request {
        identifier: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Description service returned {status} for '{identifier}'")]
    Status {
        identifier: String,
        status: reqwest::StatusCode,
    },

    #[error("Description for '{identifier}' could not be parsed: {source}")]
    Parse {
        identifier: String,
        #[source]
        source: reqwest::Error,
    },
}

pub type Result<T> = std::result::Result<T, FolioError>;
