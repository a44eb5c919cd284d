//! Domain model: bags, objects, pages, and the pipeline state machine.
//!
//! A bag is the unit of work: one archival transfer package holding one or
//! more logical objects, each a sequence of master TIFF pages. The registry
//! owns the lifecycle record; everything on disk is derived from it.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Pipeline position of a bag. States only move forward, except to `Failed`,
/// from which the failed stage may be re-entered a bounded number of times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BagState {
    Created,
    Prepared,
    DerivativesMade,
    PdfMade,
    ManifestMade,
    Uploaded,
    Cleaned,
    Failed,
}

impl BagState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BagState::Created => "created",
            BagState::Prepared => "prepared",
            BagState::DerivativesMade => "derivatives_made",
            BagState::PdfMade => "pdf_made",
            BagState::ManifestMade => "manifest_made",
            BagState::Uploaded => "uploaded",
            BagState::Cleaned => "cleaned",
            BagState::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "created" => Some(BagState::Created),
            "prepared" => Some(BagState::Prepared),
            "derivatives_made" => Some(BagState::DerivativesMade),
            "pdf_made" => Some(BagState::PdfMade),
            "manifest_made" => Some(BagState::ManifestMade),
            "uploaded" => Some(BagState::Uploaded),
            "cleaned" => Some(BagState::Cleaned),
            "failed" => Some(BagState::Failed),
            _ => None,
        }
    }

    /// Whether a manifest has been built (and its inputs recorded durably)
    /// at or before this state. ManifestRecreator accepts any of these.
    pub fn has_manifest(&self) -> bool {
        matches!(
            self,
            BagState::ManifestMade | BagState::Uploaded | BagState::Cleaned
        )
    }
}

impl std::fmt::Display for BagState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed set of pipeline stages. Each stage is gated by exactly one
/// precondition state and advances to exactly one success state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Prepare,
    MakeDerivatives,
    MakePdf,
    MakeManifest,
    Upload,
    Cleanup,
}

impl Stage {
    /// Wire name, as consumed by external trigger surfaces.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Prepare => "prepare",
            Stage::MakeDerivatives => "make-derivatives",
            Stage::MakePdf => "make-pdf",
            Stage::MakeManifest => "make-manifest",
            Stage::Upload => "upload",
            Stage::Cleanup => "cleanup",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "prepare" => Some(Stage::Prepare),
            "make-derivatives" => Some(Stage::MakeDerivatives),
            "make-pdf" => Some(Stage::MakePdf),
            "make-manifest" => Some(Stage::MakeManifest),
            "upload" => Some(Stage::Upload),
            "cleanup" => Some(Stage::Cleanup),
            _ => None,
        }
    }

    /// The exact state a bag must be in for this stage to run.
    pub fn precondition(&self) -> BagState {
        match self {
            Stage::Prepare => BagState::Created,
            Stage::MakeDerivatives => BagState::Prepared,
            Stage::MakePdf => BagState::DerivativesMade,
            Stage::MakeManifest => BagState::PdfMade,
            Stage::Upload => BagState::ManifestMade,
            Stage::Cleanup => BagState::Uploaded,
        }
    }

    /// The state a bag advances to when this stage succeeds.
    pub fn success_state(&self) -> BagState {
        match self {
            Stage::Prepare => BagState::Prepared,
            Stage::MakeDerivatives => BagState::DerivativesMade,
            Stage::MakePdf => BagState::PdfMade,
            Stage::MakeManifest => BagState::ManifestMade,
            Stage::Upload => BagState::Uploaded,
            Stage::Cleanup => BagState::Cleaned,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One source image and its derivative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub source_file: PathBuf,
    /// Absent until the derivative stage has run.
    #[serde(default)]
    pub derivative_file: Option<PathBuf>,
    /// Canvas-ordering key, derived from the filename. Unique within an object.
    pub sequence_number: u32,
    /// Pixel dimensions, read from the TIFF header at prepare time. Recorded
    /// durably so manifests can be rebuilt after local files are gone.
    pub width: u32,
    pub height: u32,
}

/// A logical archival unit within a bag: one payload subdirectory of pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Object {
    pub local_identifier: String,
    pub pages: Vec<Page>,
}

/// The registry record for one bag.
#[derive(Debug, Clone)]
pub struct Bag {
    /// Opaque internal id. Never used in published keys or URLs.
    pub id: String,
    /// Stem of the inbound archive: `{inbound_dir}/{inbound_name}.tar.gz`.
    pub inbound_name: String,
    /// External archival-system identifier; set at prepare, immutable after.
    pub origin_identifier: Option<String>,
    pub title: Option<String>,
    pub date: Option<String>,
    pub state: BagState,
    pub failed_stage: Option<String>,
    pub failure_reason: Option<String>,
    /// Re-entry counter for the currently failed stage; reset on success.
    pub attempts: u32,
    pub working_path: Option<PathBuf>,
    pub derivative_path: Option<PathBuf>,
    pub objects: Vec<Object>,
    pub created_at: String,
    pub updated_at: String,
}

impl Bag {
    pub fn new(inbound_name: impl Into<String>) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            inbound_name: inbound_name.into(),
            origin_identifier: None,
            title: None,
            date: None,
            state: BagState::Created,
            failed_stage: None,
            failure_reason: None,
            attempts: 0,
            working_path: None,
            derivative_path: None,
            objects: Vec::new(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Total page count across all objects.
    pub fn page_count(&self) -> usize {
        self.objects.iter().map(|o| o.pages.len()).sum()
    }
}
