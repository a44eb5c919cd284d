use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::secrets::SecretSource;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// Where serialized bag archives (`{name}.tar.gz`) are delivered.
    pub inbound_directory: String,
    /// Per-bag unpacked source trees live under here.
    pub working_directory: String,
    /// Per-bag derivative trees (JP2s, PDFs, manifest) live under here.
    pub derivative_directory: String,
    /// Registry database file. Defaults to `~/.folio/data/folio.db`.
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default)]
    pub encode: EncodeConfig,
    #[serde(default)]
    pub pdf: PdfConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    pub storage: StorageConfig,
    pub describe: DescribeConfig,
    pub publish: PublishConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    /// How many times a failed stage may be re-entered before the bag is stuck.
    #[serde(default = "default_stage_attempts")]
    pub max_stage_attempts: u32,
}

fn default_stage_attempts() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodeConfig {
    /// Bound on concurrent page encodes within one bag. JPEG2000 encoding is
    /// memory-hungry; this never exceeds the machine, only divides it.
    #[serde(default = "default_worker_count")]
    pub workers: usize,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            workers: default_worker_count(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfConfig {
    /// Run the OCR pass over each assembled PDF.
    #[serde(default)]
    pub ocr: bool,
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
}

fn default_languages() -> Vec<String> {
    vec!["eng".to_string()]
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self {
            ocr: false,
            languages: default_languages(),
        }
    }
}

/// Paths to the external binaries the pipeline drives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_jp2_encoder")]
    pub jp2_encoder: String,
    #[serde(default = "default_pdf_assembler")]
    pub pdf_assembler: String,
    #[serde(default = "default_ocr")]
    pub ocr: String,
    /// Per-invocation wall-clock budget; a timeout counts as tool failure.
    #[serde(default = "default_tool_timeout")]
    pub timeout_secs: u64,
}

fn default_jp2_encoder() -> String {
    "opj_compress".to_string()
}

fn default_pdf_assembler() -> String {
    "img2pdf".to_string()
}

fn default_ocr() -> String {
    "ocrmypdf".to_string()
}

fn default_tool_timeout() -> u64 {
    600
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            jp2_encoder: default_jp2_encoder(),
            pdf_assembler: default_pdf_assembler(),
            ocr: default_ocr(),
            timeout_secs: default_tool_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Custom endpoint for S3-compatible stores (MinIO etc.); None for AWS.
    #[serde(default)]
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    pub access_key: SecretSource,
    pub secret_key: SecretSource,
    #[serde(default)]
    pub path_style: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescribeConfig {
    /// Base URL of the archival description service (read-only lookups).
    pub base_url: String,
    #[serde(default)]
    pub token: Option<SecretSource>,
}

/// Public URL roots baked into manifests. These must be stable: manifests
/// outlive the local files they were derived from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    pub image_base_url: String,
    pub manifest_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_upload_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_upload_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    15_000
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_upload_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Config {
    pub fn database_path(&self) -> PathBuf {
        match &self.database_path {
            Some(p) => PathBuf::from(p),
            None => default_database_path(),
        }
    }
}

/// Returns the canonical database path: `~/.folio/data/folio.db`.
pub fn default_database_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".folio")
        .join("data")
        .join("folio.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_database_path() {
        let path = default_database_path();
        assert!(path.ends_with("data/folio.db"));
        assert!(path.to_string_lossy().contains(".folio"));
    }

    #[test]
    fn test_tool_defaults() {
        let tools = ToolsConfig::default();
        assert_eq!(tools.jp2_encoder, "opj_compress");
        assert_eq!(tools.pdf_assembler, "img2pdf");
        assert_eq!(tools.ocr, "ocrmypdf");
        assert_eq!(tools.timeout_secs, 600);
    }

    #[test]
    fn test_pdf_defaults() {
        let pdf = PdfConfig::default();
        assert!(!pdf.ocr);
        assert_eq!(pdf.languages, vec!["eng".to_string()]);
    }

    #[test]
    fn test_encode_workers_default_nonzero() {
        assert!(EncodeConfig::default().workers >= 1);
    }
}
