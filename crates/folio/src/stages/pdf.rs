//! Per-object PDF assembly, with an optional OCR text layer.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::bag::Bag;
use crate::config::Config;
use crate::error::ToolError;
use crate::pipeline::error::StageError;
use crate::storage::LocalStore;
use crate::tools::ToolRunner;

/// Concatenates each object's derivatives, in sequence order, into one PDF.
///
/// Assembly is whole-file: output goes to a temp path and is renamed into
/// place, so a re-run simply overwrites the object's PDF. The produced file
/// must be non-empty and carry exactly one PDF page per source page.
pub struct PdfAssembler {
    assembler: String,
    ocr_binary: String,
    ocr: bool,
    languages: Vec<String>,
    runner: Arc<ToolRunner>,
}

impl PdfAssembler {
    pub fn new(config: &Config, runner: Arc<ToolRunner>) -> Self {
        Self {
            assembler: config.tools.pdf_assembler.clone(),
            ocr_binary: config.tools.ocr.clone(),
            ocr: config.pdf.ocr,
            languages: config.pdf.languages.clone(),
            runner,
        }
    }

    pub async fn run(&self, bag: &mut Bag) -> Result<(), StageError> {
        let derivative_path =
            bag.derivative_path
                .clone()
                .ok_or_else(|| StageError::Inconsistent {
                    bag: bag.id.clone(),
                    detail: "no derivative path recorded".to_string(),
                })?;
        let pdf_root = derivative_path.join("pdfs");
        LocalStore::ensure_dir(&pdf_root)?;

        for object in &bag.objects {
            let local = object.local_identifier.clone();

            let mut inputs = Vec::with_capacity(object.pages.len());
            for page in &object.pages {
                let derivative =
                    page.derivative_file
                        .clone()
                        .ok_or_else(|| StageError::Inconsistent {
                            bag: bag.id.clone(),
                            detail: format!(
                                "page {}/{} has no derivative recorded",
                                local, page.sequence_number
                            ),
                        })?;
                inputs.push(derivative);
            }

            let dest = pdf_root.join(format!("{}.pdf", local));
            let finished = self
                .assemble_object(&inputs, &dest)
                .await
                .map_err(|source| StageError::AssemblyFailed {
                    object: local.clone(),
                    source,
                })?;
            LocalStore::rename_into_place(&finished, &dest)?;

            debug!(bag_id = %bag.id, object = %local, pdf = %dest.display(), "Assembled PDF");
        }

        Ok(())
    }

    /// Runs assembly (and OCR when enabled) into a temp sibling of `dest`,
    /// returning the finished temp path for the caller to rename into place.
    async fn assemble_object(
        &self,
        inputs: &[PathBuf],
        dest: &Path,
    ) -> Result<PathBuf, ToolError> {
        let assembled = dest.with_extension("tmp.pdf");

        let mut args: Vec<OsString> = inputs.iter().map(|p| p.as_os_str().to_owned()).collect();
        args.push("-o".into());
        args.push(assembled.as_os_str().to_owned());

        self.runner
            .run_expecting_output(&self.assembler, args, &assembled)
            .await?;

        let finished = if self.ocr {
            let with_text = dest.with_extension("ocr.pdf");
            let languages = self.languages.join("+");
            let ocr_result = self
                .runner
                .run_expecting_output(
                    &self.ocr_binary,
                    [
                        "-l".as_ref(),
                        languages.as_ref(),
                        assembled.as_os_str(),
                        with_text.as_os_str(),
                    ],
                    &with_text,
                )
                .await;
            let _ = std::fs::remove_file(&assembled);
            ocr_result?;
            with_text
        } else {
            assembled
        };

        verify_page_count(&self.assembler, &finished, inputs.len()).await?;

        Ok(finished)
    }
}

/// Parses the produced PDF and checks one page came out per page that
/// went in. Catches assemblers that exit zero after writing a stub.
async fn verify_page_count(
    program: &str,
    path: &Path,
    expected: usize,
) -> Result<(), ToolError> {
    let owned = path.to_path_buf();
    let counted = tokio::task::spawn_blocking(move || {
        lopdf::Document::load(&owned).map(|doc| doc.get_pages().len())
    })
    .await;

    let pages = match counted {
        Ok(Ok(pages)) => pages,
        Ok(Err(e)) => {
            return Err(ToolError::BadOutput {
                program: program.to_string(),
                path: path.to_path_buf(),
                detail: format!("unparseable PDF: {}", e),
            })
        }
        Err(e) => {
            return Err(ToolError::BadOutput {
                program: program.to_string(),
                path: path.to_path_buf(),
                detail: format!("page count task failed: {}", e),
            })
        }
    };

    if pages != expected {
        return Err(ToolError::BadOutput {
            program: program.to_string(),
            path: path.to_path_buf(),
            detail: format!("page count {} (expected {})", pages, expected),
        });
    }
    Ok(())
}
