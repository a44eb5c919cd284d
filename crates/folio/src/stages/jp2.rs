//! Lossless JPEG2000 derivative generation.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use crate::bag::Bag;
use crate::config::Config;
use crate::pipeline::error::StageError;
use crate::storage::LocalStore;
use crate::tools::ToolRunner;

/// Encodes one derivative per page with the external JPEG2000 encoder.
///
/// Pages are mutually independent and write to disjoint paths, so encodes run
/// on a bounded pool. A page whose derivative already exists non-empty is
/// skipped, which makes a retry after partial failure cheap: only missing
/// pages are re-encoded.
pub struct Jp2Generator {
    encoder: String,
    workers: usize,
    runner: Arc<ToolRunner>,
}

struct EncodeJob {
    source: PathBuf,
    dest: PathBuf,
    label: String,
}

impl Jp2Generator {
    pub fn new(config: &Config, runner: Arc<ToolRunner>) -> Self {
        Self {
            encoder: config.tools.jp2_encoder.clone(),
            workers: config.encode.workers,
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
        let images_root = derivative_path.join("images");

        let mut jobs = Vec::new();
        let mut produced = Vec::new();
        let mut skipped = 0usize;

        for (object_index, object) in bag.objects.iter().enumerate() {
            let object_dir = images_root.join(&object.local_identifier);
            LocalStore::ensure_dir(&object_dir)?;

            for (page_index, page) in object.pages.iter().enumerate() {
                let dest = object_dir.join(format!("{:04}.jp2", page.sequence_number));
                produced.push((object_index, page_index, dest.clone()));

                if LocalStore::is_nonempty_file(&dest) {
                    skipped += 1;
                    continue;
                }

                jobs.push(EncodeJob {
                    source: page.source_file.clone(),
                    dest,
                    label: format!("{}/{}", object.local_identifier, page.sequence_number),
                });
            }
        }

        debug!(
            bag_id = %bag.id,
            encode = jobs.len(),
            skipped,
            "Starting derivative encodes"
        );

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut set: JoinSet<Result<(), StageError>> = JoinSet::new();

        for job in jobs {
            // Acquiring before the spawn bounds live tasks to the pool size
            // and keeps dispatch in page order.
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .expect("encode semaphore closed");
            let runner = Arc::clone(&self.runner);
            let encoder = self.encoder.clone();

            set.spawn(async move {
                let _permit = permit;

                // The encoder picks its format from the extension; the temp
                // path keeps `.jp2` so the rename is the only final-path write.
                let tmp = job.dest.with_extension("tmp.jp2");

                let encoded = runner
                    .run_expecting_output(
                        &encoder,
                        [
                            "-i".as_ref(),
                            job.source.as_os_str(),
                            "-o".as_ref(),
                            tmp.as_os_str(),
                        ],
                        &tmp,
                    )
                    .await;

                match encoded {
                    Ok(()) => {
                        LocalStore::rename_into_place(&tmp, &job.dest)?;
                        Ok(())
                    }
                    Err(source) => Err(StageError::EncodeFailed {
                        page: job.label,
                        source,
                    }),
                }
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => {
                    // First failure fails the whole stage. Outstanding encodes
                    // are aborted (children are killed on drop); derivatives
                    // already renamed into place stay for the retry.
                    set.abort_all();
                    return Err(err);
                }
                Err(join_err) => {
                    set.abort_all();
                    return Err(StageError::Inconsistent {
                        bag: bag.id.clone(),
                        detail: format!("encode task failed: {}", join_err),
                    });
                }
            }
        }

        for (object_index, page_index, dest) in produced {
            bag.objects[object_index].pages[page_index].derivative_file = Some(dest);
        }
        Ok(())
    }
}
