//! The stage harness: precondition gating, per-bag locking, and durable
//! transition recording.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{info, info_span, warn, Instrument};

use crate::bag::{Bag, BagState, Stage};
use crate::config::Config;
use crate::describe::DescribeClient;
use crate::error::FolioError;
use crate::registry::{bag_repo, Database};
use crate::stages::{
    BagPreparer, Cleaner, Jp2Generator, ManifestBuilder, PdfAssembler, Uploader,
};
use crate::storage::ObjectStore;
use crate::tools::ToolRunner;

use super::error::StageError;

/// Runs named stages against bags.
///
/// Every invocation: load the record, check the stage's exact precondition
/// state, take the bag's exclusive lock for the stage duration, run the
/// stage, and persist the outcome with a compare-and-set on the old state.
/// Re-invoking a completed stage is a [`StageError::PreconditionFailed`]
/// no-op, which is what makes redundant triggers harmless. A failed stage
/// may be re-entered until the bag's attempt budget runs out.
///
/// The registry is only written after a stage finishes, so cancelling an
/// in-flight invocation leaves the bag at its precondition state and the
/// next run is a clean retry.
pub struct StageExecutor {
    db: Database,
    max_stage_attempts: u32,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    preparer: BagPreparer,
    jp2: Jp2Generator,
    pdf: PdfAssembler,
    manifest: ManifestBuilder,
    uploader: Uploader,
    cleaner: Cleaner,
}

impl StageExecutor {
    pub fn new(db: Database, config: &Config) -> Result<Self, FolioError> {
        let describe = DescribeClient::new(&config.describe)?;
        let store = ObjectStore::new(&config.storage)?;
        let runner = Arc::new(ToolRunner::new(config.tools.timeout_secs));

        Ok(Self {
            preparer: BagPreparer::new(config, describe),
            jp2: Jp2Generator::new(config, Arc::clone(&runner)),
            pdf: PdfAssembler::new(config, runner),
            manifest: ManifestBuilder::new(config),
            uploader: Uploader::new(config, store),
            cleaner: Cleaner::new(),
            max_stage_attempts: config.max_stage_attempts,
            locks: Mutex::new(HashMap::new()),
            db,
        })
    }

    pub fn registry(&self) -> &Database {
        &self.db
    }

    /// Creates the record for a newly delivered transfer, at CREATED.
    pub fn register(&self, inbound_name: &str) -> Result<Bag, StageError> {
        let bag = Bag::new(inbound_name);
        bag_repo::insert(&self.db, &bag)?;
        info!(bag_id = %bag.id, inbound = inbound_name, "Registered bag");
        Ok(bag)
    }

    fn bag_lock(&self, bag_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(bag_id.to_string()).or_default())
    }

    pub async fn run(&self, bag_id: &str, stage: Stage) -> Result<BagState, StageError> {
        let lock = self.bag_lock(bag_id);
        let _guard = lock.lock().await;

        let original = bag_repo::find_by_id(&self.db, bag_id)?
            .ok_or_else(|| StageError::NotFound(bag_id.to_string()))?;

        let expected = stage.precondition();
        let old_state = original.state;
        match original.state {
            s if s == expected => {}
            BagState::Failed if original.failed_stage.as_deref() == Some(stage.name()) => {
                if original.attempts >= self.max_stage_attempts {
                    return Err(StageError::RetriesExhausted {
                        stage: stage.name(),
                        attempts: original.attempts,
                    });
                }
            }
            actual => {
                return Err(StageError::PreconditionFailed {
                    stage: stage.name(),
                    expected,
                    actual,
                });
            }
        }

        let mut bag = original.clone();
        let span = info_span!("stage", bag_id = %bag.id, stage = stage.name());
        let started = Instant::now();
        let outcome = self.invoke(stage, &mut bag).instrument(span).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(()) => {
                bag.state = stage.success_state();
                bag.failed_stage = None;
                bag.failure_reason = None;
                bag.attempts = 0;
                bag.updated_at = chrono::Utc::now().to_rfc3339();
                bag_repo::transition(&self.db, &bag, old_state)?;
                info!(
                    bag_id = %bag.id,
                    stage = stage.name(),
                    from = %old_state,
                    to = %bag.state,
                    duration_ms,
                    "Stage completed"
                );
                Ok(bag.state)
            }
            Err(err) => {
                // Partial in-memory mutations from the failed run are
                // discarded; only the failure itself is recorded.
                let mut failed = original;
                failed.state = BagState::Failed;
                failed.failed_stage = Some(stage.name().to_string());
                failed.failure_reason = Some(err.to_string());
                failed.attempts += 1;
                failed.updated_at = chrono::Utc::now().to_rfc3339();
                bag_repo::transition(&self.db, &failed, old_state)?;
                warn!(
                    bag_id = %failed.id,
                    stage = stage.name(),
                    from = %old_state,
                    attempts = failed.attempts,
                    duration_ms,
                    error = %err,
                    "Stage failed"
                );
                Err(err)
            }
        }
    }

    async fn invoke(&self, stage: Stage, bag: &mut Bag) -> Result<(), StageError> {
        match stage {
            Stage::Prepare => self.preparer.run(bag).await,
            Stage::MakeDerivatives => self.jp2.run(bag).await,
            Stage::MakePdf => self.pdf.run(bag).await,
            Stage::MakeManifest => self.manifest.run(bag).await,
            Stage::Upload => self.uploader.run(bag).await,
            Stage::Cleanup => self.cleaner.run(bag).await,
        }
    }
}
