//! Local disk reclamation for uploaded bags.

use tracing::debug;

use crate::bag::Bag;
use crate::pipeline::error::StageError;
use crate::storage::LocalStore;

/// Deletes a bag's working and derivative trees.
///
/// The single irreversible operation in the pipeline; the executor enforces
/// the UPLOADED precondition, never caller discipline. The registry record
/// itself is retained so recreation and audit queries keep working.
pub struct Cleaner;

impl Cleaner {
    pub fn new() -> Self {
        Self
    }

    pub async fn run(&self, bag: &mut Bag) -> Result<(), StageError> {
        if let Some(working) = bag.working_path.take() {
            LocalStore::remove_tree(&working)?;
            debug!(bag_id = %bag.id, path = %working.display(), "Removed working tree");
        }
        if let Some(derivative) = bag.derivative_path.take() {
            LocalStore::remove_tree(&derivative)?;
            debug!(bag_id = %bag.id, path = %derivative.display(), "Removed derivative tree");
        }
        Ok(())
    }
}

impl Default for Cleaner {
    fn default() -> Self {
        Self::new()
    }
}
