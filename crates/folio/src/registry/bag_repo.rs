//! Bag repository — CRUD and state transitions for the `bags` table.
//!
//! State changes go through [`transition`], a compare-and-set on the previous
//! state, so two racing writers cannot both advance the same bag.

use rusqlite::{params, Row};

use crate::bag::{Bag, BagState, Object};

use super::{Database, DatabaseError};

/// A raw bag row from the registry.
#[derive(Debug, Clone)]
pub struct BagRow {
    pub id: String,
    pub inbound_name: String,
    pub origin_identifier: Option<String>,
    pub title: Option<String>,
    pub date: Option<String>,
    pub state: String,
    pub failed_stage: Option<String>,
    pub failure_reason: Option<String>,
    pub attempts: u32,
    pub working_path: Option<String>,
    pub derivative_path: Option<String>,
    pub objects: String,
    pub created_at: String,
    pub updated_at: String,
}

impl BagRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            inbound_name: row.get("inbound_name")?,
            origin_identifier: row.get("origin_identifier")?,
            title: row.get("title")?,
            date: row.get("date")?,
            state: row.get("state")?,
            failed_stage: row.get("failed_stage")?,
            failure_reason: row.get("failure_reason")?,
            attempts: row.get("attempts")?,
            working_path: row.get("working_path")?,
            derivative_path: row.get("derivative_path")?,
            objects: row.get("objects")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn into_bag(self) -> Result<Bag, DatabaseError> {
        let state = BagState::from_str(&self.state).ok_or_else(|| DatabaseError::CorruptRecord {
            id: self.id.clone(),
            reason: format!("unknown state '{}'", self.state),
        })?;

        let objects: Vec<Object> =
            serde_json::from_str(&self.objects).map_err(|e| DatabaseError::CorruptRecord {
                id: self.id.clone(),
                reason: format!("bad objects JSON: {}", e),
            })?;

        Ok(Bag {
            id: self.id,
            inbound_name: self.inbound_name,
            origin_identifier: self.origin_identifier,
            title: self.title,
            date: self.date,
            state,
            failed_stage: self.failed_stage,
            failure_reason: self.failure_reason,
            attempts: self.attempts,
            working_path: self.working_path.map(Into::into),
            derivative_path: self.derivative_path.map(Into::into),
            objects,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn objects_json(bag: &Bag) -> Result<String, DatabaseError> {
    serde_json::to_string(&bag.objects).map_err(|e| DatabaseError::CorruptRecord {
        id: bag.id.clone(),
        reason: format!("unserializable objects: {}", e),
    })
}

fn path_str(path: &Option<std::path::PathBuf>) -> Option<String> {
    path.as_ref().map(|p| p.to_string_lossy().to_string())
}

/// Inserts a new bag record.
pub fn insert(db: &Database, bag: &Bag) -> Result<(), DatabaseError> {
    let objects = objects_json(bag)?;
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO bags (id, inbound_name, origin_identifier, title, date, state,
             failed_stage, failure_reason, attempts, working_path, derivative_path, objects,
             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                bag.id,
                bag.inbound_name,
                bag.origin_identifier,
                bag.title,
                bag.date,
                bag.state.as_str(),
                bag.failed_stage,
                bag.failure_reason,
                bag.attempts,
                path_str(&bag.working_path),
                path_str(&bag.derivative_path),
                objects,
                bag.created_at,
                bag.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds a bag by its internal id.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<Bag>, DatabaseError> {
    let row = db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM bags WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], BagRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })?;
    row.map(BagRow::into_bag).transpose()
}

/// Lists all bags currently at the given state, oldest first.
pub fn list_by_state(db: &Database, state: BagState) -> Result<Vec<Bag>, DatabaseError> {
    let rows = db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM bags WHERE state = ?1 ORDER BY created_at ASC")?;
        let rows: Vec<BagRow> = stmt
            .query_map(params![state.as_str()], BagRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;
    rows.into_iter().map(BagRow::into_bag).collect()
}

/// Finds the most recent bag for an origin identifier whose metadata is
/// durable enough to rebuild a manifest (state at least manifest_made).
pub fn latest_with_manifest(db: &Database, origin: &str) -> Result<Option<Bag>, DatabaseError> {
    let row = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM bags
             WHERE origin_identifier = ?1
               AND state IN ('manifest_made', 'uploaded', 'cleaned')
             ORDER BY updated_at DESC, created_at DESC
             LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![origin], BagRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })?;
    row.map(BagRow::into_bag).transpose()
}

/// All distinct origin identifiers with a rebuildable manifest.
pub fn origins_with_manifest(db: &Database) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT origin_identifier FROM bags
             WHERE origin_identifier IS NOT NULL
               AND state IN ('manifest_made', 'uploaded', 'cleaned')
             ORDER BY origin_identifier ASC",
        )?;
        let origins: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(origins)
    })
}

/// Counts bags at the given state.
pub fn count_by_state(db: &Database, state: BagState) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM bags WHERE state = ?1",
            params![state.as_str()],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Persists a state transition. Compare-and-set on `expected_state`: if the
/// row's state no longer matches, nothing is written and
/// [`DatabaseError::ConflictingUpdate`] is returned.
pub fn transition(db: &Database, bag: &Bag, expected_state: BagState) -> Result<(), DatabaseError> {
    let objects = objects_json(bag)?;
    let updated = db.with_conn(|conn| {
        let n = conn.execute(
            "UPDATE bags SET origin_identifier=?2, title=?3, date=?4, state=?5,
             failed_stage=?6, failure_reason=?7, attempts=?8, working_path=?9,
             derivative_path=?10, objects=?11, updated_at=?12
             WHERE id=?1 AND state=?13",
            params![
                bag.id,
                bag.origin_identifier,
                bag.title,
                bag.date,
                bag.state.as_str(),
                bag.failed_stage,
                bag.failure_reason,
                bag.attempts,
                path_str(&bag.working_path),
                path_str(&bag.derivative_path),
                objects,
                bag.updated_at,
                expected_state.as_str(),
            ],
        )?;
        Ok(n)
    })?;

    if updated == 0 {
        return Err(DatabaseError::ConflictingUpdate { id: bag.id.clone() });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bag::{Object, Page};
    use std::path::PathBuf;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test registry")
    }

    fn sample_bag(inbound: &str) -> Bag {
        Bag::new(inbound)
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        let bag = sample_bag("transfer-001");
        insert(&db, &bag).unwrap();

        let found = find_by_id(&db, &bag.id).unwrap().unwrap();
        assert_eq!(found.inbound_name, "transfer-001");
        assert_eq!(found.state, BagState::Created);
        assert!(found.objects.is_empty());
    }

    #[test]
    fn test_find_nonexistent() {
        let db = test_db();
        assert!(find_by_id(&db, "nope").unwrap().is_none());
    }

    #[test]
    fn test_transition_round_trips_objects() {
        let db = test_db();
        let mut bag = sample_bag("transfer-002");
        insert(&db, &bag).unwrap();

        bag.origin_identifier = Some("coll123".to_string());
        bag.title = Some("Letters, 1912".to_string());
        bag.state = BagState::Prepared;
        bag.working_path = Some(PathBuf::from("/work/b2"));
        bag.derivative_path = Some(PathBuf::from("/derivatives/b2"));
        bag.objects = vec![Object {
            local_identifier: "obj1".to_string(),
            pages: vec![Page {
                source_file: PathBuf::from("/work/b2/data/obj1/0001.tif"),
                derivative_file: None,
                sequence_number: 1,
                width: 2400,
                height: 3600,
            }],
        }];
        transition(&db, &bag, BagState::Created).unwrap();

        let found = find_by_id(&db, &bag.id).unwrap().unwrap();
        assert_eq!(found.state, BagState::Prepared);
        assert_eq!(found.origin_identifier.as_deref(), Some("coll123"));
        assert_eq!(found.objects.len(), 1);
        assert_eq!(found.objects[0].pages[0].width, 2400);
    }

    #[test]
    fn test_transition_conflict_detected() {
        let db = test_db();
        let mut bag = sample_bag("transfer-003");
        insert(&db, &bag).unwrap();

        bag.state = BagState::Prepared;
        // Claim the row was at prepared when it is actually at created.
        let result = transition(&db, &bag, BagState::Prepared);
        assert!(matches!(
            result,
            Err(DatabaseError::ConflictingUpdate { .. })
        ));

        // Row untouched.
        let found = find_by_id(&db, &bag.id).unwrap().unwrap();
        assert_eq!(found.state, BagState::Created);
    }

    #[test]
    fn test_list_by_state() {
        let db = test_db();
        let a = sample_bag("a");
        let b = sample_bag("b");
        insert(&db, &a).unwrap();
        insert(&db, &b).unwrap();

        let created = list_by_state(&db, BagState::Created).unwrap();
        assert_eq!(created.len(), 2);
        assert!(list_by_state(&db, BagState::Uploaded).unwrap().is_empty());
    }

    #[test]
    fn test_count_by_state() {
        let db = test_db();
        insert(&db, &sample_bag("a")).unwrap();
        insert(&db, &sample_bag("b")).unwrap();
        assert_eq!(count_by_state(&db, BagState::Created).unwrap(), 2);
        assert_eq!(count_by_state(&db, BagState::Cleaned).unwrap(), 0);
    }

    fn manifest_ready_bag(origin: &str, updated_at: &str) -> Bag {
        let mut bag = sample_bag("t");
        bag.origin_identifier = Some(origin.to_string());
        bag.state = BagState::ManifestMade;
        bag.updated_at = updated_at.to_string();
        bag
    }

    #[test]
    fn test_latest_with_manifest_picks_most_recent() {
        let db = test_db();
        let older = manifest_ready_bag("coll123", "2026-01-01T00:00:00Z");
        let mut newer = manifest_ready_bag("coll123", "2026-02-01T00:00:00Z");
        newer.state = BagState::Cleaned;
        insert(&db, &older).unwrap();
        insert(&db, &newer).unwrap();

        let found = latest_with_manifest(&db, "coll123").unwrap().unwrap();
        assert_eq!(found.id, newer.id);
        assert_eq!(found.state, BagState::Cleaned);
    }

    #[test]
    fn test_latest_with_manifest_ignores_early_states() {
        let db = test_db();
        let mut bag = sample_bag("t");
        bag.origin_identifier = Some("coll456".to_string());
        bag.state = BagState::PdfMade;
        insert(&db, &bag).unwrap();

        assert!(latest_with_manifest(&db, "coll456").unwrap().is_none());
    }

    #[test]
    fn test_origins_with_manifest_distinct_and_sorted() {
        let db = test_db();
        insert(&db, &manifest_ready_bag("zzz", "2026-01-01T00:00:00Z")).unwrap();
        insert(&db, &manifest_ready_bag("aaa", "2026-01-01T00:00:00Z")).unwrap();
        insert(&db, &manifest_ready_bag("aaa", "2026-02-01T00:00:00Z")).unwrap();

        let origins = origins_with_manifest(&db).unwrap();
        assert_eq!(origins, vec!["aaa".to_string(), "zzz".to_string()]);
    }

    #[test]
    fn test_corrupt_state_is_reported() {
        let db = test_db();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO bags (id, inbound_name, state, created_at, updated_at)
                 VALUES ('bad', 't', 'limbo', '2026-01-01', '2026-01-01')",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let result = find_by_id(&db, "bad");
        assert!(matches!(result, Err(DatabaseError::CorruptRecord { .. })));
    }
}
