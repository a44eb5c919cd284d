//! Out-of-band manifest recreation.

use tracing::{info, warn};

use crate::config::{Config, PublishConfig, UploadConfig};
use crate::iiif;
use crate::pipeline::error::StageError;
use crate::registry::{bag_repo, Database};
use crate::stages::upload;
use crate::storage::ObjectStore;

/// Rebuilds and re-publishes the manifest for an already-processed bag,
/// addressed by its public origin identifier.
///
/// Works from registry metadata and published URLs alone: no local files,
/// no re-encoding, no bag state change. Because manifest inputs were
/// recorded durably at prepare time, this works for bags in any state from
/// MANIFEST_MADE through CLEANED.
pub struct ManifestRecreator {
    db: Database,
    store: ObjectStore,
    publish: PublishConfig,
    retry: UploadConfig,
}

impl ManifestRecreator {
    pub fn new(config: &Config, db: Database, store: ObjectStore) -> Self {
        Self {
            db,
            store,
            publish: config.publish.clone(),
            retry: config.upload.clone(),
        }
    }

    /// Builds the manifest document for an origin identifier without
    /// uploading it. Exposed separately so callers (and tests) can compare
    /// the rebuilt document against a previously published one.
    pub fn build(&self, origin: &str) -> Result<Vec<u8>, StageError> {
        let bag = bag_repo::latest_with_manifest(&self.db, origin)?
            .ok_or_else(|| StageError::UnknownOrigin(origin.to_string()))?;

        let manifest = iiif::build_manifest(
            origin,
            bag.title.as_deref(),
            bag.date.as_deref(),
            &bag.objects,
            &self.publish,
        )?;
        Ok(iiif::to_bytes(&manifest)?)
    }

    /// Recreates the manifest and uploads it to its fixed public location,
    /// superseding the previously published document.
    pub async fn run(&self, origin: &str) -> Result<(), StageError> {
        let bytes = self.build(origin)?;
        let key = upload::manifest_key(origin);
        let size = bytes.len() as i64;

        upload::put_bytes_with_retry(&self.store, &self.retry, &key, &bytes, "application/json")
            .await?;
        upload::verify_uploaded(&self.store, &key, size).await?;

        info!(origin, key = %key, "Recreated manifest");
        Ok(())
    }

    /// Bulk form: recreates the manifest for every origin identifier that
    /// ever reached MANIFEST_MADE. Per-origin failures are collected, not
    /// fatal to the sweep.
    pub async fn run_all(&self) -> Result<Vec<(String, Result<(), StageError>)>, StageError> {
        let origins = bag_repo::origins_with_manifest(&self.db)?;
        let mut results = Vec::with_capacity(origins.len());

        for origin in origins {
            let result = self.run(&origin).await;
            if let Err(e) = &result {
                warn!(origin = %origin, error = %e, "Manifest recreation failed");
            }
            results.push((origin, result));
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bag::{Bag, BagState, Object, Page};
    use crate::config::load_config_from_str;
    use std::path::PathBuf;

    fn test_config() -> Config {
        load_config_from_str(
            r#"
            {
                "version": "1.0",
                "inbound_directory": "/inbound",
                "working_directory": "/work",
                "derivative_directory": "/derivatives",
                "storage": {
                    "region": "us-east-1",
                    "bucket": "b",
                    "access_key": { "value": "k" },
                    "secret_key": { "value": "s" }
                },
                "describe": { "base_url": "http://localhost" },
                "publish": {
                    "image_base_url": "https://iiif.example.org/images",
                    "manifest_base_url": "https://iiif.example.org/manifests"
                }
            }
            "#,
        )
        .unwrap()
    }

    fn recreator(db: Database) -> ManifestRecreator {
        let config = test_config();
        let store = ObjectStore::new(&config.storage).unwrap();
        ManifestRecreator::new(&config, db, store)
    }

    fn manifest_made_bag(origin: &str) -> Bag {
        let mut bag = Bag::new("t");
        bag.origin_identifier = Some(origin.to_string());
        bag.title = Some("Letters".to_string());
        bag.state = BagState::ManifestMade;
        bag.objects = vec![Object {
            local_identifier: "obj1".to_string(),
            pages: vec![Page {
                source_file: PathBuf::from("0001.tif"),
                derivative_file: None,
                sequence_number: 1,
                width: 100,
                height: 100,
            }],
        }];
        bag
    }

    #[test]
    fn test_build_requires_known_origin() {
        let db = Database::open_in_memory().unwrap();
        let recreator = recreator(db);

        let result = recreator.build("coll999");
        assert!(matches!(result, Err(StageError::UnknownOrigin(_))));
    }

    #[test]
    fn test_build_is_deterministic_from_registry_data() {
        let db = Database::open_in_memory().unwrap();
        bag_repo::insert(&db, &manifest_made_bag("coll123")).unwrap();
        let recreator = recreator(db);

        let a = recreator.build("coll123").unwrap();
        let b = recreator.build("coll123").unwrap();
        assert_eq!(a, b);

        let value: serde_json::Value = serde_json::from_slice(&a).unwrap();
        assert_eq!(
            value["id"],
            "https://iiif.example.org/manifests/coll123/manifest.json"
        );
    }

    #[test]
    fn test_build_works_for_cleaned_bags() {
        let db = Database::open_in_memory().unwrap();
        let mut bag = manifest_made_bag("coll123");
        bag.state = BagState::Cleaned;
        // Paths are long gone after cleanup.
        bag.working_path = None;
        bag.derivative_path = None;
        bag_repo::insert(&db, &bag).unwrap();

        let recreator = recreator(db);
        assert!(recreator.build("coll123").is_ok());
    }

    #[tokio::test]
    async fn test_run_all_with_empty_registry() {
        let db = Database::open_in_memory().unwrap();
        let recreator = recreator(db);

        let results = recreator.run_all().await.unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_build_ignores_bags_without_manifest() {
        let db = Database::open_in_memory().unwrap();
        let mut bag = manifest_made_bag("coll123");
        bag.state = BagState::Prepared;
        bag_repo::insert(&db, &bag).unwrap();

        let recreator = recreator(db);
        assert!(matches!(
            recreator.build("coll123"),
            Err(StageError::UnknownOrigin(_))
        ));
    }
}
