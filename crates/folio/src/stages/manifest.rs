//! Manifest construction for a fully derived bag.

use tracing::debug;

use crate::bag::Bag;
use crate::config::{Config, PublishConfig};
use crate::iiif;
use crate::pipeline::error::StageError;
use crate::storage::LocalStore;

pub const MANIFEST_FILENAME: &str = "manifest.json";

/// Builds the bag's IIIF manifest and persists it under the derivative tree.
///
/// Inputs are deliberately restricted to what the registry records durably
/// (origin identifier, title, date, object/page inventory) plus the published
/// base URLs, so the same document can be rebuilt later without any local
/// file — see [`crate::stages::recreate`].
pub struct ManifestBuilder {
    publish: PublishConfig,
}

impl ManifestBuilder {
    pub fn new(config: &Config) -> Self {
        Self {
            publish: config.publish.clone(),
        }
    }

    pub async fn run(&self, bag: &mut Bag) -> Result<(), StageError> {
        let origin = bag
            .origin_identifier
            .clone()
            .ok_or_else(|| StageError::Inconsistent {
                bag: bag.id.clone(),
                detail: "no origin identifier recorded".to_string(),
            })?;
        let derivative_path =
            bag.derivative_path
                .clone()
                .ok_or_else(|| StageError::Inconsistent {
                    bag: bag.id.clone(),
                    detail: "no derivative path recorded".to_string(),
                })?;

        let manifest = iiif::build_manifest(
            &origin,
            bag.title.as_deref(),
            bag.date.as_deref(),
            &bag.objects,
            &self.publish,
        )?;
        let bytes = iiif::to_bytes(&manifest)?;

        let dest = derivative_path.join(MANIFEST_FILENAME);
        LocalStore::write_atomic(&dest, &bytes)?;

        debug!(
            bag_id = %bag.id,
            origin = %origin,
            canvases = manifest.items.len(),
            "Built manifest"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bag::{Object, Page};
    use crate::config::load_config_from_str;
    use std::path::PathBuf;
    use tempfile::TempDir;

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

    fn prepared_bag(tmp: &TempDir) -> Bag {
        let mut bag = Bag::new("t");
        bag.origin_identifier = Some("coll123".to_string());
        bag.title = Some("Letters, 1912".to_string());
        bag.derivative_path = Some(tmp.path().join(&bag.id));
        bag.objects = vec![Object {
            local_identifier: "obj1".to_string(),
            pages: vec![
                Page {
                    source_file: PathBuf::from("0001.tif"),
                    derivative_file: None,
                    sequence_number: 1,
                    width: 100,
                    height: 150,
                },
                Page {
                    source_file: PathBuf::from("0002.tif"),
                    derivative_file: None,
                    sequence_number: 2,
                    width: 100,
                    height: 150,
                },
            ],
        }];
        bag
    }

    #[tokio::test]
    async fn test_writes_manifest_document() {
        let tmp = TempDir::new().unwrap();
        let stage = ManifestBuilder::new(&test_config());
        let mut bag = prepared_bag(&tmp);

        stage.run(&mut bag).await.unwrap();

        let path = bag
            .derivative_path
            .as_ref()
            .unwrap()
            .join(MANIFEST_FILENAME);
        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(value["label"]["en"][0], "Letters, 1912");
        assert_eq!(value["items"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_object_fails_stage() {
        let tmp = TempDir::new().unwrap();
        let stage = ManifestBuilder::new(&test_config());
        let mut bag = prepared_bag(&tmp);
        bag.objects[0].pages.clear();

        let result = stage.run(&mut bag).await;
        assert!(matches!(result, Err(StageError::Manifest(_))));
    }

    #[tokio::test]
    async fn test_missing_origin_is_inconsistent() {
        let tmp = TempDir::new().unwrap();
        let stage = ManifestBuilder::new(&test_config());
        let mut bag = prepared_bag(&tmp);
        bag.origin_identifier = None;

        let result = stage.run(&mut bag).await;
        assert!(matches!(result, Err(StageError::Inconsistent { .. })));
    }
}
