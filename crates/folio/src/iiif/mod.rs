//! IIIF Presentation 3 manifest documents.
//!
//! Manifests reference only published image-service URLs, never local paths:
//! a manifest built at derivative time must stay valid (and be reproducible
//! byte-for-byte) long after the local files are gone. Serialization is
//! `serde_json::to_vec_pretty` over structs with a fixed field order, so the
//! same inputs always produce the same bytes.

use serde::{Deserialize, Serialize};

use crate::bag::Object;
use crate::config::PublishConfig;
use crate::error::ManifestError;

pub const PRESENTATION_CONTEXT: &str = "http://iiif.io/api/presentation/3/context.json";
const IMAGE_SERVICE_PROFILE: &str = "level2";

/// IIIF language map; all labels here are untagged English strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageMap {
    pub en: Vec<String>,
}

impl LanguageMap {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            en: vec![value.into()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub label: LanguageMap,
    pub value: LanguageMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "@context")]
    pub context: String,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub label: LanguageMap,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata: Vec<MetadataEntry>,
    pub items: Vec<Canvas>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub structures: Vec<Range>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Canvas {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub label: LanguageMap,
    pub width: u32,
    pub height: u32,
    pub items: Vec<AnnotationPage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationPage {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub items: Vec<Annotation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub motivation: String,
    pub body: ImageBody,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageBody {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub service: Vec<ImageService>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageService {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub profile: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub label: LanguageMap,
    pub items: Vec<CanvasRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasRef {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// The published IIIF Image API identifier for one page: the storage key with
/// its separators percent-encoded, as image servers expect for nested ids.
pub fn image_identifier(origin: &str, local: &str, sequence: u32) -> String {
    format!("{}%2F{}%2F{:04}.jp2", origin, local, sequence)
}

pub fn manifest_id(publish: &PublishConfig, origin: &str) -> String {
    format!("{}/{}/manifest.json", publish.manifest_base_url, origin)
}

/// Builds the manifest for a bag from durable metadata only: origin
/// identifier, descriptive title/date, and the recorded object/page
/// structure. One canvas per page in sequence order, one range per object in
/// bag order.
pub fn build_manifest(
    origin: &str,
    title: Option<&str>,
    date: Option<&str>,
    objects: &[Object],
    publish: &PublishConfig,
) -> Result<Manifest, ManifestError> {
    for object in objects {
        if object.pages.is_empty() {
            return Err(ManifestError::EmptyObject {
                object: object.local_identifier.clone(),
            });
        }
    }

    let mut canvases = Vec::with_capacity(objects.iter().map(|o| o.pages.len()).sum());
    let mut ranges = Vec::with_capacity(objects.len());

    for object in objects {
        let mut canvas_refs = Vec::with_capacity(object.pages.len());

        for page in &object.pages {
            let canvas_id = format!(
                "{}/{}/canvas/{}/{}",
                publish.manifest_base_url, origin, object.local_identifier, page.sequence_number
            );
            let service_id = format!(
                "{}/{}",
                publish.image_base_url,
                image_identifier(origin, &object.local_identifier, page.sequence_number)
            );

            canvas_refs.push(CanvasRef {
                id: canvas_id.clone(),
                kind: "Canvas".to_string(),
            });

            canvases.push(Canvas {
                id: canvas_id.clone(),
                kind: "Canvas".to_string(),
                label: LanguageMap::new(format!("{}", page.sequence_number)),
                width: page.width,
                height: page.height,
                items: vec![AnnotationPage {
                    id: format!("{}/page", canvas_id),
                    kind: "AnnotationPage".to_string(),
                    items: vec![Annotation {
                        id: format!("{}/annotation", canvas_id),
                        kind: "Annotation".to_string(),
                        motivation: "painting".to_string(),
                        body: ImageBody {
                            id: format!("{}/full/max/0/default.jpg", service_id),
                            kind: "Image".to_string(),
                            format: "image/jpeg".to_string(),
                            width: page.width,
                            height: page.height,
                            service: vec![ImageService {
                                id: service_id,
                                kind: "ImageService3".to_string(),
                                profile: IMAGE_SERVICE_PROFILE.to_string(),
                            }],
                        },
                        target: canvas_id,
                    }],
                }],
            });
        }

        ranges.push(Range {
            id: format!(
                "{}/{}/range/{}",
                publish.manifest_base_url, origin, object.local_identifier
            ),
            kind: "Range".to_string(),
            label: LanguageMap::new(object.local_identifier.clone()),
            items: canvas_refs,
        });
    }

    let mut metadata = Vec::new();
    if let Some(date) = date {
        metadata.push(MetadataEntry {
            label: LanguageMap::new("Date"),
            value: LanguageMap::new(date),
        });
    }

    Ok(Manifest {
        context: PRESENTATION_CONTEXT.to_string(),
        id: manifest_id(publish, origin),
        kind: "Manifest".to_string(),
        label: LanguageMap::new(title.unwrap_or(origin)),
        metadata,
        items: canvases,
        structures: ranges,
    })
}

/// Serializes a manifest to its canonical byte form.
pub fn to_bytes(manifest: &Manifest) -> Result<Vec<u8>, ManifestError> {
    Ok(serde_json::to_vec_pretty(manifest)?)
}
