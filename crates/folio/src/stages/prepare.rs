//! Bag preparation: unpack, validate, and inventory an inbound transfer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;
use walkdir::WalkDir;

use crate::bag::{Bag, Object, Page};
use crate::config::Config;
use crate::describe::DescribeClient;
use crate::error::ValidationError;
use crate::pipeline::error::StageError;
use crate::storage::LocalStore;

const METADATA_FILE: &str = "bag-info.txt";
const ORIGIN_KEY: &str = "Origin-Identifier";
const PAYLOAD_DIR: &str = "data";

/// Validates an inbound bag archive and stages it into the working area.
///
/// On success the bag carries its origin identifier, descriptive metadata,
/// working/derivative paths, and the full object/page inventory (with TIFF
/// dimensions recorded for later manifest construction).
pub struct BagPreparer {
    inbound_dir: PathBuf,
    work_dir: PathBuf,
    derivative_dir: PathBuf,
    describe: DescribeClient,
}

impl BagPreparer {
    pub fn new(config: &Config, describe: DescribeClient) -> Self {
        Self {
            inbound_dir: PathBuf::from(&config.inbound_directory),
            work_dir: PathBuf::from(&config.working_directory),
            derivative_dir: PathBuf::from(&config.derivative_directory),
            describe,
        }
    }

    pub async fn run(&self, bag: &mut Bag) -> Result<(), StageError> {
        let archive = self
            .inbound_dir
            .join(format!("{}.tar.gz", bag.inbound_name));
        if !archive.is_file() {
            return Err(ValidationError::MalformedBag {
                reason: format!("inbound archive '{}' not found", archive.display()),
            }
            .into());
        }

        let working = self.work_dir.join(&bag.id);
        LocalStore::ensure_dir(&working)?;
        unpack(&archive, &working).await?;

        let root = resolve_bag_root(&working)?;
        debug!(bag_id = %bag.id, root = %root.display(), "Unpacked bag");

        let info_path = root.join(METADATA_FILE);
        let info = parse_bag_info(&info_path)?;
        let origin = info
            .get(ORIGIN_KEY)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
            .ok_or(ValidationError::MissingIdentifier {
                path: info_path.clone(),
            })?
            .to_string();

        let objects = scan_payload(&root.join(PAYLOAD_DIR))?;

        let description = self.describe.lookup(&origin).await?;

        let derivative = self.derivative_dir.join(&bag.id);
        LocalStore::ensure_dir(&derivative)?;

        bag.origin_identifier = Some(origin);
        bag.title = Some(description.title);
        bag.date = description.date;
        bag.working_path = Some(working);
        bag.derivative_path = Some(derivative);
        bag.objects = objects;
        Ok(())
    }
}

/// Extracts a gzipped tarball. Runs on the blocking pool; archives can be
/// tens of gigabytes.
async fn unpack(archive: &Path, dest: &Path) -> Result<(), ValidationError> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&archive).map_err(|e| ValidationError::MalformedBag {
            reason: format!("cannot open '{}': {}", archive.display(), e),
        })?;
        let mut tarball = tar::Archive::new(flate2::read::GzDecoder::new(file));
        tarball
            .unpack(&dest)
            .map_err(|e| ValidationError::MalformedBag {
                reason: format!("cannot extract '{}': {}", archive.display(), e),
            })
    })
    .await
    .map_err(|e| ValidationError::MalformedBag {
        reason: format!("unpack task failed: {}", e),
    })?
}

/// Archives usually wrap the bag in a single top-level directory; accept
/// either that or the bag contents directly at the unpack root.
fn resolve_bag_root(working: &Path) -> Result<PathBuf, ValidationError> {
    if working.join(METADATA_FILE).is_file() {
        return Ok(working.to_path_buf());
    }

    let entries: Vec<PathBuf> = std::fs::read_dir(working)
        .map_err(|e| ValidationError::MalformedBag {
            reason: format!("cannot list '{}': {}", working.display(), e),
        })?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();

    if let [single] = entries.as_slice() {
        if single.is_dir() && single.join(METADATA_FILE).is_file() {
            return Ok(single.clone());
        }
    }

    Err(ValidationError::MalformedBag {
        reason: format!("no '{}' found in unpacked bag", METADATA_FILE),
    })
}

/// Parses the `Key: Value` metadata file. Indented lines continue the
/// previous value, per the bag format.
fn parse_bag_info(path: &Path) -> Result<HashMap<String, String>, ValidationError> {
    let content = std::fs::read_to_string(path).map_err(|e| ValidationError::MalformedBag {
        reason: format!("cannot read '{}': {}", path.display(), e),
    })?;

    let mut info: HashMap<String, String> = HashMap::new();
    let mut last_key: Option<String> = None;

    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(key) = &last_key {
                if let Some(value) = info.get_mut(key) {
                    value.push(' ');
                    value.push_str(line.trim());
                }
            }
            continue;
        }
        match line.split_once(':') {
            Some((key, value)) => {
                let key = key.trim().to_string();
                info.insert(key.clone(), value.trim().to_string());
                last_key = Some(key);
            }
            None => {
                return Err(ValidationError::MalformedBag {
                    reason: format!("unparseable metadata line '{}'", line),
                })
            }
        }
    }

    Ok(info)
}

fn sequence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)$").expect("valid sequence regex"))
}

/// Derives the sequence number from a filename stem: its trailing digit run.
fn parse_sequence(stem: &str) -> Option<u32> {
    sequence_regex()
        .captures(stem)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
}

fn is_recognized_image(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref(),
        Some("tif") | Some("tiff")
    )
}

/// Walks the payload directory and builds the object/page inventory.
/// Layout is one subdirectory per object, image files directly inside.
fn scan_payload(data_dir: &Path) -> Result<Vec<Object>, ValidationError> {
    if !data_dir.is_dir() {
        return Err(ValidationError::MalformedBag {
            reason: format!("payload directory '{}' missing", data_dir.display()),
        });
    }

    let mut objects: Vec<Object> = Vec::new();

    for entry in WalkDir::new(data_dir)
        .min_depth(1)
        .max_depth(2)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| ValidationError::MalformedBag {
            reason: format!("payload scan failed: {}", e),
        })?;
        let path = entry.path();

        match entry.depth() {
            1 => {
                if entry.file_type().is_dir() {
                    objects.push(Object {
                        local_identifier: entry.file_name().to_string_lossy().to_string(),
                        pages: Vec::new(),
                    });
                } else {
                    return Err(ValidationError::MalformedBag {
                        reason: format!(
                            "payload file '{}' is outside an object directory",
                            path.display()
                        ),
                    });
                }
            }
            _ => {
                if entry.file_type().is_dir() {
                    return Err(ValidationError::MalformedBag {
                        reason: format!("nested payload directory '{}'", path.display()),
                    });
                }
                if !is_recognized_image(path) {
                    return Err(ValidationError::MalformedBag {
                        reason: format!("unrecognized payload file '{}'", path.display()),
                    });
                }

                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default();
                let sequence =
                    parse_sequence(&stem).ok_or_else(|| ValidationError::MalformedBag {
                        reason: format!("no sequence number in filename '{}'", path.display()),
                    })?;

                let (width, height) = image::image_dimensions(path).map_err(|e| {
                    ValidationError::MalformedBag {
                        reason: format!("unreadable image '{}': {}", path.display(), e),
                    }
                })?;

                // sort_by_file_name visits a directory's files right after the
                // directory itself, so the last object is this file's parent.
                let object = objects
                    .last_mut()
                    .ok_or_else(|| ValidationError::MalformedBag {
                        reason: format!(
                            "payload file '{}' is outside an object directory",
                            path.display()
                        ),
                    })?;

                object.pages.push(Page {
                    source_file: path.to_path_buf(),
                    derivative_file: None,
                    sequence_number: sequence,
                    width,
                    height,
                });
            }
        }
    }

    if objects.is_empty() {
        return Err(ValidationError::MalformedBag {
            reason: format!("payload directory '{}' has no objects", data_dir.display()),
        });
    }

    for object in &mut objects {
        if object.pages.is_empty() {
            return Err(ValidationError::MalformedBag {
                reason: format!("object '{}' has no pages", object.local_identifier),
            });
        }

        object.pages.sort_by_key(|p| p.sequence_number);
        for pair in object.pages.windows(2) {
            if pair[0].sequence_number == pair[1].sequence_number {
                return Err(ValidationError::AmbiguousOrdering {
                    object: object.local_identifier.clone(),
                    sequence: pair[0].sequence_number,
                });
            }
        }
    }

    Ok(objects)
}
