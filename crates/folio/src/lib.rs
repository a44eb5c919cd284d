pub mod bag;
pub mod config;
pub mod describe;
pub mod error;
pub mod iiif;
pub mod logging;
pub mod pipeline;
pub mod registry;
pub mod secrets;
pub mod stages;
pub mod storage;
pub mod tools;

pub use bag::{Bag, BagState, Object, Page, Stage};
pub use config::{load_config, Config};
pub use error::{FolioError, Result};
pub use pipeline::{StageError, StageExecutor};
pub use stages::ManifestRecreator;
pub use storage::ObjectStore;
