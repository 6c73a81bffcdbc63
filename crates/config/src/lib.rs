//! Settings for a blobdir file store, layered from defaults, a config file
//! and `BLOBDIR_*` environment variables.

pub mod error;
mod settings;

pub use crate::settings::{ENV_PREFIX, FILE_NAME, Settings};
