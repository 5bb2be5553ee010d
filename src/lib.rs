//! Filedock - a self-hosted file drop.
//!
//! Clients upload files and folders into a single storage root, browse it as
//! a tree, and delete or download entries. Directories are zipped on the fly.

pub mod config;
pub mod error;
pub mod logging;
pub mod storage;
pub mod web;

pub use config::Config;
pub use error::{DockError, Result};
pub use storage::{FileService, FileStore};
