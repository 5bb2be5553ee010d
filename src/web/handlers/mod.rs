//! HTTP handlers.

pub mod uploader;

pub use uploader::*;
