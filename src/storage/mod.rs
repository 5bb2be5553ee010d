//! Storage core: path validation, filesystem access, uploads and archives.
//!
//! Every operation that takes a client-supplied path goes through
//! [`PathSecurity`] before it reaches the filesystem.

pub mod archive;
pub mod path_security;
pub mod service;
pub mod store;
pub mod upload;

pub use archive::{
    spawn_archive, stream_batch, stream_single_directory, ArchiveBuilder, ArchiveControl,
    ArchiveError, ArchiveItem, ArchiveJob, ArchiveState, ChannelSink,
};
pub use path_security::{base_name, sanitize_file_path, validate_segment, PathInput, PathSecurity};
pub use service::{DeleteOutcome, DownloadTarget, FileService};
pub use store::{EntryStat, FileEntry, FileStore};
pub use upload::{decode_filename, PathHint, UploadCoordinator, UploadHints, UploadedFile};
