//! Streaming zip archives.
//!
//! Archives are written entry by entry straight into a sink, never buffered
//! whole. The builder moves through three states:
//!
//! ```text
//! Building ──all entries written──▶ Finished
//!    │
//!    └──sink closed / fatal source error / abort()──▶ Aborted
//! ```
//!
//! Once aborted, no further source file is read and nothing more reaches the
//! sink, so handles are released as soon as the current call unwinds.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use walkdir::WalkDir;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Size of the chunks read from source files and handed to the sink.
const CHUNK_SIZE: usize = 64 * 1024;

/// Number of chunks allowed in flight between the builder and the consumer.
const CHANNEL_CAPACITY: usize = 8;

/// Errors raised while building an archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The consumer went away before the archive was complete.
    #[error("archive consumer disconnected")]
    Disconnected,

    /// [`ArchiveControl::abort`] was called.
    #[error("archive aborted")]
    Aborted,

    /// Reading a source failed.
    #[error("archive source error: {0}")]
    Io(#[from] io::Error),

    /// The zip encoder failed.
    #[error("zip error: {0}")]
    Zip(ZipError),
}

impl From<ZipError> for ArchiveError {
    fn from(e: ZipError) -> Self {
        match e {
            ZipError::Io(io_err) => io_err.into(),
            other => ArchiveError::Zip(other),
        }
    }
}

/// Lifecycle of one archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveState {
    Building,
    Aborted,
    Finished,
}

impl ArchiveState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ArchiveState::Building,
            1 => ArchiveState::Aborted,
            _ => ArchiveState::Finished,
        }
    }
}

/// Shared handle over an archive's state. Cloned between the producer and
/// whoever may need to cancel it.
#[derive(Debug)]
pub struct ArchiveControl {
    state: AtomicU8,
}

impl ArchiveControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(ArchiveState::Building as u8),
        })
    }

    pub fn state(&self) -> ArchiveState {
        ArchiveState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_aborted(&self) -> bool {
        self.state() == ArchiveState::Aborted
    }

    /// Stop building. Returns `false` if the archive had already finished or aborted.
    pub fn abort(&self) -> bool {
        self.transition(ArchiveState::Aborted)
    }

    fn finish(&self) -> bool {
        self.transition(ArchiveState::Finished)
    }

    fn transition(&self, to: ArchiveState) -> bool {
        self.state
            .compare_exchange(
                ArchiveState::Building as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// A resolved source and the name it gets inside a batch archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveItem {
    /// Validated absolute source path.
    pub full_path: PathBuf,
    /// Slash-joined name inside the archive.
    pub relative_path: String,
    pub is_dir: bool,
}

/// What to put in an archive.
#[derive(Debug, Clone)]
pub enum ArchiveJob {
    /// One directory, flattened to the archive root.
    Directory(PathBuf),
    /// Several files and directories, each under its own relative path.
    Batch(Vec<ArchiveItem>),
}

impl ArchiveJob {
    /// Check that every source can be opened, before any response is committed.
    pub fn preflight(&self) -> io::Result<()> {
        match self {
            ArchiveJob::Directory(dir) => std::fs::read_dir(dir).map(|_| ()),
            ArchiveJob::Batch(items) => items.iter().try_for_each(|item| {
                if item.is_dir {
                    std::fs::read_dir(&item.full_path).map(|_| ())
                } else {
                    std::fs::metadata(&item.full_path).map(|_| ())
                }
            }),
        }
    }
}

/// Writes zip entries from the filesystem into any zip writer.
///
/// Each entry name is written once. A name that comes up again, because a
/// batch repeats a path or selects a file inside a selected directory, is
/// skipped.
pub struct ArchiveBuilder<Z: Write + Seek> {
    writer: ZipWriter<Z>,
    control: Arc<ArchiveControl>,
    names: HashSet<String>,
}

impl<Z: Write + Seek> ArchiveBuilder<Z> {
    pub fn new(writer: ZipWriter<Z>, control: Arc<ArchiveControl>) -> Self {
        Self {
            writer,
            control,
            names: HashSet::new(),
        }
    }

    fn options(size: u64) -> SimpleFileOptions {
        SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(9))
            .large_file(size >= u64::from(u32::MAX))
    }

    fn check_running(&self) -> Result<(), ArchiveError> {
        match self.control.state() {
            ArchiveState::Building => Ok(()),
            _ => Err(ArchiveError::Aborted),
        }
    }

    /// Reserve `name`. Returns `false` if an entry with that name was already written.
    fn claim(&mut self, name: &str) -> bool {
        if self.names.insert(name.to_string()) {
            true
        } else {
            tracing::warn!(entry = %name, "Duplicate archive entry, skipping");
            false
        }
    }

    fn add_directory_entry(&mut self, name: String) -> Result<(), ArchiveError> {
        if self.claim(&name) {
            self.writer.add_directory(name, Self::options(0))?;
        }
        Ok(())
    }

    /// Run `job` to completion, moving the control to `Aborted` on any error.
    ///
    /// On error the control is aborted before the zip writer is dropped, so no
    /// trailing central directory reaches the sink.
    pub fn run(mut self, job: &ArchiveJob) -> Result<Z, ArchiveError> {
        let written = match job {
            ArchiveJob::Directory(dir) => self.add_tree(dir, ""),
            ArchiveJob::Batch(items) => items.iter().try_for_each(|item| {
                if item.is_dir {
                    self.add_tree(&item.full_path, &item.relative_path)
                } else {
                    self.add_file(&item.full_path, &item.relative_path)
                }
            }),
        };

        match written {
            Ok(()) => self.finish(),
            Err(e) => Err(classify(&self.control, e)),
        }
    }

    /// Add the whole tree under `dir`, with entry names under `prefix`.
    ///
    /// An empty prefix puts the directory's contents at the archive root.
    fn add_tree(&mut self, dir: &Path, prefix: &str) -> Result<(), ArchiveError> {
        if !prefix.is_empty() {
            self.check_running()?;
            self.add_directory_entry(format!("{prefix}/"))?;
        }

        let walker = WalkDir::new(dir)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name();

        for entry in walker {
            self.check_running()?;

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    if e.io_error().map(io::Error::kind) == Some(io::ErrorKind::NotFound) {
                        tracing::warn!(error = %e, "Archive entry vanished, skipping");
                        continue;
                    }
                    return Err(e
                        .into_io_error()
                        .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "walk failed"))
                        .into());
                }
            };

            let Ok(rel) = entry.path().strip_prefix(dir) else {
                continue;
            };
            let rel: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            let name = if prefix.is_empty() {
                rel.join("/")
            } else {
                format!("{prefix}/{}", rel.join("/"))
            };

            let file_type = entry.file_type();
            if file_type.is_symlink() {
                tracing::warn!(entry = %name, "Skipping symlink in archive");
            } else if file_type.is_dir() {
                self.add_directory_entry(format!("{name}/"))?;
            } else if file_type.is_file() {
                self.add_file(entry.path(), &name)?;
            }
        }

        Ok(())
    }

    /// Add a single file as `name`. A file that no longer exists is skipped.
    fn add_file(&mut self, source: &Path, name: &str) -> Result<(), ArchiveError> {
        self.check_running()?;
        if self.names.contains(name) {
            tracing::warn!(entry = %name, "Duplicate archive entry, skipping");
            return Ok(());
        }

        let mut file = match File::open(source) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(entry = %name, "Archive source vanished, skipping");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let size = file.metadata()?.len();

        self.names.insert(name.to_string());
        self.writer.start_file(name.to_string(), Self::options(size))?;

        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            self.check_running()?;
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            self.writer.write_all(&buf[..n])?;
        }

        Ok(())
    }

    /// Write the central directory, flush the sink and mark the archive finished.
    fn finish(self) -> Result<Z, ArchiveError> {
        self.check_running()?;
        let control = self.control;
        let finished = self
            .writer
            .finish()
            .map_err(ArchiveError::from)
            .and_then(|mut inner| {
                inner.flush()?;
                Ok(inner)
            });

        match finished {
            Ok(inner) => {
                control.finish();
                Ok(inner)
            }
            Err(e) => Err(classify(&control, e)),
        }
    }
}

/// Abort `control` and tell a vanished consumer apart from a real failure.
///
/// The sink aborts the control itself when its consumer is gone, so an I/O
/// error on an already-aborted archive means the client disconnected.
fn classify(control: &ArchiveControl, e: ArchiveError) -> ArchiveError {
    let already_aborted = !control.abort();
    if already_aborted && matches!(e, ArchiveError::Io(_)) {
        ArchiveError::Disconnected
    } else {
        e
    }
}

/// Sink wrapper that swallows every write once the archive is aborted.
///
/// Dropping an unfinished `ZipWriter` makes it try to write its central
/// directory. After an abort those bytes must not reach the consumer, and the
/// attempt must not fail either.
struct AbortableSink<W: Write> {
    inner: W,
    control: Arc<ArchiveControl>,
}

impl<W: Write> AbortableSink<W> {
    fn new(inner: W, control: Arc<ArchiveControl>) -> Self {
        Self { inner, control }
    }
}

impl<W: Write> Write for AbortableSink<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.control.is_aborted() {
            return Ok(data.len());
        }
        self.inner.write(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.control.is_aborted() {
            return Ok(());
        }
        self.inner.flush()
    }
}

fn run_streaming<W: Write>(
    job: &ArchiveJob,
    sink: W,
    control: Arc<ArchiveControl>,
) -> Result<(), ArchiveError> {
    let sink = AbortableSink::new(sink, control.clone());
    ArchiveBuilder::new(ZipWriter::new_stream(sink), control)
        .run(job)
        .map(|_| ())
}

/// Write `dir`'s contents as a zip into `sink`, flattened to the archive root.
pub fn stream_single_directory<W: Write>(
    dir: &Path,
    sink: W,
    control: Arc<ArchiveControl>,
) -> Result<(), ArchiveError> {
    run_streaming(&ArchiveJob::Directory(dir.to_path_buf()), sink, control)
}

/// Write several files and directories as one zip into `sink`.
pub fn stream_batch<W: Write>(
    items: Vec<ArchiveItem>,
    sink: W,
    control: Arc<ArchiveControl>,
) -> Result<(), ArchiveError> {
    run_streaming(&ArchiveJob::Batch(items), sink, control)
}

/// Blocking writer that forwards archive bytes over a bounded channel.
///
/// When the receiving side is dropped (the client disconnected) the next
/// write aborts the archive and fails with `BrokenPipe`, even if it would
/// not fill a chunk.
pub struct ChannelSink {
    tx: mpsc::Sender<io::Result<Vec<u8>>>,
    buf: Vec<u8>,
    control: Arc<ArchiveControl>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<io::Result<Vec<u8>>>, control: Arc<ArchiveControl>) -> Self {
        Self {
            tx,
            buf: Vec::with_capacity(CHUNK_SIZE),
            control,
        }
    }

    fn send_buffered(&mut self) -> io::Result<()> {
        if self.control.is_aborted() {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::replace(&mut self.buf, Vec::with_capacity(CHUNK_SIZE));
        self.tx.blocking_send(Ok(chunk)).map_err(|_| {
            self.control.abort();
            io::Error::from(io::ErrorKind::BrokenPipe)
        })
    }
}

impl Write for ChannelSink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.control.is_aborted() {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        if self.tx.is_closed() {
            self.control.abort();
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        self.buf.extend_from_slice(data);
        if self.buf.len() >= CHUNK_SIZE {
            self.send_buffered()?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffered()
    }
}

impl Drop for ChannelSink {
    fn drop(&mut self) {
        let _ = self.send_buffered();
    }
}

/// Build `job` on the blocking pool, returning the receiving end of the byte stream.
///
/// A fatal error after streaming has begun is logged and delivered as an
/// `Err` item, which makes the consumer terminate the response abruptly.
pub fn spawn_archive(job: ArchiveJob) -> mpsc::Receiver<io::Result<Vec<u8>>> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let control = ArchiveControl::new();

    tokio::task::spawn_blocking(move || {
        let error_tx = tx.clone();
        let sink = ChannelSink::new(tx, control.clone());
        let result = match job {
            ArchiveJob::Directory(dir) => stream_single_directory(&dir, sink, control),
            ArchiveJob::Batch(items) => stream_batch(items, sink, control),
        };

        match result {
            Ok(()) => tracing::info!("Archive finalized successfully"),
            Err(ArchiveError::Disconnected) => {
                tracing::info!("Client disconnected, archive aborted");
            }
            Err(e) => {
                tracing::error!(error = %e, "Archive failed after streaming started");
                let _ = error_tx.blocking_send(Err(io::Error::new(
                    io::ErrorKind::Other,
                    "archive generation failed",
                )));
            }
        }
    });

    rx
}
