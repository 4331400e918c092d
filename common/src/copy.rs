use std::os::unix::fs::MetadataExt;

use anyhow::anyhow;
use tracing::instrument;

use crate::assemble::{self, Destination, GapPolicy, Summary};
use crate::chunk::{self, ChunkDescriptor};
use crate::error;
use crate::progress;
use crate::reader::{ChunkResult, FileChunkReader};
use crate::scheduler;

/// Error type for copy operations that preserves the summary when the copy got as far as
/// reassembling the output.
///
/// # Logging Convention
/// The Display implementation shows the full error chain, so any format specifier works:
/// ```ignore
/// tracing::error!("copy failed: {}", &error);
/// ```
#[derive(Debug, thiserror::Error)]
#[error("{source:#}")]
pub struct Error {
    #[source]
    pub source: anyhow::Error,
    pub summary: Option<Summary>,
}

impl Error {
    #[must_use]
    pub fn new(source: anyhow::Error, summary: Option<Summary>) -> Self {
        Error { source, summary }
    }
}

impl From<error::Error> for Error {
    fn from(error: error::Error) -> Self {
        Error::new(error.into(), None)
    }
}

#[derive(Debug, Copy, Clone)]
pub struct Settings {
    /// Bytes per chunk, the last chunk holds the remainder
    pub chunk_size: u64,
    /// Maximum number of chunk reads in flight
    pub concurrency_limit: usize,
    pub gap_policy: GapPolicy,
    /// Extra attempts for a chunk before it's given up on
    pub retries: usize,
    /// Highest tolerated share of lost bytes, in percent; the copy fails above it
    pub max_loss_percent: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            concurrency_limit: 100,
            gap_policy: GapPolicy::Drop,
            retries: 0,
            max_loss_percent: 0.0,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), error::Error> {
        if self.chunk_size == 0 {
            return Err(error::Error::InvalidConfiguration(
                "chunk size must be greater than 0".to_string(),
            ));
        }
        if usize::try_from(self.chunk_size).is_err() {
            return Err(error::Error::InvalidConfiguration(format!(
                "chunk size {} does not fit in memory",
                self.chunk_size
            )));
        }
        if self.concurrency_limit == 0 {
            return Err(error::Error::InvalidConfiguration(
                "number of tasks must be at least 1".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.max_loss_percent) {
            return Err(error::Error::InvalidConfiguration(format!(
                "max loss percent must be between 0 and 100, got {}",
                self.max_loss_percent
            )));
        }
        Ok(())
    }
}

/// Output path for `src` copied into `dst_dir`: `<dst_dir>/<basename(src)>`.
pub fn destination_path(
    src: &std::path::Path,
    dst_dir: &std::path::Path,
) -> Result<std::path::PathBuf, error::Error> {
    let name = src.file_name().ok_or_else(|| {
        error::Error::InvalidConfiguration(format!("source {src:?} does not have a file name"))
    })?;
    Ok(dst_dir.join(name))
}

/// Copies `src` into `dst_dir` reading it in parallel chunks.
#[instrument(skip(prog_track))]
pub async fn copy(
    prog_track: &progress::Progress,
    src: &std::path::Path,
    dst_dir: &std::path::Path,
    settings: &Settings,
) -> Result<Summary, Error> {
    let reader = FileChunkReader::new(src, settings.retries);
    let read_chunk = move |descriptor: ChunkDescriptor| {
        let reader = reader.clone();
        async move { reader.read(descriptor).await }
    };
    copy_with_reader(prog_track, src, dst_dir, settings, read_chunk).await
}

/// Same as [`copy`] with chunks read by `reader` instead of directly from `src`.
pub async fn copy_with_reader<R, Fut>(
    prog_track: &progress::Progress,
    src: &std::path::Path,
    dst_dir: &std::path::Path,
    settings: &Settings,
    reader: R,
) -> Result<Summary, Error>
where
    R: Fn(ChunkDescriptor) -> Fut + Clone + Send + Sync + 'static,
    Fut: std::future::Future<Output = ChunkResult> + Send + 'static,
{
    settings.validate()?;
    let dst = destination_path(src, dst_dir)?;
    tracing::debug!("reading source metadata");
    let src_metadata =
        tokio::fs::metadata(src)
            .await
            .map_err(|err| error::Error::SourceUnavailable {
                path: src.to_owned(),
                reason: err.to_string(),
            })?;
    if !src_metadata.is_file() {
        return Err(error::Error::SourceUnavailable {
            path: src.to_owned(),
            reason: "not a regular file".to_string(),
        }
        .into());
    }
    let dst_dir_metadata = tokio::fs::metadata(dst_dir).await.map_err(|err| {
        error::Error::InvalidConfiguration(format!(
            "cannot access destination directory {dst_dir:?}: {err}"
        ))
    })?;
    if !dst_dir_metadata.is_dir() {
        return Err(error::Error::InvalidConfiguration(format!(
            "destination {dst_dir:?} is not a directory"
        ))
        .into());
    }
    if let Ok(dst_metadata) = tokio::fs::metadata(&dst).await {
        // creating the destination would truncate the source before it's read
        if dst_metadata.dev() == src_metadata.dev() && dst_metadata.ino() == src_metadata.ino() {
            return Err(error::Error::InvalidConfiguration(format!(
                "source {src:?} and destination {dst:?} are the same file"
            ))
            .into());
        }
    }
    let file_size = src_metadata.len();
    let chunks = chunk::plan(file_size, settings.chunk_size)?;
    prog_track.start(file_size, chunks.len());
    tracing::info!(
        "copying {:?} to {:?}: {} in {} chunks, {} at a time",
        src,
        &dst,
        bytesize::ByteSize(file_size),
        chunks.len(),
        settings.concurrency_limit
    );
    // hold the destination for the whole copy, it's written once at the end
    let destination = Destination::create(&dst).await?;
    let results = scheduler::run(&chunks, settings.concurrency_limit, prog_track, reader).await?;
    let (buffer, summary) = assemble::assemble(results, file_size, settings.gap_policy);
    destination
        .write(&buffer)
        .await
        .map_err(|err| Error::new(err.into(), Some(summary)))?;
    if summary.failed_chunks > 0 {
        tracing::warn!(
            "{} of {} chunks failed, {} bytes lost",
            summary.failed_chunks,
            summary.total_chunks,
            summary.lost_bytes
        );
    }
    if summary.lost_bytes_percent > settings.max_loss_percent {
        return Err(Error::new(
            anyhow!(error::Error::ExcessiveLoss {
                lost_bytes: summary.lost_bytes,
                lost_bytes_percent: summary.lost_bytes_percent,
                max_loss_percent: settings.max_loss_percent,
            }),
            Some(summary),
        ));
    }
    Ok(summary)
}
