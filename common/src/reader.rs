use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::instrument;

use crate::chunk::ChunkDescriptor;
use crate::error::ChunkError;

/// Outcome of reading one chunk. Failure is recorded here instead of being propagated.
#[derive(Debug)]
pub struct ChunkResult {
    pub descriptor: ChunkDescriptor,
    pub outcome: Result<bytes::Bytes, ChunkError>,
}

impl ChunkResult {
    #[must_use]
    pub fn ok(descriptor: ChunkDescriptor, payload: bytes::Bytes) -> Self {
        debug_assert_eq!(payload.len() as u64, descriptor.length);
        Self {
            descriptor,
            outcome: Ok(payload),
        }
    }

    #[must_use]
    pub fn failed(descriptor: ChunkDescriptor, error: ChunkError) -> Self {
        Self {
            descriptor,
            outcome: Err(error),
        }
    }

    #[must_use]
    pub fn index(&self) -> usize {
        self.descriptor.index
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Reads chunks of one source file, each through its own short-lived file handle.
///
/// Handles are never shared between chunks, so concurrent reads don't contend on a file
/// cursor. Opening a handle is gated by [`throttle::open_file_permit`] and every attempt
/// consumes one [`throttle::get_iops_token`].
#[derive(Debug, Clone)]
pub struct FileChunkReader {
    src: std::sync::Arc<std::path::Path>,
    retries: usize,
}

impl FileChunkReader {
    /// `retries` is the number of extra attempts made for a chunk before it's reported failed.
    #[must_use]
    pub fn new(src: &std::path::Path, retries: usize) -> Self {
        Self {
            src: std::sync::Arc::from(src),
            retries,
        }
    }

    #[instrument(skip(self), fields(src = ?self.src))]
    pub async fn read(&self, descriptor: ChunkDescriptor) -> ChunkResult {
        read_with_retries(descriptor, self.retries, |descriptor| self.read_once(descriptor)).await
    }

    async fn read_once(&self, descriptor: ChunkDescriptor) -> Result<bytes::Bytes, ChunkError> {
        throttle::get_iops_token().await;
        let _open_file_guard = throttle::open_file_permit().await;
        let mut file = tokio::fs::File::open(&self.src)
            .await
            .map_err(ChunkError::Open)?;
        file.seek(std::io::SeekFrom::Start(descriptor.offset))
            .await
            .map_err(|error| ChunkError::Seek {
                offset: descriptor.offset,
                error,
            })?;
        let length = usize::try_from(descriptor.length).map_err(|_| {
            ChunkError::Read(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("chunk length {} does not fit in memory", descriptor.length),
            ))
        })?;
        let mut buffer = bytes::BytesMut::zeroed(length);
        let mut filled = 0;
        while filled < length {
            match file.read(&mut buffer[filled..]).await {
                Ok(0) => {
                    return Err(ChunkError::ShortRead {
                        expected: descriptor.length,
                        actual: filled as u64,
                    });
                }
                Ok(n) => filled += n,
                Err(error) if error.kind() == std::io::ErrorKind::Interrupted => {}
                Err(error) => return Err(ChunkError::Read(error)),
            }
        }
        Ok(buffer.freeze())
    }
}

/// Runs `attempt` for `descriptor` until it succeeds or `retries` extra attempts are used up.
async fn read_with_retries<F, Fut>(
    descriptor: ChunkDescriptor,
    retries: usize,
    mut attempt: F,
) -> ChunkResult
where
    F: FnMut(ChunkDescriptor) -> Fut,
    Fut: std::future::Future<Output = Result<bytes::Bytes, ChunkError>>,
{
    let mut failed_attempts = 0;
    loop {
        match attempt(descriptor).await {
            Ok(payload) => {
                tracing::trace!("read {} bytes", payload.len());
                return ChunkResult::ok(descriptor, payload);
            }
            Err(error) if failed_attempts < retries => {
                failed_attempts += 1;
                tracing::warn!(
                    "chunk {} (offset {}) attempt {}/{} failed: {}",
                    descriptor.index,
                    descriptor.offset,
                    failed_attempts,
                    retries + 1,
                    &error,
                );
            }
            Err(error) => {
                tracing::error!(
                    "failed reading chunk {} ({} bytes at offset {}): {}",
                    descriptor.index,
                    descriptor.length,
                    descriptor.offset,
                    &error,
                );
                return ChunkResult::failed(descriptor, error);
            }
        }
    }
}
