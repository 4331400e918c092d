use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::instrument;

use crate::error::Error;
use crate::reader::ChunkResult;

/// What ends up in the output in place of a chunk that could not be read.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, clap::ValueEnum, serde::Serialize)]
pub enum GapPolicy {
    /// Leave the chunk out, everything after it shifts left
    #[default]
    Drop,
    /// Fill the chunk's byte range with zeros, keeping all other bytes at their offsets
    ZeroFill,
}

/// Final accounting of a copy. `total_bytes_written` counts recovered payload bytes only,
/// zero-filled gaps are part of `lost_bytes`.
///
/// Serialized with the keys of the summary record printed by `rchunk`.
#[derive(Copy, Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Summary {
    #[serde(rename = "buffers")]
    pub total_chunks: usize,
    #[serde(rename = "numberOfFailedToReadBuffers")]
    pub failed_chunks: usize,
    #[serde(rename = "totalSize")]
    pub total_bytes_written: u64,
    #[serde(rename = "lostBytes")]
    pub lost_bytes: u64,
    #[serde(rename = "lostBytesPercent")]
    pub lost_bytes_percent: f64,
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "chunks: {}\n\
            failed chunks: {}\n\
            bytes written: {}\n\
            bytes lost: {} ({:.2}%)",
            self.total_chunks,
            self.failed_chunks,
            bytesize::ByteSize(self.total_bytes_written),
            bytesize::ByteSize(self.lost_bytes),
            self.lost_bytes_percent,
        )
    }
}

/// Concatenates chunk payloads in ascending index order.
///
/// Results are ordered by their chunk index here, independent of the order they arrive in.
/// Failed chunks are handled according to `policy`.
#[instrument(skip(results))]
pub fn assemble(
    mut results: Vec<ChunkResult>,
    file_size: u64,
    policy: GapPolicy,
) -> (bytes::Bytes, Summary) {
    results.sort_by_key(ChunkResult::index);
    let capacity = usize::try_from(file_size).unwrap_or_default();
    let mut buffer = bytes::BytesMut::with_capacity(capacity);
    let mut summary = Summary {
        total_chunks: results.len(),
        ..Default::default()
    };
    for result in &results {
        match &result.outcome {
            Ok(payload) => {
                buffer.extend_from_slice(payload);
                summary.total_bytes_written += payload.len() as u64;
            }
            Err(error) => {
                summary.failed_chunks += 1;
                tracing::debug!("chunk {} missing from output: {}", result.index(), error);
                if policy == GapPolicy::ZeroFill {
                    buffer.resize(buffer.len() + result.descriptor.length as usize, 0);
                }
            }
        }
    }
    summary.lost_bytes = file_size.saturating_sub(summary.total_bytes_written);
    summary.lost_bytes_percent = if file_size == 0 {
        0.0
    } else {
        summary.lost_bytes as f64 * 100.0 / file_size as f64
    };
    (buffer.freeze(), summary)
}

/// Output file, created up front and written exactly once.
#[derive(Debug)]
pub struct Destination {
    path: std::path::PathBuf,
    file: tokio::fs::File,
}

impl Destination {
    /// Creates or truncates the output file and keeps it open until [`Destination::write`].
    pub async fn create(path: &std::path::Path) -> Result<Self, Error> {
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .await
            .map_err(|source| Error::DestinationWrite {
                path: path.to_owned(),
                source,
            })?;
        Ok(Self {
            path: path.to_owned(),
            file,
        })
    }

    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Writes `buffer` at offset 0, truncates the file to its length and closes it.
    #[instrument(skip(self, buffer), fields(path = ?self.path, len = buffer.len()))]
    pub async fn write(mut self, buffer: &[u8]) -> Result<(), Error> {
        let map_err = |source| Error::DestinationWrite {
            path: self.path.clone(),
            source,
        };
        self.file
            .seek(std::io::SeekFrom::Start(0))
            .await
            .map_err(map_err)?;
        self.file.write_all(buffer).await.map_err(map_err)?;
        self.file
            .set_len(buffer.len() as u64)
            .await
            .map_err(map_err)?;
        self.file.sync_all().await.map_err(map_err)?;
        tracing::debug!("wrote {} bytes to {:?}", buffer.len(), &self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{self, ChunkDescriptor};
    use crate::error::ChunkError;
    use crate::testutils;
    use tracing_test::traced_test;

    fn read_all(source: &[u8], descriptors: &[ChunkDescriptor], fail: &[usize]) -> Vec<ChunkResult> {
        descriptors
            .iter()
            .map(|descriptor| {
                if fail.contains(&descriptor.index) {
                    ChunkResult::failed(*descriptor, ChunkError::Aborted)
                } else {
                    let range = descriptor.offset as usize..descriptor.end() as usize;
                    ChunkResult::ok(*descriptor, bytes::Bytes::copy_from_slice(&source[range]))
                }
            })
            .collect()
    }

    #[test]
    #[traced_test]
    fn round_trip_without_failures() -> Result<(), anyhow::Error> {
        let source = testutils::source_bytes(1000);
        let descriptors = chunk::plan(1000, 512)?;
        let (buffer, summary) = assemble(read_all(&source, &descriptors, &[]), 1000, GapPolicy::Drop);
        assert_eq!(&buffer[..], &source[..]);
        assert_eq!(
            summary,
            Summary {
                total_chunks: 2,
                failed_chunks: 0,
                total_bytes_written: 1000,
                lost_bytes: 0,
                lost_bytes_percent: 0.0,
            }
        );
        Ok(())
    }

    #[test]
    #[traced_test]
    fn out_of_order_results_are_reordered() -> Result<(), anyhow::Error> {
        let source = testutils::source_bytes(4096);
        let descriptors = chunk::plan(4096, 100)?;
        let mut results = read_all(&source, &descriptors, &[]);
        results.reverse();
        let (buffer, _) = assemble(results, 4096, GapPolicy::Drop);
        assert_eq!(&buffer[..], &source[..]);
        Ok(())
    }

    // dropping a failed chunk shifts everything after it to the left
    #[test]
    #[traced_test]
    fn drop_policy_shifts_following_chunks() -> Result<(), anyhow::Error> {
        let source = testutils::source_bytes(1000);
        let descriptors = chunk::plan(1000, 250)?;
        let (buffer, summary) = assemble(read_all(&source, &descriptors, &[1]), 1000, GapPolicy::Drop);
        assert_eq!(buffer.len(), 750);
        assert_eq!(&buffer[..250], &source[..250]);
        assert_eq!(&buffer[250..], &source[500..]);
        assert_eq!(summary.failed_chunks, 1);
        assert_eq!(summary.lost_bytes, 250);
        assert_eq!(summary.lost_bytes_percent, 25.0);
        Ok(())
    }

    #[test]
    #[traced_test]
    fn zero_fill_policy_keeps_offsets() -> Result<(), anyhow::Error> {
        let source = testutils::source_bytes(1000);
        let descriptors = chunk::plan(1000, 250)?;
        let (buffer, summary) = assemble(
            read_all(&source, &descriptors, &[1]),
            1000,
            GapPolicy::ZeroFill,
        );
        assert_eq!(buffer.len(), 1000);
        assert_eq!(&buffer[..250], &source[..250]);
        assert!(buffer[250..500].iter().all(|byte| *byte == 0));
        assert_eq!(&buffer[500..], &source[500..]);
        assert_eq!(summary.total_bytes_written, 750);
        assert_eq!(summary.lost_bytes, 250);
        Ok(())
    }

    #[test]
    fn everything_failed_gives_empty_output() -> Result<(), anyhow::Error> {
        let source = testutils::source_bytes(300);
        let descriptors = chunk::plan(300, 100)?;
        let (buffer, summary) = assemble(
            read_all(&source, &descriptors, &[0, 1, 2]),
            300,
            GapPolicy::Drop,
        );
        assert!(buffer.is_empty());
        assert_eq!(summary.failed_chunks, 3);
        assert_eq!(summary.lost_bytes_percent, 100.0);
        Ok(())
    }

    #[test]
    fn summary_record_keys() -> Result<(), anyhow::Error> {
        let source = testutils::source_bytes(1000);
        let descriptors = chunk::plan(1000, 512)?;
        let (_, summary) = assemble(read_all(&source, &descriptors, &[1]), 1000, GapPolicy::Drop);
        let record: serde_json::Value = serde_json::from_str(&serde_json::to_string(&summary)?)?;
        assert_eq!(
            record,
            serde_json::json!({
                "buffers": 2,
                "numberOfFailedToReadBuffers": 1,
                "totalSize": 512,
                "lostBytes": 488,
                "lostBytesPercent": 48.8,
            })
        );
        Ok(())
    }

    #[test]
    fn empty_file_has_no_loss() {
        let (buffer, summary) = assemble(Vec::new(), 0, GapPolicy::Drop);
        assert!(buffer.is_empty());
        assert_eq!(summary, Summary::default());
    }

    #[tokio::test]
    #[traced_test]
    async fn destination_is_overwritten_not_appended() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let path = tmp_dir.path().join("out.bin");
        tokio::fs::write(&path, vec![7u8; 4096]).await?;
        let destination = Destination::create(&path).await?;
        destination.write(b"hello").await?;
        assert_eq!(tokio::fs::read(&path).await?, b"hello");
        Ok(())
    }

    #[tokio::test]
    async fn destination_in_missing_directory_fails() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let path = tmp_dir.path().join("missing").join("out.bin");
        assert!(matches!(
            Destination::create(&path).await,
            Err(Error::DestinationWrite { .. })
        ));
        Ok(())
    }
}
