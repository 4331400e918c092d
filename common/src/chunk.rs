use tracing::instrument;

use crate::error::Error;

/// A contiguous byte range of the source file, read as one unit of work.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ChunkDescriptor {
    pub index: usize,
    pub offset: u64,
    pub length: u64,
}

impl ChunkDescriptor {
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Splits `file_size` bytes into `ceil(file_size / chunk_size)` chunks.
///
/// Every chunk but the last is `chunk_size` long. The last one holds the remainder, or a
/// full `chunk_size` when the file size is an exact multiple, so a zero-length chunk is
/// never produced. An empty file yields no chunks.
#[instrument]
pub fn plan(file_size: u64, chunk_size: u64) -> Result<Vec<ChunkDescriptor>, Error> {
    if chunk_size == 0 {
        return Err(Error::InvalidConfiguration(
            "chunk size must be greater than 0".to_string(),
        ));
    }
    let count = usize::try_from(file_size.div_ceil(chunk_size)).map_err(|_| {
        Error::InvalidConfiguration(format!(
            "chunk size {chunk_size} is too small for a file of {file_size} bytes"
        ))
    })?;
    let mut chunks = Vec::with_capacity(count);
    let mut offset = 0;
    for index in 0..count {
        let length = std::cmp::min(chunk_size, file_size - offset);
        chunks.push(ChunkDescriptor {
            index,
            offset,
            length,
        });
        offset += length;
    }
    tracing::debug!("planned {} chunks", chunks.len());
    Ok(chunks)
}
