use tracing::instrument;

use crate::reader::ChunkResult;

/// Point-in-time view of a running copy.
#[derive(Debug, Copy, Clone, Default, PartialEq, serde::Serialize)]
pub struct CopyStatus {
    pub file_size: u64,
    pub total_chunks: usize,
    pub processed_bytes: u64,
    pub processed_percent: f64,
    pub read_bytes_ok: u64,
    pub read_bytes_error: u64,
    pub read_chunks_ok: usize,
    pub read_chunks_error: usize,
}

impl CopyStatus {
    #[must_use]
    pub fn processed_chunks(&self) -> usize {
        self.read_chunks_ok + self.read_chunks_error
    }
}

#[derive(Debug, Copy, Clone, Default)]
struct Counters {
    file_size: u64,
    total_chunks: usize,
    processed_bytes: u64,
    read_bytes_ok: u64,
    read_bytes_error: u64,
    read_chunks_ok: usize,
    read_chunks_error: usize,
}

/// Counters of one copy operation.
///
/// All counters sit behind one mutex so a snapshot never mixes two different updates.
/// The only writer is the scheduler, through [`Progress::record`].
#[derive(Debug)]
pub struct Progress {
    counters: std::sync::Mutex<Counters>,
    start_time: std::sync::Mutex<std::time::Instant>,
}

impl Progress {
    #[must_use]
    pub fn new() -> Self {
        Self {
            counters: std::sync::Mutex::new(Counters::default()),
            start_time: std::sync::Mutex::new(std::time::Instant::now()),
        }
    }

    fn counters(&self) -> std::sync::MutexGuard<'_, Counters> {
        // counters are plain integers, a panicking writer can't leave them half-updated
        self.counters
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Resets all counters for a new copy of `file_size` bytes split into `total_chunks`.
    pub fn start(&self, file_size: u64, total_chunks: usize) {
        *self.counters() = Counters {
            file_size,
            total_chunks,
            ..Default::default()
        };
        *self
            .start_time
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = std::time::Instant::now();
    }

    /// Records one finished chunk. Failed chunks count as processed too.
    pub fn record(&self, result: &ChunkResult) {
        let length = result.descriptor.length;
        let mut counters = self.counters();
        counters.processed_bytes += length;
        if result.is_ok() {
            counters.read_bytes_ok += length;
            counters.read_chunks_ok += 1;
        } else {
            counters.read_bytes_error += length;
            counters.read_chunks_error += 1;
        }
    }

    #[instrument(skip(self))]
    pub fn snapshot(&self) -> CopyStatus {
        let counters = *self.counters();
        let processed_percent = if counters.file_size == 0 {
            100.0
        } else {
            counters.processed_bytes as f64 * 100.0 / counters.file_size as f64
        };
        CopyStatus {
            file_size: counters.file_size,
            total_chunks: counters.total_chunks,
            processed_bytes: counters.processed_bytes,
            processed_percent,
            read_bytes_ok: counters.read_bytes_ok,
            read_bytes_error: counters.read_bytes_error,
            read_chunks_ok: counters.read_chunks_ok,
            read_chunks_error: counters.read_chunks_error,
        }
    }

    pub fn get_duration(&self) -> std::time::Duration {
        self.start_time
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .elapsed()
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders periodic text updates, keeping track of the throughput since the previous one.
pub struct ProgressPrinter<'a> {
    progress: &'a Progress,
    last_bytes: u64,
    last_update: std::time::Instant,
}

impl<'a> ProgressPrinter<'a> {
    pub fn new(progress: &'a Progress) -> Self {
        Self {
            progress,
            last_bytes: progress.snapshot().processed_bytes,
            last_update: std::time::Instant::now(),
        }
    }

    pub fn print(&mut self) -> String {
        let time_now = std::time::Instant::now();
        let status = self.progress.snapshot();
        let total_duration_secs = self.progress.get_duration().as_secs_f64();
        let curr_duration_secs = (time_now - self.last_update).as_secs_f64();
        let average_bytes_rate = rate(status.processed_bytes, total_duration_secs);
        let current_bytes_rate = rate(
            status.processed_bytes.saturating_sub(self.last_bytes),
            curr_duration_secs,
        );
        self.last_bytes = status.processed_bytes;
        self.last_update = time_now;
        format!(
            "Processed {:.2}%, with {} chunk errors\n\
            -----------------------\n\
            chunks:  {:>10} / {}\n\
            bytes:   {:>10} / {}\n\
            lost:    {:>10}\n\
            average: {:>10}/s\n\
            current: {:>10}/s",
            status.processed_percent,
            status.read_chunks_error,
            status.processed_chunks(),
            status.total_chunks,
            bytesize::ByteSize(status.processed_bytes),
            bytesize::ByteSize(status.file_size),
            bytesize::ByteSize(status.read_bytes_error),
            bytesize::ByteSize(average_bytes_rate),
            bytesize::ByteSize(current_bytes_rate),
        )
    }
}

fn rate(bytes: u64, secs: f64) -> u64 {
    if secs > 0.0 {
        (bytes as f64 / secs) as u64
    } else {
        0
    }
}
