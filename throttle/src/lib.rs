//! Resource throttling for chunked file reads
//!
//! Two process-wide limits are provided:
//!
//! 1. **Open Files Limit** - caps the number of simultaneously open file handles. Every chunk
//!    read opens its own handle to the source file, so with a large `--tasks` value this is
//!    what keeps the process below the descriptor limit.
//! 2. **I/O Operations Throttle** - caps the number of chunk reads started per second.
//!
//! Both limits are disabled until configured with a non-zero value, in which case acquiring
//! a permit or a token returns immediately.
//!
//! # Open Files Limit
//!
//! ```rust,no_run
//! # async fn example() {
//! throttle::set_max_open_files(8000);
//! let _guard = throttle::open_file_permit().await;
//! // open the file here - the permit is released when the guard is dropped
//! # }
//! ```
//!
//! # I/O Operations Throttle
//!
//! Tokens are kept in a bucket that is topped up to `tokens_per_interval` every `interval`:
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! # async fn example() {
//! // 1000 reads per second
//! throttle::init_iops_tokens(100);
//! tokio::spawn(throttle::run_iops_replenish_thread(100, Duration::from_millis(100)));
//! throttle::get_iops_token().await;
//! # }
//! ```

mod semaphore;

static OPEN_FILES_LIMIT: semaphore::Semaphore = semaphore::Semaphore::new();
static IOPS_THROTTLE: semaphore::Semaphore = semaphore::Semaphore::new();

pub fn set_max_open_files(max_open_files: usize) {
    OPEN_FILES_LIMIT.setup(max_open_files);
}

pub struct OpenFileGuard {
    _permit: Option<tokio::sync::SemaphorePermit<'static>>,
}

pub async fn open_file_permit() -> OpenFileGuard {
    OpenFileGuard {
        _permit: OPEN_FILES_LIMIT.acquire().await,
    }
}

pub fn init_iops_tokens(iops_tokens: usize) {
    IOPS_THROTTLE.setup(iops_tokens);
}

pub async fn get_iops_token() {
    IOPS_THROTTLE.consume().await;
}

pub async fn run_iops_replenish_thread(replenish: usize, interval: std::time::Duration) {
    IOPS_THROTTLE
        .run_replenish_thread(replenish, interval)
        .await;
}
