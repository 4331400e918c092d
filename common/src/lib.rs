//! Core library for `rchunk` - copy one file by reading it in parallel chunks
//!
//! The copy pipeline is split into small, separately testable pieces:
//!
//! - [`chunk`] - partitions a file size into ordered, fixed-size chunk descriptors
//! - [`reader`] - reads one chunk through its own file handle, turning failures into data
//! - [`scheduler`] - runs chunk reads with a bounded number in flight, results kept by index
//! - [`progress`] - counters updated after every chunk, read by the progress display
//! - [`assemble`] - concatenates the surviving chunks in index order and writes the output
//! - [`copy`] - wires the above together for one source file and a destination directory
//!
//! # Failure Policy
//!
//! A chunk that can't be read doesn't stop the copy. It is recorded as failed, counted in the
//! progress and summary, and left out of the output ([`GapPolicy::Drop`]) or zero-filled
//! ([`GapPolicy::ZeroFill`]). Only configuration errors, an unreadable source, a failed write
//! of the destination, or losing more than the allowed share of bytes fail the whole copy.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), common::copy::Error> {
//! let progress = common::progress::Progress::new();
//! let summary = common::copy(
//!     &progress,
//!     std::path::Path::new("/data/input.bin"),
//!     std::path::Path::new("/backup"),
//!     &common::CopySettings::default(),
//! )
//! .await?;
//! println!("{summary}");
//! # Ok(())
//! # }
//! ```

pub mod assemble;
pub mod chunk;
pub mod config;
pub mod copy;
pub mod error;
pub mod progress;
pub mod reader;
pub mod scheduler;

#[cfg(test)]
mod testutils;

pub use assemble::{GapPolicy, Summary};
pub use config::{OutputConfig, ProgressSettings, ProgressType, RuntimeConfig, ThrottleConfig};
pub use copy::{Settings as CopySettings, copy};
pub use error::{ChunkError, Error};

static PROGRESS: std::sync::LazyLock<progress::Progress> =
    std::sync::LazyLock::new(progress::Progress::new);

/// Progress of the copy driven by [`run`].
pub fn get_progress() -> &'static progress::Progress {
    &PROGRESS
}

fn init_tracing(output: &OutputConfig) {
    if output.quiet {
        return;
    }
    let level = match output.verbose {
        0 => "error",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    if let Err(error) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
    {
        eprintln!("failed to initialize logging: {error}");
    }
}

/// Open-files limit used when none was given: 80% of the soft `RLIMIT_NOFILE`.
fn default_max_open_files() -> Option<usize> {
    match nix::sys::resource::getrlimit(nix::sys::resource::Resource::RLIMIT_NOFILE) {
        Ok((soft, _hard)) => Some(usize::try_from(soft / 10 * 8).unwrap_or(usize::MAX)),
        Err(error) => {
            tracing::info!("failed reading the open files limit: {}", error);
            None
        }
    }
}

fn setup_throttle(runtime: &tokio::runtime::Runtime, throttle_config: &ThrottleConfig) {
    let max_open_files = match throttle_config.max_open_files {
        Some(max_open_files) => max_open_files,
        None => default_max_open_files().unwrap_or(0),
    };
    tracing::info!("max open files: {}", max_open_files);
    throttle::set_max_open_files(max_open_files);
    if throttle_config.iops_throttle > 0 {
        // refill every 100ms when the rate allows it, otherwise once a second
        let (tokens, interval) = if throttle_config.iops_throttle >= 10 {
            (
                throttle_config.iops_throttle / 10,
                std::time::Duration::from_millis(100),
            )
        } else {
            (throttle_config.iops_throttle, std::time::Duration::from_secs(1))
        };
        throttle::init_iops_tokens(tokens);
        runtime.spawn(throttle::run_iops_replenish_thread(tokens, interval));
    }
}

struct ProgressDisplay {
    stop: std::sync::mpsc::Sender<()>,
    handle: std::thread::JoinHandle<()>,
}

impl ProgressDisplay {
    fn start(progress_type: ProgressType, delay: std::time::Duration) -> Self {
        let (stop, stopped) = std::sync::mpsc::channel::<()>();
        let handle = std::thread::spawn(move || {
            let progress = get_progress();
            match progress_type {
                ProgressType::ProgressBar | ProgressType::Auto => {
                    let bar = indicatif::ProgressBar::new(0);
                    let style = indicatif::ProgressStyle::with_template(
                        "[{elapsed_precise}] {wide_bar} {bytes}/{total_bytes} ({bytes_per_sec}) {msg}",
                    )
                    .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar());
                    bar.set_style(style);
                    loop {
                        let status = progress.snapshot();
                        bar.set_length(status.file_size);
                        bar.set_position(status.processed_bytes);
                        bar.set_message(format!("{} chunk errors", status.read_chunks_error));
                        if !matches!(
                            stopped.recv_timeout(delay),
                            Err(std::sync::mpsc::RecvTimeoutError::Timeout)
                        ) {
                            break;
                        }
                    }
                    bar.finish_and_clear();
                }
                ProgressType::TextUpdates => {
                    let mut printer = progress::ProgressPrinter::new(progress);
                    while matches!(
                        stopped.recv_timeout(delay),
                        Err(std::sync::mpsc::RecvTimeoutError::Timeout)
                    ) {
                        eprintln!("{}", printer.print());
                    }
                }
            }
        });
        Self { stop, handle }
    }

    fn finish(self) {
        // the receiver may be gone already, in which case the thread is exiting anyway
        let _ = self.stop.send(());
        if self.handle.join().is_err() {
            tracing::error!("progress display thread panicked");
        }
    }
}

fn print_summary(summary: &Summary, output: &OutputConfig) {
    match serde_json::to_string(summary) {
        Ok(record) => println!("{record}"),
        Err(error) => tracing::error!("failed to serialize summary: {}", error),
    }
    if output.print_summary || output.verbose > 0 {
        println!("{summary}");
    }
}

/// Runs `func` on a tokio runtime configured from the given settings.
///
/// Logging, throttling and the progress display are set up before `func` starts. The summary
/// is printed whenever one is available, also when the copy failed after reassembly.
/// Returns `None` if the copy failed.
pub fn run<Fut>(
    progress_settings: Option<ProgressSettings>,
    output: OutputConfig,
    runtime: RuntimeConfig,
    throttle_config: ThrottleConfig,
    func: impl FnOnce() -> Fut,
) -> Option<Summary>
where
    Fut: std::future::Future<Output = Result<Summary, copy::Error>>,
{
    init_tracing(&output);
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    if runtime.max_blocking_threads > 0 {
        builder.max_blocking_threads(runtime.max_blocking_threads);
    }
    let rt = match builder.build() {
        Ok(rt) => rt,
        Err(error) => {
            tracing::error!("failed to start the runtime: {}", error);
            return None;
        }
    };
    setup_throttle(&rt, &throttle_config);
    let display = match progress_settings.map(|settings| settings.resolve()).transpose() {
        Ok(resolved) => {
            resolved.map(|(progress_type, delay)| ProgressDisplay::start(progress_type, delay))
        }
        Err(error) => {
            tracing::error!("{:#}", error);
            return None;
        }
    };
    let res = rt.block_on(func());
    if let Some(display) = display {
        display.finish();
    }
    match res {
        Ok(summary) => {
            print_summary(&summary, &output);
            Some(summary)
        }
        Err(error) => {
            tracing::error!("{}", &error);
            if let Some(summary) = &error.summary {
                print_summary(summary, &output);
            }
            None
        }
    }
}
