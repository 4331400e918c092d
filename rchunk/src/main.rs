use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "rchunk",
    version,
    about = "Copy a file by reading it in parallel, fixed-size chunks",
    long_about = "`rchunk` copies a single file into a destination directory. The file is split into fixed-size chunks which are read concurrently, each through its own file handle, and reassembled in their original order.

A chunk that can't be read does not stop the copy: it is reported, left out of the output (or zero-filled with --on-chunk-error=zero-fill) and counted as lost. A JSON summary is printed to stdout when the copy completes.

EXIT CODES:
    0 - Copy completed, lost bytes within --max-loss-percent
    1 - Copy failed or lost more bytes than allowed
    2 - Invalid command line

EXAMPLES:
    # Copy with the defaults: 512 byte chunks, 100 reads in flight
    rchunk --dir=/backup /data/input.bin

    # Larger chunks, fewer tasks, progress and a readable summary
    rchunk --dir=/backup --chunk=1MiB --tasks=16 --progress --summary /data/input.bin

    # Keep offsets intact when chunks fail and tolerate up to 1% loss
    rchunk --dir=/backup --on-chunk-error=zero-fill --retries=3 --max-loss-percent=1 /data/input.bin"
)]
struct Args {
    // Copy options
    /// Destination directory, the output is written to <DIR>/<basename of SRC>
    #[arg(long, value_name = "DIR", help_heading = "Copy options")]
    dir: std::path::PathBuf,

    /// Chunk size
    ///
    /// Accepts byte sizes like "512", "64KiB" or "1MiB".
    #[arg(
        long,
        default_value = "512",
        value_name = "SIZE",
        help_heading = "Copy options"
    )]
    chunk: bytesize::ByteSize,

    /// Maximum number of chunk reads in flight
    #[arg(
        long,
        default_value = "100",
        value_name = "N",
        help_heading = "Copy options"
    )]
    tasks: usize,

    /// What to write in place of a chunk that could not be read
    ///
    /// 'drop' leaves the chunk out, shifting everything after it. 'zero-fill' writes zeros
    /// so all other bytes keep their offsets.
    #[arg(
        long,
        value_enum,
        default_value = "drop",
        value_name = "POLICY",
        help_heading = "Copy options"
    )]
    on_chunk_error: common::GapPolicy,

    /// Number of extra attempts for a chunk before it's counted as failed
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Copy options"
    )]
    retries: usize,

    /// Highest percentage of lost bytes that still counts as success (0 = any loss fails)
    #[arg(
        long,
        default_value = "0",
        value_name = "PERCENT",
        help_heading = "Copy options"
    )]
    max_loss_percent: f64,

    // Progress & output
    /// Show progress
    #[arg(long, help_heading = "Progress & output")]
    progress: bool,

    /// Set the type of progress display
    ///
    /// If specified, --progress flag is implied.
    #[arg(long, value_name = "TYPE", help_heading = "Progress & output")]
    progress_type: Option<common::ProgressType>,

    /// Set delay between progress updates
    ///
    /// Default is 200ms for the progress bar and 1s for text updates. If specified, --progress
    /// flag is implied. Accepts human-readable durations like "200ms", "10s", "5min".
    #[arg(long, value_name = "DELAY", help_heading = "Progress & output")]
    progress_delay: Option<String>,

    /// Print human-readable summary at the end
    #[arg(long, help_heading = "Progress & output")]
    summary: bool,

    /// Verbose level (implies "summary"): -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    // Performance & throttling
    /// Maximum number of open files (0 = no limit, unspecified = 80% of system limit)
    #[arg(long, value_name = "N", help_heading = "Performance & throttling")]
    max_open_files: Option<usize>,

    /// Limit the number of chunk reads started per second (0 = no throttle)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Performance & throttling"
    )]
    iops_throttle: usize,

    // Advanced settings
    /// Number of worker threads (0 = number of CPU cores)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    /// Number of blocking worker threads (0 = Tokio default of 512)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,

    // ARGUMENTS
    /// File to copy
    #[arg()]
    src: std::path::PathBuf,
}

async fn async_main(args: Args) -> Result<common::Summary, common::copy::Error> {
    let settings = common::CopySettings {
        chunk_size: args.chunk.as_u64(),
        concurrency_limit: args.tasks,
        gap_policy: args.on_chunk_error,
        retries: args.retries,
        max_loss_percent: args.max_loss_percent,
    };
    common::copy(common::get_progress(), &args.src, &args.dir, &settings).await
}

fn main() -> Result<()> {
    let args = Args::parse();
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    let throttle = common::ThrottleConfig {
        max_open_files: args.max_open_files,
        iops_throttle: args.iops_throttle,
    };
    let progress = if args.progress || args.progress_type.is_some() || args.progress_delay.is_some()
    {
        Some(common::ProgressSettings {
            progress_type: args.progress_type.unwrap_or_default(),
            progress_delay: args.progress_delay,
        })
    } else {
        None
    };
    if common::run(progress, output, runtime, throttle, func).is_none() {
        std::process::exit(1);
    }
    Ok(())
}
