//! Configuration types for runtime and execution settings

/// Runtime configuration for tokio and thread pools
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfig {
    /// Number of worker threads (0 = number of CPU cores)
    pub max_workers: usize,
    /// Number of blocking threads (0 = tokio default of 512)
    pub max_blocking_threads: usize,
}

/// Throttling configuration for resource control
#[derive(Debug, Clone, Copy, Default)]
pub struct ThrottleConfig {
    /// Maximum number of open files (None = 80% of system limit, Some(0) = no limit)
    pub max_open_files: Option<usize>,
    /// Chunk reads started per second (0 = no throttle)
    pub iops_throttle: usize,
}

/// Output and logging configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Suppress error output
    pub quiet: bool,
    /// Verbosity level: 0=ERROR, 1=INFO, 2=DEBUG, 3=TRACE
    pub verbose: u8,
    /// Print human-readable summary at the end
    pub print_summary: bool,
}

/// How progress is displayed while chunks are being read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ProgressType {
    /// Progress bar when stderr is a terminal, text updates otherwise
    #[default]
    #[value(alias = "Auto")]
    Auto,
    /// Interactive progress bar
    #[value(alias = "ProgressBar")]
    ProgressBar,
    /// Periodic text updates, suitable for log files
    #[value(alias = "TextUpdates")]
    TextUpdates,
}

/// Progress reporting configuration
#[derive(Debug, Clone, Default)]
pub struct ProgressSettings {
    pub progress_type: ProgressType,
    /// Human-readable delay between updates, e.g. "200ms" or "1s"
    pub progress_delay: Option<String>,
}

impl ProgressSettings {
    /// Resolves `Auto` and the default delay: 200ms for the progress bar, 1s for text updates.
    pub fn resolve(&self) -> anyhow::Result<(ProgressType, std::time::Duration)> {
        use std::io::IsTerminal;
        let progress_type = match self.progress_type {
            ProgressType::Auto => {
                if std::io::stderr().is_terminal() {
                    ProgressType::ProgressBar
                } else {
                    ProgressType::TextUpdates
                }
            }
            other => other,
        };
        let delay = match &self.progress_delay {
            Some(delay) => humantime::parse_duration(delay)
                .map_err(|err| anyhow::anyhow!("invalid progress delay {:?}: {}", delay, err))?,
            None => match progress_type {
                ProgressType::ProgressBar => std::time::Duration::from_millis(200),
                _ => std::time::Duration::from_secs(1),
            },
        };
        Ok((progress_type, delay))
    }
}
