//! Progress reporting service
//!
//! The batch emits `ProgressEvent`s; frontends decide how to show them. The
//! console reporter prints the plain status lines, the indicatif reporter
//! prints the same lines above a progress bar.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const BANNER_WIDTH: usize = 50;

/// Something that happened during a batch run
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// The batch is about to process `total` paths
    BatchStarted { total: usize },
    /// An existing input is being processed
    JobStarted { input: PathBuf },
    /// The input does not exist
    JobSkipped { input: PathBuf },
    /// The output file was written
    OutputSaved { output: PathBuf },
    /// A superseded lossy original was deleted
    OriginalRemoved { input: PathBuf },
    /// The job failed; the batch continues
    JobFailed { input: PathBuf, message: String },
    /// `completed` of `total` paths have been handled (any outcome)
    JobCompleted { completed: usize, total: usize },
    /// Every path has been handled
    BatchFinished {
        saved: usize,
        skipped: usize,
        failed: usize,
        elapsed: Duration,
    },
}

impl ProgressEvent {
    /// The human-readable status line for this event, if it has one
    #[must_use]
    pub fn console_line(&self) -> Option<String> {
        let rule = "=".repeat(BANNER_WIDTH);
        match self {
            Self::BatchStarted { .. } => {
                Some(format!("{rule}\nBackground Removal Script\n{rule}"))
            },
            Self::JobStarted { input } => Some(format!("Processing: {}", input.display())),
            Self::JobSkipped { input } => {
                Some(format!("Skipping (not found): {}", input.display()))
            },
            Self::OutputSaved { output } => Some(format!("Saved: {}", output.display())),
            Self::OriginalRemoved { input } => {
                Some(format!("Removed original: {}", input.display()))
            },
            Self::JobFailed { input, message } => {
                Some(format!("Error processing {}: {message}", input.display()))
            },
            Self::JobCompleted { .. } => None,
            Self::BatchFinished { .. } => {
                Some(format!("\n{rule}\nDone! All images processed.\n{rule}"))
            },
        }
    }
}

/// Receives progress events from a batch
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

/// Reporter that discards everything
#[derive(Debug, Default)]
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report(&self, _event: &ProgressEvent) {}
}

/// Prints status lines to stdout
#[derive(Debug, Default)]
pub struct ConsoleProgressReporter;

impl ProgressReporter for ConsoleProgressReporter {
    fn report(&self, event: &ProgressEvent) {
        if let Some(line) = event.console_line() {
            println!("{line}");
        }
    }
}

/// Keeps every event in memory; clones share the same log
#[derive(Debug, Clone, Default)]
pub struct RecordingProgressReporter {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl RecordingProgressReporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// The console lines the recorded events would have printed
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(ProgressEvent::console_line)
            .collect()
    }
}

impl ProgressReporter for RecordingProgressReporter {
    fn report(&self, event: &ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Status lines printed above an indicatif progress bar
#[cfg(feature = "cli")]
pub struct IndicatifProgressReporter {
    bar: indicatif::ProgressBar,
}

#[cfg(feature = "cli")]
impl IndicatifProgressReporter {
    #[must_use]
    pub fn new() -> Self {
        let bar = indicatif::ProgressBar::hidden();
        let style = indicatif::ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .map(|s| s.progress_chars("#>-"))
            .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar());
        bar.set_style(style);
        Self { bar }
    }
}

#[cfg(feature = "cli")]
impl Default for IndicatifProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "cli")]
impl ProgressReporter for IndicatifProgressReporter {
    fn report(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::BatchStarted { total } => {
                self.bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
                self.bar.set_length(*total as u64);
            },
            ProgressEvent::JobStarted { input } => {
                let name = input
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                self.bar.set_message(name);
            },
            ProgressEvent::JobCompleted { completed, .. } => {
                self.bar.set_position(*completed as u64);
            },
            ProgressEvent::BatchFinished { .. } => self.bar.finish_and_clear(),
            _ => {},
        }

        if let Some(line) = event.console_line() {
            self.bar.println(line);
        }
    }
}

/// Pick the reporter for the CLI: a bar with `--progress`, plain lines otherwise
#[cfg(feature = "cli")]
#[must_use]
pub fn create_cli_progress_reporter(enable_progress: bool) -> Box<dyn ProgressReporter> {
    if enable_progress {
        Box::new(IndicatifProgressReporter::new())
    } else {
        Box::new(ConsoleProgressReporter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_lines() {
        let input = PathBuf::from("public/products/a.jpg");
        assert_eq!(
            ProgressEvent::JobStarted { input: input.clone() }.console_line().unwrap(),
            "Processing: public/products/a.jpg"
        );
        assert_eq!(
            ProgressEvent::JobSkipped { input: input.clone() }.console_line().unwrap(),
            "Skipping (not found): public/products/a.jpg"
        );
        assert_eq!(
            ProgressEvent::OutputSaved {
                output: input.with_extension("png")
            }
            .console_line()
            .unwrap(),
            "Saved: public/products/a.png"
        );
        assert_eq!(
            ProgressEvent::OriginalRemoved { input: input.clone() }.console_line().unwrap(),
            "Removed original: public/products/a.jpg"
        );
        assert_eq!(
            ProgressEvent::JobFailed {
                input,
                message: "Image processing error: bad data".to_string()
            }
            .console_line()
            .unwrap(),
            "Error processing public/products/a.jpg: Image processing error: bad data"
        );
        assert!(ProgressEvent::JobCompleted { completed: 1, total: 2 }
            .console_line()
            .is_none());
    }

    #[test]
    fn test_banners() {
        let start = ProgressEvent::BatchStarted { total: 3 }.console_line().unwrap();
        let lines: Vec<&str> = start.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "=".repeat(50));
        assert_eq!(lines[1], "Background Removal Script");

        let end = ProgressEvent::BatchFinished {
            saved: 1,
            skipped: 1,
            failed: 1,
            elapsed: Duration::from_millis(5),
        }
        .console_line()
        .unwrap();
        assert!(end.starts_with('\n'));
        assert!(end.contains("Done! All images processed."));
        assert!(end.ends_with(&"=".repeat(50)));
    }

    #[test]
    fn test_recording_reporter_shares_log_between_clones() {
        let reporter = RecordingProgressReporter::new();
        let handle = reporter.clone();
        reporter.report(&ProgressEvent::JobSkipped {
            input: PathBuf::from("b.png"),
        });

        assert_eq!(handle.events().len(), 1);
        assert_eq!(handle.lines(), vec!["Skipping (not found): b.png"]);
    }
}
