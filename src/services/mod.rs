//! Services used by the batch pipeline
//!
//! Each service owns one concern (encoding, file I/O, compositing, progress)
//! so the batch loop reads as a sequence of steps.

pub mod composite;
pub mod format;
pub mod io;
pub mod progress;

pub use composite::BackdropCompositor;
pub use format::OutputFormatHandler;
pub use io::ImageIOService;
#[cfg(feature = "cli")]
pub use progress::{create_cli_progress_reporter, IndicatifProgressReporter};
pub use progress::{
    ConsoleProgressReporter, NoOpProgressReporter, ProgressEvent, ProgressReporter,
    RecordingProgressReporter,
};
