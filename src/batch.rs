//! Sequential batch processing
//!
//! Jobs run one at a time in list order. A job that fails is reported and
//! abandoned; the batch always runs to the end and returns a summary.

use crate::{
    config::{BatchConfig, CompositingMode, OutputFormat},
    error::{CutoutError, Result},
    job::ImageJob,
    segmentation::Segmenter,
    services::{
        BackdropCompositor, ImageIOService, NoOpProgressReporter, OutputFormatHandler,
        ProgressEvent, ProgressReporter,
    },
    tracing_config::spans,
};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// A job that finished without error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub output: PathBuf,
    pub removed_original: bool,
}

/// Why a job did not produce an output
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The input path does not name an existing file
    #[error("input not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Any step after the existence check failed
    #[error("{source}")]
    Processing {
        path: PathBuf,
        #[source]
        source: CutoutError,
    },
}

impl JobError {
    fn processing(path: &Path, source: CutoutError) -> Self {
        Self::Processing {
            path: path.to_path_buf(),
            source,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::NotFound(path) | Self::Processing { path, .. } => path,
        }
    }
}

/// Result of one job within a batch
#[derive(Debug)]
pub struct JobReport {
    pub input: PathBuf,
    pub result: std::result::Result<JobOutcome, JobError>,
}

impl JobReport {
    #[must_use]
    pub fn is_saved(&self) -> bool {
        self.result.is_ok()
    }

    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self.result, Err(JobError::NotFound(_)))
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self.result, Err(JobError::Processing { .. }))
    }
}

/// Everything that happened in a batch, in input order
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub reports: Vec<JobReport>,
    pub elapsed: Duration,
}

impl BatchSummary {
    #[must_use]
    pub fn saved(&self) -> usize {
        self.reports.iter().filter(|r| r.is_saved()).count()
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.reports.iter().filter(|r| r.is_skipped()).count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.reports.iter().filter(|r| r.is_failed()).count()
    }

    #[must_use]
    pub fn removed_originals(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(&r.result, Ok(outcome) if outcome.removed_original))
            .count()
    }
}

/// Runs segmentation, compositing and output for a list of paths
pub struct BatchProcessor {
    config: BatchConfig,
    segmenter: Box<dyn Segmenter>,
    reporter: Box<dyn ProgressReporter>,
}

impl BatchProcessor {
    /// Create a processor that reports nothing
    ///
    /// # Errors
    /// - the configuration is invalid
    pub fn new(config: BatchConfig, segmenter: Box<dyn Segmenter>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            segmenter,
            reporter: Box::new(NoOpProgressReporter),
        })
    }

    /// Send progress events to `reporter`
    #[must_use]
    pub fn with_reporter(mut self, reporter: Box<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    #[must_use]
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Process every path in order
    ///
    /// Never fails: per-job errors end up in the summary.
    pub fn run<P: AsRef<Path>>(&mut self, paths: &[P]) -> BatchSummary {
        let total = paths.len();
        let span = spans::batch_processing(total);
        let _guard = span.enter();
        let start = Instant::now();

        self.reporter.report(&ProgressEvent::BatchStarted { total });

        let mut reports = Vec::with_capacity(total);
        for (index, path) in paths.iter().enumerate() {
            let input = path.as_ref().to_path_buf();
            let result = self.process_job(&input);

            match &result {
                Err(JobError::NotFound(_)) => {
                    tracing::debug!(path = %input.display(), "Input not found, skipped");
                },
                Err(JobError::Processing { source, .. }) => {
                    tracing::error!(path = %input.display(), error = %source, "Job failed");
                    self.reporter.report(&ProgressEvent::JobFailed {
                        input: input.clone(),
                        message: source.to_string(),
                    });
                },
                Ok(_) => {},
            }
            self.reporter.report(&ProgressEvent::JobCompleted {
                completed: index + 1,
                total,
            });
            reports.push(JobReport { input, result });
        }

        let summary = BatchSummary {
            reports,
            elapsed: start.elapsed(),
        };
        tracing::info!(
            saved = summary.saved(),
            skipped = summary.skipped(),
            failed = summary.failed(),
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Batch finished"
        );
        self.reporter.report(&ProgressEvent::BatchFinished {
            saved: summary.saved(),
            skipped: summary.skipped(),
            failed: summary.failed(),
            elapsed: summary.elapsed,
        });
        summary
    }

    /// Process a single path
    ///
    /// Reports skip, start, save and removal events itself; failures are
    /// returned for the caller to report.
    ///
    /// # Errors
    /// - `JobError::NotFound` when the input is not an existing file
    /// - `JobError::Processing` when reading, segmenting, encoding, writing or
    ///   deleting fails
    pub fn process_job(&mut self, input: &Path) -> std::result::Result<JobOutcome, JobError> {
        let job = ImageJob::new(input, self.config.output_format);

        if !job.input_exists() {
            self.reporter.report(&ProgressEvent::JobSkipped {
                input: input.to_path_buf(),
            });
            return Err(JobError::NotFound(input.to_path_buf()));
        }

        let span = spans::file_processing(input, &self.config.output_format.to_string());
        let _guard = span.enter();
        let start = Instant::now();
        self.reporter.report(&ProgressEvent::JobStarted {
            input: input.to_path_buf(),
        });

        let bytes = self
            .render(&job)
            .map_err(|e| JobError::processing(input, e))?;
        ImageIOService::write_bytes(job.output(), &bytes)
            .map_err(|e| JobError::processing(input, e))?;
        self.reporter.report(&ProgressEvent::OutputSaved {
            output: job.output().to_path_buf(),
        });

        let removed_original = job.supersedes_original(&self.config);
        if removed_original {
            ImageIOService::remove_original(job.input())
                .map_err(|e| JobError::processing(input, e))?;
            self.reporter.report(&ProgressEvent::OriginalRemoved {
                input: input.to_path_buf(),
            });
        }

        log::debug!(
            "Processed {} -> {} in {}ms",
            input.display(),
            job.output().display(),
            start.elapsed().as_millis()
        );
        Ok(JobOutcome {
            output: job.output().to_path_buf(),
            removed_original,
        })
    }

    /// Produce the encoded output for a job
    fn render(&mut self, job: &ImageJob) -> Result<Vec<u8>> {
        let source = ImageIOService::read_bytes(job.input())?;
        let cutout = self.segmenter.segment(&source)?;

        match (self.config.compositing, self.config.output_format) {
            // Segmenters already produce PNG with alpha
            (CompositingMode::Transparent, OutputFormat::Png) => Ok(cutout),
            (CompositingMode::Transparent, format) => {
                let image = ImageIOService::load_from_bytes(&cutout)?;
                OutputFormatHandler::encode(&image, format, self.config.jpeg_quality)
            },
            (CompositingMode::Flatten(backdrop), format) => {
                let foreground = ImageIOService::load_from_bytes(&cutout)?.to_rgba8();
                let flat = BackdropCompositor::flatten(&foreground, backdrop);
                OutputFormatHandler::encode(
                    &DynamicImage::ImageRgb8(flat),
                    format,
                    self.config.jpeg_quality,
                )
            },
        }
    }
}
