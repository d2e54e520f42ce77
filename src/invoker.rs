//! Conversion Invoker
//!
//! Runs one engine call under a [`ConversionPermit`] with a hard timeout and
//! classifies the result. Almost every failure is fatal: the engine keeps
//! state between calls and gives no guarantee that a failed call left it
//! usable.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::engine::{ConversionEngine, EngineExit, EngineJob};
use crate::formats::ExportFormat;
use crate::lifecycle::ConversionPermit;

/// Basename of the converter's output; the engine always writes here
pub const OUTPUT_BASENAME: &str = "output";

// ============================================================================
// Outcomes
// ============================================================================

/// Classified result of one conversion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionOutcome {
    /// Non-empty output at `output`
    Success {
        output: PathBuf,
        mime_type: &'static str,
    },
    /// The input could not be converted and the engine is known to be fine
    RecoverableFailure(String),
    /// The engine can no longer be trusted
    FatalFailure(FatalReason),
}

/// Why a conversion was fatal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FatalReason {
    TimedOut { timeout_ms: u64 },
    Crashed,
    ExitStatus(i32),
    MissingOutput,
    /// The engine reported unreadable content; untrusted by configuration
    Rejected(String),
    Engine(String),
}

impl FatalReason {
    /// Content problems are reported to the client as such (400)
    pub fn is_content_related(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

impl fmt::Display for FatalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut { timeout_ms } => {
                write!(f, "conversion timed out after {} ms", timeout_ms)
            }
            Self::Crashed => f.write_str("converter was terminated by a signal"),
            Self::ExitStatus(code) => write!(f, "converter exited with status {}", code),
            Self::MissingOutput => f.write_str("converter produced no output"),
            Self::Rejected(reason) => write!(f, "could not convert document: {}", reason),
            Self::Engine(reason) => write!(f, "converter failed: {}", reason),
        }
    }
}

// ============================================================================
// Invoker
// ============================================================================

/// Serialized, timed access to the conversion engine
#[derive(Clone)]
pub struct ConversionInvoker {
    engine: Arc<dyn ConversionEngine>,
    work_dir: PathBuf,
    /// Classify engine rejections as recoverable instead of fatal
    trust_rejections: bool,
}

impl ConversionInvoker {
    pub fn new(engine: Arc<dyn ConversionEngine>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            work_dir: work_dir.into(),
            trust_rejections: false,
        }
    }

    pub fn with_trusted_rejections(mut self, trust: bool) -> Self {
        self.trust_rejections = trust;
        self
    }

    pub fn engine(&self) -> &dyn ConversionEngine {
        self.engine.as_ref()
    }

    /// The well-known output path for `format`
    pub fn output_path(&self, format: ExportFormat) -> PathBuf {
        self.work_dir
            .join(format!("{}.{}", OUTPUT_BASENAME, format.extension()))
    }

    /// Convert `input` to `format`, killing the engine after `timeout`.
    ///
    /// The permit is what makes this call exclusive; it also means the output
    /// path stays ours until the caller drops it.
    pub async fn convert(
        &self,
        _permit: &ConversionPermit<'_>,
        input: &Path,
        format: ExportFormat,
        timeout: Duration,
    ) -> ConversionOutcome {
        let job = EngineJob {
            input: input.to_path_buf(),
            format,
            output: self.output_path(format),
        };
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);

        tracing::debug!(
            engine = self.engine.name(),
            input = %job.input.display(),
            output = %job.output.display(),
            timeout_ms,
            "Invoking converter"
        );

        let started = Instant::now();
        let result = tokio::time::timeout(timeout, self.engine.run(&job)).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let outcome = match result {
            // The run future was dropped, which kills the engine process
            Err(_) => ConversionOutcome::FatalFailure(FatalReason::TimedOut { timeout_ms }),
            Ok(Err(e)) => ConversionOutcome::FatalFailure(FatalReason::Engine(e.to_string())),
            Ok(Ok(exit)) => self.classify(exit, &job).await,
        };

        match &outcome {
            ConversionOutcome::Success { .. } => {
                tracing::info!(elapsed_ms, format = %format, "Conversion succeeded")
            }
            ConversionOutcome::RecoverableFailure(reason) => {
                tracing::warn!(elapsed_ms, reason = %reason, "Conversion rejected input")
            }
            ConversionOutcome::FatalFailure(reason) => {
                tracing::error!(elapsed_ms, reason = %reason, "Conversion failed fatally")
            }
        }

        outcome
    }

    async fn classify(&self, exit: EngineExit, job: &EngineJob) -> ConversionOutcome {
        match exit {
            EngineExit::Completed { code: 0 } => match tokio::fs::metadata(&job.output).await {
                Ok(meta) if meta.is_file() && meta.len() > 0 => ConversionOutcome::Success {
                    output: job.output.clone(),
                    mime_type: job.format.mime_type(),
                },
                _ => ConversionOutcome::FatalFailure(FatalReason::MissingOutput),
            },
            EngineExit::Completed { code } => {
                ConversionOutcome::FatalFailure(FatalReason::ExitStatus(code))
            }
            EngineExit::Terminated => ConversionOutcome::FatalFailure(FatalReason::Crashed),
            EngineExit::Rejected(reason) if self.trust_rejections => {
                ConversionOutcome::RecoverableFailure(reason)
            }
            EngineExit::Rejected(reason) => {
                ConversionOutcome::FatalFailure(FatalReason::Rejected(reason))
            }
        }
    }
}
