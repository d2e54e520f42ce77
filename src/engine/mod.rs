//! Conversion Engines
//!
//! The external converter is a black box behind [`ConversionEngine`]. The
//! invoker decides how long a run may take and what its result means; an
//! engine only runs the conversion and reports how it ended.
//!
//! ## Cancellation
//!
//! The invoker enforces its timeout by dropping the future returned by
//! [`ConversionEngine::run`]. Implementations must make that drop terminate
//! the external process (e.g. `kill_on_drop`), otherwise a hung converter
//! survives its request.

mod soffice;

#[cfg(test)]
pub(crate) mod testing;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::formats::ExportFormat;

pub use soffice::{SofficeConfig, SofficeEngine};

/// One conversion handed to an engine
#[derive(Debug, Clone)]
pub struct EngineJob {
    /// Staged upload; the extension selects the engine's input filter
    pub input: PathBuf,
    /// Requested export type
    pub format: ExportFormat,
    /// Where the engine must leave the converted document
    pub output: PathBuf,
}

/// How an engine run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineExit {
    /// The process exited on its own with this code
    Completed { code: i32 },
    /// The process was killed by a signal (crash, OOM killer, ...)
    Terminated,
    /// The engine cleanly reported that it cannot read the input
    Rejected(String),
}

/// Engine errors (the run never produced an exit status)
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Failed to spawn {engine}: {source}")]
    Spawn {
        engine: String,
        source: std::io::Error,
    },

    #[error("Failed to wait for {engine}: {source}")]
    Wait {
        engine: String,
        source: std::io::Error,
    },

    #[error("Failed to collect engine output: {0}")]
    Output(String),
}

/// External document converter
#[async_trait]
pub trait ConversionEngine: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Check if the engine can be started at all
    async fn is_available(&self) -> bool;

    /// Convert `job.input` into `job.output`
    async fn run(&self, job: &EngineJob) -> Result<EngineExit, EngineError>;
}
