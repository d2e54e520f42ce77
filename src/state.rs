//! Application state management

use std::sync::Arc;

use crate::config::Config;
use crate::engine::{ConversionEngine, SofficeConfig, SofficeEngine};
use crate::invoker::ConversionInvoker;
use crate::lifecycle::Lifecycle;
use crate::scratch::{ScratchDir, ScratchError};

/// Error type for state initialization
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Failed to prepare scratch space: {0}")]
    Scratch(#[from] ScratchError),
}

/// Shared application state.
///
/// Built once at startup and handed to the router; there is exactly one
/// invoker and one lifecycle per process.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    scratch: ScratchDir,
    invoker: ConversionInvoker,
    lifecycle: Lifecycle,
}

impl AppState {
    /// Create state backed by the soffice engine
    pub fn new(config: Config) -> Result<Self, StateError> {
        let engine = SofficeEngine::new(SofficeConfig {
            soffice_path: config.converter.engine_path.clone(),
            profile_dir: config.converter.profile_dir.clone(),
        });
        Self::with_engine(config, Arc::new(engine))
    }

    /// Create state around any engine
    pub fn with_engine(
        config: Config,
        engine: Arc<dyn ConversionEngine>,
    ) -> Result<Self, StateError> {
        let scratch = ScratchDir::new(&config.converter.work_dir)?;
        let invoker = ConversionInvoker::new(engine, scratch.root())
            .with_trusted_rejections(config.converter.trust_content_rejections);

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                scratch,
                invoker,
                lifecycle: Lifecycle::new(),
            }),
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the scratch-file allocator
    pub fn scratch(&self) -> &ScratchDir {
        &self.inner.scratch
    }

    /// Get the conversion invoker
    pub fn invoker(&self) -> &ConversionInvoker {
        &self.inner.invoker
    }

    /// Get the lifecycle controller
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.inner.lifecycle
    }
}
