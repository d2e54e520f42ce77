//! In-process engines for tests

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ConversionEngine, EngineError, EngineExit, EngineJob};

/// What a [`StubEngine`] does once its delay has passed
#[derive(Debug, Clone)]
pub enum StubBehavior {
    /// Write these bytes to the output path and exit 0
    Produce(Vec<u8>),
    /// Exit 0 without writing anything
    NoOutput,
    /// Exit with this code
    Exit(i32),
    /// Die from a signal
    Crash,
    /// Report the input as unreadable
    Reject(String),
    /// Fail before an exit status exists
    SpawnError,
    /// Panic inside the run
    Panic,
}

/// Scriptable engine that records how many runs overlapped
pub struct StubEngine {
    behavior: StubBehavior,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    last_input: Mutex<Option<PathBuf>>,
}

impl StubEngine {
    pub fn new(behavior: StubBehavior) -> Self {
        Self {
            behavior,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            last_input: Mutex::new(None),
        }
    }

    /// Engine that produces `bytes`
    pub fn producing(bytes: &[u8]) -> Self {
        Self::new(StubBehavior::Produce(bytes.to_vec()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Input path of the most recent run
    pub fn last_input(&self) -> Option<PathBuf> {
        self.last_input.lock().clone()
    }

    /// Highest number of simultaneous `run` calls seen
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight count even when the run is cancelled
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConversionEngine for StubEngine {
    fn name(&self) -> &str {
        "stub"
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn run(&self, job: &EngineJob) -> Result<EngineExit, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        assert_eq!(now, 1, "conversion engine entered concurrently");

        assert!(job.input.exists(), "input must be staged before the run");
        *self.last_input.lock() = Some(job.input.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match &self.behavior {
            StubBehavior::Produce(bytes) => {
                tokio::fs::write(&job.output, bytes)
                    .await
                    .map_err(|e| EngineError::Output(e.to_string()))?;
                Ok(EngineExit::Completed { code: 0 })
            }
            StubBehavior::NoOutput => Ok(EngineExit::Completed { code: 0 }),
            StubBehavior::Exit(code) => Ok(EngineExit::Completed { code: *code }),
            StubBehavior::Crash => Ok(EngineExit::Terminated),
            StubBehavior::Reject(reason) => Ok(EngineExit::Rejected(reason.clone())),
            StubBehavior::SpawnError => Err(EngineError::Spawn {
                engine: "stub".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            }),
            StubBehavior::Panic => panic!("stub engine blew up"),
        }
    }
}
