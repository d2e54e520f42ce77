//! Service lifecycle
//!
//! The converter is not safe for concurrent use and may be left in a broken
//! state by a failed call. This module owns the two facts that follow:
//!
//! - At most one conversion runs at a time. Callers must hold a
//!   [`ConversionPermit`], obtained from [`Lifecycle::acquire`].
//! - Once any conversion fails fatally the service is [`ServiceHealth::Quarantined`]
//!   for good. The flag is only written while the permit is held, so "start a
//!   conversion" and "observe quarantine" cannot race.
//!
//! After quarantine, the process is expected to exit once in-flight responses
//! are flushed (see [`crate::quarantine`]) and be restarted by its supervisor.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard, Notify};

use crate::invoker::ConversionOutcome;

/// Process-wide health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceHealth {
    /// Serving; the converter is trusted
    Alive,
    /// The converter may be corrupted; no further work is accepted
    Quarantined,
}

/// Health plus why and when it was lost
#[derive(Debug, Clone, Serialize)]
pub struct HealthRecord {
    pub health: ServiceHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quarantined_at: Option<DateTime<Utc>>,
}

impl HealthRecord {
    fn alive() -> Self {
        Self {
            health: ServiceHealth::Alive,
            reason: None,
            quarantined_at: None,
        }
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Conversion lock, health flag and exit request
pub struct Lifecycle {
    /// Serializes conversions; guards writes to `health`
    slot: Mutex<()>,
    health: RwLock<HealthRecord>,
    /// Raised by the post-response hook once quarantined
    exit: Notify,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(()),
            health: RwLock::new(HealthRecord::alive()),
            exit: Notify::new(),
        }
    }

    /// Wait for the conversion slot.
    ///
    /// Returns `None` when the service is (or became, while waiting)
    /// quarantined; no conversion may start after that.
    pub async fn acquire(&self) -> Option<ConversionPermit<'_>> {
        let guard = self.slot.lock().await;
        if self.is_quarantined() {
            return None;
        }
        Some(ConversionPermit {
            _guard: guard,
            lifecycle: self,
        })
    }

    /// Quarantine from outside a conversion (unexpected errors, panics)
    pub async fn quarantine(&self, reason: &str) {
        let _guard = self.slot.lock().await;
        self.set_quarantined(reason);
    }

    /// Never waits on a running conversion
    pub fn is_quarantined(&self) -> bool {
        self.health.read().health == ServiceHealth::Quarantined
    }

    pub fn health(&self) -> ServiceHealth {
        self.health.read().health
    }

    pub fn record(&self) -> HealthRecord {
        self.health.read().clone()
    }

    /// Ask the server to shut down; a no-op while alive
    pub fn request_exit(&self) {
        if self.is_quarantined() {
            self.exit.notify_one();
        }
    }

    /// Resolves once an exit has been requested
    pub async fn exit_requested(&self) {
        self.exit.notified().await;
    }

    /// Callers must hold `slot`
    fn set_quarantined(&self, reason: &str) -> bool {
        let mut record = self.health.write();
        if record.health == ServiceHealth::Quarantined {
            return false;
        }

        *record = HealthRecord {
            health: ServiceHealth::Quarantined,
            reason: Some(reason.to_string()),
            quarantined_at: Some(Utc::now()),
        };

        tracing::error!(reason = %reason, "Converter state is untrusted, service quarantined");
        true
    }
}

// ============================================================================
// Conversion Permit
// ============================================================================

/// Exclusive right to run the converter
pub struct ConversionPermit<'a> {
    _guard: MutexGuard<'a, ()>,
    lifecycle: &'a Lifecycle,
}

impl ConversionPermit<'_> {
    /// Feed a conversion result into the state machine.
    /// Returns true if this outcome quarantined the service.
    pub fn observe(&self, outcome: &ConversionOutcome) -> bool {
        match outcome {
            ConversionOutcome::FatalFailure(reason) => self.mark_fatal(&reason.to_string()),
            _ => false,
        }
    }

    /// Quarantine the service; later calls keep the first reason
    pub fn mark_fatal(&self, reason: &str) -> bool {
        self.lifecycle.set_quarantined(reason)
    }
}
