//! Observability events and the sinks that consume them.
//!
//! The orchestrator reports every stage invocation and every transition as a
//! [`TelemetryEvent`] to the [`EventSink`] it was constructed with. Sinks are injected, never
//! global, so tests substitute a [`MemorySink`].

pub mod logger;
pub mod summary;

pub use logger::{RunManifest, TelemetryLog, TelemetryRun};
pub use summary::{QualityReport, TelemetrySummary, validate_events};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Analysis,
    Generation,
    Verification,
    Transition,
    Fault,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Generation => "generation",
            Self::Verification => "verification",
            Self::Transition => "transition",
            Self::Fault => "fault",
        }
    }

    /// Stage actions carry a meaningful input and output.
    pub fn is_stage_action(&self) -> bool {
        matches!(
            self,
            Self::Analysis | Self::Generation | Self::Verification
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Acting component, e.g. `detector:pylint` or `orchestrator`.
    pub component: String,
    pub action: ActionKind,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub output: Value,
    pub success: bool,
}

impl TelemetryEvent {
    pub fn new(
        component: impl Into<String>,
        action: ActionKind,
        input: Value,
        output: Value,
        success: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            component: component.into(),
            action,
            input,
            output,
            success,
        }
    }
}

/// Receives telemetry events. A failing sink never alters the run; the orchestrator only logs
/// the error.
pub trait EventSink: Send + Sync {
    fn record(&self, event: &TelemetryEvent) -> Result<()>;
}

/// Keeps events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|events| events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for MemorySink {
    fn record(&self, event: &TelemetryEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow::anyhow!("memory sink lock poisoned"))?
            .push(event.clone());
        Ok(())
    }
}

/// Forwards events to `tracing` under the `mend::telemetry` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: &TelemetryEvent) -> Result<()> {
        if event.success {
            tracing::debug!(
                target: "mend::telemetry",
                id = %event.id,
                component = %event.component,
                action = %event.action,
                output = %event.output,
                "event"
            );
        } else {
            tracing::info!(
                target: "mend::telemetry",
                id = %event.id,
                component = %event.component,
                action = %event.action,
                output = %event.output,
                "event failed"
            );
        }
        Ok(())
    }
}

/// Delivers each event to every inner sink, even when an earlier one fails.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn record(&self, event: &TelemetryEvent) -> Result<()> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.record(event)
                && first_err.is_none()
            {
                first_err = Some(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
