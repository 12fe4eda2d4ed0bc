//! Aggregates and data-quality checks over recorded telemetry.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

use super::{ActionKind, TelemetryEvent};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComponentStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl ComponentStats {
    /// Percentage of successful events, 0 when there are none.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.total as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TelemetrySummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub by_component: BTreeMap<String, ComponentStats>,
    pub by_action: BTreeMap<ActionKind, usize>,
    pub first_at: Option<DateTime<Utc>>,
    pub last_at: Option<DateTime<Utc>>,
}

impl TelemetrySummary {
    pub fn from_events(events: &[TelemetryEvent]) -> Self {
        let mut summary = Self::default();
        for event in events {
            summary.total += 1;
            let stats = summary
                .by_component
                .entry(event.component.clone())
                .or_default();
            stats.total += 1;
            if event.success {
                summary.succeeded += 1;
                stats.succeeded += 1;
            } else {
                summary.failed += 1;
                stats.failed += 1;
            }
            *summary.by_action.entry(event.action).or_default() += 1;

            summary.first_at = Some(match summary.first_at {
                Some(first) => first.min(event.timestamp),
                None => event.timestamp,
            });
            summary.last_at = Some(match summary.last_at {
                Some(last) => last.max(event.timestamp),
                None => event.timestamp,
            });
        }
        summary
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.total as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QualityReport {
    /// Problems that make the log unreliable.
    pub issues: Vec<String>,
    /// Oddities worth a look.
    pub warnings: Vec<String>,
}

impl QualityReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Check a recorded event stream for data-quality problems.
pub fn validate_events(events: &[TelemetryEvent]) -> QualityReport {
    let mut report = QualityReport::default();
    let mut seen = HashSet::new();

    for (i, event) in events.iter().enumerate() {
        if !seen.insert(event.id) {
            report
                .issues
                .push(format!("Entry {i} reuses event id {}", event.id));
        }
        if event.component.trim().is_empty() {
            report.issues.push(format!("Entry {i} has no component"));
        }
        if event.action.is_stage_action() {
            if event.input.is_null() {
                report
                    .issues
                    .push(format!("Entry {i} (action={}) missing input", event.action));
            }
            if event.output.is_null() {
                report
                    .issues
                    .push(format!("Entry {i} (action={}) missing output", event.action));
            }
        }
    }

    if events
        .windows(2)
        .any(|pair| pair[1].timestamp < pair[0].timestamp)
    {
        report
            .warnings
            .push("Log entries are not in chronological order".to_string());
    }
    if !events.is_empty() && !events.iter().any(|e| e.action == ActionKind::Analysis) {
        report
            .warnings
            .push("No analysis events recorded".to_string());
    }

    report
}
