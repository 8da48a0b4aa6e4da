//! Telemetry sink passed explicitly to the server and dispatcher.
//!
//! Call sites record named counters and gauges through [`Telemetry`] instead
//! of reaching for process-wide singletons. [`TracingTelemetry`] keeps the
//! values in memory and mirrors every update as a `tracing` event, so the
//! numbers show up in the stderr log at `trace` level.

use std::collections::BTreeMap;
use std::sync::Mutex;

use tracing::Level;

/// A key/value tag attached to a counter or log line.
pub type Tag<'a> = (&'a str, &'a str);

/// Sink for counters, gauges, and structured log lines.
pub trait Telemetry: Send + Sync {
    /// Adds one to the counter `name`, qualified by `tags`.
    fn increment(&self, name: &str, tags: &[Tag<'_>]);

    /// Sets the gauge `name` to `value`.
    fn gauge(&self, name: &str, value: f64);

    /// Emits a structured log line.
    fn log(&self, level: Level, message: &str, fields: &[Tag<'_>]) {
        let fields = render_tags(fields);
        match level {
            Level::ERROR => tracing::error!(fields = %fields, "{message}"),
            Level::WARN => tracing::warn!(fields = %fields, "{message}"),
            Level::INFO => tracing::info!(fields = %fields, "{message}"),
            Level::DEBUG => tracing::debug!(fields = %fields, "{message}"),
            Level::TRACE => tracing::trace!(fields = %fields, "{message}"),
        }
    }
}

/// Builds the storage key for a tagged counter: `name{k=v,k=v}`.
#[must_use]
pub fn metric_key(name: &str, tags: &[Tag<'_>]) -> String {
    if tags.is_empty() {
        return name.to_string();
    }
    format!("{name}{{{}}}", render_tags(tags))
}

fn render_tags(tags: &[Tag<'_>]) -> String {
    tags.iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Default)]
struct Registry {
    counters: BTreeMap<String, u64>,
    gauges: BTreeMap<String, f64>,
}

/// In-process telemetry that also reports through `tracing`.
#[derive(Default)]
pub struct TracingTelemetry {
    registry: Mutex<Registry>,
}

impl TracingTelemetry {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter (zero if never incremented).
    #[must_use]
    pub fn counter(&self, name: &str, tags: &[Tag<'_>]) -> u64 {
        let key = metric_key(name, tags);
        self.registry
            .lock()
            .map_or(0, |r| r.counters.get(&key).copied().unwrap_or(0))
    }

    /// Current value of a gauge, if ever set.
    #[must_use]
    pub fn gauge_value(&self, name: &str) -> Option<f64> {
        self.registry
            .lock()
            .ok()
            .and_then(|r| r.gauges.get(name).copied())
    }
}

impl Telemetry for TracingTelemetry {
    fn increment(&self, name: &str, tags: &[Tag<'_>]) {
        let key = metric_key(name, tags);
        let value = match self.registry.lock() {
            Ok(mut r) => {
                let counter = r.counters.entry(key.clone()).or_insert(0);
                *counter += 1;
                *counter
            }
            Err(_) => return,
        };
        tracing::trace!(metric = %key, value, "counter");
    }

    fn gauge(&self, name: &str, value: f64) {
        if let Ok(mut r) = self.registry.lock() {
            r.gauges.insert(name.to_string(), value);
        }
        tracing::trace!(metric = name, value, "gauge");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_keyed_by_tags() {
        let telemetry = TracingTelemetry::new();
        telemetry.increment("dispatch.end", &[("tool", "a"), ("outcome", "ok")]);
        telemetry.increment("dispatch.end", &[("tool", "a"), ("outcome", "ok")]);
        telemetry.increment("dispatch.end", &[("tool", "a"), ("outcome", "error")]);

        assert_eq!(
            telemetry.counter("dispatch.end", &[("tool", "a"), ("outcome", "ok")]),
            2
        );
        assert_eq!(
            telemetry.counter("dispatch.end", &[("tool", "a"), ("outcome", "error")]),
            1
        );
        assert_eq!(telemetry.counter("dispatch.start", &[]), 0);
    }

    #[test]
    fn gauge_keeps_last_value() {
        let telemetry = TracingTelemetry::new();
        assert_eq!(telemetry.gauge_value("dispatch.in_flight"), None);
        telemetry.gauge("dispatch.in_flight", 3.0);
        telemetry.gauge("dispatch.in_flight", 1.0);
        assert_eq!(telemetry.gauge_value("dispatch.in_flight"), Some(1.0));
    }

    #[test]
    fn metric_key_format() {
        assert_eq!(metric_key("x", &[]), "x");
        assert_eq!(metric_key("x", &[("a", "1"), ("b", "2")]), "x{a=1,b=2}");
    }
}
