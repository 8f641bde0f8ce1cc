// Telemetry and plain-text log sinks
//
// The adapter never talks to a global logger; it is handed one of these at
// construction. Publishing is fire-and-forget: sinks swallow their own
// failures after warning about them.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};
use zenoh::Wait;

use crate::messages::{LoggableInputs, TelemetryValue};

/// Key-namespaced recorder for per-cycle values
pub trait TelemetrySink: Send + Sync {
    /// Record one output value under `key`
    fn record_output(&self, key: &str, value: TelemetryValue);

    /// Record every field of `inputs` under `key/<Field>`
    fn process_inputs(&self, key: &str, inputs: &dyn LoggableInputs) {
        for (field, value) in inputs.to_log() {
            self.record_output(&format!("{}/{}", key, field), value);
        }
    }
}

/// Sink for single human-readable log lines
pub trait LogSink: Send + Sync {
    fn log(&self, message: &str);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct Recorded {
    latest: BTreeMap<String, TelemetryValue>,
    history: Vec<(String, TelemetryValue)>,
}

/// In-memory telemetry sink keeping the latest value per key and the full
/// publication history
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    recorded: Mutex<Recorded>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest value recorded under `key`
    pub fn latest(&self, key: &str) -> Option<TelemetryValue> {
        lock(&self.recorded).latest.get(key).cloned()
    }

    /// Every (key, value) pair in publication order
    pub fn history(&self) -> Vec<(String, TelemetryValue)> {
        lock(&self.recorded).history.clone()
    }

    pub fn clear(&self) {
        let mut recorded = lock(&self.recorded);
        recorded.latest.clear();
        recorded.history.clear();
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn record_output(&self, key: &str, value: TelemetryValue) {
        let mut recorded = lock(&self.recorded);
        recorded.latest.insert(key.to_string(), value.clone());
        recorded.history.push((key.to_string(), value));
    }
}

/// Telemetry sink that emits each value as a `debug!` event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn record_output(&self, key: &str, value: TelemetryValue) {
        debug!(key, ?value, "telemetry");
    }
}

/// Telemetry sink publishing each value as JSON on `<prefix>/<key>`
pub struct ZenohTelemetry {
    session: zenoh::Session,
    prefix: String,
}

impl ZenohTelemetry {
    pub fn new(session: zenoh::Session, prefix: impl Into<String>) -> Self {
        Self {
            session,
            prefix: prefix.into(),
        }
    }

    fn topic(&self, key: &str) -> String {
        format!("{}/{}", self.prefix, key.trim_start_matches('/'))
    }
}

impl TelemetrySink for ZenohTelemetry {
    fn record_output(&self, key: &str, value: TelemetryValue) {
        let topic = self.topic(key);
        let payload = match serde_json::to_string(&value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode telemetry for {}: {}", topic, e);
                return;
            }
        };
        if let Err(e) = self.session.put(topic.as_str(), payload).wait() {
            warn!("Failed to publish telemetry on {}: {}", topic, e);
        }
    }
}

/// Log sink collecting lines in memory
#[derive(Debug, Default)]
pub struct RecordingLog {
    lines: Mutex<Vec<String>>,
}

impl RecordingLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        lock(&self.lines).clone()
    }
}

impl LogSink for RecordingLog {
    fn log(&self, message: &str) {
        lock(&self.lines).push(message.to_string());
    }
}

/// Log sink writing each line as an `info!` event on the `datalog` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl LogSink for TracingLog {
    fn log(&self, message: &str) {
        info!(target: "datalog", "{}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::SparkMaxInputs;

    #[test]
    fn test_recording_keeps_latest_and_history() {
        let sink = RecordingTelemetry::new();
        sink.record_output("Arm/OutputValue", 0.5.into());
        sink.record_output("Arm/OutputValue", 0.75.into());

        assert_eq!(
            sink.latest("Arm/OutputValue"),
            Some(TelemetryValue::Number(0.75))
        );
        assert_eq!(sink.history().len(), 2);
        assert_eq!(sink.latest("Arm/Current"), None);

        sink.clear();
        assert!(sink.history().is_empty());
    }

    #[test]
    fn test_process_inputs_namespaces_fields() {
        let sink = RecordingTelemetry::new();
        let inputs = SparkMaxInputs {
            analog_velocity: -2.0,
            forward_limit_switch: true,
            ..Default::default()
        };
        sink.process_inputs("Wrist", &inputs);

        let history = sink.history();
        assert_eq!(history.len(), 8);
        assert_eq!(
            sink.latest("Wrist/AnalogVelocity"),
            Some(TelemetryValue::Number(-2.0))
        );
        assert_eq!(
            sink.latest("Wrist/ForwardLimitSwitch"),
            Some(TelemetryValue::Boolean(true))
        );
    }

    #[test]
    fn test_recording_log() {
        let log = RecordingLog::new();
        log.log("first");
        log.log("second");
        assert_eq!(log.lines(), vec!["first".to_string(), "second".to_string()]);
    }
}
