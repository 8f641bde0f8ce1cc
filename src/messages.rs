// Telemetry message types
//
// Values the adapter publishes each cycle and the per-cycle sensor snapshot.

use serde::{Deserialize, Serialize};

/// A single scalar published to a telemetry sink
// untagged so sinks that serialize to JSON publish bare numbers/bools/strings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TelemetryValue {
    Number(f64),
    Boolean(bool),
    Text(String),
}

impl From<f64> for TelemetryValue {
    fn from(value: f64) -> Self {
        TelemetryValue::Number(value)
    }
}

impl From<bool> for TelemetryValue {
    fn from(value: bool) -> Self {
        TelemetryValue::Boolean(value)
    }
}

impl From<&str> for TelemetryValue {
    fn from(value: &str) -> Self {
        TelemetryValue::Text(value.to_string())
    }
}

impl From<String> for TelemetryValue {
    fn from(value: String) -> Self {
        TelemetryValue::Text(value)
    }
}

/// A structured input record that can be flattened into named fields
pub trait LoggableInputs {
    /// Field names and current values, in a stable order
    fn to_log(&self) -> Vec<(&'static str, TelemetryValue)>;
}

/// Sensor readings captured once per control cycle
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SparkMaxInputs {
    pub encoder_position: f64,
    pub encoder_velocity: f64,
    pub analog_position: f64,
    pub analog_velocity: f64,
    pub absolute_encoder_position: f64,
    pub absolute_encoder_velocity: f64,
    pub forward_limit_switch: bool,
    pub reverse_limit_switch: bool,
}

impl LoggableInputs for SparkMaxInputs {
    fn to_log(&self) -> Vec<(&'static str, TelemetryValue)> {
        vec![
            ("EncoderPosition", self.encoder_position.into()),
            ("EncoderVelocity", self.encoder_velocity.into()),
            ("AnalogPosition", self.analog_position.into()),
            ("AnalogVelocity", self.analog_velocity.into()),
            ("AbsoluteEncoderPosition", self.absolute_encoder_position.into()),
            ("AbsoluteEncoderVelocity", self.absolute_encoder_velocity.into()),
            ("ForwardLimitSwitch", self.forward_limit_switch.into()),
            ("ReverseLimitSwitch", self.reverse_limit_switch.into()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inputs_default_to_zero() {
        let inputs = SparkMaxInputs::default();
        assert_eq!(inputs.encoder_position, 0.0);
        assert_eq!(inputs.absolute_encoder_velocity, 0.0);
        assert!(!inputs.forward_limit_switch);
        assert!(!inputs.reverse_limit_switch);
    }

    #[test]
    fn test_inputs_log_all_fields() {
        let inputs = SparkMaxInputs {
            encoder_position: 1.5,
            reverse_limit_switch: true,
            ..Default::default()
        };
        let fields = inputs.to_log();
        assert_eq!(fields.len(), 8);
        assert_eq!(fields[0], ("EncoderPosition", TelemetryValue::Number(1.5)));
        assert_eq!(fields[7], ("ReverseLimitSwitch", TelemetryValue::Boolean(true)));
    }

    #[test]
    fn test_value_serializes_untagged() {
        let json = serde_json::to_string(&TelemetryValue::from("kVelocity")).unwrap();
        assert_eq!(json, "\"kVelocity\"");
        let json = serde_json::to_string(&TelemetryValue::from(0.25)).unwrap();
        assert_eq!(json, "0.25");
    }
}
