// SPARK MAX device driver boundary
//
// Everything the adapter needs from a motor controller driver, expressed as two
// traits: a bus that hands out device handles and the handle itself. Real CAN
// drivers and the in-process simulator both implement these.

use serde::{Deserialize, Serialize};

/// Motor electrical type connected to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum MotorType {
    Brushed,
    Brushless,
}

/// Behaviour of the motor when commanded output is zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum IdleMode {
    Coast,
    Brake,
}

/// Physical quantity a reference commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ControlType {
    DutyCycle,
    Velocity,
    Voltage,
    Position,
    SmartMotion,
    Current,
    SmartVelocity,
}

impl ControlType {
    /// Vendor constant name, used as the telemetry value for the output mode
    pub fn name(self) -> &'static str {
        match self {
            ControlType::DutyCycle => "kDutyCycle",
            ControlType::Velocity => "kVelocity",
            ControlType::Voltage => "kVoltage",
            ControlType::Position => "kPosition",
            ControlType::SmartMotion => "kSmartMotion",
            ControlType::Current => "kCurrent",
            ControlType::SmartVelocity => "kSmartVelocity",
        }
    }
}

/// Units of the arbitrary feed-forward term
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArbFfUnits {
    #[default]
    Voltage,
    PercentOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LimitDirection {
    Forward,
    Reverse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LimitSwitchPolarity {
    NormallyOpen,
    NormallyClosed,
}

/// How the analog input reports position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalogMode {
    Absolute,
    Relative,
}

/// Absolute encoder interface on the data port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbsoluteEncoderType {
    DutyCycle,
}

/// A concrete sensor on the controller that can be read, scaled, or used as
/// the closed-loop feedback device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorHandle {
    /// Built-in hall encoder of a brushless motor (rotations, RPM)
    Encoder,
    /// Analog input (volts, volts per second)
    Analog(AnalogMode),
    /// Absolute encoder on the data port (rotations, RPM)
    AbsoluteEncoder(AbsoluteEncoderType),
}

/// Default PID slot for references that don't name one
pub const DEFAULT_PID_SLOT: u8 = 0;

/// One closed-loop (or open-loop) reference sent to the controller
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub value: f64,
    pub ctrl: ControlType,
    pub slot: u8,
    pub arb_feedforward: f64,
    pub arb_ff_units: ArbFfUnits,
}

impl Reference {
    /// Reference with the controller's defaults: slot 0, no feed-forward
    pub fn new(value: f64, ctrl: ControlType) -> Self {
        Self {
            value,
            ctrl,
            slot: DEFAULT_PID_SLOT,
            arb_feedforward: 0.0,
            arb_ff_units: ArbFfUnits::Voltage,
        }
    }
}

/// Gains stored in one PID slot
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PidGains {
    pub p: f64,
    pub i: f64,
    pub d: f64,
    pub ff: f64,
    pub izone: f64,
}

/// Smart Motion profile limits for one PID slot
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SmartMotionLimits {
    pub max_velocity: f64,
    pub max_acceleration: f64,
    pub allowed_error: f64,
}

/// Errors reported by a motor controller driver
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeviceError {
    #[error("CAN bus error on device {id}: {reason}")]
    Bus { id: u8, reason: String },

    #[error("No device found at CAN id {id}")]
    NotFound { id: u8 },

    #[error("Device {id} is already owned by another handle")]
    InUse { id: u8 },

    #[error("Invalid configuration for device {id}: {reason}")]
    InvalidConfig { id: u8, reason: String },

    #[error("Device {id} handle has been closed")]
    Closed { id: u8 },
}

pub type Result<T> = std::result::Result<T, DeviceError>;

/// A bus that hands out device handles by CAN id
pub trait SparkBus {
    type Device: SparkDevice;

    /// Acquire the handle for the controller at `can_id`
    fn open(&mut self, can_id: u8, motor_type: MotorType) -> Result<Self::Device>;
}

/// An open handle to one motor controller.
///
/// Every call is a synchronous round trip; errors come straight from the bus.
pub trait SparkDevice {
    fn can_id(&self) -> u8;

    fn restore_factory_defaults(&mut self) -> Result<()>;
    fn enable_voltage_compensation(&mut self, nominal_voltage: f64) -> Result<()>;

    /// Position of `sensor`, native units times its position conversion factor
    fn position(&mut self, sensor: SensorHandle) -> Result<f64>;
    /// Velocity of `sensor`, native units times its velocity conversion factor
    fn velocity(&mut self, sensor: SensorHandle) -> Result<f64>;
    fn set_position_conversion_factor(&mut self, sensor: SensorHandle, factor: f64) -> Result<()>;
    fn set_velocity_conversion_factor(&mut self, sensor: SensorHandle, factor: f64) -> Result<()>;
    /// Overwrite the built-in encoder's position counter
    fn set_encoder_position(&mut self, position: f64) -> Result<()>;

    fn limit_switch_pressed(
        &mut self,
        direction: LimitDirection,
        polarity: LimitSwitchPolarity,
    ) -> Result<bool>;
    fn enable_limit_switch(
        &mut self,
        direction: LimitDirection,
        polarity: LimitSwitchPolarity,
        enabled: bool,
    ) -> Result<()>;

    fn set_reference(&mut self, reference: Reference) -> Result<()>;

    fn set_pid_wrapping_enabled(&mut self, enabled: bool) -> Result<()>;
    fn set_pid_wrapping_min_input(&mut self, min_input: f64) -> Result<()>;
    fn set_pid_wrapping_max_input(&mut self, max_input: f64) -> Result<()>;

    // Closed-loop setup
    fn set_inverted(&mut self, inverted: bool) -> Result<()>;
    fn set_feedback_device(&mut self, sensor: SensorHandle) -> Result<()>;
    fn set_sensor_inverted(&mut self, sensor: SensorHandle, inverted: bool) -> Result<()>;
    fn set_pid_gains(&mut self, slot: u8, gains: PidGains) -> Result<()>;
    fn set_output_range(&mut self, slot: u8, min: f64, max: f64) -> Result<()>;
    fn set_smart_motion(&mut self, slot: u8, limits: SmartMotionLimits) -> Result<()>;
    fn set_soft_limit(&mut self, direction: LimitDirection, limit: f64) -> Result<()>;
    fn enable_soft_limit(&mut self, direction: LimitDirection, enabled: bool) -> Result<()>;

    fn set_idle_mode(&mut self, mode: IdleMode) -> Result<()>;
    fn set_smart_current_limit(&mut self, amps: u32) -> Result<()>;
    /// Instantaneous output current in amps
    fn output_current(&mut self) -> Result<f64>;

    /// Command zero output; the device stays enabled
    fn stop_motor(&mut self) -> Result<()>;
    /// Release the handle
    fn close(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_type_names() {
        assert_eq!(ControlType::DutyCycle.name(), "kDutyCycle");
        assert_eq!(ControlType::SmartMotion.name(), "kSmartMotion");
        assert_eq!(ControlType::SmartVelocity.name(), "kSmartVelocity");
    }

    #[test]
    fn test_reference_defaults() {
        let reference = Reference::new(0.5, ControlType::Velocity);
        assert_eq!(reference.slot, 0);
        assert_eq!(reference.arb_feedforward, 0.0);
        assert_eq!(reference.arb_ff_units, ArbFfUnits::Voltage);
    }

    #[test]
    fn test_error_messages() {
        let err = DeviceError::NotFound { id: 12 };
        assert_eq!(err.to_string(), "No device found at CAN id 12");

        let err = DeviceError::Bus {
            id: 3,
            reason: "timeout".to_string(),
        };
        assert_eq!(err.to_string(), "CAN bus error on device 3: timeout");
    }
}
