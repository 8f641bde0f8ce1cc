// Closed-loop configuration for the controller's onboard PID
//
// The adapter doesn't know about gains. It resolves which sensor feeds the
// loop and hands the device to a PidConfigurator, which programs the firmware.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::device::{
    DeviceError, LimitDirection, LimitSwitchPolarity, PidGains, Result, SensorHandle,
    SmartMotionLimits, SparkDevice, DEFAULT_PID_SLOT,
};

/// Programs a device's onboard closed-loop controller
pub trait PidConfigurator {
    fn initialize_spark_pid(
        &self,
        spark: &mut dyn SparkDevice,
        feedback_sensor: SensorHandle,
        forward_limit_switch: bool,
        reverse_limit_switch: bool,
    ) -> Result<()>;
}

/// Smart Motion profile parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmartMotionConfig {
    pub max_velocity: f64,
    pub max_acceleration: f64,
}

/// Gain set and limits for one PID slot, loadable from JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparkPidConfig {
    /// Invert the external feedback sensor
    #[serde(default)]
    pub sensor_phase: bool,
    #[serde(default)]
    pub invert_motor: bool,
    pub kp: f64,
    #[serde(default)]
    pub ki: f64,
    #[serde(default)]
    pub kd: f64,
    #[serde(default)]
    pub kf: f64,
    #[serde(default)]
    pub izone: f64,
    /// Allowed closed-loop error, in feedback sensor units
    #[serde(default)]
    pub tolerance: f64,
    #[serde(default)]
    pub lower_limit: f64,
    #[serde(default)]
    pub upper_limit: f64,
    /// Enable soft limits at `lower_limit`/`upper_limit`
    #[serde(default)]
    pub soft_limits: bool,
    #[serde(default)]
    pub smart_motion: Option<SmartMotionConfig>,
    #[serde(default)]
    pub slot: u8,
}

impl SparkPidConfig {
    pub fn new(kp: f64, ki: f64, kd: f64, kf: f64) -> Self {
        Self {
            sensor_phase: false,
            invert_motor: false,
            kp,
            ki,
            kd,
            kf,
            izone: 0.0,
            tolerance: 0.0,
            lower_limit: 0.0,
            upper_limit: 0.0,
            soft_limits: false,
            smart_motion: None,
            slot: DEFAULT_PID_SLOT,
        }
    }

    pub fn with_inversion(mut self, sensor_phase: bool, invert_motor: bool) -> Self {
        self.sensor_phase = sensor_phase;
        self.invert_motor = invert_motor;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_soft_limits(mut self, lower_limit: f64, upper_limit: f64) -> Self {
        self.lower_limit = lower_limit;
        self.upper_limit = upper_limit;
        self.soft_limits = true;
        self
    }

    pub fn with_smart_motion(mut self, max_velocity: f64, max_acceleration: f64) -> Self {
        self.smart_motion = Some(SmartMotionConfig {
            max_velocity,
            max_acceleration,
        });
        self
    }

    pub fn with_slot(mut self, slot: u8) -> Self {
        self.slot = slot;
        self
    }

    fn gains(&self) -> PidGains {
        PidGains {
            p: self.kp,
            i: self.ki,
            d: self.kd,
            ff: self.kf,
            izone: self.izone,
        }
    }

    /// Reject settings the firmware would accept but that make no sense
    fn validate(&self, id: u8) -> Result<()> {
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(DeviceError::InvalidConfig {
                id,
                reason: format!("tolerance must be non-negative, got {}", self.tolerance),
            });
        }
        if self.soft_limits && self.lower_limit > self.upper_limit {
            return Err(DeviceError::InvalidConfig {
                id,
                reason: format!(
                    "lower soft limit {} is above upper soft limit {}",
                    self.lower_limit, self.upper_limit
                ),
            });
        }
        Ok(())
    }
}

impl PidConfigurator for SparkPidConfig {
    fn initialize_spark_pid(
        &self,
        spark: &mut dyn SparkDevice,
        feedback_sensor: SensorHandle,
        forward_limit_switch: bool,
        reverse_limit_switch: bool,
    ) -> Result<()> {
        self.validate(spark.can_id())?;
        debug!(
            "Programming PID slot {} on device {} from {:?}",
            self.slot,
            spark.can_id(),
            feedback_sensor
        );

        spark.set_inverted(self.invert_motor)?;
        spark.set_feedback_device(feedback_sensor)?;
        // Built-in encoder phase follows the motor
        if feedback_sensor != SensorHandle::Encoder {
            spark.set_sensor_inverted(feedback_sensor, self.sensor_phase)?;
        }

        spark.set_pid_gains(self.slot, self.gains())?;
        spark.set_output_range(self.slot, -1.0, 1.0)?;

        if let Some(smart_motion) = self.smart_motion {
            spark.set_smart_motion(
                self.slot,
                SmartMotionLimits {
                    max_velocity: smart_motion.max_velocity,
                    max_acceleration: smart_motion.max_acceleration,
                    allowed_error: self.tolerance,
                },
            )?;
        }

        if self.soft_limits {
            spark.set_soft_limit(LimitDirection::Forward, self.upper_limit)?;
            spark.set_soft_limit(LimitDirection::Reverse, self.lower_limit)?;
        }
        spark.enable_soft_limit(LimitDirection::Forward, self.soft_limits)?;
        spark.enable_soft_limit(LimitDirection::Reverse, self.soft_limits)?;

        spark.enable_limit_switch(
            LimitDirection::Forward,
            LimitSwitchPolarity::NormallyOpen,
            forward_limit_switch,
        )?;
        spark.enable_limit_switch(
            LimitDirection::Reverse,
            LimitSwitchPolarity::NormallyOpen,
            reverse_limit_switch,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::device::{AnalogMode, MotorType, SparkBus};
    use crate::motor::sim::SimBus;

    #[test]
    fn test_parse_from_json() {
        let json = r#"{
            "kp": 0.1,
            "kd": 0.02,
            "tolerance": 0.5,
            "soft_limits": true,
            "lower_limit": -10.0,
            "upper_limit": 90.0,
            "smart_motion": { "max_velocity": 2000.0, "max_acceleration": 1500.0 }
        }"#;
        let config: SparkPidConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.kp, 0.1);
        assert_eq!(config.ki, 0.0);
        assert_eq!(config.slot, 0);
        assert!(!config.invert_motor);
        assert_eq!(
            config.smart_motion,
            Some(SmartMotionConfig {
                max_velocity: 2000.0,
                max_acceleration: 1500.0
            })
        );
    }

    #[test]
    fn test_programs_sim_device() {
        let mut bus = SimBus::new();
        let mut spark = bus.open(4, MotorType::Brushless).unwrap();

        let config = SparkPidConfig::new(0.5, 0.001, 0.0, 0.0)
            .with_inversion(true, true)
            .with_soft_limits(-5.0, 5.0)
            .with_slot(2);
        let sensor = SensorHandle::Analog(AnalogMode::Absolute);
        config
            .initialize_spark_pid(&mut spark, sensor, true, false)
            .unwrap();

        let state = bus.state(4).unwrap();
        assert!(state.inverted);
        assert_eq!(state.feedback_device, sensor);
        assert!(state.analog.inverted);
        assert_eq!(state.gains[2].p, 0.5);
        assert_eq!(state.gains[2].i, 0.001);
        assert_eq!(state.output_range[2], (-1.0, 1.0));
        assert_eq!(state.forward_soft_limit, Some(5.0));
        assert_eq!(state.reverse_soft_limit, Some(-5.0));
        assert!(state.forward_limit_enabled);
        assert!(!state.reverse_limit_enabled);
    }

    #[test]
    fn test_encoder_phase_is_left_alone() {
        let mut bus = SimBus::new();
        let mut spark = bus.open(4, MotorType::Brushless).unwrap();

        SparkPidConfig::new(1.0, 0.0, 0.0, 0.0)
            .with_inversion(true, false)
            .initialize_spark_pid(&mut spark, SensorHandle::Encoder, false, false)
            .unwrap();

        let state = bus.state(4).unwrap();
        assert!(!state.encoder.inverted);
        assert_eq!(state.forward_soft_limit, None);
        assert!(!state.forward_soft_limit_enabled);
    }

    #[test]
    fn test_rejects_inverted_soft_limits() {
        let mut bus = SimBus::new();
        let mut spark = bus.open(9, MotorType::Brushless).unwrap();

        let err = SparkPidConfig::new(1.0, 0.0, 0.0, 0.0)
            .with_soft_limits(10.0, -10.0)
            .initialize_spark_pid(&mut spark, SensorHandle::Encoder, false, false)
            .unwrap_err();
        assert!(matches!(err, DeviceError::InvalidConfig { id: 9, .. }));

        // Nothing was programmed
        let state = bus.state(9).unwrap();
        assert_eq!(state.gains[0], PidGains::default());
    }

    #[test]
    fn test_rejects_negative_tolerance() {
        let mut bus = SimBus::new();
        let mut spark = bus.open(9, MotorType::Brushless).unwrap();

        let result = SparkPidConfig::new(1.0, 0.0, 0.0, 0.0)
            .with_tolerance(-1.0)
            .initialize_spark_pid(&mut spark, SensorHandle::Encoder, false, false);
        assert!(matches!(result, Err(DeviceError::InvalidConfig { .. })));
    }
}
