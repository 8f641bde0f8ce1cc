// In-process SPARK MAX simulation
//
// SimBus hands out SimSpark handles that share state with the bus, so the
// runtime (or a test) can advance the physics with `SimBus::step` while the
// adapter owns the handle. The motor model is first order: commanded effort
// sets a target speed and the shaft approaches it with a fixed time constant.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::device::{
    ArbFfUnits, ControlType, DeviceError, IdleMode, LimitDirection, LimitSwitchPolarity, MotorType,
    PidGains, Reference, Result, SensorHandle, SmartMotionLimits, SparkBus, SparkDevice,
};

/// NEO free speed at nominal voltage
pub const FREE_SPEED_RPM: f64 = 5676.0;
/// NEO stall current
pub const STALL_CURRENT_AMPS: f64 = 105.0;
/// Bus voltage assumed when voltage compensation is off
pub const NOMINAL_BUS_VOLTAGE: f64 = 12.0;
/// Full-scale voltage of the analog input
pub const ANALOG_FULL_SCALE_VOLTS: f64 = 3.3;
/// Factory default smart current limit
pub const DEFAULT_SMART_CURRENT_LIMIT: u32 = 80;

const PID_SLOTS: usize = 4;
const MAX_CAN_ID: u8 = 62;

// Time constants (s) for the speed response
const DRIVEN_TIME_CONSTANT: f64 = 0.05;
const BRAKE_TIME_CONSTANT: f64 = 0.02;
const COAST_TIME_CONSTANT: f64 = 0.5;

/// Per-sensor configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimSensor {
    pub position_factor: f64,
    pub velocity_factor: f64,
    pub inverted: bool,
}

impl Default for SimSensor {
    fn default() -> Self {
        Self {
            position_factor: 1.0,
            velocity_factor: 1.0,
            inverted: false,
        }
    }
}

/// Full state of one simulated controller
#[derive(Debug, Clone, PartialEq)]
pub struct SimState {
    pub can_id: u8,
    pub motor_type: MotorType,
    pub closed: bool,

    // Configuration (reset by restore_factory_defaults)
    pub nominal_voltage: Option<f64>,
    pub idle_mode: IdleMode,
    pub smart_current_limit: u32,
    pub inverted: bool,
    pub feedback_device: SensorHandle,
    pub encoder: SimSensor,
    pub analog: SimSensor,
    pub absolute: SimSensor,
    pub gains: [PidGains; PID_SLOTS],
    pub output_range: [(f64, f64); PID_SLOTS],
    pub smart_motion: [SmartMotionLimits; PID_SLOTS],
    pub pid_wrapping: bool,
    pub wrapping_min_input: f64,
    pub wrapping_max_input: f64,
    pub forward_soft_limit: Option<f64>,
    pub reverse_soft_limit: Option<f64>,
    pub forward_soft_limit_enabled: bool,
    pub reverse_soft_limit_enabled: bool,
    pub forward_limit_enabled: bool,
    pub reverse_limit_enabled: bool,

    // Command
    pub reference: Option<Reference>,
    pub applied_output: f64,
    pub output_current: f64,

    // Physical state
    /// Built-in encoder counter, native rotations
    pub encoder_rotations: f64,
    /// Shaft angle seen by external sensors, rotations
    pub shaft_rotations: f64,
    pub shaft_rpm: f64,
    pub forward_limit_pressed: bool,
    pub reverse_limit_pressed: bool,
}

impl SimState {
    fn new(can_id: u8, motor_type: MotorType) -> Self {
        Self {
            can_id,
            motor_type,
            closed: false,
            nominal_voltage: None,
            idle_mode: IdleMode::Coast,
            smart_current_limit: DEFAULT_SMART_CURRENT_LIMIT,
            inverted: false,
            feedback_device: SensorHandle::Encoder,
            encoder: SimSensor::default(),
            analog: SimSensor::default(),
            absolute: SimSensor::default(),
            gains: [PidGains::default(); PID_SLOTS],
            output_range: [(-1.0, 1.0); PID_SLOTS],
            smart_motion: [SmartMotionLimits::default(); PID_SLOTS],
            pid_wrapping: false,
            wrapping_min_input: 0.0,
            wrapping_max_input: 0.0,
            forward_soft_limit: None,
            reverse_soft_limit: None,
            forward_soft_limit_enabled: false,
            reverse_soft_limit_enabled: false,
            forward_limit_enabled: false,
            reverse_limit_enabled: false,
            reference: None,
            applied_output: 0.0,
            output_current: 0.0,
            encoder_rotations: 0.0,
            shaft_rotations: 0.0,
            shaft_rpm: 0.0,
            forward_limit_pressed: false,
            reverse_limit_pressed: false,
        }
    }

    /// Reset configuration; the shaft and switches keep their physical state
    fn restore_defaults(&mut self) {
        *self = Self {
            closed: self.closed,
            encoder_rotations: self.encoder_rotations,
            shaft_rotations: self.shaft_rotations,
            shaft_rpm: self.shaft_rpm,
            forward_limit_pressed: self.forward_limit_pressed,
            reverse_limit_pressed: self.reverse_limit_pressed,
            ..Self::new(self.can_id, self.motor_type)
        };
    }

    fn sensor(&self, sensor: SensorHandle) -> &SimSensor {
        match sensor {
            SensorHandle::Encoder => &self.encoder,
            SensorHandle::Analog(_) => &self.analog,
            SensorHandle::AbsoluteEncoder(_) => &self.absolute,
        }
    }

    fn sensor_mut(&mut self, sensor: SensorHandle) -> &mut SimSensor {
        match sensor {
            SensorHandle::Encoder => &mut self.encoder,
            SensorHandle::Analog(_) => &mut self.analog,
            SensorHandle::AbsoluteEncoder(_) => &mut self.absolute,
        }
    }

    /// Direction the built-in encoder counts relative to the shaft
    fn motor_sign(&self) -> f64 {
        if self.inverted { -1.0 } else { 1.0 }
    }

    fn native_position(&self, sensor: SensorHandle) -> f64 {
        match sensor {
            SensorHandle::Encoder => self.encoder_rotations,
            SensorHandle::Analog(_) => {
                self.shaft_rotations.rem_euclid(1.0) * ANALOG_FULL_SCALE_VOLTS
            }
            SensorHandle::AbsoluteEncoder(_) => self.shaft_rotations.rem_euclid(1.0),
        }
    }

    fn native_velocity(&self, sensor: SensorHandle) -> f64 {
        match sensor {
            SensorHandle::Encoder => self.shaft_rpm * self.motor_sign(),
            SensorHandle::Analog(_) => self.shaft_rpm / 60.0 * ANALOG_FULL_SCALE_VOLTS,
            SensorHandle::AbsoluteEncoder(_) => self.shaft_rpm,
        }
    }

    fn position(&self, sensor: SensorHandle) -> f64 {
        let config = self.sensor(sensor);
        let sign = if config.inverted { -1.0 } else { 1.0 };
        self.native_position(sensor) * config.position_factor * sign
    }

    fn velocity(&self, sensor: SensorHandle) -> f64 {
        let config = self.sensor(sensor);
        let sign = if config.inverted { -1.0 } else { 1.0 };
        self.native_velocity(sensor) * config.velocity_factor * sign
    }

    fn position_error(&self, target: f64) -> f64 {
        let error = target - self.position(self.feedback_device);
        let span = self.wrapping_max_input - self.wrapping_min_input;
        if self.pid_wrapping && span > 0.0 {
            // Shortest way around the wrapped range
            (error + span / 2.0).rem_euclid(span) - span / 2.0
        } else {
            error
        }
    }

    /// Duty cycle the firmware would apply for the current reference
    fn effort(&self) -> f64 {
        let Some(reference) = self.reference else {
            return 0.0;
        };
        let nominal = self.nominal_voltage.unwrap_or(NOMINAL_BUS_VOLTAGE);
        let slot = usize::from(reference.slot).min(PID_SLOTS - 1);
        let gains = self.gains[slot];
        let (min_output, max_output) = self.output_range[slot];

        let base = match reference.ctrl {
            ControlType::DutyCycle => reference.value,
            ControlType::Voltage => reference.value / nominal,
            ControlType::Current => reference.value / STALL_CURRENT_AMPS,
            ControlType::Velocity | ControlType::SmartVelocity => {
                let error = reference.value - self.velocity(self.feedback_device);
                (gains.ff * reference.value + gains.p * error).clamp(min_output, max_output)
            }
            ControlType::Position | ControlType::SmartMotion => {
                let error = self.position_error(reference.value);
                (gains.ff * reference.value + gains.p * error).clamp(min_output, max_output)
            }
        };
        let feedforward = match reference.arb_ff_units {
            ArbFfUnits::Voltage => reference.arb_feedforward / nominal,
            ArbFfUnits::PercentOut => reference.arb_feedforward,
        };
        let effort = (base + feedforward).clamp(-1.0, 1.0);

        if effort > 0.0 && self.forward_blocked() {
            return 0.0;
        }
        if effort < 0.0 && self.reverse_blocked() {
            return 0.0;
        }
        effort
    }

    fn forward_blocked(&self) -> bool {
        let hard = self.forward_limit_enabled && self.forward_limit_pressed;
        let soft = self.forward_soft_limit_enabled
            && self
                .forward_soft_limit
                .is_some_and(|limit| self.position(SensorHandle::Encoder) >= limit);
        hard || soft
    }

    fn reverse_blocked(&self) -> bool {
        let hard = self.reverse_limit_enabled && self.reverse_limit_pressed;
        let soft = self.reverse_soft_limit_enabled
            && self
                .reverse_soft_limit
                .is_some_and(|limit| self.position(SensorHandle::Encoder) <= limit);
        hard || soft
    }

    fn step(&mut self, dt: f64) {
        if self.closed || dt <= 0.0 {
            return;
        }
        let effort = self.effort();
        let target_rpm = effort * self.motor_sign() * FREE_SPEED_RPM;
        let tau = if effort != 0.0 {
            DRIVEN_TIME_CONSTANT
        } else {
            match self.idle_mode {
                IdleMode::Brake => BRAKE_TIME_CONSTANT,
                IdleMode::Coast => COAST_TIME_CONSTANT,
            }
        };
        self.shaft_rpm += (target_rpm - self.shaft_rpm) * (dt / (tau + dt));

        let delta_rotations = self.shaft_rpm / 60.0 * dt;
        self.shaft_rotations += delta_rotations;
        self.encoder_rotations += delta_rotations * self.motor_sign();

        self.applied_output = effort;
        let mut current = effort.abs() * STALL_CURRENT_AMPS;
        if self.smart_current_limit > 0 {
            current = current.min(f64::from(self.smart_current_limit));
        }
        self.output_current = current;
    }
}

type SharedState = Arc<Mutex<SimState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Simulated CAN bus holding every controller opened on it
#[derive(Debug, Default)]
pub struct SimBus {
    devices: BTreeMap<u8, SharedState>,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance every open controller by `dt` seconds
    pub fn step(&mut self, dt: f64) {
        for state in self.devices.values() {
            lock(state).step(dt);
        }
    }

    /// Force a limit switch state, as if the mechanism hit or left it
    pub fn set_limit_switch(&mut self, can_id: u8, direction: LimitDirection, pressed: bool) {
        if let Some(state) = self.devices.get(&can_id) {
            let mut state = lock(state);
            match direction {
                LimitDirection::Forward => state.forward_limit_pressed = pressed,
                LimitDirection::Reverse => state.reverse_limit_pressed = pressed,
            }
        }
    }

    /// Snapshot of a controller's state
    pub fn state(&self, can_id: u8) -> Option<SimState> {
        self.devices.get(&can_id).map(|state| lock(state).clone())
    }
}

impl SparkBus for SimBus {
    type Device = SimSpark;

    fn open(&mut self, can_id: u8, motor_type: MotorType) -> Result<SimSpark> {
        if can_id == 0 || can_id > MAX_CAN_ID {
            return Err(DeviceError::NotFound { id: can_id });
        }
        if let Some(existing) = self.devices.get(&can_id) {
            let mut state = lock(existing);
            if !state.closed {
                return Err(DeviceError::InUse { id: can_id });
            }
            // Reopening a released device keeps its physical state
            state.closed = false;
            state.motor_type = motor_type;
            return Ok(SimSpark {
                can_id,
                state: Arc::clone(existing),
            });
        }

        debug!("Opening simulated controller {} ({:?})", can_id, motor_type);
        let state = Arc::new(Mutex::new(SimState::new(can_id, motor_type)));
        self.devices.insert(can_id, Arc::clone(&state));
        Ok(SimSpark { can_id, state })
    }
}

/// Handle to a simulated controller
#[derive(Debug)]
pub struct SimSpark {
    can_id: u8,
    state: SharedState,
}

impl SimSpark {
    /// Run `f` against the open device state
    fn with<T>(&self, f: impl FnOnce(&mut SimState) -> Result<T>) -> Result<T> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(DeviceError::Closed { id: self.can_id });
        }
        f(&mut state)
    }

    fn check_slot(&self, slot: u8) -> Result<usize> {
        let index = usize::from(slot);
        if index >= PID_SLOTS {
            return Err(DeviceError::InvalidConfig {
                id: self.can_id,
                reason: format!("PID slot {} out of range 0..{}", slot, PID_SLOTS),
            });
        }
        Ok(index)
    }
}

impl SparkDevice for SimSpark {
    fn can_id(&self) -> u8 {
        self.can_id
    }

    fn restore_factory_defaults(&mut self) -> Result<()> {
        self.with(|state| {
            state.restore_defaults();
            Ok(())
        })
    }

    fn enable_voltage_compensation(&mut self, nominal_voltage: f64) -> Result<()> {
        self.with(|state| {
            state.nominal_voltage = Some(nominal_voltage);
            Ok(())
        })
    }

    fn position(&mut self, sensor: SensorHandle) -> Result<f64> {
        self.with(|state| Ok(state.position(sensor)))
    }

    fn velocity(&mut self, sensor: SensorHandle) -> Result<f64> {
        self.with(|state| Ok(state.velocity(sensor)))
    }

    fn set_position_conversion_factor(&mut self, sensor: SensorHandle, factor: f64) -> Result<()> {
        self.with(|state| {
            state.sensor_mut(sensor).position_factor = factor;
            Ok(())
        })
    }

    fn set_velocity_conversion_factor(&mut self, sensor: SensorHandle, factor: f64) -> Result<()> {
        self.with(|state| {
            state.sensor_mut(sensor).velocity_factor = factor;
            Ok(())
        })
    }

    fn set_encoder_position(&mut self, position: f64) -> Result<()> {
        let id = self.can_id;
        self.with(|state| {
            if position == 0.0 {
                state.encoder_rotations = 0.0;
                return Ok(());
            }
            let factor = state.encoder.position_factor;
            let sign = if state.encoder.inverted { -1.0 } else { 1.0 };
            if factor == 0.0 {
                return Err(DeviceError::InvalidConfig {
                    id,
                    reason: "encoder position conversion factor is zero".to_string(),
                });
            }
            state.encoder_rotations = position / factor * sign;
            Ok(())
        })
    }

    fn limit_switch_pressed(
        &mut self,
        direction: LimitDirection,
        polarity: LimitSwitchPolarity,
    ) -> Result<bool> {
        self.with(|state| {
            let closed = match direction {
                LimitDirection::Forward => state.forward_limit_pressed,
                LimitDirection::Reverse => state.reverse_limit_pressed,
            };
            // The sim models switch contact; polarity only changes how it reads
            Ok(match polarity {
                LimitSwitchPolarity::NormallyOpen => closed,
                LimitSwitchPolarity::NormallyClosed => !closed,
            })
        })
    }

    fn enable_limit_switch(
        &mut self,
        direction: LimitDirection,
        _polarity: LimitSwitchPolarity,
        enabled: bool,
    ) -> Result<()> {
        self.with(|state| {
            match direction {
                LimitDirection::Forward => state.forward_limit_enabled = enabled,
                LimitDirection::Reverse => state.reverse_limit_enabled = enabled,
            }
            Ok(())
        })
    }

    fn set_reference(&mut self, reference: Reference) -> Result<()> {
        self.check_slot(reference.slot)?;
        self.with(|state| {
            state.reference = Some(reference);
            Ok(())
        })
    }

    fn set_pid_wrapping_enabled(&mut self, enabled: bool) -> Result<()> {
        self.with(|state| {
            state.pid_wrapping = enabled;
            Ok(())
        })
    }

    fn set_pid_wrapping_min_input(&mut self, min_input: f64) -> Result<()> {
        self.with(|state| {
            state.wrapping_min_input = min_input;
            Ok(())
        })
    }

    fn set_pid_wrapping_max_input(&mut self, max_input: f64) -> Result<()> {
        self.with(|state| {
            state.wrapping_max_input = max_input;
            Ok(())
        })
    }

    fn set_inverted(&mut self, inverted: bool) -> Result<()> {
        self.with(|state| {
            state.inverted = inverted;
            Ok(())
        })
    }

    fn set_feedback_device(&mut self, sensor: SensorHandle) -> Result<()> {
        self.with(|state| {
            state.feedback_device = sensor;
            Ok(())
        })
    }

    fn set_sensor_inverted(&mut self, sensor: SensorHandle, inverted: bool) -> Result<()> {
        let id = self.can_id;
        self.with(|state| {
            if sensor == SensorHandle::Encoder && state.motor_type == MotorType::Brushless {
                return Err(DeviceError::InvalidConfig {
                    id,
                    reason: "cannot invert the built-in encoder of a brushless motor".to_string(),
                });
            }
            state.sensor_mut(sensor).inverted = inverted;
            Ok(())
        })
    }

    fn set_pid_gains(&mut self, slot: u8, gains: PidGains) -> Result<()> {
        let index = self.check_slot(slot)?;
        self.with(|state| {
            state.gains[index] = gains;
            Ok(())
        })
    }

    fn set_output_range(&mut self, slot: u8, min: f64, max: f64) -> Result<()> {
        let index = self.check_slot(slot)?;
        self.with(|state| {
            state.output_range[index] = (min, max);
            Ok(())
        })
    }

    fn set_smart_motion(&mut self, slot: u8, limits: SmartMotionLimits) -> Result<()> {
        let index = self.check_slot(slot)?;
        self.with(|state| {
            state.smart_motion[index] = limits;
            Ok(())
        })
    }

    fn set_soft_limit(&mut self, direction: LimitDirection, limit: f64) -> Result<()> {
        self.with(|state| {
            match direction {
                LimitDirection::Forward => state.forward_soft_limit = Some(limit),
                LimitDirection::Reverse => state.reverse_soft_limit = Some(limit),
            }
            Ok(())
        })
    }

    fn enable_soft_limit(&mut self, direction: LimitDirection, enabled: bool) -> Result<()> {
        self.with(|state| {
            match direction {
                LimitDirection::Forward => state.forward_soft_limit_enabled = enabled,
                LimitDirection::Reverse => state.reverse_soft_limit_enabled = enabled,
            }
            Ok(())
        })
    }

    fn set_idle_mode(&mut self, mode: IdleMode) -> Result<()> {
        self.with(|state| {
            state.idle_mode = mode;
            Ok(())
        })
    }

    fn set_smart_current_limit(&mut self, amps: u32) -> Result<()> {
        self.with(|state| {
            state.smart_current_limit = amps;
            Ok(())
        })
    }

    fn output_current(&mut self) -> Result<f64> {
        self.with(|state| Ok(state.output_current))
    }

    fn stop_motor(&mut self) -> Result<()> {
        self.with(|state| {
            state.reference = Some(Reference::new(0.0, ControlType::DutyCycle));
            Ok(())
        })
    }

    fn close(&mut self) -> Result<()> {
        self.with(|state| {
            state.reference = None;
            state.closed = true;
            Ok(())
        })
    }
}
