// SPARK MAX motor controller adapter
//
// Wraps one controller handle: forwards commands and configuration to the
// driver, snapshots the sensors once per control cycle, and publishes outputs
// to the injected telemetry sink. The closed loop itself runs in firmware.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::device::{
    AbsoluteEncoderType, AnalogMode, ArbFfUnits, ControlType, IdleMode, LimitDirection,
    LimitSwitchPolarity, MotorType, Reference, Result, SensorHandle, SparkBus, SparkDevice,
    DEFAULT_PID_SLOT,
};
use super::pid::PidConfigurator;
use crate::messages::SparkMaxInputs;
use crate::telemetry::{LogSink, TelemetrySink};

/// Voltage compensation ceiling applied at construction
pub const MAX_VOLTAGE: f64 = 12.0;

const VALUE_LOG_ENTRY: &str = "/OutputValue";
const MODE_LOG_ENTRY: &str = "/OutputMode";
const CURRENT_LOG_ENTRY: &str = "/Current";
const ENCODER_RESET_MESSAGE: &str = "/EncoderReset";

/// CAN address and human-readable name of a controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceId {
    pub can_id: u8,
    pub name: String,
}

impl DeviceId {
    pub fn new(can_id: u8, name: impl Into<String>) -> Self {
        Self {
            can_id,
            name: name.into(),
        }
    }
}

/// Sensor used for conversion factors and as the closed-loop feedback device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackSensor {
    NeoEncoder,
    Analog,
    ThroughBoreEncoder,
}

impl FeedbackSensor {
    /// The concrete sensor on the controller this selector names
    pub fn handle(self) -> SensorHandle {
        match self {
            FeedbackSensor::NeoEncoder => SensorHandle::Encoder,
            FeedbackSensor::Analog => SensorHandle::Analog(AnalogMode::Absolute),
            FeedbackSensor::ThroughBoreEncoder => {
                SensorHandle::AbsoluteEncoder(AbsoluteEncoderType::DutyCycle)
            }
        }
    }
}

/// Adapter owning one SPARK MAX handle.
///
/// The handle is released exactly once: by [`SparkMax::close`], or on drop if
/// the adapter was never closed (including a failed construction).
pub struct SparkMax<D: SparkDevice> {
    spark: D,
    name: String,
    inputs: SparkMaxInputs,
    telemetry: Arc<dyn TelemetrySink>,
    log: Arc<dyn LogSink>,
    closed: bool,
}

impl<D: SparkDevice> SparkMax<D> {
    /// Open the controller at `id`, restore factory defaults and enable
    /// voltage compensation at [`MAX_VOLTAGE`]
    pub fn new<B>(
        bus: &mut B,
        id: DeviceId,
        motor_type: MotorType,
        telemetry: Arc<dyn TelemetrySink>,
        log: Arc<dyn LogSink>,
    ) -> Result<Self>
    where
        B: SparkBus<Device = D>,
    {
        info!("Opening SPARK MAX {} ({}) as {:?}", id.can_id, id.name, motor_type);
        let spark = bus.open(id.can_id, motor_type)?;

        // Built before configuring so an error below still releases the handle
        let mut adapter = Self {
            spark,
            name: id.name,
            inputs: SparkMaxInputs::default(),
            telemetry,
            log,
            closed: false,
        };

        adapter.spark.restore_factory_defaults()?;
        adapter.spark.enable_voltage_compensation(MAX_VOLTAGE)?;
        Ok(adapter)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn can_id(&self) -> u8 {
        self.spark.can_id()
    }

    /// Publish a command that already reached the device. Telemetry never
    /// fails the command, so a current read error only skips `/Current`.
    fn log_outputs(&mut self, value: f64, ctrl: ControlType) {
        self.telemetry
            .record_output(&format!("{}{}", self.name, VALUE_LOG_ENTRY), value.into());
        self.telemetry
            .record_output(&format!("{}{}", self.name, MODE_LOG_ENTRY), ctrl.name().into());
        match self.spark.output_current() {
            Ok(current) => self
                .telemetry
                .record_output(&format!("{}{}", self.name, CURRENT_LOG_ENTRY), current.into()),
            Err(e) => warn!("{}: failed to read output current: {}", self.name, e),
        }
    }

    /// Built-in encoder position, rotations unless scaled
    fn encoder_position(&mut self) -> Result<f64> {
        self.spark.position(SensorHandle::Encoder)
    }

    /// Built-in encoder velocity, RPM unless scaled
    fn encoder_velocity(&mut self) -> Result<f64> {
        self.spark.velocity(SensorHandle::Encoder)
    }

    /// Analog sensor position, volts unless scaled
    fn analog_position(&mut self) -> Result<f64> {
        self.spark.position(FeedbackSensor::Analog.handle())
    }

    /// Analog sensor velocity, volts per second unless scaled
    fn analog_velocity(&mut self) -> Result<f64> {
        self.spark.velocity(FeedbackSensor::Analog.handle())
    }

    fn absolute_encoder_position(&mut self) -> Result<f64> {
        self.spark.position(FeedbackSensor::ThroughBoreEncoder.handle())
    }

    fn absolute_encoder_velocity(&mut self) -> Result<f64> {
        self.spark.velocity(FeedbackSensor::ThroughBoreEncoder.handle())
    }

    fn limit_switch(&mut self, direction: LimitDirection) -> Result<bool> {
        self.spark
            .limit_switch_pressed(direction, LimitSwitchPolarity::NormallyOpen)
    }

    fn update_inputs(&mut self) -> Result<()> {
        // Read everything first so the snapshot is replaced whole or not at all
        let inputs = SparkMaxInputs {
            encoder_position: self.encoder_position()?,
            encoder_velocity: self.encoder_velocity()?,
            analog_position: self.analog_position()?,
            analog_velocity: self.analog_velocity()?,
            absolute_encoder_position: self.absolute_encoder_position()?,
            absolute_encoder_velocity: self.absolute_encoder_velocity()?,
            forward_limit_switch: self.limit_switch(LimitDirection::Forward)?,
            reverse_limit_switch: self.limit_switch(LimitDirection::Reverse)?,
        };
        self.inputs = inputs;
        Ok(())
    }

    /// Refresh the sensor snapshot and publish it. Call once per control cycle.
    pub fn periodic(&mut self) -> Result<()> {
        self.update_inputs()?;
        self.telemetry.process_inputs(&self.name, &self.inputs);
        Ok(())
    }

    /// Latest sensor snapshot
    pub fn inputs(&self) -> SparkMaxInputs {
        self.inputs
    }

    /// Program the onboard PID from `config`, reading feedback from
    /// `feedback_sensor` and optionally stopping at the limit switches
    pub fn initialize_spark_pid(
        &mut self,
        config: &dyn PidConfigurator,
        feedback_sensor: FeedbackSensor,
        forward_limit_switch: bool,
        reverse_limit_switch: bool,
    ) -> Result<()> {
        debug!("{}: configuring PID from {:?}", self.name, feedback_sensor);
        config.initialize_spark_pid(
            &mut self.spark,
            feedback_sensor.handle(),
            forward_limit_switch,
            reverse_limit_switch,
        )
    }

    /// [`SparkMax::initialize_spark_pid`] with both limit switches disabled
    pub fn initialize_spark_pid_default_limits(
        &mut self,
        config: &dyn PidConfigurator,
        feedback_sensor: FeedbackSensor,
    ) -> Result<()> {
        self.initialize_spark_pid(config, feedback_sensor, false, false)
    }

    /// Set output duty cycle, nominally [-1.0, +1.0]
    pub fn set(&mut self, value: f64) -> Result<()> {
        self.set_with_mode(value, ControlType::DutyCycle)
    }

    /// Set output in the given control mode
    pub fn set_with_mode(&mut self, value: f64, ctrl: ControlType) -> Result<()> {
        self.spark.set_reference(Reference::new(value, ctrl))?;
        self.log_outputs(value, ctrl);
        Ok(())
    }

    /// Set output with an arbitrary feed-forward, using the default PID slot
    pub fn set_with_feedforward(
        &mut self,
        value: f64,
        ctrl: ControlType,
        arb_feedforward: f64,
        arb_ff_units: ArbFfUnits,
    ) -> Result<()> {
        self.set_with_slot(value, ctrl, arb_feedforward, arb_ff_units, DEFAULT_PID_SLOT)
    }

    /// Set output with an arbitrary feed-forward, using `pid_slot`
    pub fn set_with_slot(
        &mut self,
        value: f64,
        ctrl: ControlType,
        arb_feedforward: f64,
        arb_ff_units: ArbFfUnits,
        pid_slot: u8,
    ) -> Result<()> {
        self.spark.set_reference(Reference {
            value,
            ctrl,
            slot: pid_slot,
            arb_feedforward,
            arb_ff_units,
        })?;
        self.log_outputs(value, ctrl);
        Ok(())
    }

    /// Multiplier applied to `sensor`'s native position units
    pub fn set_position_conversion_factor(
        &mut self,
        sensor: FeedbackSensor,
        factor: f64,
    ) -> Result<()> {
        self.spark
            .set_position_conversion_factor(sensor.handle(), factor)
    }

    /// Multiplier applied to `sensor`'s native velocity units
    pub fn set_velocity_conversion_factor(
        &mut self,
        sensor: FeedbackSensor,
        factor: f64,
    ) -> Result<()> {
        self.spark
            .set_velocity_conversion_factor(sensor.handle(), factor)
    }

    /// Zero the built-in encoder
    pub fn reset_encoder(&mut self) -> Result<()> {
        self.spark.set_encoder_position(0.0)?;
        self.log
            .log(&format!("{}{}", self.name, ENCODER_RESET_MESSAGE));
        Ok(())
    }

    /// Wrap closed-loop position error between `min_input` and `max_input`
    pub fn enable_pid_wrapping(&mut self, min_input: f64, max_input: f64) -> Result<()> {
        self.spark.set_pid_wrapping_enabled(true)?;
        self.spark.set_pid_wrapping_min_input(min_input)?;
        self.spark.set_pid_wrapping_max_input(max_input)
    }

    pub fn disable_pid_wrapping(&mut self) -> Result<()> {
        self.spark.set_pid_wrapping_enabled(false)
    }

    pub fn set_idle_mode(&mut self, mode: IdleMode) -> Result<()> {
        self.spark.set_idle_mode(mode)
    }

    /// Current limit in amps. The controller lowers output voltage to stay
    /// under it, which protects low-resistance brushless motors from current
    /// spikes.
    pub fn set_smart_current_limit(&mut self, limit: u32) -> Result<()> {
        self.spark.set_smart_current_limit(limit)
    }

    /// Stop the motor. It can be commanded again without re-enabling.
    pub fn stop_motor(&mut self) -> Result<()> {
        self.spark.stop_motor()
    }

    /// Release the controller handle
    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        info!("Closing SPARK MAX {} ({})", self.spark.can_id(), self.name);
        self.spark.close()
    }
}

impl<D: SparkDevice> Drop for SparkMax<D> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Failed to close SPARK MAX {}: {}", self.name, e);
        }
    }
}
