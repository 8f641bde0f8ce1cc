// Motor control module for SPARK MAX controllers
//
// Provides:
// - Driver boundary traits and types (device)
// - The SPARK MAX adapter used by robot code
// - Onboard PID configuration
// - An in-process simulated controller

pub mod device;
pub mod pid;
pub mod sim;
mod spark_max;

pub use device::{
    ArbFfUnits, ControlType, DeviceError, IdleMode, MotorType, SparkBus, SparkDevice,
};
pub use pid::{PidConfigurator, SparkPidConfig};
pub use sim::{SimBus, SimSpark};
pub use spark_max::{DeviceId, FeedbackSensor, SparkMax, MAX_VOLTAGE};
