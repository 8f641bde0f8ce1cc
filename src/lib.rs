//! Hardware adapter for SPARK MAX brushless motor controllers.
//!
//! [`motor::SparkMax`] wraps one controller handle behind the
//! [`motor::SparkDevice`] driver traits, with telemetry and log sinks injected
//! at construction. [`motor::SimBus`] provides an in-process controller for
//! running without hardware.

pub mod config;
pub mod messages;
pub mod motor;
pub mod runtime;
pub mod telemetry;
