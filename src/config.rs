// Loop timing, telemetry topics, device defaults and command-line options
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;

use crate::motor::{ControlType, FeedbackSensor, IdleMode, MotorType, SparkPidConfig};

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Nanosecond resolution so rates that don't divide 1000 stay accurate
pub const LOOP_PERIOD: Duration = Duration::from_nanos(1_000_000_000 / LOOP_HZ);

// Zenoh key prefix for telemetry (spark/telemetry/<name>/<entry>)
pub const TELEMETRY_PREFIX: &str = "spark/telemetry";

// Default device, a NEO on CAN id 1
pub const DEFAULT_CAN_ID: u8 = 1;
pub const DEFAULT_DEVICE_NAME: &str = "Spark1";

// Smart current limit recommended for a NEO
pub const DEFAULT_CURRENT_LIMIT: u32 = 40;

/// Errors loading configuration files
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid PID config in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Load a PID gain set from a JSON file
pub fn load_pid_config(path: &Path) -> Result<SparkPidConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Drive one simulated SPARK MAX at a fixed setpoint and publish its telemetry
#[derive(Debug, Clone, Parser)]
#[command(version, about)]
pub struct Cli {
    /// CAN id of the controller
    #[arg(long, default_value_t = DEFAULT_CAN_ID)]
    pub can_id: u8,

    /// Name used to namespace telemetry
    #[arg(long, default_value = DEFAULT_DEVICE_NAME)]
    pub name: String,

    #[arg(long, value_enum, default_value_t = MotorType::Brushless)]
    pub motor_type: MotorType,

    /// JSON file with PID gains for the onboard controller
    #[arg(long)]
    pub pid_config: Option<PathBuf>,

    /// Sensor used as PID feedback
    #[arg(long, value_enum, default_value_t = FeedbackSensor::NeoEncoder)]
    pub feedback_sensor: FeedbackSensor,

    #[arg(long, value_enum, default_value_t = ControlType::DutyCycle)]
    pub mode: ControlType,

    /// Value commanded every cycle, in the units of --mode
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub setpoint: f64,

    #[arg(long, value_enum, default_value_t = IdleMode::Brake)]
    pub idle_mode: IdleMode,

    /// Smart current limit in amps
    #[arg(long, default_value_t = DEFAULT_CURRENT_LIMIT)]
    pub current_limit: u32,

    /// Publish telemetry over Zenoh instead of the log
    #[arg(long)]
    pub zenoh: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["spark-max-runtime"]);
        assert_eq!(cli.can_id, DEFAULT_CAN_ID);
        assert_eq!(cli.name, DEFAULT_DEVICE_NAME);
        assert_eq!(cli.mode, ControlType::DutyCycle);
        assert_eq!(cli.setpoint, 0.0);
        assert!(!cli.zenoh);
        assert!(cli.pid_config.is_none());
    }

    #[test]
    fn test_cli_parses_modes() {
        let cli = Cli::parse_from([
            "spark-max-runtime",
            "--can-id",
            "7",
            "--mode",
            "smart-velocity",
            "--setpoint",
            "-1200",
            "--feedback-sensor",
            "through-bore-encoder",
        ]);
        assert_eq!(cli.can_id, 7);
        assert_eq!(cli.mode, ControlType::SmartVelocity);
        assert_eq!(cli.setpoint, -1200.0);
        assert_eq!(cli.feedback_sensor, FeedbackSensor::ThroughBoreEncoder);
    }

    #[test]
    fn test_loop_period_matches_rate() {
        let hz = 1.0 / LOOP_PERIOD.as_secs_f64();
        assert!((hz - LOOP_HZ as f64).abs() < 1e-6);
    }

    #[test]
    fn test_load_pid_config() {
        let path = std::env::temp_dir().join(format!("spark_pid_{}.json", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, r#"{{ "kp": 0.25, "slot": 1 }}"#).unwrap();

        let config = load_pid_config(&path).unwrap();
        assert_eq!(config.kp, 0.25);
        assert_eq!(config.slot, 1);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_missing_pid_config() {
        let result = load_pid_config(Path::new("/nonexistent/pid.json"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
