// 50 Hz control loop driving one SPARK MAX
//
// Each tick: advance the simulated bus, command the setpoint, then snapshot
// and publish the sensors. Commands go out before the snapshot so telemetry
// for a tick matches the decision made in it.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::info;

use crate::config::{load_pid_config, Cli, LOOP_HZ, LOOP_PERIOD, TELEMETRY_PREFIX};
use crate::messages::SparkMaxInputs;
use crate::motor::device::Result as DeviceResult;
use crate::motor::{ControlType, DeviceId, SimBus, SimSpark, SparkMax};
use crate::telemetry::{LogSink, TelemetrySink, TracingLog, TracingTelemetry, ZenohTelemetry};

/// What the loop commands every tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Command {
    pub mode: ControlType,
    pub setpoint: f64,
}

/// One simulated bus plus the adapter driving a controller on it
pub struct ControlLoop {
    bus: SimBus,
    spark: SparkMax<SimSpark>,
    command: Command,
}

impl ControlLoop {
    pub fn new(bus: SimBus, spark: SparkMax<SimSpark>, command: Command) -> Self {
        Self {
            bus,
            spark,
            command,
        }
    }

    pub fn spark(&mut self) -> &mut SparkMax<SimSpark> {
        &mut self.spark
    }

    pub fn bus(&mut self) -> &mut SimBus {
        &mut self.bus
    }

    pub fn set_command(&mut self, command: Command) {
        self.command = command;
    }

    /// Run one control cycle of length `dt`
    pub fn tick(&mut self, dt: Duration) -> DeviceResult<SparkMaxInputs> {
        self.bus.step(dt.as_secs_f64());
        self.spark
            .set_with_mode(self.command.setpoint, self.command.mode)?;
        self.spark.periodic()?;
        Ok(self.spark.inputs())
    }

    /// Stop the motor and release it
    pub fn shutdown(mut self) -> DeviceResult<()> {
        self.spark.stop_motor()?;
        self.spark.close()
    }
}

/// Build the adapter from the command line and configure it
pub fn build(
    cli: &Cli,
    telemetry: Arc<dyn TelemetrySink>,
    log: Arc<dyn LogSink>,
) -> Result<ControlLoop, Box<dyn std::error::Error + Send + Sync>> {
    let mut bus = SimBus::new();
    let mut spark = SparkMax::new(
        &mut bus,
        DeviceId::new(cli.can_id, cli.name.clone()),
        cli.motor_type,
        telemetry,
        log,
    )?;

    spark.set_idle_mode(cli.idle_mode)?;
    spark.set_smart_current_limit(cli.current_limit)?;

    if let Some(path) = &cli.pid_config {
        let config = load_pid_config(path)?;
        info!("Loaded PID config from {}", path.display());
        spark.initialize_spark_pid_default_limits(&config, cli.feedback_sensor)?;
    }

    Ok(ControlLoop::new(
        bus,
        spark,
        Command {
            mode: cli.mode,
            setpoint: cli.setpoint,
        },
    ))
}

pub async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let telemetry: Arc<dyn TelemetrySink> = if cli.zenoh {
        info!("Opening Zenoh session...");
        let session = zenoh::open(zenoh::Config::default()).await?;
        info!("Publishing telemetry under {}/{}", TELEMETRY_PREFIX, cli.name);
        Arc::new(ZenohTelemetry::new(session, TELEMETRY_PREFIX))
    } else {
        Arc::new(TracingTelemetry)
    };
    let log: Arc<dyn LogSink> = Arc::new(TracingLog);

    let mut control = build(&cli, telemetry, log)?;
    let mut tick = interval(LOOP_PERIOD);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        "Runtime started: {}Hz loop, {:?} {} on {} (CAN {})",
        LOOP_HZ,
        cli.mode,
        cli.setpoint,
        cli.name,
        cli.can_id
    );

    loop {
        tokio::select! {
            _ = tick.tick() => {
                control.tick(LOOP_PERIOD)?;
            }
            _ = &mut shutdown => {
                info!("Shutdown requested, stopping motor");
                break;
            }
        }
    }

    control.shutdown()?;
    Ok(())
}
