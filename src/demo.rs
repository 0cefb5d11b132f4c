// Scripted drive sequence for checking the wiring

use std::time::Duration;

use tracing::info;

use crate::messages::Command;
use crate::motor::{PwmDevice, Rover};

/// One leg of the demo: a command held for a while
#[derive(Debug, Clone, Copy)]
pub struct DemoStep {
    pub command: Command,
    pub speed: i32,
    pub hold: Duration,
}

impl DemoStep {
    pub const fn new(command: Command, speed: i32, hold_ms: u64) -> Self {
        Self {
            command,
            speed,
            hold: Duration::from_millis(hold_ms),
        }
    }
}

pub const DEMO_STEPS: [DemoStep; 4] = [
    DemoStep::new(Command::Forward, 50, 1000),
    DemoStep::new(Command::Backward, 50, 1000),
    DemoStep::new(Command::Left, 50, 500),
    DemoStep::new(Command::Right, 50, 500),
];

/// Drive through `steps` in order, then stop.
///
/// The final stop runs even when a step fails. The caller is responsible for
/// stopping the rover if this future is dropped half-way.
pub async fn run<D: PwmDevice>(rover: &mut Rover<D>, steps: &[DemoStep]) -> Result<(), D::Error> {
    let outcome = drive(rover, steps).await;
    info!("Stopping");
    let stopped = rover.stop();
    outcome.and(stopped)
}

async fn drive<D: PwmDevice>(rover: &mut Rover<D>, steps: &[DemoStep]) -> Result<(), D::Error> {
    for step in steps {
        info!("{}...", step.command);
        rover.apply(step.command, Some(step.speed))?;
        tokio::time::sleep(step.hold).await;
    }
    Ok(())
}
