//! # Motor Driver Module
//!
//! This module abstracts over the actuator hardware. The arbiter is the
//! only caller; it hands the driver one discrete command at a time and the
//! driver is expected to hold that state until the next command arrives.
//! Drivers are idempotent: repeating the current command is a no-op at the
//! hardware level.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::debug;

use ops_if::cmd::Command;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A sink for motion commands with bounded execution latency.
pub trait MotorDriver: Send {
    /// Apply the given command to the tracks.
    fn execute(&mut self, cmd: Command) -> Result<(), MotorError>;
}

// ---------------------------------------------------------------------------
// ENUMS
// ---------------------------------------------------------------------------

/// Errors that can occur while driving the motors.
#[derive(Debug, thiserror::Error)]
pub enum MotorError {
    #[error("Could not write to the motor board: {0}")]
    WriteError(String),
}

// ---------------------------------------------------------------------------
// STRUCTS
// ---------------------------------------------------------------------------

/// Driver used when no motor hardware is attached.
///
/// Logs the dual H-bridge pin states the hardware driver would set, so
/// bench runs show the exact actuation that would have happened.
pub struct SimDriver {
    last_cmd: Option<Command>,
}

// ---------------------------------------------------------------------------
// IMPLS
// ---------------------------------------------------------------------------

impl SimDriver {
    pub fn new() -> Self {
        Self { last_cmd: None }
    }

    /// H-bridge input states (in1, in2, in3, in4) for the given command.
    fn pin_states(cmd: Command) -> (bool, bool, bool, bool) {
        match cmd {
            // Both tracks forward
            Command::Forward => (true, false, true, false),
            // Both tracks backward
            Command::Backward => (false, true, false, true),
            // Left track backward, right track forward
            Command::Left => (false, true, true, false),
            // Left track forward, right track backward
            Command::Right => (true, false, false, true),
            Command::Stop => (false, false, false, false),
        }
    }
}

impl Default for SimDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MotorDriver for SimDriver {
    fn execute(&mut self, cmd: Command) -> Result<(), MotorError> {
        if self.last_cmd != Some(cmd) {
            let pins = Self::pin_states(cmd);
            debug!(
                "Motors (sim): {} pins=({},{},{},{})",
                cmd, pins.0 as u8, pins.1 as u8, pins.2 as u8, pins.3 as u8
            );
            self.last_cmd = Some(cmd);
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
