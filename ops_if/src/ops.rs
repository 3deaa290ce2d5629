//! # Operator Message Module
//!
//! This module defines the inbound half of the operator session protocol:
//! the JSON-framed messages an operator may send to the vehicle, and the
//! reply returned for each one.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Internal
use crate::cmd::Command;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// A message sent by an operator to the vehicle.
///
/// Messages are JSON objects tagged by a `type` field, for example:
///
/// ```json
/// { "type": "control", "forward": 80, "turn": 5 }
/// { "type": "navigate_to", "row": 5, "col": 10 }
/// ```
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpsMessage {
    /// Joystick tick, expected at roughly 20 Hz. Both axes are in
    /// [-100, 100].
    Control { forward: i32, turn: i32 },

    /// Latch the emergency stop.
    EmergencyStop,

    /// Clear the emergency stop latch.
    ReleaseEmergency,

    /// Drive to the given grid cell.
    NavigateTo { row: u32, col: u32 },

    /// Cancel the active navigation plan.
    ClearTarget,

    /// Reset the pose to the grid centre, facing up.
    ResetStart,

    /// Drive forward by one cell.
    GoUp,

    /// Turn 90 degrees anticlockwise.
    #[serde(rename = "turn_90_left")]
    Turn90Left,

    /// Turn 90 degrees clockwise.
    #[serde(rename = "turn_90_right")]
    Turn90Right,

    /// Replace the obstacle set with the given `[row, col]` cells.
    UpdateObstacles { cells: Vec<[u32; 2]> },

    /// Update the per-pulse step durations, in seconds.
    UpdateTiming {
        forward_delay: f64,
        turn_left_delay: f64,
        turn_right_delay: f64,
    },

    /// Execute a single calibration pulse of the given command.
    CalibrateCommand { command: Command },

    /// Write new calibration parameters. Fields left out are unchanged.
    ApplyCalibration {
        distance: Option<f64>,
        angle: Option<f64>,
    },

    /// Request the current calibration values; answered with a
    /// `calibration_values` telemetry message.
    RequestCalibrationValues,
}

/// The reply returned for each operator message.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OpsResponse {
    /// The message was accepted.
    Ok,

    /// The message was rejected, with the reason.
    Rejected { reason: String },
}

/// Possible parsing errors.
#[derive(Debug, Error)]
pub enum OpsParseError {
    #[error("Operator message contains invalid JSON: {0}")]
    InvalidJson(serde_json::Error),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl OpsMessage {
    /// Parse a new operator message from a JSON packet.
    pub fn from_json(json_str: &str) -> Result<Self, OpsParseError> {
        serde_json::from_str(json_str).map_err(OpsParseError::InvalidJson)
    }
}

impl OpsResponse {
    /// Build a rejection response from anything printable.
    pub fn rejected<S: ToString>(reason: S) -> Self {
        OpsResponse::Rejected {
            reason: reason.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
