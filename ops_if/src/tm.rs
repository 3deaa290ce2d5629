//! # Telemetry Message Module
//!
//! The outbound half of the operator session protocol: every message the
//! vehicle broadcasts to its connected operators.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::{Deserialize, Serialize};

// Internal
use crate::cam::CamFrame;
use crate::cmd::Command;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The periodic telemetry packet.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct TelemetryPacket {
    /// Battery charge in percent
    pub battery: u8,

    /// The motion command currently driving the actuators
    pub current_motion: Command,

    /// Whether person-following auto-navigation is enabled
    pub auto_navigation: bool,

    /// Whether object detection is enabled
    pub object_detection: bool,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// A message broadcast by the vehicle to all connected operators.
///
/// Like [`crate::ops::OpsMessage`], messages are JSON objects tagged by a
/// `type` field.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TmMessage {
    /// The pose estimate changed.
    RobotUpdate { row: f64, col: f64, angle: f64 },

    /// Periodic telemetry.
    Telemetry(TelemetryPacket),

    /// A textual log event.
    Log { msg: String },

    /// Current calibration values, sent in reply to a
    /// `request_calibration_values` operator message.
    CalibrationValues { move_distance: f64, turn_angle: f64 },

    /// The emergency stop latch was set.
    EmergencyStopActivated,

    /// A video frame, base64 JPEG encoded.
    VideoFrame(CamFrame),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl TmMessage {
    /// Serialise this message to its JSON wire form.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl Default for TelemetryPacket {
    fn default() -> Self {
        Self {
            battery: 100,
            current_motion: Command::Stop,
            auto_navigation: false,
            object_detection: false,
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_robot_update_wire_format() {
        let msg = TmMessage::RobotUpdate {
            row: 8.0,
            col: 11.0,
            angle: 0.0,
        };

        let json = msg.to_json().unwrap();
        assert!(json.contains(r#""type":"robot_update""#));
        assert!(json.contains(r#""row":8.0"#));

        assert_eq!(serde_json::from_str::<TmMessage>(&json).unwrap(), msg);
    }

    #[test]
    fn test_telemetry_fields_inline() {
        let msg = TmMessage::Telemetry(TelemetryPacket {
            battery: 85,
            current_motion: Command::Forward,
            auto_navigation: true,
            object_detection: false,
        });

        let json = msg.to_json().unwrap();
        assert!(json.contains(r#""type":"telemetry""#));
        assert!(json.contains(r#""battery":85"#));
        assert!(json.contains(r#""current_motion":"F""#));
    }

    #[test]
    fn test_log_wire_format() {
        let json = TmMessage::Log {
            msg: "Emergency stop activated".into(),
        }
        .to_json()
        .unwrap();

        assert!(json.contains(r#""type":"log""#));
    }
}
