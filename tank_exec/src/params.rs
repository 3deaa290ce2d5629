//! # Tank Executable Parameters
//!
//! This module provides the parameters for the tank executable.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::pose::{CalibrationParams, Pose};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
pub struct TankExecParams {
    /// Network endpoints for the operator link
    pub net: NetParams,

    /// Number of cells along each side of the navigation grid
    pub grid_size: u32,

    /// Start pose; the grid centre facing up when omitted
    pub start_pose: Option<Pose>,

    /// Camera settings
    pub camera: CamParams,

    /// Object detector settings
    pub detector: DetectorParams,

    /// Initial state of the person-following policy
    pub auto_navigation: bool,

    /// Initial state of object detection on captured frames
    pub object_detection: bool,

    /// Whether detection boxes are drawn onto outgoing video frames
    pub overlay: bool,

    /// Initial motion calibration
    pub calibration: CalibrationParams,
}

#[derive(Serialize, Deserialize)]
pub struct NetParams {
    /// Endpoint the operator command socket binds to
    pub ops_endpoint: String,

    /// Endpoint the telemetry publisher binds to
    pub tm_endpoint: String,
}

#[derive(Serialize, Deserialize)]
pub struct CamParams {
    /// V4L2 device path, used when the `cam` feature is enabled
    pub device: String,

    /// Capture width in pixels
    pub width: u32,

    /// Capture height in pixels
    pub height: u32,

    /// JPEG quality for outgoing frames, 1-100
    pub jpeg_quality: u8,
}

#[derive(Serialize, Deserialize)]
pub struct DetectorParams {
    /// Path to the detection model, or None to run without a detector
    pub model_path: Option<String>,

    /// Minimum confidence for a detection to be kept
    pub confidence: f64,

    /// Class ids the auto-navigation policy reacts to (0 = person)
    pub classes: Vec<u32>,
}
