//! # Tank Executable Library
//!
//! The control core of the remotely operated tank. The executable fuses
//! four concerns:
//!
//! - the command arbiter and safety gate, through which every motion
//!   command reaches the actuators,
//! - the dead-reckoning pose estimator and grid navigation planner,
//! - the camera and detection pipeline feeding both the operator video
//!   stream and the person-following policy,
//! - the telemetry fan-out keeping the physical vehicle, the virtual
//!   model and every connected operator in sync.
//!
//! Each concern runs as a long-lived task; they share state through
//! short-critical-section locks and communicate through message channels.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod arbiter;
pub mod cam;
pub mod detect;
pub mod map;
pub mod motor_driver;
pub mod ops_server;
pub mod params;
pub mod pose;
pub mod shared;
pub mod telemetry;
pub mod virtual_robot;
