//! # Pose Estimator
//!
//! Open-loop dead reckoning of the tank's position and heading on the
//! navigation grid. Every command that is actually dispatched to the
//! actuators advances the estimate by the calibrated per-pulse
//! displacement or rotation; there is no encoder feedback, and
//! calibration accuracy is the operator's responsibility.
//!
//! Convention: angle 0 points along +x (screen right), angle 90 points
//! along -y (screen up). Rows and columns at the protocol boundary are
//! `row = floor(y)`, `col = floor(x)`.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

// Internal
use ops_if::cmd::Command;
use util::maths;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Maximum number of recent positions kept for the UI trail.
const TRAIL_CAPACITY: usize = 100;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The estimated pose of the vehicle on the grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Position along +x in grid cells
    pub x: f64,

    /// Position along +y (screen down) in grid cells
    pub y: f64,

    /// Heading in degrees, [0, 360), 0 = +x, 90 = screen up
    pub angle_deg: f64,
}

/// Calibration mapping one pulse to displacement or rotation.
///
/// Mutable at runtime; the planner and the pose estimator read it through
/// the same shared lock so updates apply to both atomically.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CalibrationParams {
    /// Grid cells covered by one Forward/Backward pulse
    pub move_distance: f64,

    /// Degrees turned by one Left/Right pulse
    pub turn_angle: f64,

    /// Duration of a Forward/Backward pulse in seconds
    pub forward_delay_s: f64,

    /// Duration of a Left pulse in seconds
    pub turn_delay_left_s: f64,

    /// Duration of a Right pulse in seconds
    pub turn_delay_right_s: f64,
}

/// Dead-reckoning pose estimator state.
pub struct PoseEstimator {
    pose: Pose,
    start_pose: Pose,
    grid_size: u32,

    /// Recent positions for the UI trail; not load-bearing
    trail: VecDeque<(f64, f64)>,

    /// Number of advance() calls recorded
    transitions: u64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Pose {
    /// The start pose at the centre of a grid of the given size, facing up.
    pub fn grid_centre(grid_size: u32) -> Self {
        Self {
            x: grid_size as f64 / 2.0,
            y: grid_size as f64 / 2.0,
            angle_deg: 90.0,
        }
    }

    /// Grid row of this pose.
    pub fn row(&self) -> u32 {
        self.y.floor() as u32
    }

    /// Grid column of this pose.
    pub fn col(&self) -> u32 {
        self.x.floor() as u32
    }

    /// The pose reached from this one by a single command pulse.
    ///
    /// Position is clamped to `[0, grid_size - 1]` and the angle wrapped to
    /// `[0, 360)`. Stop leaves the pose unchanged.
    pub fn advanced(&self, cmd: Command, calib: &CalibrationParams, grid_size: u32) -> Pose {
        let mut next = *self;

        match cmd {
            Command::Forward => {
                let angle_rad = next.angle_deg.to_radians();
                next.x += calib.move_distance * angle_rad.cos();
                next.y -= calib.move_distance * angle_rad.sin();
            }
            Command::Backward => {
                let angle_rad = next.angle_deg.to_radians();
                next.x -= calib.move_distance * angle_rad.cos();
                next.y += calib.move_distance * angle_rad.sin();
            }
            Command::Left => {
                next.angle_deg = maths::wrap_degrees(next.angle_deg + calib.turn_angle);
            }
            Command::Right => {
                next.angle_deg = maths::wrap_degrees(next.angle_deg - calib.turn_angle);
            }
            Command::Stop => (),
        }

        let max = (grid_size - 1) as f64;
        next.x = maths::clamp(next.x, 0.0, max);
        next.y = maths::clamp(next.y, 0.0, max);

        next
    }
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            move_distance: 0.2,
            turn_angle: 15.0,
            forward_delay_s: 0.5,
            turn_delay_left_s: 0.3,
            turn_delay_right_s: 0.3,
        }
    }
}

impl CalibrationParams {
    /// Nominal pulse duration for the given command.
    pub fn pulse_duration_s(&self, cmd: Command) -> f64 {
        match cmd {
            Command::Forward | Command::Backward => self.forward_delay_s,
            Command::Left => self.turn_delay_left_s,
            Command::Right => self.turn_delay_right_s,
            Command::Stop => 0.0,
        }
    }
}

impl PoseEstimator {
    /// Create a new estimator starting at the given pose.
    pub fn new(start_pose: Pose, grid_size: u32) -> Self {
        let mut trail = VecDeque::with_capacity(TRAIL_CAPACITY);
        trail.push_back((start_pose.x, start_pose.y));

        Self {
            pose: start_pose,
            start_pose,
            grid_size,
            trail,
            transitions: 0,
        }
    }

    /// Advance the estimate by one dispatched command.
    ///
    /// Exactly one transition is recorded per call, including Stop (which
    /// leaves the pose itself unchanged).
    pub fn advance(&mut self, cmd: Command, calib: &CalibrationParams) -> Pose {
        self.pose = self.pose.advanced(cmd, calib, self.grid_size);
        self.transitions += 1;

        // Only movement extends the trail
        if matches!(cmd, Command::Forward | Command::Backward) {
            if self.trail.len() == TRAIL_CAPACITY {
                self.trail.pop_front();
            }
            self.trail.push_back((self.pose.x, self.pose.y));
        }

        self.pose
    }

    /// Restore the start pose and clear the movement history.
    pub fn reset(&mut self) -> Pose {
        self.pose = self.start_pose;
        self.trail.clear();
        self.trail.push_back((self.pose.x, self.pose.y));
        self.pose
    }

    /// Current pose snapshot.
    pub fn snapshot(&self) -> Pose {
        self.pose
    }

    /// Number of transitions recorded since start.
    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    /// Recent positions, oldest first.
    pub fn trail(&self) -> &VecDeque<(f64, f64)> {
        &self.trail
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
