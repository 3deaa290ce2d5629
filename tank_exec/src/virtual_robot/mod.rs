//! # Virtual Robot
//!
//! A mirror of the pose estimator driven from the same dispatched command
//! stream. It backs the display model on the operator's map so a vehicle
//! can be driven with no physical tank attached, and stays in lockstep
//! with the real pose estimate while the hardware behaves. The rendering
//! surface itself is an external collaborator; this module only maintains
//! the model.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::collections::VecDeque;

use crate::pose::{CalibrationParams, Pose};
use ops_if::cmd::Command;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Maximum number of trail points kept for drawing.
const TRAIL_CAPACITY: usize = 100;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The display model of the vehicle.
pub struct VirtualRobot {
    pose: Pose,
    start_pose: Pose,
    grid_size: u32,
    trail: VecDeque<(f64, f64)>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl VirtualRobot {
    pub fn new(start_pose: Pose, grid_size: u32) -> Self {
        let mut trail = VecDeque::with_capacity(TRAIL_CAPACITY);
        trail.push_back((start_pose.x, start_pose.y));

        Self {
            pose: start_pose,
            start_pose,
            grid_size,
            trail,
        }
    }

    /// Apply one dispatched command to the model.
    ///
    /// Kinematics are identical to the pose estimator's, driven by the
    /// same shared calibration, so the two models only diverge when the
    /// physical vehicle misbehaves.
    pub fn apply(&mut self, cmd: Command, calib: &CalibrationParams) -> Pose {
        self.pose = self.pose.advanced(cmd, calib, self.grid_size);

        if matches!(cmd, Command::Forward | Command::Backward) {
            if self.trail.len() == TRAIL_CAPACITY {
                self.trail.pop_front();
            }
            self.trail.push_back((self.pose.x, self.pose.y));
        }

        self.pose
    }

    /// Reset the model to its start pose and clear the trail.
    pub fn reset(&mut self) -> Pose {
        self.pose = self.start_pose;
        self.trail.clear();
        self.trail.push_back((self.pose.x, self.pose.y));
        self.pose
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    pub fn trail(&self) -> &VecDeque<(f64, f64)> {
        &self.trail
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::pose::PoseEstimator;

    #[test]
    fn test_mirrors_pose_estimator() {
        let start = Pose {
            x: 10.0,
            y: 10.0,
            angle_deg: 90.0,
        };
        let calib = CalibrationParams {
            move_distance: 1.0,
            turn_angle: 90.0,
            ..Default::default()
        };

        let mut est = PoseEstimator::new(start, 20);
        let mut virt = VirtualRobot::new(start, 20);

        for cmd in &[
            Command::Forward,
            Command::Right,
            Command::Forward,
            Command::Left,
            Command::Backward,
        ] {
            est.advance(*cmd, &calib);
            virt.apply(*cmd, &calib);
        }

        assert_eq!(est.snapshot(), virt.pose());
    }

    #[test]
    fn test_reset() {
        let start = Pose::grid_centre(20);
        let mut virt = VirtualRobot::new(start, 20);
        let calib = CalibrationParams::default();

        virt.apply(Command::Forward, &calib);
        virt.reset();

        assert_eq!(virt.pose(), start);
        assert_eq!(virt.trail().len(), 1);
    }
}
