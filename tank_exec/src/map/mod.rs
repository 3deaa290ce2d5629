//! # Map & Navigation Planner
//!
//! The navigation grid and the planner that turns a target cell into a
//! bounded pulse sequence. Planning is deliberately simple: quantise the
//! heading error into turn pulses, then the straight-line distance into
//! forward pulses. Operators correct residual error manually; there is no
//! pathfinding around obstacles, only a gate that halts a plan before it
//! would drive into one.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod executor;

pub use executor::{spawn_planner, PlanState, PlannerHandle};

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::info;
use serde::{Deserialize, Serialize};

// Internal
use crate::pose::{CalibrationParams, Pose};
use ops_if::cmd::Command;
use util::maths;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The navigation grid: fixed dimensions plus the operator-marked
/// obstacle cells.
pub struct Grid {
    size: u32,
    obstacles: Vec<bool>,
}

/// A single pulse of a navigation plan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub command: Command,
    pub duration_s: f64,
}

/// An ordered pulse sequence that should approximately reach a target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NavigationPlan {
    pub steps: Vec<PlanStep>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Grid {
    pub fn new(size: u32) -> Self {
        Self {
            size,
            obstacles: vec![false; (size * size) as usize],
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn in_bounds(&self, row: u32, col: u32) -> bool {
        row < self.size && col < self.size
    }

    /// Whether the given cell is marked as an obstacle. Cells outside the
    /// grid are not obstacles; the pose clamp keeps the vehicle inside.
    pub fn is_obstacle(&self, row: u32, col: u32) -> bool {
        if !self.in_bounds(row, col) {
            return false;
        }
        self.obstacles[(row * self.size + col) as usize]
    }

    /// Replace the obstacle set with the given `[row, col]` cells.
    ///
    /// Returns the number of cells actually marked; out-of-bounds cells
    /// are dropped.
    pub fn set_obstacles(&mut self, cells: &[[u32; 2]]) -> usize {
        for v in self.obstacles.iter_mut() {
            *v = false;
        }

        let mut marked = 0;
        for cell in cells {
            let (row, col) = (cell[0], cell[1]);
            if self.in_bounds(row, col) {
                self.obstacles[(row * self.size + col) as usize] = true;
                marked += 1;
            }
        }

        info!("Obstacle set replaced: {} cells marked", marked);
        marked
    }
}

impl NavigationPlan {
    pub fn empty() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Total nominal duration of the plan in seconds.
    pub fn duration_s(&self) -> f64 {
        self.steps.iter().map(|s| s.duration_s).sum()
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Plan a pulse sequence from the given pose to the target cell.
///
/// The plan is the turn pulses needed to face the target, followed by the
/// forward pulses covering the straight-line distance, each with its
/// calibrated duration. Navigating to the cell the vehicle is already in
/// produces an empty plan.
pub fn plan_to_cell(
    target_row: u32,
    target_col: u32,
    pose: &Pose,
    calib: &CalibrationParams,
) -> NavigationPlan {
    let mut plan = NavigationPlan::empty();

    // Already there
    if pose.row() == target_row && pose.col() == target_col {
        return plan;
    }

    let target_x = target_col as f64;
    let target_y = target_row as f64;

    let dx = target_x - pose.x;
    let dy = target_y - pose.y;

    // Desired heading; y grows downward so screen-up is -dy
    let desired_deg = maths::wrap_degrees((-dy).atan2(dx).to_degrees());
    let delta_deg = maths::signed_delta_degrees(desired_deg, pose.angle_deg);

    // Quantise the heading error into turn pulses
    let turns = (delta_deg.abs() / calib.turn_angle).round() as u32;
    let (turn_cmd, turn_delay) = if delta_deg > 0.0 {
        (Command::Left, calib.turn_delay_left_s)
    } else {
        (Command::Right, calib.turn_delay_right_s)
    };

    for _ in 0..turns {
        plan.steps.push(PlanStep {
            command: turn_cmd,
            duration_s: turn_delay,
        });
    }

    // Quantise the remaining distance into forward pulses
    let distance = maths::norm_2d((pose.x, pose.y), (target_x, target_y));
    let pulses = (distance / calib.move_distance).round() as u32;

    for _ in 0..pulses {
        plan.steps.push(PlanStep {
            command: Command::Forward,
            duration_s: calib.forward_delay_s,
        });
    }

    plan
}

/// Fixed plan: one cell forward along the current heading.
pub fn plan_one_cell_forward(calib: &CalibrationParams) -> NavigationPlan {
    let pulses = (1.0 / calib.move_distance).round().max(1.0) as u32;

    NavigationPlan {
        steps: vec![
            PlanStep {
                command: Command::Forward,
                duration_s: calib.forward_delay_s,
            };
            pulses as usize
        ],
    }
}

/// Fixed plan: a 90 degree turn in the given direction.
pub fn plan_quarter_turn(cmd: Command, calib: &CalibrationParams) -> NavigationPlan {
    let pulses = (90.0 / calib.turn_angle).round().max(1.0) as u32;
    let delay = calib.pulse_duration_s(cmd);

    NavigationPlan {
        steps: vec![
            PlanStep {
                command: cmd,
                duration_s: delay,
            };
            pulses as usize
        ],
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn unit_calib() -> CalibrationParams {
        CalibrationParams {
            move_distance: 1.0,
            turn_angle: 90.0,
            forward_delay_s: 0.5,
            turn_delay_left_s: 0.3,
            turn_delay_right_s: 0.3,
        }
    }

    fn count(plan: &NavigationPlan, cmd: Command) -> usize {
        plan.steps.iter().filter(|s| s.command == cmd).count()
    }

    #[test]
    fn test_straight_up_needs_no_turns() {
        // Facing up at (10, 10), target five rows up
        let pose = Pose {
            x: 10.0,
            y: 10.0,
            angle_deg: 90.0,
        };

        let plan = plan_to_cell(5, 10, &pose, &unit_calib());

        assert_eq!(count(&plan, Command::Left), 0);
        assert_eq!(count(&plan, Command::Right), 0);
        assert_eq!(count(&plan, Command::Forward), 5);
        // Turn pulses come before forward pulses
        assert_eq!(plan.steps[0].command, Command::Forward);
    }

    #[test]
    fn test_east_target_needs_one_right_turn() {
        // Facing up at (10, 10), target five columns right
        let pose = Pose {
            x: 10.0,
            y: 10.0,
            angle_deg: 90.0,
        };

        let plan = plan_to_cell(10, 15, &pose, &unit_calib());

        assert_eq!(count(&plan, Command::Right), 1);
        assert_eq!(count(&plan, Command::Forward), 5);
        assert_eq!(plan.steps[0].command, Command::Right);
    }

    #[test]
    fn test_current_cell_gives_empty_plan() {
        let pose = Pose {
            x: 10.3,
            y: 10.7,
            angle_deg: 45.0,
        };

        assert!(plan_to_cell(10, 10, &pose, &unit_calib()).is_empty());
    }

    #[test]
    fn test_left_turns_for_positive_delta() {
        // Facing right, target straight up: +90 delta means left pulses
        let pose = Pose {
            x: 10.0,
            y: 10.0,
            angle_deg: 0.0,
        };

        let plan = plan_to_cell(5, 10, &pose, &unit_calib());

        assert_eq!(count(&plan, Command::Left), 1);
        assert_eq!(count(&plan, Command::Right), 0);
    }

    #[test]
    fn test_fine_turn_angle_quantisation() {
        // 15 degree pulses, 90 degrees to turn
        let calib = CalibrationParams {
            move_distance: 0.2,
            turn_angle: 15.0,
            ..Default::default()
        };
        let pose = Pose {
            x: 10.0,
            y: 10.0,
            angle_deg: 90.0,
        };

        let plan = plan_to_cell(10, 15, &pose, &calib);

        assert_eq!(count(&plan, Command::Right), 6);
        // 5 cells at 0.2 cells per pulse
        assert_eq!(count(&plan, Command::Forward), 25);
    }

    #[test]
    fn test_step_durations_come_from_calibration() {
        let calib = unit_calib();
        let pose = Pose {
            x: 10.0,
            y: 10.0,
            angle_deg: 90.0,
        };

        let plan = plan_to_cell(10, 15, &pose, &calib);

        assert_eq!(plan.steps[0].duration_s, 0.3);
        assert_eq!(plan.steps[1].duration_s, 0.5);
    }

    #[test]
    fn test_convenience_plans() {
        let calib = CalibrationParams {
            move_distance: 0.2,
            turn_angle: 15.0,
            ..Default::default()
        };

        assert_eq!(plan_one_cell_forward(&calib).len(), 5);

        let left = plan_quarter_turn(Command::Left, &calib);
        assert_eq!(left.len(), 6);
        assert!(left.steps.iter().all(|s| s.command == Command::Left));
    }

    #[test]
    fn test_grid_obstacles() {
        let mut grid = Grid::new(20);

        assert!(!grid.is_obstacle(5, 5));

        let marked = grid.set_obstacles(&[[5, 5], [0, 19], [25, 3]]);
        assert_eq!(marked, 2);
        assert!(grid.is_obstacle(5, 5));
        assert!(grid.is_obstacle(0, 19));
        assert!(!grid.is_obstacle(3, 3));

        // Replacing the set clears previous obstacles
        grid.set_obstacles(&[[1, 1]]);
        assert!(!grid.is_obstacle(5, 5));
        assert!(grid.is_obstacle(1, 1));
    }
}
