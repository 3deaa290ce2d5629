//! Navigation plan execution task.
//!
//! The planner task owns plan execution: it builds a plan from the
//! current pose snapshot, then walks the steps, dispatching each pulse
//! through the arbiter and sleeping for the pulse duration. Cancellation
//! is cooperative: the cancel flag is checked before every dispatch, and
//! the arbiter raises it when a higher-priority source preempts the plan.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

// Internal
use super::{plan_one_cell_forward, plan_quarter_turn, plan_to_cell, Grid, NavigationPlan};
use crate::arbiter::{ArbiterHandle, CmdSource, DispatchOutcome};
use crate::pose::{CalibrationParams, PoseEstimator};
use crate::shared::lock;
use crate::telemetry::TmEvent;
use ops_if::cmd::Command;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// A step that has not completed within this multiple of its nominal
/// duration aborts the plan.
const STEP_OVERRUN_FACTOR: f64 = 2.0;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Observable state of the planner task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanState {
    Idle,
    Planning,
    Executing(usize),
}

/// Requests handled by the planner task.
enum PlannerMsg {
    Navigate { row: u32, col: u32 },
    GoUp,
    Turn90Left,
    Turn90Right,
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Cloneable handle to the planner task.
#[derive(Clone)]
pub struct PlannerHandle {
    requests: Sender<PlannerMsg>,
    cancel: Arc<AtomicBool>,
    state: Arc<Mutex<PlanState>>,
}

/// Everything the planner task needs to execute plans.
struct PlannerTask {
    requests: Receiver<PlannerMsg>,
    arbiter: ArbiterHandle,
    pose: Arc<Mutex<PoseEstimator>>,
    grid: Arc<Mutex<Grid>>,
    calib: Arc<Mutex<CalibrationParams>>,
    estop: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    plan_active: Arc<AtomicBool>,
    state: Arc<Mutex<PlanState>>,
    tm_events: Sender<TmEvent>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl PlannerHandle {
    /// Start navigating to the given target cell.
    pub fn navigate(&self, row: u32, col: u32) {
        let _ = self.requests.send(PlannerMsg::Navigate { row, col });
    }

    /// Run the one-cell-forward convenience plan.
    pub fn go_up(&self) {
        let _ = self.requests.send(PlannerMsg::GoUp);
    }

    /// Run the quarter-turn-left convenience plan.
    pub fn turn_90_left(&self) {
        let _ = self.requests.send(PlannerMsg::Turn90Left);
    }

    /// Run the quarter-turn-right convenience plan.
    pub fn turn_90_right(&self) {
        let _ = self.requests.send(PlannerMsg::Turn90Right);
    }

    /// Cooperatively cancel the executing plan.
    ///
    /// The caller is responsible for emitting the Stop through the
    /// arbiter; the executing task discards its remaining steps at the
    /// next check.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Observable planner state.
    pub fn state(&self) -> PlanState {
        *lock(&self.state)
    }
}

impl PlannerTask {
    fn run(mut self) {
        while let Ok(msg) = self.requests.recv() {
            let plan = self.build_plan(msg);

            if plan.is_empty() {
                debug!("Planner produced an empty plan, nothing to do");
                self.set_state(PlanState::Idle);
                continue;
            }

            info!(
                "Executing plan: {} steps, {:.1} s nominal",
                plan.len(),
                plan.duration_s()
            );
            self.execute(plan);
        }

        debug!("Planner task stopped");
    }

    fn build_plan(&mut self, msg: PlannerMsg) -> NavigationPlan {
        self.set_state(PlanState::Planning);

        let calib = *lock(&self.calib);

        match msg {
            PlannerMsg::Navigate { row, col } => {
                let pose = lock(&self.pose).snapshot();
                plan_to_cell(row, col, &pose, &calib)
            }
            PlannerMsg::GoUp => plan_one_cell_forward(&calib),
            PlannerMsg::Turn90Left => plan_quarter_turn(Command::Left, &calib),
            PlannerMsg::Turn90Right => plan_quarter_turn(Command::Right, &calib),
        }
    }

    fn execute(&mut self, plan: NavigationPlan) {
        self.cancel.store(false, Ordering::SeqCst);
        self.plan_active.store(true, Ordering::SeqCst);

        for (i, step) in plan.steps.iter().enumerate() {
            self.set_state(PlanState::Executing(i));

            if self.cancel.load(Ordering::SeqCst) {
                info!("Plan cancelled at step {}", i);
                self.operator_log("Navigation cancelled".into());
                break;
            }

            if self.estop.load(Ordering::SeqCst) {
                info!("Plan abandoned: emergency stop latched");
                break;
            }

            if step.command == Command::Forward && !self.forward_step_clear() {
                break;
            }

            let nominal = Duration::from_secs_f64(step.duration_s);
            let started = Instant::now();

            match self.arbiter.dispatch(step.command, CmdSource::MapPlanner) {
                DispatchOutcome::Dispatched | DispatchOutcome::Coalesced => (),
                DispatchOutcome::Rejected(reason) => {
                    info!("Plan discarded at step {}: {}", i, reason);
                    self.operator_log(format!("Navigation stopped: {}", reason));
                    break;
                }
            }

            thread::sleep(nominal);

            if started.elapsed().as_secs_f64() > STEP_OVERRUN_FACTOR * step.duration_s {
                warn!("Plan step {} overran its nominal duration", i);
                self.operator_log("Navigation aborted: step overran".into());
                break;
            }
        }

        self.plan_active.store(false, Ordering::SeqCst);

        // The closing Stop is best-effort: with the estop latched or the
        // joystick active the arbiter refuses planner commands, and
        // whichever source preempted the plan owns the vehicle now.
        if let DispatchOutcome::Rejected(reason) =
            self.arbiter.dispatch(Command::Stop, CmdSource::MapPlanner)
        {
            debug!("Closing stop not dispatched: {}", reason);
        }

        self.set_state(PlanState::Idle);
    }

    /// Gate the next forward pulse on the obstacle map.
    fn forward_step_clear(&mut self) -> bool {
        let pose = lock(&self.pose).snapshot();
        let calib = *lock(&self.calib);
        let grid = lock(&self.grid);

        let next = pose.advanced(Command::Forward, &calib, grid.size());

        if grid.is_obstacle(next.row(), next.col()) {
            warn!(
                "Navigation halted: obstacle at ({}, {})",
                next.row(),
                next.col()
            );
            self.operator_log(format!(
                "Navigation halted: obstacle at ({}, {})",
                next.row(),
                next.col()
            ));
            return false;
        }

        true
    }

    fn operator_log(&self, msg: String) {
        let _ = self.tm_events.send(TmEvent::Log(msg));
    }

    fn set_state(&self, state: PlanState) {
        *lock(&self.state) = state;
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Spawn the planner task.
///
/// `cancel` and `plan_active` are shared with the arbiter so that
/// higher-priority commands can preempt an executing plan.
#[allow(clippy::too_many_arguments)]
pub fn spawn_planner(
    arbiter: ArbiterHandle,
    pose: Arc<Mutex<PoseEstimator>>,
    grid: Arc<Mutex<Grid>>,
    calib: Arc<Mutex<CalibrationParams>>,
    estop: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    plan_active: Arc<AtomicBool>,
    tm_events: Sender<TmEvent>,
) -> std::io::Result<(PlannerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = mpsc::channel();
    let state = Arc::new(Mutex::new(PlanState::Idle));

    let task = PlannerTask {
        requests: rx,
        arbiter,
        pose,
        grid,
        calib,
        estop,
        cancel: cancel.clone(),
        plan_active,
        state: state.clone(),
        tm_events,
    };

    let join_handle = thread::Builder::new()
        .name("planner".into())
        .spawn(move || task.run())?;

    Ok((
        PlannerHandle {
            requests: tx,
            cancel,
            state,
        },
        join_handle,
    ))
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::arbiter::{self, Arbiter};
    use crate::motor_driver::SimDriver;
    use crate::pose::Pose;
    use crate::virtual_robot::VirtualRobot;
    use std::sync::mpsc::Receiver;

    struct Rig {
        planner: PlannerHandle,
        arbiter: ArbiterHandle,
        pose: Arc<Mutex<PoseEstimator>>,
        grid: Arc<Mutex<Grid>>,
        estop: Arc<AtomicBool>,
        _tm_events: Receiver<TmEvent>,
    }

    /// Wire up a full arbiter + planner pair with fast pulse timings.
    fn rig() -> Rig {
        let grid_size = 20;
        let start = Pose {
            x: 10.0,
            y: 10.0,
            angle_deg: 90.0,
        };

        let pose = Arc::new(Mutex::new(PoseEstimator::new(start, grid_size)));
        let virt = Arc::new(Mutex::new(VirtualRobot::new(start, grid_size)));
        let grid = Arc::new(Mutex::new(Grid::new(grid_size)));
        let calib = Arc::new(Mutex::new(CalibrationParams {
            move_distance: 1.0,
            turn_angle: 90.0,
            forward_delay_s: 0.01,
            turn_delay_left_s: 0.01,
            turn_delay_right_s: 0.01,
        }));
        let current_motion = Arc::new(Mutex::new(Command::Stop));
        let estop = Arc::new(AtomicBool::new(false));
        let cancel = Arc::new(AtomicBool::new(false));
        let plan_active = Arc::new(AtomicBool::new(false));
        let (tm_tx, tm_rx) = mpsc::channel();

        let (arbiter_handle, _) = arbiter::spawn(Arbiter::new(
            Box::new(SimDriver::new()),
            pose.clone(),
            virt,
            calib.clone(),
            current_motion,
            tm_tx.clone(),
            estop.clone(),
            plan_active.clone(),
            cancel.clone(),
        ))
        .unwrap();

        let (planner, _) = spawn_planner(
            arbiter_handle.clone(),
            pose.clone(),
            grid.clone(),
            calib,
            estop.clone(),
            cancel,
            plan_active,
            tm_tx,
        )
        .unwrap();

        Rig {
            planner,
            arbiter: arbiter_handle,
            pose,
            grid,
            estop,
            _tm_events: tm_rx,
        }
    }

    fn wait_for_idle(planner: &PlannerHandle) {
        let deadline = Instant::now() + Duration::from_secs(5);
        // Give the task a moment to leave Idle first
        thread::sleep(Duration::from_millis(30));
        while planner.state() != PlanState::Idle {
            assert!(Instant::now() < deadline, "planner did not return to Idle");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_navigate_reaches_target_cell() {
        let rig = rig();

        rig.planner.navigate(5, 10);
        wait_for_idle(&rig.planner);

        let pose = rig.pose.lock().unwrap().snapshot();
        assert_eq!(pose.row(), 5);
        assert_eq!(pose.col(), 10);
    }

    #[test]
    fn test_obstacle_halts_plan() {
        let rig = rig();
        // Obstacle two cells up from the start
        rig.grid.lock().unwrap().set_obstacles(&[[8, 10]]);

        rig.planner.navigate(5, 10);
        wait_for_idle(&rig.planner);

        let pose = rig.pose.lock().unwrap().snapshot();
        // Stopped short of the obstacle cell
        assert_eq!(pose.row(), 9);
        assert!(!rig.grid.lock().unwrap().is_obstacle(pose.row(), pose.col()));
    }

    #[test]
    fn test_cancel_discards_remaining_steps() {
        let rig = rig();

        rig.planner.navigate(0, 10);
        thread::sleep(Duration::from_millis(20));
        rig.planner.cancel();
        wait_for_idle(&rig.planner);

        let pose = rig.pose.lock().unwrap().snapshot();
        // The plan was cut short of the far edge
        assert!(pose.row() > 0);
    }

    #[test]
    fn test_joystick_preempts_plan() {
        let rig = rig();

        rig.planner.navigate(0, 10);
        thread::sleep(Duration::from_millis(20));

        // Operator grabs the stick mid-plan
        rig.arbiter.dispatch(Command::Backward, CmdSource::Joystick);

        // The joystick is still the active source here, so the plan's
        // closing Stop is refused; the planner must reach Idle anyway
        wait_for_idle(&rig.planner);

        let pose = rig.pose.lock().unwrap().snapshot();
        assert!(pose.row() > 0);
    }

    #[test]
    fn test_emergency_stop_abandons_plan() {
        let rig = rig();

        rig.planner.navigate(0, 10);
        thread::sleep(Duration::from_millis(20));
        rig.estop.store(true, Ordering::SeqCst);
        wait_for_idle(&rig.planner);

        let pose = rig.pose.lock().unwrap().snapshot();
        assert!(pose.row() > 0);
    }
}
