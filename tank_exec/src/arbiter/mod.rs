//! # Command Arbiter & Safety Gate
//!
//! Every motion command, whatever its origin, passes through the arbiter
//! before it reaches the actuators. The arbiter enforces the
//! emergency-stop latch, source priority, plan preemption and command
//! coalescing, and on acceptance drives the full notification chain:
//! actuator write, pose estimate, virtual robot, telemetry.
//!
//! Source priority, highest first:
//! emergency, joystick, manual override, map planner, auto navigation.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

// Internal
use crate::motor_driver::MotorDriver;
use crate::pose::{CalibrationParams, PoseEstimator};
use crate::shared::lock;
use crate::telemetry::TmEvent;
use crate::virtual_robot::VirtualRobot;
use ops_if::cmd::Command;
use util::maths;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Bound on a single actuator write.
const ACTUATOR_TIMEOUT: Duration = Duration::from_millis(250);

/// Identical consecutive commands from the same source inside this window
/// are coalesced rather than re-dispatched.
const COMMAND_COOLDOWN: Duration = Duration::from_millis(200);

/// Window defining when the joystick counts as an active source.
///
/// Joystick ticks arrive at roughly 20 Hz and identical repeats are
/// coalesced, so activity cannot be judged per call: the stick is
/// considered active until this many milliseconds (a handful of missed
/// ticks) have passed since its last non-Stop command.
const JOYSTICK_ACTIVE_WINDOW: Duration = Duration::from_millis(500);

/// Normalised joystick deadzone applied to both axes.
pub const DEADZONE: f64 = 0.15;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// The origin of a motion command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdSource {
    Joystick,
    MapPlanner,
    AutoNav,
    ManualOverride,
    Emergency,
}

/// The result of a dispatch call.
#[derive(Debug, PartialEq)]
pub enum DispatchOutcome {
    /// The command reached the actuators and all observers were notified.
    Dispatched,

    /// The command repeated the previous one inside the cooldown window;
    /// the actuator state is already correct.
    Coalesced,

    /// The command was refused.
    Rejected(RejectReason),
}

/// Why a command was refused.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RejectReason {
    #[error("Emergency stop is latched")]
    EmergencyLatched,

    #[error("Motor write exceeded the 250 ms bound")]
    ActuatorTimeout,

    #[error("Joystick input has priority")]
    PreemptedByJoystick,

    #[error("Arbiter is not running")]
    ArbiterUnavailable,
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A joystick tick as received from the operator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlInput {
    /// Forward/backward axis in [-100, 100]
    pub forward: i32,

    /// Turn axis in [-100, 100], positive is right
    pub turn: i32,
}

/// The arbiter state. Owned by the arbiter task; everyone else talks to
/// it through an [`ArbiterHandle`].
pub struct Arbiter {
    driver: Box<dyn MotorDriver>,
    pose: Arc<Mutex<PoseEstimator>>,
    virt: Arc<Mutex<VirtualRobot>>,
    calib: Arc<Mutex<CalibrationParams>>,
    current_motion: Arc<Mutex<Command>>,
    tm_events: Sender<TmEvent>,

    /// The emergency-stop latch
    estop: Arc<AtomicBool>,

    /// True while the planner is executing a plan
    plan_active: Arc<AtomicBool>,

    /// Raised to cancel the executing plan
    plan_cancel: Arc<AtomicBool>,

    last_dispatch: Option<(Command, CmdSource, Instant)>,
    last_joystick: Option<Instant>,
}

/// A request sent to the arbiter task.
struct DispatchRequest {
    cmd: Command,
    source: CmdSource,
    reply: Sender<DispatchOutcome>,
}

/// Cloneable handle for dispatching commands through the arbiter task.
#[derive(Clone)]
pub struct ArbiterHandle {
    requests: Sender<DispatchRequest>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl CmdSource {
    /// Priority of this source; higher wins.
    pub fn priority(&self) -> u8 {
        match self {
            CmdSource::Emergency => 4,
            CmdSource::Joystick => 3,
            CmdSource::ManualOverride => 2,
            CmdSource::MapPlanner => 1,
            CmdSource::AutoNav => 0,
        }
    }
}

impl ControlInput {
    pub fn new(forward: i32, turn: i32) -> Self {
        Self { forward, turn }
    }

    /// Both axes normalised to [-1, 1].
    fn axes(&self) -> (f64, f64) {
        (
            maths::clamp(self.forward as f64 / 100.0, -1.0, 1.0),
            maths::clamp(self.turn as f64 / 100.0, -1.0, 1.0),
        )
    }

    /// Map this input to a motion command.
    ///
    /// Axes inside the deadzone collapse to zero; the dominant remaining
    /// axis picks the command kind, with the forward axis winning ties.
    pub fn command(&self) -> Command {
        let (f, t) = self.axes();

        let f = if f.abs() < DEADZONE { 0.0 } else { f };
        let t = if t.abs() < DEADZONE { 0.0 } else { t };

        if f == 0.0 && t == 0.0 {
            Command::Stop
        } else if t.abs() > f.abs() {
            if t > 0.0 {
                Command::Right
            } else {
                Command::Left
            }
        } else if f > 0.0 {
            Command::Forward
        } else {
            Command::Backward
        }
    }

    /// Pulse duration for this input: the calibrated delay of the command
    /// kind, scaled by the dominant axis magnitude. The magnitude scales
    /// the duration, never the command kind.
    pub fn pulse_duration_s(&self, calib: &CalibrationParams) -> f64 {
        let cmd = self.command();
        let (f, t) = self.axes();
        let magnitude = f.abs().max(t.abs());

        calib.pulse_duration_s(cmd) * magnitude
    }
}

impl Arbiter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        driver: Box<dyn MotorDriver>,
        pose: Arc<Mutex<PoseEstimator>>,
        virt: Arc<Mutex<VirtualRobot>>,
        calib: Arc<Mutex<CalibrationParams>>,
        current_motion: Arc<Mutex<Command>>,
        tm_events: Sender<TmEvent>,
        estop: Arc<AtomicBool>,
        plan_active: Arc<AtomicBool>,
        plan_cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            driver,
            pose,
            virt,
            calib,
            current_motion,
            tm_events,
            estop,
            plan_active,
            plan_cancel,
            last_dispatch: None,
            last_joystick: None,
        }
    }

    /// Dispatch one command from the given source.
    pub fn dispatch(&mut self, cmd: Command, source: CmdSource) -> DispatchOutcome {
        // Emergency latch: only (Emergency, Stop) passes
        if self.estop.load(Ordering::SeqCst)
            && !(source == CmdSource::Emergency && cmd == Command::Stop)
        {
            return DispatchOutcome::Rejected(RejectReason::EmergencyLatched);
        }

        // Active joystick input masks the autonomous sources. Neutral
        // (Stop) ticks from an idle stick do not count as activity.
        if matches!(source, CmdSource::AutoNav | CmdSource::MapPlanner) && self.joystick_active() {
            return DispatchOutcome::Rejected(RejectReason::PreemptedByJoystick);
        }

        // A higher-priority command cancels an executing plan
        let preempts = source == CmdSource::Emergency
            || (source.priority() > CmdSource::MapPlanner.priority() && cmd != Command::Stop);
        if preempts && self.plan_active.load(Ordering::SeqCst) {
            warn!("{:?} command preempts the executing plan", source);
            self.plan_cancel.store(true, Ordering::SeqCst);
        }

        // Streaming sources repeat their current command at tick rate;
        // identical repeats inside the cooldown window are coalesced.
        // Planner and operator pulses are each distinct motions and are
        // never coalesced.
        if matches!(source, CmdSource::Joystick | CmdSource::AutoNav) {
            if let Some((last_cmd, last_source, at)) = self.last_dispatch {
                if last_cmd == cmd && last_source == source && at.elapsed() < COMMAND_COOLDOWN {
                    return DispatchOutcome::Coalesced;
                }
            }
        }

        // The actuator write is the hard commit
        let write_start = Instant::now();
        let result = self.driver.execute(cmd);

        if write_start.elapsed() > ACTUATOR_TIMEOUT {
            warn!("Motor write for {} overran the actuator timeout", cmd);
            return DispatchOutcome::Rejected(RejectReason::ActuatorTimeout);
        }

        if let Err(e) = result {
            // A transient fault does not halt the arbiter. The pose
            // estimate is still advanced; the physical and virtual state
            // may diverge and the operator corrects it.
            warn!("Motor driver fault on {}: {}", cmd, e);
            let _ = self
                .tm_events
                .send(TmEvent::Log(format!("Warning: actuator fault: {}", e)));
        }

        // Notify the observers: pose estimator, virtual robot, telemetry
        let calib = *lock(&self.calib);

        let new_pose = lock(&self.pose).advance(cmd, &calib);
        if cmd != Command::Stop {
            let _ = self.tm_events.send(TmEvent::Pose(new_pose));
        }

        lock(&self.virt).apply(cmd, &calib);

        *lock(&self.current_motion) = cmd;

        if source == CmdSource::Joystick && cmd != Command::Stop {
            self.last_joystick = Some(Instant::now());
        }
        self.last_dispatch = Some((cmd, source, Instant::now()));

        debug!("Dispatched {} from {:?}", cmd, source);

        DispatchOutcome::Dispatched
    }

    fn joystick_active(&self) -> bool {
        match self.last_joystick {
            Some(at) => at.elapsed() < JOYSTICK_ACTIVE_WINDOW,
            None => false,
        }
    }
}

impl ArbiterHandle {
    /// Dispatch a command through the arbiter task and wait for the
    /// outcome.
    pub fn dispatch(&self, cmd: Command, source: CmdSource) -> DispatchOutcome {
        let (reply_tx, reply_rx) = mpsc::channel();

        let request = DispatchRequest {
            cmd,
            source,
            reply: reply_tx,
        };

        if self.requests.send(request).is_err() {
            return DispatchOutcome::Rejected(RejectReason::ArbiterUnavailable);
        }

        reply_rx
            .recv_timeout(Duration::from_secs(1))
            .unwrap_or(DispatchOutcome::Rejected(RejectReason::ArbiterUnavailable))
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Spawn the arbiter task.
///
/// The task serialises every dispatch; it exits once every handle has
/// been dropped.
pub fn spawn(mut arbiter: Arbiter) -> std::io::Result<(ArbiterHandle, thread::JoinHandle<()>)> {
    let (tx, rx): (Sender<DispatchRequest>, Receiver<DispatchRequest>) = mpsc::channel();

    let join_handle = thread::Builder::new()
        .name("arbiter".into())
        .spawn(move || {
            while let Ok(request) = rx.recv() {
                let outcome = arbiter.dispatch(request.cmd, request.source);
                let _ = request.reply.send(outcome);
            }
            debug!("Arbiter task stopped");
        })?;

    Ok((ArbiterHandle { requests: tx }, join_handle))
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::motor_driver::{MotorError, SimDriver};
    use crate::pose::Pose;

    /// A driver that always fails, for fault containment tests.
    struct FaultyDriver;

    impl MotorDriver for FaultyDriver {
        fn execute(&mut self, _cmd: Command) -> Result<(), MotorError> {
            Err(MotorError::WriteError("bus disconnected".into()))
        }
    }

    struct Fixture {
        arbiter: Arbiter,
        pose: Arc<Mutex<PoseEstimator>>,
        estop: Arc<AtomicBool>,
        plan_active: Arc<AtomicBool>,
        plan_cancel: Arc<AtomicBool>,
        current_motion: Arc<Mutex<Command>>,
        _tm_events: std::sync::mpsc::Receiver<TmEvent>,
    }

    fn fixture(driver: Box<dyn MotorDriver>) -> Fixture {
        let grid_size = 20;
        let start = Pose {
            x: 10.0,
            y: 10.0,
            angle_deg: 90.0,
        };

        let pose = Arc::new(Mutex::new(PoseEstimator::new(start, grid_size)));
        let virt = Arc::new(Mutex::new(VirtualRobot::new(start, grid_size)));
        let calib = Arc::new(Mutex::new(CalibrationParams {
            move_distance: 1.0,
            turn_angle: 90.0,
            ..Default::default()
        }));
        let current_motion = Arc::new(Mutex::new(Command::Stop));
        let estop = Arc::new(AtomicBool::new(false));
        let plan_active = Arc::new(AtomicBool::new(false));
        let plan_cancel = Arc::new(AtomicBool::new(false));
        let (tm_tx, tm_rx) = mpsc::channel();

        let arbiter = Arbiter::new(
            driver,
            pose.clone(),
            virt,
            calib,
            current_motion.clone(),
            tm_tx,
            estop.clone(),
            plan_active.clone(),
            plan_cancel.clone(),
        );

        Fixture {
            arbiter,
            pose,
            estop,
            plan_active,
            plan_cancel,
            current_motion,
            _tm_events: tm_rx,
        }
    }

    #[test]
    fn test_dispatch_advances_pose_once() {
        let mut fx = fixture(Box::new(SimDriver::new()));

        assert_eq!(
            fx.arbiter.dispatch(Command::Forward, CmdSource::Joystick),
            DispatchOutcome::Dispatched
        );

        let est = fx.pose.lock().unwrap();
        assert_eq!(est.transitions(), 1);
        assert!((est.snapshot().y - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_emergency_latch_blocks_joystick() {
        let mut fx = fixture(Box::new(SimDriver::new()));
        fx.estop.store(true, Ordering::SeqCst);

        // Joystick full forward while latched: rejected, pose unchanged
        let input = ControlInput::new(100, 0);
        let outcome = fx.arbiter.dispatch(input.command(), CmdSource::Joystick);

        assert_eq!(
            outcome,
            DispatchOutcome::Rejected(RejectReason::EmergencyLatched)
        );
        assert_eq!(fx.pose.lock().unwrap().transitions(), 0);
        assert_eq!(*fx.current_motion.lock().unwrap(), Command::Stop);
    }

    #[test]
    fn test_emergency_stop_passes_the_latch() {
        let mut fx = fixture(Box::new(SimDriver::new()));
        fx.estop.store(true, Ordering::SeqCst);

        assert_eq!(
            fx.arbiter.dispatch(Command::Stop, CmdSource::Emergency),
            DispatchOutcome::Dispatched
        );
        // But an emergency Forward would not pass
        assert_eq!(
            fx.arbiter.dispatch(Command::Forward, CmdSource::Emergency),
            DispatchOutcome::Rejected(RejectReason::EmergencyLatched)
        );
    }

    #[test]
    fn test_joystick_masks_auto_nav() {
        let mut fx = fixture(Box::new(SimDriver::new()));

        // Joystick drives forward; the detector wants a left turn in the
        // same window. The joystick wins.
        assert_eq!(
            fx.arbiter.dispatch(Command::Forward, CmdSource::Joystick),
            DispatchOutcome::Dispatched
        );
        assert_eq!(
            fx.arbiter.dispatch(Command::Left, CmdSource::AutoNav),
            DispatchOutcome::Rejected(RejectReason::PreemptedByJoystick)
        );
    }

    #[test]
    fn test_auto_nav_passes_without_joystick() {
        let mut fx = fixture(Box::new(SimDriver::new()));

        assert_eq!(
            fx.arbiter.dispatch(Command::Left, CmdSource::AutoNav),
            DispatchOutcome::Dispatched
        );
    }

    #[test]
    fn test_identical_streaming_command_coalesced() {
        let mut fx = fixture(Box::new(SimDriver::new()));

        assert_eq!(
            fx.arbiter.dispatch(Command::Forward, CmdSource::AutoNav),
            DispatchOutcome::Dispatched
        );
        assert_eq!(
            fx.arbiter.dispatch(Command::Forward, CmdSource::AutoNav),
            DispatchOutcome::Coalesced
        );

        // Coalesced repeats do not record extra pose transitions
        assert_eq!(fx.pose.lock().unwrap().transitions(), 1);
    }

    #[test]
    fn test_planner_pulses_never_coalesced() {
        let mut fx = fixture(Box::new(SimDriver::new()));

        // A pulse train moves the vehicle one step per pulse, however
        // quickly the pulses arrive
        for _ in 0..3 {
            assert_eq!(
                fx.arbiter.dispatch(Command::Forward, CmdSource::MapPlanner),
                DispatchOutcome::Dispatched
            );
        }

        assert_eq!(fx.pose.lock().unwrap().transitions(), 3);
    }

    #[test]
    fn test_joystick_preempts_active_plan() {
        let mut fx = fixture(Box::new(SimDriver::new()));
        fx.plan_active.store(true, Ordering::SeqCst);

        fx.arbiter.dispatch(Command::Backward, CmdSource::Joystick);

        assert!(fx.plan_cancel.load(Ordering::SeqCst));
    }

    #[test]
    fn test_idle_joystick_does_not_preempt_plan() {
        let mut fx = fixture(Box::new(SimDriver::new()));
        fx.plan_active.store(true, Ordering::SeqCst);

        // Neutral stick ticks map to Stop and must not cancel the plan
        fx.arbiter.dispatch(Command::Stop, CmdSource::Joystick);

        assert!(!fx.plan_cancel.load(Ordering::SeqCst));
    }

    #[test]
    fn test_actuator_fault_still_advances_pose() {
        let mut fx = fixture(Box::new(FaultyDriver));

        assert_eq!(
            fx.arbiter.dispatch(Command::Forward, CmdSource::Joystick),
            DispatchOutcome::Dispatched
        );
        assert_eq!(fx.pose.lock().unwrap().transitions(), 1);
    }

    #[test]
    fn test_source_priorities() {
        assert!(CmdSource::Emergency.priority() > CmdSource::Joystick.priority());
        assert!(CmdSource::Joystick.priority() > CmdSource::ManualOverride.priority());
        assert!(CmdSource::ManualOverride.priority() > CmdSource::MapPlanner.priority());
        assert!(CmdSource::MapPlanner.priority() > CmdSource::AutoNav.priority());
    }

    #[test]
    fn test_control_input_mapping() {
        // Forward dominant with turn inside the deadzone
        assert_eq!(ControlInput::new(80, 5).command(), Command::Forward);
        // Both inside the deadzone
        assert_eq!(ControlInput::new(10, 14).command(), Command::Stop);
        // Turn dominant
        assert_eq!(ControlInput::new(20, 90).command(), Command::Right);
        assert_eq!(ControlInput::new(0, -50).command(), Command::Left);
        // Backward
        assert_eq!(ControlInput::new(-70, 10).command(), Command::Backward);
        // Values beyond the protocol range are clamped, not rejected here
        assert_eq!(ControlInput::new(250, 0).command(), Command::Forward);
    }

    #[test]
    fn test_pulse_duration_scales_with_magnitude() {
        let calib = CalibrationParams {
            forward_delay_s: 0.5,
            ..Default::default()
        };

        let full = ControlInput::new(100, 0).pulse_duration_s(&calib);
        let partial = ControlInput::new(80, 5).pulse_duration_s(&calib);

        assert!((full - 0.5).abs() < 1e-9);
        assert!((partial - 0.4).abs() < 1e-9);
        assert_eq!(ControlInput::new(0, 0).pulse_duration_s(&calib), 0.0);
    }
}
