//! # Operator Server
//!
//! Serves the inbound half of the operator session protocol: a REP socket
//! receiving JSON-framed operator messages and answering each with
//! Ok/Rejected. Parsing and routing live in [`OpsHandler`] so the message
//! semantics can be exercised without a socket.
//!
//! Invalid input never takes the session down: bad JSON, unknown types
//! and out-of-range values are rejected with a reason and logged.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// Internal
use crate::arbiter::{ArbiterHandle, CmdSource, ControlInput, DispatchOutcome};
use crate::map::{Grid, PlannerHandle};
use crate::pose::{CalibrationParams, PoseEstimator};
use crate::shared::lock;
use crate::telemetry::TmEvent;
use crate::virtual_robot::VirtualRobot;
use ops_if::cmd::Command;
use ops_if::net::{self, zmq, NetError, SocketOptions};
use ops_if::ops::{OpsMessage, OpsResponse};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Routes operator messages to the subsystems they drive.
pub struct OpsHandler {
    pub arbiter: ArbiterHandle,
    pub planner: PlannerHandle,
    pub pose: Arc<Mutex<PoseEstimator>>,
    pub virt: Arc<Mutex<VirtualRobot>>,
    pub grid: Arc<Mutex<Grid>>,
    pub calib: Arc<Mutex<CalibrationParams>>,
    pub estop: Arc<AtomicBool>,
    pub tm_events: Sender<TmEvent>,
}

/// The operator-facing REP server.
pub struct OpsServer {
    socket: zmq::Socket,
    handler: OpsHandler,
    shutdown: Arc<AtomicBool>,
}

// ---------------------------------------------------------------------------
// IMPLS
// ---------------------------------------------------------------------------

impl OpsServer {
    /// Bind the operator command socket.
    pub fn new(
        ctx: &zmq::Context,
        endpoint: &str,
        handler: OpsHandler,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, NetError> {
        let options = SocketOptions {
            bind: true,
            recv_timeout: 200,
            send_timeout: 200,
            ..Default::default()
        };

        let socket = net::open_socket(ctx, zmq::REP, &options, endpoint)?;

        Ok(Self {
            socket,
            handler,
            shutdown,
        })
    }

    /// Serve operator messages until shutdown.
    pub fn run(mut self) {
        info!("Operator server ready");

        while !self.shutdown.load(Ordering::Relaxed) {
            let raw = match self.socket.recv_string(0) {
                Ok(Ok(s)) => s,
                Ok(Err(_)) => {
                    // Non-UTF8 payload; the REP contract still requires a
                    // reply before the next recv
                    self.reply(&OpsResponse::rejected("message is not valid UTF-8"));
                    continue;
                }
                Err(zmq::Error::EAGAIN) => continue,
                Err(e) => {
                    warn!("Operator socket receive error: {}", e);
                    continue;
                }
            };

            let response = match OpsMessage::from_json(&raw) {
                Ok(msg) => self.handler.handle(msg),
                Err(e) => {
                    warn!("Rejected operator message: {}", e);
                    OpsResponse::rejected(e)
                }
            };

            self.reply(&response);
        }

        debug!("Operator server stopped");
    }

    fn reply(&mut self, response: &OpsResponse) {
        let json = match serde_json::to_string(response) {
            Ok(j) => j,
            Err(e) => {
                warn!("Could not serialise operator response: {}", e);
                return;
            }
        };

        if let Err(e) = self.socket.send(&json, 0) {
            warn!("Could not send operator response: {}", e);
        }
    }
}

impl OpsHandler {
    /// Execute one operator message.
    pub fn handle(&mut self, msg: OpsMessage) -> OpsResponse {
        match msg {
            OpsMessage::Control { forward, turn } => self.handle_control(forward, turn),

            OpsMessage::EmergencyStop => {
                self.estop.store(true, Ordering::SeqCst);
                self.arbiter.dispatch(Command::Stop, CmdSource::Emergency);

                warn!("Emergency stop activated");
                let _ = self.tm_events.send(TmEvent::EmergencyStop);
                self.operator_log("Emergency stop activated. Motors stopped.".into());

                OpsResponse::Ok
            }

            OpsMessage::ReleaseEmergency => {
                self.estop.store(false, Ordering::SeqCst);

                info!("Emergency stop released");
                self.operator_log("Emergency stop released".into());

                OpsResponse::Ok
            }

            OpsMessage::NavigateTo { row, col } => {
                let size = lock(&self.grid).size();
                if row >= size || col >= size {
                    return OpsResponse::rejected("target outside the grid");
                }

                info!("Navigation target set to ({}, {})", row, col);
                self.operator_log(format!("Navigating to ({}, {})", row, col));
                self.planner.navigate(row, col);

                OpsResponse::Ok
            }

            OpsMessage::ClearTarget => {
                self.planner.cancel();
                self.arbiter.dispatch(Command::Stop, CmdSource::MapPlanner);
                info!("Navigation target cleared");

                OpsResponse::Ok
            }

            OpsMessage::ResetStart => {
                self.planner.cancel();

                let pose = lock(&self.pose).reset();
                lock(&self.virt).reset();
                let _ = self.tm_events.send(TmEvent::Pose(pose));

                info!("Pose reset to start");

                OpsResponse::Ok
            }

            OpsMessage::GoUp => {
                self.planner.go_up();
                OpsResponse::Ok
            }

            OpsMessage::Turn90Left => {
                self.planner.turn_90_left();
                OpsResponse::Ok
            }

            OpsMessage::Turn90Right => {
                self.planner.turn_90_right();
                OpsResponse::Ok
            }

            OpsMessage::UpdateObstacles { cells } => {
                let marked = lock(&self.grid).set_obstacles(&cells);
                if marked < cells.len() {
                    warn!(
                        "Dropped {} out-of-grid obstacle cells",
                        cells.len() - marked
                    );
                }

                OpsResponse::Ok
            }

            OpsMessage::UpdateTiming {
                forward_delay,
                turn_left_delay,
                turn_right_delay,
            } => {
                if forward_delay <= 0.0 || turn_left_delay <= 0.0 || turn_right_delay <= 0.0 {
                    return OpsResponse::rejected("step durations must be positive");
                }

                let mut calib = lock(&self.calib);
                calib.forward_delay_s = forward_delay;
                calib.turn_delay_left_s = turn_left_delay;
                calib.turn_delay_right_s = turn_right_delay;

                info!(
                    "Timing updated: F {:.2} s, L {:.2} s, R {:.2} s",
                    forward_delay, turn_left_delay, turn_right_delay
                );

                OpsResponse::Ok
            }

            OpsMessage::CalibrateCommand { command } => self.handle_calibration_pulse(command),

            OpsMessage::ApplyCalibration { distance, angle } => {
                if distance.map_or(false, |d| d <= 0.0) || angle.map_or(false, |a| a <= 0.0) {
                    return OpsResponse::rejected("calibration values must be positive");
                }

                let mut calib = lock(&self.calib);
                if let Some(d) = distance {
                    calib.move_distance = d;
                }
                if let Some(a) = angle {
                    calib.turn_angle = a;
                }

                info!(
                    "Calibration applied: {:.3} cells/pulse, {:.1} deg/pulse",
                    calib.move_distance, calib.turn_angle
                );

                OpsResponse::Ok
            }

            OpsMessage::RequestCalibrationValues => {
                let calib = *lock(&self.calib);
                let _ = self.tm_events.send(TmEvent::Calibration {
                    move_distance: calib.move_distance,
                    turn_angle: calib.turn_angle,
                });

                OpsResponse::Ok
            }
        }
    }

    fn handle_control(&mut self, forward: i32, turn: i32) -> OpsResponse {
        if forward.abs() > 100 || turn.abs() > 100 {
            warn!("Control input out of range: ({}, {})", forward, turn);
            return OpsResponse::rejected("control values must be in [-100, 100]");
        }

        let input = ControlInput::new(forward, turn);
        let cmd = input.command();

        debug!(
            "Control tick ({}, {}) -> {} (pulse {:.2} s)",
            forward,
            turn,
            cmd,
            input.pulse_duration_s(&lock(&self.calib))
        );

        self.outcome_response(self.arbiter.dispatch(cmd, CmdSource::Joystick))
    }

    /// Execute a single calibration pulse: the command for its calibrated
    /// duration, then Stop.
    fn handle_calibration_pulse(&mut self, command: Command) -> OpsResponse {
        if command == Command::Stop {
            return OpsResponse::rejected("stop is not a calibration pulse");
        }

        let duration = lock(&self.calib).pulse_duration_s(command);

        match self.arbiter.dispatch(command, CmdSource::ManualOverride) {
            DispatchOutcome::Dispatched | DispatchOutcome::Coalesced => (),
            DispatchOutcome::Rejected(reason) => return OpsResponse::rejected(reason),
        }

        std::thread::sleep(Duration::from_secs_f64(duration));
        self.outcome_response(self.arbiter.dispatch(Command::Stop, CmdSource::ManualOverride))
    }

    fn outcome_response(&self, outcome: DispatchOutcome) -> OpsResponse {
        match outcome {
            DispatchOutcome::Dispatched | DispatchOutcome::Coalesced => OpsResponse::Ok,
            DispatchOutcome::Rejected(reason) => OpsResponse::rejected(reason),
        }
    }

    fn operator_log(&self, msg: String) {
        let _ = self.tm_events.send(TmEvent::Log(msg));
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::arbiter::{self, Arbiter};
    use crate::map::spawn_planner;
    use crate::motor_driver::SimDriver;
    use crate::pose::Pose;
    use std::sync::mpsc::{self, Receiver};

    struct Rig {
        handler: OpsHandler,
        pose: Arc<Mutex<PoseEstimator>>,
        calib: Arc<Mutex<CalibrationParams>>,
        tm_events: Receiver<TmEvent>,
    }

    fn rig() -> Rig {
        let grid_size = 20;
        let start = Pose::grid_centre(grid_size);

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
            virt.clone(),
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
            calib.clone(),
            estop.clone(),
            cancel,
            plan_active,
            tm_tx.clone(),
        )
        .unwrap();

        let handler = OpsHandler {
            arbiter: arbiter_handle,
            planner,
            pose: pose.clone(),
            virt,
            grid,
            calib: calib.clone(),
            estop,
            tm_events: tm_tx,
        };

        Rig {
            handler,
            pose,
            calib,
            tm_events: tm_rx,
        }
    }

    #[test]
    fn test_control_out_of_range_rejected() {
        let mut rig = rig();

        let response = rig.handler.handle(OpsMessage::Control {
            forward: 150,
            turn: 0,
        });

        assert!(matches!(response, OpsResponse::Rejected { .. }));
        assert_eq!(rig.pose.lock().unwrap().transitions(), 0);
    }

    #[test]
    fn test_control_dispatches_forward() {
        let mut rig = rig();

        let response = rig.handler.handle(OpsMessage::Control {
            forward: 80,
            turn: 5,
        });

        assert_eq!(response, OpsResponse::Ok);
        let est = rig.pose.lock().unwrap();
        assert_eq!(est.transitions(), 1);
        assert!((est.snapshot().y - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_emergency_stop_latches_and_releases() {
        let mut rig = rig();

        assert_eq!(rig.handler.handle(OpsMessage::EmergencyStop), OpsResponse::Ok);

        // Latched: joystick input is refused
        let response = rig.handler.handle(OpsMessage::Control {
            forward: 100,
            turn: 0,
        });
        assert!(matches!(response, OpsResponse::Rejected { .. }));

        // Released: input flows again
        assert_eq!(
            rig.handler.handle(OpsMessage::ReleaseEmergency),
            OpsResponse::Ok
        );
        assert_eq!(
            rig.handler.handle(OpsMessage::Control {
                forward: 100,
                turn: 0
            }),
            OpsResponse::Ok
        );
    }

    #[test]
    fn test_emergency_stop_publishes_notification() {
        let mut rig = rig();

        rig.handler.handle(OpsMessage::EmergencyStop);

        let mut saw_notification = false;
        while let Ok(event) = rig.tm_events.try_recv() {
            if matches!(event, TmEvent::EmergencyStop) {
                saw_notification = true;
            }
        }
        assert!(saw_notification);
    }

    #[test]
    fn test_navigate_outside_grid_rejected() {
        let mut rig = rig();

        let response = rig.handler.handle(OpsMessage::NavigateTo { row: 25, col: 3 });

        assert!(matches!(response, OpsResponse::Rejected { .. }));
    }

    #[test]
    fn test_apply_calibration_updates_shared_params() {
        let mut rig = rig();

        let response = rig.handler.handle(OpsMessage::ApplyCalibration {
            distance: Some(0.25),
            angle: None,
        });

        assert_eq!(response, OpsResponse::Ok);
        let calib = rig.calib.lock().unwrap();
        assert_eq!(calib.move_distance, 0.25);
        // Unspecified fields are untouched
        assert_eq!(calib.turn_angle, 90.0);
    }

    #[test]
    fn test_apply_calibration_rejects_non_positive() {
        let mut rig = rig();

        let response = rig.handler.handle(OpsMessage::ApplyCalibration {
            distance: Some(-1.0),
            angle: None,
        });

        assert!(matches!(response, OpsResponse::Rejected { .. }));
    }

    #[test]
    fn test_update_timing() {
        let mut rig = rig();

        assert_eq!(
            rig.handler.handle(OpsMessage::UpdateTiming {
                forward_delay: 0.8,
                turn_left_delay: 0.4,
                turn_right_delay: 0.45,
            }),
            OpsResponse::Ok
        );

        let calib = rig.calib.lock().unwrap();
        assert_eq!(calib.forward_delay_s, 0.8);
        assert_eq!(calib.turn_delay_left_s, 0.4);
        assert_eq!(calib.turn_delay_right_s, 0.45);

        drop(calib);
        assert!(matches!(
            rig.handler.handle(OpsMessage::UpdateTiming {
                forward_delay: 0.0,
                turn_left_delay: 0.4,
                turn_right_delay: 0.45,
            }),
            OpsResponse::Rejected { .. }
        ));
    }

    #[test]
    fn test_calibration_pulse_moves_then_stops() {
        let mut rig = rig();

        let response = rig.handler.handle(OpsMessage::CalibrateCommand {
            command: Command::Forward,
        });

        assert_eq!(response, OpsResponse::Ok);
        // One pulse plus the closing stop
        assert_eq!(rig.pose.lock().unwrap().transitions(), 2);

        assert!(matches!(
            rig.handler.handle(OpsMessage::CalibrateCommand {
                command: Command::Stop
            }),
            OpsResponse::Rejected { .. }
        ));
    }

    #[test]
    fn test_request_calibration_values() {
        let mut rig = rig();

        rig.handler.handle(OpsMessage::RequestCalibrationValues);

        let mut saw_values = false;
        while let Ok(event) = rig.tm_events.try_recv() {
            if let TmEvent::Calibration {
                move_distance,
                turn_angle,
            } = event
            {
                assert_eq!(move_distance, 1.0);
                assert_eq!(turn_angle, 90.0);
                saw_values = true;
            }
        }
        assert!(saw_values);
    }

    #[test]
    fn test_reset_start_restores_centre() {
        let mut rig = rig();

        rig.handler.handle(OpsMessage::Control {
            forward: 100,
            turn: 0,
        });
        assert_eq!(rig.handler.handle(OpsMessage::ResetStart), OpsResponse::Ok);

        assert_eq!(
            rig.pose.lock().unwrap().snapshot(),
            Pose::grid_centre(20)
        );
    }
}
