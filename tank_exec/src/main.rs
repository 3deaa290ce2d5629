//! Tank control executable entry point.
//!
//! # Architecture
//!
//! Initialisation brings up the session, logging, parameters and the
//! operator sockets, then hands control to a small set of long-lived
//! tasks:
//!
//!     - Arbiter task: serialises every actuator write
//!     - Planner task: executes navigation plans pulse by pulse
//!     - Capture task: camera frames, detection, auto-nav steering
//!     - Telemetry fan-out and 1 Hz tick tasks
//!     - Operator server: the inbound half of the session protocol
//!
//! The main thread runs the operator server until a shutdown signal.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Report};
use log::info;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

// Internal
use ops_if::cmd::Command;
use ops_if::net::{self, zmq, SocketOptions};
use tank_lib::{
    arbiter::{self, Arbiter},
    cam::{self, BoxSlot, FrameSlot, FrameSource, TestPatternSource},
    detect::{DetectionFilter, Detector},
    map::{self, Grid},
    motor_driver::SimDriver,
    ops_server::{OpsHandler, OpsServer},
    params::TankExecParams,
    pose::{Pose, PoseEstimator},
    shared::ModeFlags,
    telemetry,
    virtual_robot::VirtualRobot,
};
use util::{
    host,
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Default parameter file, relative to the working directory.
const DEFAULT_PARAMS_PATH: &str = "params/tank_exec.toml";

// ---------------------------------------------------------------------------
// MAIN
// ---------------------------------------------------------------------------

fn main() -> Result<(), Report> {
    // ---- EARLY INITIALISATION ----

    let session = Session::new("tank_exec", "sessions").wrap_err("Failed to create the session")?;

    logger_init(LevelFilter::Trace, &session).wrap_err("Failed to initialise logging")?;

    info!("Tank Control Executable\n");
    info!(
        "Running on: {}",
        host::get_uname().wrap_err("Failed to get host information")?
    );
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let params_path = env::args().nth(1).unwrap_or_else(|| DEFAULT_PARAMS_PATH.into());

    let params: TankExecParams =
        util::params::load(&params_path).wrap_err("Could not load exec params")?;

    info!("Parameters loaded from {}", params_path);

    // ---- SHARED STATE ----

    let grid_size = params.grid_size;
    let start_pose = params
        .start_pose
        .unwrap_or_else(|| Pose::grid_centre(grid_size));

    let pose = Arc::new(Mutex::new(PoseEstimator::new(start_pose, grid_size)));
    let virt = Arc::new(Mutex::new(VirtualRobot::new(start_pose, grid_size)));
    let grid = Arc::new(Mutex::new(Grid::new(grid_size)));
    let calib = Arc::new(Mutex::new(params.calibration));
    let current_motion = Arc::new(Mutex::new(Command::Stop));
    let flags = Arc::new(ModeFlags::new(
        params.auto_navigation,
        params.object_detection,
        params.overlay,
    ));

    let estop = Arc::new(AtomicBool::new(false));
    let plan_cancel = Arc::new(AtomicBool::new(false));
    let plan_active = Arc::new(AtomicBool::new(false));
    let shutdown = Arc::new(AtomicBool::new(false));

    let (tm_tx, tm_rx) = mpsc::channel();

    // ---- SIGNAL HANDLING ----

    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        })
        .wrap_err("Could not set the shutdown signal handler")?;
    }

    // ---- INITIALISE NETWORK ----

    info!("Initialising network");

    let zmq_ctx = zmq::Context::new();

    let tm_socket = net::open_socket(
        &zmq_ctx,
        zmq::PUB,
        &SocketOptions {
            bind: true,
            send_timeout: 10,
            ..Default::default()
        },
        &params.net.tm_endpoint,
    )
    .wrap_err("Failed to open the telemetry socket")?;

    info!("Telemetry publisher bound to {}", params.net.tm_endpoint);

    // ---- TELEMETRY TASKS ----

    let fanout_handle = {
        let flags = flags.clone();
        let current_motion = current_motion.clone();
        let shutdown = shutdown.clone();
        thread::Builder::new()
            .name("tm-fanout".into())
            .spawn(move || telemetry::run_fanout(tm_socket, tm_rx, flags, current_motion, shutdown))
            .wrap_err("Failed to spawn the telemetry fan-out task")?
    };

    let tick_handle = {
        let tm_tx = tm_tx.clone();
        let shutdown = shutdown.clone();
        thread::Builder::new()
            .name("tm-tick".into())
            .spawn(move || telemetry::run_tick(tm_tx, shutdown))
            .wrap_err("Failed to spawn the telemetry tick task")?
    };

    // ---- ARBITER ----

    // The hardware motor driver is an external collaborator; this exec
    // ships with the simulated driver.
    info!("Using the simulated motor driver");

    let (arbiter_handle, _arbiter_join) = arbiter::spawn(Arbiter::new(
        Box::new(SimDriver::new()),
        pose.clone(),
        virt.clone(),
        calib.clone(),
        current_motion.clone(),
        tm_tx.clone(),
        estop.clone(),
        plan_active.clone(),
        plan_cancel.clone(),
    ))
    .wrap_err("Failed to spawn the arbiter task")?;

    info!("Arbiter initialised");

    // ---- PLANNER ----

    let (planner_handle, _planner_join) = map::spawn_planner(
        arbiter_handle.clone(),
        pose.clone(),
        grid.clone(),
        calib.clone(),
        estop.clone(),
        plan_cancel,
        plan_active,
        tm_tx.clone(),
    )
    .wrap_err("Failed to spawn the planner task")?;

    info!("Planner initialised");

    // ---- CAMERA & DETECTION ----

    let detector = Detector::from_model_path(params.detector.model_path.as_deref());
    let filter = DetectionFilter {
        confidence: params.detector.confidence,
        classes: params.detector.classes.clone(),
    };

    let source = open_frame_source(&params);

    let frame_slot = FrameSlot::new();
    let box_slot = BoxSlot::new();

    let capture_handle = {
        let frame_slot = frame_slot.clone();
        let box_slot = box_slot.clone();
        let flags = flags.clone();
        let arbiter_handle = arbiter_handle.clone();
        let tm_tx = tm_tx.clone();
        let shutdown = shutdown.clone();
        let jpeg_quality = params.camera.jpeg_quality;
        thread::Builder::new()
            .name("capture".into())
            .spawn(move || {
                cam::run_capture(
                    source,
                    frame_slot,
                    box_slot,
                    detector,
                    filter,
                    flags,
                    arbiter_handle,
                    tm_tx,
                    jpeg_quality,
                    shutdown,
                )
            })
            .wrap_err("Failed to spawn the capture task")?
    };

    info!("Capture task started");

    // ---- OPERATOR SERVER ----

    let handler = OpsHandler {
        arbiter: arbiter_handle.clone(),
        planner: planner_handle,
        pose,
        virt,
        grid,
        calib,
        estop,
        tm_events: tm_tx,
    };

    let ops_server = OpsServer::new(&zmq_ctx, &params.net.ops_endpoint, handler, shutdown.clone())
        .wrap_err("Failed to open the operator socket")?;

    info!("Operator server bound to {}\n", params.net.ops_endpoint);

    // Blocks until shutdown
    ops_server.run();

    // ---- SHUTDOWN ----

    info!("Stopping motors and tasks");
    arbiter_handle.dispatch(Command::Stop, arbiter::CmdSource::ManualOverride);

    capture_handle.join().ok();
    tick_handle.join().ok();
    fanout_handle.join().ok();

    info!("End of execution");

    Ok(())
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Open the configured frame source, falling back to the test pattern.
#[cfg(feature = "cam")]
fn open_frame_source(params: &TankExecParams) -> Box<dyn FrameSource> {
    match cam::v4l::V4lSource::new(
        &params.camera.device,
        params.camera.width,
        params.camera.height,
    ) {
        Ok(source) => {
            info!("Camera {} opened", params.camera.device);
            Box::new(source)
        }
        Err(e) => {
            log::warn!(
                "Could not open camera {}: {}, using the test pattern",
                params.camera.device,
                e
            );
            Box::new(TestPatternSource::new(
                params.camera.width,
                params.camera.height,
            ))
        }
    }
}

/// Open the built-in test pattern source (no camera support compiled in).
#[cfg(not(feature = "cam"))]
fn open_frame_source(params: &TankExecParams) -> Box<dyn FrameSource> {
    info!("Camera support not compiled in, using the test pattern");
    Box::new(TestPatternSource::new(
        params.camera.width,
        params.camera.height,
    ))
}
