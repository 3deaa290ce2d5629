//! # Telemetry Fan-out
//!
//! Broadcasts state changes to every connected operator: pose updates,
//! the periodic telemetry packet, log events, calibration values, the
//! emergency-stop notification and video frames. Everything funnels
//! through a single event channel into the PUB socket so messages to any
//! one subscriber are totally ordered.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// Internal
use crate::pose::Pose;
use crate::shared::{lock, ModeFlags};
use ops_if::cam::CamFrame;
use ops_if::cmd::Command;
use ops_if::net::zmq;
use ops_if::tm::{TelemetryPacket, TmMessage};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Battery drops one percent every this many ticks.
const BATTERY_DECAY_TICKS: u32 = 60;

/// A status line is published every this many ticks.
const STATUS_LOG_TICKS: u32 = 30;

/// Minimum interval between published log messages; bursts inside the
/// window are coalesced into one message.
const LOG_COALESCE_INTERVAL: Duration = Duration::from_millis(250);

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Events fed into the fan-out by the rest of the executable.
pub enum TmEvent {
    /// The pose estimate changed
    Pose(Pose),

    /// A textual event for the operator log panel
    Log(String),

    /// Calibration values were requested
    Calibration { move_distance: f64, turn_angle: f64 },

    /// The emergency stop latch was set
    EmergencyStop,

    /// A new video frame is ready for subscribers
    Frame(CamFrame),

    /// One second elapsed
    Tick,
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Simulated battery model: a monotonically decaying counter.
///
/// A placeholder until real battery sensing is wired in.
pub struct BatterySim {
    level: u8,
    ticks: u32,
}

/// Coalesces bursts of log lines into rate-limited messages.
pub struct LogCoalescer {
    pending: Vec<String>,
    last_emit: Option<Instant>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl BatterySim {
    pub fn new() -> Self {
        Self {
            level: 100,
            ticks: 0,
        }
    }

    /// Advance the model by one tick and return the current level.
    pub fn tick(&mut self) -> u8 {
        self.ticks += 1;
        if self.ticks % BATTERY_DECAY_TICKS == 0 && self.level > 0 {
            self.level -= 1;
        }
        self.level
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn ticks(&self) -> u32 {
        self.ticks
    }
}

impl Default for BatterySim {
    fn default() -> Self {
        Self::new()
    }
}

impl LogCoalescer {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            last_emit: None,
        }
    }

    /// Offer a log line. Returns the message to publish now, or None if
    /// the line was held back for coalescing.
    pub fn offer(&mut self, line: String, now: Instant) -> Option<String> {
        self.pending.push(line);
        self.flush_if_due(now)
    }

    /// Flush any held lines if the rate-limit window has passed.
    pub fn flush_if_due(&mut self, now: Instant) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }

        let due = match self.last_emit {
            Some(at) => now.duration_since(at) >= LOG_COALESCE_INTERVAL,
            None => true,
        };

        if due {
            self.last_emit = Some(now);
            let msg = self.pending.join("\n");
            self.pending.clear();
            Some(msg)
        } else {
            None
        }
    }
}

impl Default for LogCoalescer {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Run the fan-out loop, draining telemetry events into the PUB socket.
///
/// Returns when the shutdown flag is raised or every event sender is gone.
pub fn run_fanout(
    socket: zmq::Socket,
    events: Receiver<TmEvent>,
    flags: Arc<ModeFlags>,
    current_motion: Arc<Mutex<Command>>,
    shutdown: Arc<AtomicBool>,
) {
    let mut battery = BatterySim::new();
    let mut coalescer = LogCoalescer::new();

    loop {
        let event = match events.recv_timeout(Duration::from_millis(200)) {
            Ok(e) => e,
            Err(RecvTimeoutError::Timeout) => {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                if let Some(msg) = coalescer.flush_if_due(Instant::now()) {
                    publish(&socket, &TmMessage::Log { msg });
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };

        match event {
            TmEvent::Pose(pose) => publish(
                &socket,
                &TmMessage::RobotUpdate {
                    row: pose.y,
                    col: pose.x,
                    angle: pose.angle_deg,
                },
            ),
            TmEvent::Log(line) => {
                if let Some(msg) = coalescer.offer(line, Instant::now()) {
                    publish(&socket, &TmMessage::Log { msg });
                }
            }
            TmEvent::Calibration {
                move_distance,
                turn_angle,
            } => publish(
                &socket,
                &TmMessage::CalibrationValues {
                    move_distance,
                    turn_angle,
                },
            ),
            TmEvent::EmergencyStop => publish(&socket, &TmMessage::EmergencyStopActivated),
            TmEvent::Frame(frame) => publish(&socket, &TmMessage::VideoFrame(frame)),
            TmEvent::Tick => {
                let packet = TelemetryPacket {
                    battery: battery.tick(),
                    current_motion: *lock(&current_motion),
                    auto_navigation: flags.auto_navigation(),
                    object_detection: flags.object_detection(),
                };
                publish(&socket, &TmMessage::Telemetry(packet));

                if battery.ticks() % STATUS_LOG_TICKS == 0 {
                    publish(
                        &socket,
                        &TmMessage::Log {
                            msg: format!(
                                "System status: nominal (motion: {})",
                                packet.current_motion
                            ),
                        },
                    );
                }

                if let Some(msg) = coalescer.flush_if_due(Instant::now()) {
                    publish(&socket, &TmMessage::Log { msg });
                }
            }
        }
    }

    debug!("Telemetry fan-out stopped");
}

/// Run the 1 Hz telemetry tick until shutdown.
pub fn run_tick(events: Sender<TmEvent>, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_secs(1));
        if events.send(TmEvent::Tick).is_err() {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Publish one message on the PUB socket, logging failures.
fn publish(socket: &zmq::Socket, msg: &TmMessage) {
    let json = match msg.to_json() {
        Ok(j) => j,
        Err(e) => {
            warn!("Could not serialise telemetry message: {}", e);
            return;
        }
    };

    if let Err(e) = socket.send(&json, 0) {
        warn!("Could not publish telemetry message: {}", e);
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_battery_decay() {
        let mut battery = BatterySim::new();

        for _ in 0..59 {
            battery.tick();
        }
        assert_eq!(battery.level(), 100);

        battery.tick();
        assert_eq!(battery.level(), 99);

        // Decay has a floor of zero
        for _ in 0..(200 * BATTERY_DECAY_TICKS) {
            battery.tick();
        }
        assert_eq!(battery.level(), 0);
    }

    #[test]
    fn test_log_burst_coalesced() {
        let mut coalescer = LogCoalescer::new();
        let t0 = Instant::now();

        // First line goes straight out
        assert_eq!(coalescer.offer("one".into(), t0), Some("one".into()));

        // A burst inside the window is held back...
        assert_eq!(coalescer.offer("two".into(), t0), None);
        assert_eq!(coalescer.offer("three".into(), t0), None);

        // ...and flushed as a single joined message once the window passes
        let later = t0 + LOG_COALESCE_INTERVAL;
        assert_eq!(coalescer.flush_if_due(later), Some("two\nthree".into()));

        // Nothing pending, nothing flushed
        assert_eq!(coalescer.flush_if_due(later + LOG_COALESCE_INTERVAL), None);
    }
}
