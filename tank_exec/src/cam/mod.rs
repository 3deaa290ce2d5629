//! # Camera Capture & Frame Pipeline
//!
//! A dedicated task captures frames from the camera at best effort and
//! keeps only the latest one in a single-slot buffer. Consumers take a
//! reference-counted handle to the stored frame under a short-held lock;
//! the stored frame itself is never mutated. Detection overlays are drawn
//! onto per-consumer copies just before encoding.
//!
//! With the `cam` feature enabled frames come from a V4L2 device; without
//! it (or when the device fails to open) a moving test pattern is
//! generated so the rest of the pipeline can be exercised on any bench.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use chrono::Utc;
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// Internal
use crate::arbiter::{ArbiterHandle, CmdSource};
use crate::detect::{steer, DetectionFilter, Detector};
use crate::shared::{lock, ModeFlags};
use crate::telemetry::TmEvent;
use ops_if::cam::CamImage;
use ops_if::detect::DetectionBox;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Backoff after a failed capture.
const CAPTURE_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Consecutive failures before a warning is surfaced to the operator.
const CAPTURE_FAILURE_WARN_COUNT: u32 = 50;

/// Overlay colour for detection boxes.
const BOX_COLOUR: Rgb<u8> = Rgb([0, 255, 0]);

/// Outline thickness of detection boxes in pixels.
const BOX_THICKNESS: i32 = 2;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A source of camera frames.
///
/// `grab` blocks until the next frame is available (or fails).
pub trait FrameSource: Send {
    fn grab(&mut self) -> Result<CamImage, CaptureError>;
}

// ---------------------------------------------------------------------------
// ENUMS
// ---------------------------------------------------------------------------

/// Errors that can occur while capturing frames.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Camera device error: {0}")]
    DeviceError(std::io::Error),

    #[error("Could not decode the captured frame: {0}")]
    DecodeError(image::ImageError),
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The latest-frame slot. Writers swap in a new frame; readers clone the
/// reference, never the pixels.
#[derive(Clone, Default)]
pub struct FrameSlot {
    inner: Arc<Mutex<Option<Arc<CamImage>>>>,
}

/// The latest detection boxes, alongside the frame slot.
#[derive(Clone, Default)]
pub struct BoxSlot {
    inner: Arc<Mutex<Vec<DetectionBox>>>,
}

/// Synthetic frame source: a grey gradient with a moving vertical bar.
pub struct TestPatternSource {
    width: u32,
    height: u32,
    tick: u32,
}

// ---------------------------------------------------------------------------
// IMPLS
// ---------------------------------------------------------------------------

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, frame: Arc<CamImage>) {
        *lock(&self.inner) = Some(frame);
    }

    /// Reference to the latest frame, if any has been captured yet.
    pub fn latest(&self) -> Option<Arc<CamImage>> {
        lock(&self.inner).clone()
    }
}

impl BoxSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, boxes: Vec<DetectionBox>) {
        *lock(&self.inner) = boxes;
    }

    pub fn latest(&self) -> Vec<DetectionBox> {
        lock(&self.inner).clone()
    }
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            tick: 0,
        }
    }
}

impl FrameSource for TestPatternSource {
    fn grab(&mut self) -> Result<CamImage, CaptureError> {
        // Pace the synthetic source at roughly 30 fps
        std::thread::sleep(Duration::from_millis(33));

        self.tick = self.tick.wrapping_add(1);
        let bar_x = self.tick.wrapping_mul(4) % self.width;

        let image = RgbImage::from_fn(self.width, self.height, |x, y| {
            if x == bar_x || x == (bar_x + 1) % self.width {
                Rgb([255, 255, 255])
            } else {
                let shade = ((x + y + self.tick) % 256) as u8 / 2;
                Rgb([shade, shade, shade + 40])
            }
        });

        Ok(CamImage {
            timestamp: Utc::now(),
            image: DynamicImage::ImageRgb8(image),
        })
    }
}

// ---------------------------------------------------------------------------
// V4L2 SOURCE (cam feature)
// ---------------------------------------------------------------------------

#[cfg(feature = "cam")]
pub mod v4l {
    use super::{CamImage, CaptureError, FrameSource};
    use chrono::Utc;

    /// Frame source backed by a V4L2 camera in MJPG mode.
    pub struct V4lSource {
        camera: rscam::Camera,
    }

    impl V4lSource {
        pub fn new(
            device: &str,
            width: u32,
            height: u32,
        ) -> Result<Self, Box<dyn std::error::Error>> {
            let mut camera = rscam::Camera::new(device)?;

            camera.start(&rscam::Config {
                interval: (1, 30),
                resolution: (width, height),
                format: b"MJPG",
                ..Default::default()
            })?;

            Ok(Self { camera })
        }
    }

    impl FrameSource for V4lSource {
        fn grab(&mut self) -> Result<CamImage, CaptureError> {
            let frame = self.camera.capture().map_err(CaptureError::DeviceError)?;

            let image =
                image::load_from_memory_with_format(&frame, image::ImageFormat::Jpeg)
                    .map_err(CaptureError::DecodeError)?;

            Ok(CamImage {
                timestamp: Utc::now(),
                image,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Run the capture loop until shutdown.
///
/// Each captured frame is swapped into the latest-frame slot, run through
/// the detector when detection is enabled, and encoded for the telemetry
/// video channel. When auto-navigation is on the steering policy's
/// command is dispatched with the auto-nav source, so operator input
/// preempts it automatically.
#[allow(clippy::too_many_arguments)]
pub fn run_capture(
    mut source: Box<dyn FrameSource>,
    slot: FrameSlot,
    boxes: BoxSlot,
    mut detector: Detector,
    filter: DetectionFilter,
    flags: Arc<ModeFlags>,
    arbiter: ArbiterHandle,
    tm_events: Sender<TmEvent>,
    jpeg_quality: u8,
    shutdown: Arc<AtomicBool>,
) {
    let mut consecutive_failures: u32 = 0;

    while !shutdown.load(Ordering::Relaxed) {
        let frame = match source.grab() {
            Ok(f) => f,
            Err(e) => {
                consecutive_failures += 1;
                if consecutive_failures == CAPTURE_FAILURE_WARN_COUNT {
                    warn!("Camera capture failing continuously: {}", e);
                    let _ = tm_events.send(TmEvent::Log(
                        "Warning: camera capture failing, retrying".into(),
                    ));
                }
                std::thread::sleep(CAPTURE_RETRY_BACKOFF);
                continue;
            }
        };

        if consecutive_failures >= CAPTURE_FAILURE_WARN_COUNT {
            debug!("Camera capture recovered");
        }
        consecutive_failures = 0;

        let frame = Arc::new(frame);
        slot.store(frame.clone());

        // Detection and the steering policy run inline on the capture task
        let current_boxes = if flags.object_detection() {
            filter.apply(detector.infer(&frame.image))
        } else {
            Vec::new()
        };

        if flags.auto_navigation() {
            let cmd = steer(&current_boxes, frame.image.width(), &filter);
            arbiter.dispatch(cmd, CmdSource::AutoNav);
        }

        boxes.store(current_boxes.clone());

        // Encode a per-consumer copy for the video channel; the stored
        // frame is never drawn on
        let outgoing = render_consumer_frame(&frame, &current_boxes, flags.overlay());
        match outgoing.to_cam_frame(jpeg_quality) {
            Ok(cam_frame) => {
                let _ = tm_events.send(TmEvent::Frame(cam_frame));
            }
            Err(e) => warn!("Could not encode outgoing frame: {}", e),
        }
    }

    debug!("Capture task stopped");
}

/// Produce the frame a consumer should see: a copy of the latest frame
/// with the detection overlay drawn when enabled.
pub fn render_consumer_frame(
    frame: &CamImage,
    boxes: &[DetectionBox],
    overlay: bool,
) -> CamImage {
    if !overlay || boxes.is_empty() {
        return frame.clone();
    }

    let mut rgb = frame.image.to_rgb8();
    for b in boxes {
        draw_detection_box(&mut rgb, b);
    }

    CamImage {
        timestamp: frame.timestamp,
        image: DynamicImage::ImageRgb8(rgb),
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Draw one detection box outline with a filled tag bar above it.
fn draw_detection_box(image: &mut RgbImage, b: &DetectionBox) {
    let (w, h) = (image.width() as i32, image.height() as i32);

    let put = |image: &mut RgbImage, x: i32, y: i32| {
        if x >= 0 && x < w && y >= 0 && y < h {
            image.put_pixel(x as u32, y as u32, BOX_COLOUR);
        }
    };

    for t in 0..BOX_THICKNESS {
        for x in b.x1..=b.x2 {
            put(image, x, b.y1 + t);
            put(image, x, b.y2 - t);
        }
        for y in b.y1..=b.y2 {
            put(image, b.x1 + t, y);
            put(image, b.x2 - t, y);
        }
    }

    // Tag bar above the box; its width tracks the confidence
    let bar_y0 = b.y1 - 12;
    let bar_width = ((b.x2 - b.x1) as f64 * b.confidence) as i32;
    for y in bar_y0..(bar_y0 + 8) {
        for x in b.x1..(b.x1 + bar_width) {
            put(image, x, y);
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_test_pattern_produces_frames() {
        let mut source = TestPatternSource::new(64, 48);

        let a = source.grab().unwrap();
        let b = source.grab().unwrap();

        assert_eq!(a.image.width(), 64);
        assert_eq!(a.image.height(), 48);
        // The pattern moves between frames
        assert_ne!(a.image.to_rgb8().as_raw(), b.image.to_rgb8().as_raw());
    }

    #[test]
    fn test_frame_slot_latest_wins() {
        let slot = FrameSlot::new();
        assert!(slot.latest().is_none());

        let mut source = TestPatternSource::new(16, 16);
        slot.store(Arc::new(source.grab().unwrap()));
        let second = Arc::new(source.grab().unwrap());
        slot.store(second.clone());

        let latest = slot.latest().unwrap();
        assert_eq!(latest.timestamp, second.timestamp);
    }

    #[test]
    fn test_overlay_does_not_mutate_stored_frame() {
        let mut source = TestPatternSource::new(64, 48);
        let frame = source.grab().unwrap();
        let original = frame.image.to_rgb8().as_raw().clone();

        let boxes = vec![DetectionBox {
            x1: 10,
            y1: 20,
            x2: 40,
            y2: 40,
            label: "person".into(),
            confidence: 0.9,
            class_id: 0,
        }];

        let rendered = render_consumer_frame(&frame, &boxes, true);

        // The consumer copy carries the overlay...
        assert_ne!(rendered.image.to_rgb8().as_raw(), &original);
        // ...while the stored frame is untouched
        assert_eq!(frame.image.to_rgb8().as_raw(), &original);
    }

    #[test]
    fn test_overlay_disabled_is_passthrough() {
        let mut source = TestPatternSource::new(32, 32);
        let frame = source.grab().unwrap();

        let boxes = vec![DetectionBox {
            x1: 2,
            y1: 2,
            x2: 10,
            y2: 10,
            label: "person".into(),
            confidence: 0.9,
            class_id: 0,
        }];

        let rendered = render_consumer_frame(&frame, &boxes, false);

        assert_eq!(
            rendered.image.to_rgb8().as_raw(),
            frame.image.to_rgb8().as_raw()
        );
    }

    #[test]
    fn test_box_drawing_clips_to_frame() {
        let mut image = RgbImage::new(32, 32);

        // A box partially outside the frame must not panic
        draw_detection_box(
            &mut image,
            &DetectionBox {
                x1: -10,
                y1: -10,
                x2: 40,
                y2: 40,
                label: "person".into(),
                confidence: 1.0,
                class_id: 0,
            },
        );
    }
}
