//! # Object Detector & Auto-Navigation Policy
//!
//! The detector itself is an opaque collaborator: anything that can turn
//! a frame into bounding boxes. When no model backend is available the
//! detector is `Absent` and behaves as always-empty, so call sites never
//! check a runtime flag.
//!
//! The auto-navigation policy turns detections of the configured classes
//! into steering: keep the highest-confidence subject centred in the
//! frame, turning toward it when it drifts into the outer bands.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use image::DynamicImage;
use log::info;

// Internal
use ops_if::cmd::Command;
use ops_if::detect::DetectionBox;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Left edge of the centre band, as a fraction of frame width.
const CENTRE_BAND_LEFT: f64 = 0.40;

/// Right edge of the centre band, as a fraction of frame width.
const CENTRE_BAND_RIGHT: f64 = 0.60;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A detection backend: frame in, boxes out.
///
/// Must be callable from the capture task.
pub trait Detect: Send {
    fn infer(&mut self, image: &DynamicImage) -> Vec<DetectionBox>;
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// An optionally-available detector.
pub enum Detector {
    Present(Box<dyn Detect>),
    Absent,
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Detection filtering configuration.
#[derive(Debug, Clone)]
pub struct DetectionFilter {
    /// Minimum confidence for a box to be kept
    pub confidence: f64,

    /// Class ids the policy reacts to
    pub classes: Vec<u32>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Detector {
    /// Build the detector for the given model path.
    ///
    /// Model loading is the backend's concern; with no backend registered
    /// the detector is Absent, which is logged once here at startup.
    pub fn from_model_path(model_path: Option<&str>) -> Self {
        match model_path {
            Some(path) => {
                info!(
                    "Detector model configured ({}) but no backend is registered, \
                     running with empty detections",
                    path
                );
                Detector::Absent
            }
            None => {
                info!("No detector model configured, running with empty detections");
                Detector::Absent
            }
        }
    }

    /// Run inference on a frame. Absent detectors return no boxes.
    pub fn infer(&mut self, image: &DynamicImage) -> Vec<DetectionBox> {
        match self {
            Detector::Present(backend) => backend.infer(image),
            Detector::Absent => Vec::new(),
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Detector::Present(_))
    }
}

impl DetectionFilter {
    /// Keep only the boxes the policy should consider.
    pub fn apply(&self, boxes: Vec<DetectionBox>) -> Vec<DetectionBox> {
        boxes
            .into_iter()
            .filter(|b| b.confidence >= self.confidence)
            .collect()
    }

    fn is_subject(&self, b: &DetectionBox) -> bool {
        self.classes.contains(&b.class_id)
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Choose a steering command from the current detections.
///
/// The highest-confidence box of the configured classes is the subject;
/// steer toward its horizontal centroid when it leaves the centre band.
/// No qualifying subject means Stop.
pub fn steer(boxes: &[DetectionBox], frame_width: u32, filter: &DetectionFilter) -> Command {
    let subject = boxes
        .iter()
        .filter(|b| filter.is_subject(b))
        .max_by(|a, b| {
            a.confidence
                .partial_cmp(&b.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

    let subject = match subject {
        Some(s) => s,
        None => return Command::Stop,
    };

    let xc = subject.centroid_x();
    let left = CENTRE_BAND_LEFT * frame_width as f64;
    let right = CENTRE_BAND_RIGHT * frame_width as f64;

    if xc < left {
        Command::Left
    } else if xc > right {
        Command::Right
    } else {
        Command::Stop
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn person_box(x1: i32, x2: i32, confidence: f64) -> DetectionBox {
        DetectionBox {
            x1,
            y1: 0,
            x2,
            y2: 100,
            label: "person".into(),
            confidence,
            class_id: 0,
        }
    }

    fn person_filter() -> DetectionFilter {
        DetectionFilter {
            confidence: 0.5,
            classes: vec![0],
        }
    }

    #[test]
    fn test_subject_left_of_band_steers_left() {
        // Centroid at 0.3 of a 640px frame
        let boxes = vec![person_box(132, 252, 0.9)];

        assert_eq!(steer(&boxes, 640, &person_filter()), Command::Left);
    }

    #[test]
    fn test_subject_right_of_band_steers_right() {
        let boxes = vec![person_box(400, 560, 0.9)];

        assert_eq!(steer(&boxes, 640, &person_filter()), Command::Right);
    }

    #[test]
    fn test_subject_in_band_stops() {
        // Centroid at exactly half the frame
        let boxes = vec![person_box(280, 360, 0.9)];

        assert_eq!(steer(&boxes, 640, &person_filter()), Command::Stop);
    }

    #[test]
    fn test_no_detections_stops() {
        assert_eq!(steer(&[], 640, &person_filter()), Command::Stop);
    }

    #[test]
    fn test_highest_confidence_subject_wins() {
        let boxes = vec![
            person_box(0, 100, 0.6),    // far left, low confidence
            person_box(500, 600, 0.95), // far right, high confidence
        ];

        assert_eq!(steer(&boxes, 640, &person_filter()), Command::Right);
    }

    #[test]
    fn test_other_classes_ignored() {
        let mut dog = person_box(0, 100, 0.99);
        dog.class_id = 16;
        dog.label = "dog".into();

        assert_eq!(steer(&[dog], 640, &person_filter()), Command::Stop);
    }

    #[test]
    fn test_confidence_filter() {
        let filter = person_filter();
        let boxes = filter.apply(vec![person_box(0, 100, 0.4), person_box(0, 100, 0.8)]);

        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].confidence, 0.8);
    }

    #[test]
    fn test_absent_detector_returns_empty() {
        let mut detector = Detector::from_model_path(None);
        let frame = DynamicImage::new_rgb8(64, 48);

        assert!(detector.infer(&frame).is_empty());
        assert!(!detector.is_present());
    }

    #[test]
    fn test_present_detector_is_called() {
        struct OneBox;
        impl Detect for OneBox {
            fn infer(&mut self, _image: &DynamicImage) -> Vec<DetectionBox> {
                vec![DetectionBox {
                    x1: 0,
                    y1: 0,
                    x2: 10,
                    y2: 10,
                    label: "person".into(),
                    confidence: 1.0,
                    class_id: 0,
                }]
            }
        }

        let mut detector = Detector::Present(Box::new(OneBox));
        let frame = DynamicImage::new_rgb8(64, 48);

        assert_eq!(detector.infer(&frame).len(), 1);
    }
}
