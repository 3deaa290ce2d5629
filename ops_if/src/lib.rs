//! # Operator Interface
//!
//! This crate defines the interface between the tank control software and
//! the operator ground station: the JSON-framed message set, the camera
//! frame encodings, and the network layer the messages travel over.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod cam;
pub mod cmd;
pub mod detect;
pub mod net;
pub mod ops;
pub mod tm;
