//! # Motion Commands
//!
//! The tank's motion vocabulary. Every subsystem that moves the vehicle,
//! physical or virtual, speaks in terms of these five discrete commands.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// A discrete motion command.
///
/// Commands are serialised on the wire as the single letters used by the
/// motor board protocol.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Drive both tracks forward
    #[serde(rename = "F")]
    Forward,

    /// Drive both tracks backward
    #[serde(rename = "B")]
    Backward,

    /// Rotate anticlockwise on the spot
    #[serde(rename = "L")]
    Left,

    /// Rotate clockwise on the spot
    #[serde(rename = "R")]
    Right,

    /// Stop both tracks
    #[serde(rename = "S")]
    Stop,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Command {
    /// Get the single-letter wire representation of this command.
    pub fn as_letter(&self) -> &'static str {
        match self {
            Command::Forward => "F",
            Command::Backward => "B",
            Command::Left => "L",
            Command::Right => "R",
            Command::Stop => "S",
        }
    }

    /// Parse a command from its single-letter wire representation.
    pub fn from_letter(s: &str) -> Option<Self> {
        match s {
            "F" => Some(Command::Forward),
            "B" => Some(Command::Backward),
            "L" => Some(Command::Left),
            "R" => Some(Command::Right),
            "S" => Some(Command::Stop),
            _ => None,
        }
    }
}

impl Default for Command {
    fn default() -> Self {
        Command::Stop
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_letter())
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
