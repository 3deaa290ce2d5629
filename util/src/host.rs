//! Host platform utility functions

use std::path::PathBuf;

/// Retrieve a short description of the host this executable is running on.
pub fn get_uname() -> std::io::Result<String> {
    Ok(format!("{} ({})", std::env::consts::OS, std::env::consts::ARCH))
}

/// Get the software root directory from the `TANK_SW_ROOT` environment
/// variable, falling back to the current directory if it is not set.
pub fn get_tank_sw_root() -> PathBuf {
    match std::env::var("TANK_SW_ROOT") {
        Ok(s) => s.into(),
        Err(_) => PathBuf::from("."),
    }
}
