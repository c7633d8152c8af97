//! Error types for setting up a simulation.
//!
//! Everything that can go wrong before the first `step()` is reported through
//! [`SimulationError`]. Faults inside a frame are invariant violations and panic.

use std::fmt;

use crate::floating_type_mod::FT;

/// Errors that can occur while configuring or initializing a simulation.
#[derive(Debug)]
pub enum SimulationError {
    /// The requested particle count is zero or does not fit into a particle id.
    InvalidParticleCount(usize),
    /// A simulation parameter is out of its valid range.
    InvalidParameter {
        name: &'static str,
        value: FT,
        reason: &'static str,
    },
    /// A configuration file could not be parsed.
    ConfigParse(serde_yaml::Error),
    /// An overwrite file names a parameter that does not exist.
    UnknownConfigKey(String),
    /// Failed to read a file from disk.
    Io(std::io::Error),
}

impl fmt::Display for SimulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimulationError::InvalidParticleCount(count) => write!(
                f,
                "invalid particle count {} (expected 1..={})",
                count,
                u32::MAX
            ),
            SimulationError::InvalidParameter { name, value, reason } => {
                write!(f, "invalid simulation parameter `{}` = {}: {}", name, value, reason)
            }
            SimulationError::ConfigParse(e) => write!(f, "failed to parse simulation config: {}", e),
            SimulationError::UnknownConfigKey(key) => write!(f, "unknown simulation parameter `{}`", key),
            SimulationError::Io(e) => write!(f, "failed to read file: {}", e),
        }
    }
}

impl std::error::Error for SimulationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SimulationError::ConfigParse(e) => Some(e),
            SimulationError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_yaml::Error> for SimulationError {
    fn from(e: serde_yaml::Error) -> Self {
        SimulationError::ConfigParse(e)
    }
}

impl From<std::io::Error> for SimulationError {
    fn from(e: std::io::Error) -> Self {
        SimulationError::Io(e)
    }
}

#[test]
fn error_messages_name_the_offending_value() {
    let e = SimulationError::InvalidParticleCount(0);
    assert!(e.to_string().contains("invalid particle count 0"));

    let e = SimulationError::InvalidParameter {
        name: "support_radius",
        value: -1.,
        reason: "must be positive",
    };
    let s = e.to_string();
    assert!(s.contains("support_radius"));
    assert!(s.contains("must be positive"));
}
