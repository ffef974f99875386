//! Parameters structure for the arm controller

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::arm_config::ArmModel;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the arm controller.
///
/// Loaded once at startup (see `util::params::load`) and immutable
/// afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmCtrlParams {
    // ---- SERIAL LINK ----
    /// Serial port the controller board is attached to, for example
    /// `/dev/ttyUSB0`.
    pub serial_port: String,

    /// Baud rate of the serial link.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    // ---- ARMS ----
    /// The left (or only) arm chain.
    pub left_arm: ArmModel,

    /// The right arm chain, if the rig has two arms.
    #[serde(default)]
    pub right_arm: Option<ArmModel>,
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn default_baud_rate() -> u32 {
    115200
}
