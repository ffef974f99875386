//! # Arm Control Library
//!
//! This library drives multi-joint servo arms from high-level position
//! commands down to hardware pulse signals, over a serial link to an external
//! PWM controller board.
//!
//! The stack is composed of, leaves first:
//! - [`pulse_map`] - physical joint angle to hardware pulse width mapping
//! - [`ik`] - closed-form inverse kinematics for 4-6 joint chains
//! - [`servo_state`] - thread-safe per-channel target/last-sent pulse table
//! - [`motion`] - time-interpolated motion planning into the servo state
//! - [`serial`] - the ACK-based wire protocol to the controller board
//! - [`sender`] - the fixed-rate loop draining servo state over the link
//! - [`controller`] - the facade composing all of the above

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod arm_config;
pub mod controller;
pub mod ik;
pub mod motion;
pub mod params;
pub mod pulse_map;
pub mod sender;
pub mod serial;
pub mod servo_state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// Internal
pub use arm_config::*;
pub use controller::{ControllerStatus, MoveResult, RobotController};
pub use params::ArmCtrlParams;

// ---------------------------------------------------------------------------
// TYPES
// ---------------------------------------------------------------------------

/// A servo channel index on the controller board.
pub type Channel = u8;

/// A servo pulse width in microseconds.
pub type PulseUs = u16;
