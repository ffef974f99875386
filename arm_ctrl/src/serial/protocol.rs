//! Wire protocol command serialisation
//!
//! One command per newline-terminated ASCII line, case-sensitive opcodes,
//! each answered by a one-line acknowledgement:
//!
//! | Command          | Format                     | Expected reply |
//! |------------------|----------------------------|----------------|
//! | Set angle        | `S <channel> <angle>`      | `OK`           |
//! | Write pulse      | `W <channel> <microsecs>`  | `OK`           |
//! | Release channel  | `R <channel>`              | `OK`           |
//! | Release all      | `X`                        | `OK`           |
//! | Ping             | `P`                        | `PONG`         |

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use crate::{Channel, PulseUs};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Acknowledgement to every command except ping.
pub const ACK_OK: &str = "OK";

/// Acknowledgement to ping.
pub const ACK_PONG: &str = "PONG";

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// A single command of the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Set a channel to an angle in degrees (legacy command, 0-180).
    SetAngle { channel: Channel, angle_deg: u16 },

    /// Write a raw pulse width in microseconds (0-3000).
    WritePulse { channel: Channel, pulse_us: PulseUs },

    /// Release a single channel (stop driving it).
    Release { channel: Channel },

    /// Release every channel.
    ReleaseAll,

    /// Liveness check.
    Ping,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Command {
    /// Serialise into one newline-terminated protocol line.
    pub fn to_line(&self) -> String {
        match self {
            Command::SetAngle { channel, angle_deg } => {
                format!("S {} {}\n", channel, angle_deg)
            }
            Command::WritePulse { channel, pulse_us } => {
                format!("W {} {}\n", channel, pulse_us)
            }
            Command::Release { channel } => format!("R {}\n", channel),
            Command::ReleaseAll => String::from("X\n"),
            Command::Ping => String::from("P\n"),
        }
    }

    /// The exact acknowledgement line the board must answer with.
    pub fn expected_ack(&self) -> &'static str {
        match self {
            Command::Ping => ACK_PONG,
            _ => ACK_OK,
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
