//! Serial link module
//!
//! Implements the ACK-based wire protocol to the servo controller board. The
//! link is internally serialised by one lock so that command and response are
//! never interleaved across threads sharing the same instance.
//!
//! Steady-state failures degrade: a mismatched or timed-out acknowledgement
//! returns `false` and the affected channel is simply retried by the sender
//! loop on its next cycle, while a hard I/O failure drops the link to
//! `Disconnected`. Only the connection handshake surfaces an error.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod protocol;
pub mod transport;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{trace, warn};

// Internal
use crate::pulse_map::PULSE_HARD_LIMIT_US;
use crate::{Channel, PulseUs};
use protocol::Command;
use std::io;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use transport::{SerialTransport, Transport};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Settle delay after opening the port, letting the board finish its reset.
pub const SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Generous timeout on the connection-time ping.
pub const PING_TIMEOUT: Duration = Duration::from_secs(3);

/// Short timeout on steady-state command acknowledgements, so an
/// unresponsive command costs at most one send-cycle slot.
pub const ACK_TIMEOUT: Duration = Duration::from_millis(100);

/// Maximum angle accepted by the legacy set-angle command.
pub const MAX_ANGLE_DEG: u16 = 180;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Connection state of the link.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Errors raised while establishing a connection.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Could not open serial port {0}: {1}")]
    OpenError(String, serialport::Error),

    #[error("Handshake I/O failed on {0}: {1}")]
    HandshakeIo(String, io::Error),

    #[error("Board did not answer the ping with PONG (got {0:?})")]
    PingFailed(String),
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The serial link to the servo controller board.
pub struct SerialLink<T: Transport = SerialTransport> {
    inner: Mutex<LinkInner<T>>,
}

struct LinkInner<T> {
    transport: Option<T>,
    state: LinkState,
    port_name: Option<String>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SerialLink<SerialTransport> {
    /// Connect to the board: open the port, wait for the board to reset,
    /// then run the ping handshake.
    pub fn connect(&self, port_name: &str, baud_rate: u32) -> Result<(), LinkError> {
        let transport = SerialTransport::open(port_name, baud_rate)
            .map_err(|e| LinkError::OpenError(port_name.to_string(), e))?;

        // Boards with an auto-reset-on-open bootloader need this before they
        // accept commands
        thread::sleep(SETTLE_DELAY);

        self.attach(transport, port_name)
    }
}

impl<T: Transport> Default for SerialLink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport> SerialLink<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LinkInner {
                transport: None,
                state: LinkState::Disconnected,
                port_name: None,
            }),
        }
    }

    /// Run the handshake over an already-opened transport and take ownership
    /// of it on success.
    ///
    /// The input buffer is flushed first so boot chatter from the board
    /// cannot be mistaken for the ping reply.
    pub fn attach(&self, mut transport: T, port_name: &str) -> Result<(), LinkError> {
        let mut inner = self.lock();
        inner.state = LinkState::Connecting;

        let handshake = (|| -> io::Result<String> {
            transport.discard_input()?;
            transport.send_line(&Command::Ping.to_line())?;
            transport.recv_line(PING_TIMEOUT)
        })();

        match handshake {
            Ok(ref reply) if reply == Command::Ping.expected_ack() => {
                inner.transport = Some(transport);
                inner.state = LinkState::Connected;
                inner.port_name = Some(port_name.to_string());
                Ok(())
            }
            Ok(reply) => {
                inner.state = LinkState::Disconnected;
                Err(LinkError::PingFailed(reply))
            }
            Err(e) => {
                inner.state = LinkState::Disconnected;
                Err(LinkError::HandshakeIo(port_name.to_string(), e))
            }
        }
    }

    /// Close the link.
    pub fn disconnect(&self) {
        let mut inner = self.lock();
        inner.transport = None;
        inner.state = LinkState::Disconnected;
        inner.port_name = None;
    }

    pub fn state(&self) -> LinkState {
        self.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Name of the connected port, if any.
    pub fn port_name(&self) -> Option<String> {
        self.lock().port_name.clone()
    }

    /// Write a raw pulse width to a channel. Returns true on acknowledgement.
    pub fn write_pulse(&self, channel: Channel, pulse_us: PulseUs) -> bool {
        self.exchange(Command::WritePulse {
            channel,
            pulse_us: pulse_us.min(PULSE_HARD_LIMIT_US),
        })
    }

    /// Set a channel to an angle via the legacy degree command.
    pub fn set_angle(&self, channel: Channel, angle_deg: u16) -> bool {
        self.exchange(Command::SetAngle {
            channel,
            angle_deg: angle_deg.min(MAX_ANGLE_DEG),
        })
    }

    /// Release a single channel.
    pub fn release_channel(&self, channel: Channel) -> bool {
        self.exchange(Command::Release { channel })
    }

    /// Release every channel. Safe to call while disconnected (returns
    /// false without touching any hardware).
    pub fn release_all(&self) -> bool {
        self.exchange(Command::ReleaseAll)
    }

    /// Liveness check.
    pub fn ping(&self) -> bool {
        self.exchange(Command::Ping)
    }

    /// Perform one command/acknowledgement exchange under the link lock.
    fn exchange(&self, cmd: Command) -> bool {
        let mut inner = self.lock();

        let transport = match inner.transport {
            Some(ref mut t) => t,
            None => return false,
        };

        let result = (|| -> io::Result<String> {
            transport.send_line(&cmd.to_line())?;
            transport.recv_line(ACK_TIMEOUT)
        })();

        match result {
            Ok(ref reply) if reply == cmd.expected_ack() => {
                trace!("{:?} acknowledged", cmd);
                true
            }
            Ok(reply) => {
                // Mismatched acknowledgement: drop the reply and let the
                // caller retry
                warn!("{:?} got unexpected reply {:?}", cmd, reply);
                false
            }
            Err(ref e) if e.kind() == io::ErrorKind::TimedOut => {
                warn!("{:?} timed out waiting for acknowledgement", cmd);
                false
            }
            Err(e) => {
                warn!("I/O failure on the serial link ({}), disconnecting", e);
                inner.transport = None;
                inner.state = LinkState::Disconnected;
                inner.port_name = None;
                false
            }
        }
    }

    fn lock(&self) -> MutexGuard<LinkInner<T>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::transport::mock::MockTransport;
    use super::*;

    #[test]
    fn test_handshake_requires_exact_pong() {
        let link: SerialLink<MockTransport> = SerialLink::new();
        let mock = MockTransport::default();
        mock.push_reply("PONG");

        assert!(link.attach(mock.clone(), "mock0").is_ok());
        assert_eq!(link.state(), LinkState::Connected);
        assert_eq!(link.port_name().as_deref(), Some("mock0"));
        assert_eq!(mock.sent_lines(), vec!["P\n"]);
    }

    #[test]
    fn test_handshake_rejects_wrong_reply() {
        let link: SerialLink<MockTransport> = SerialLink::new();
        let mock = MockTransport::default();
        mock.push_reply("HELLO");

        match link.attach(mock, "mock0") {
            Err(LinkError::PingFailed(reply)) => assert_eq!(reply, "HELLO"),
            other => panic!("expected PingFailed, got {:?}", other.err()),
        }
        assert_eq!(link.state(), LinkState::Disconnected);
    }

    #[test]
    fn test_write_pulse_ack_contract() {
        let link: SerialLink<MockTransport> = SerialLink::new();
        let mock = MockTransport::default();
        mock.push_reply("PONG");
        link.attach(mock.clone(), "mock0").unwrap();

        // Exact acknowledgement succeeds
        mock.push_reply("OK");
        assert!(link.write_pulse(2, 1500));

        // Anything else fails
        mock.push_reply("ERR");
        assert!(!link.write_pulse(2, 1600));

        // A timeout fails but keeps the link up for the next cycle's retry
        assert!(!link.write_pulse(2, 1700));
        assert!(link.is_connected());

        assert_eq!(
            mock.sent_lines(),
            vec!["P\n", "W 2 1500\n", "W 2 1600\n", "W 2 1700\n"]
        );
    }

    #[test]
    fn test_io_failure_disconnects() {
        let link: SerialLink<MockTransport> = SerialLink::new();
        let mock = MockTransport::default();
        mock.push_reply("PONG");
        link.attach(mock.clone(), "mock0").unwrap();

        mock.push_error(io::ErrorKind::BrokenPipe);
        assert!(!link.write_pulse(0, 1500));
        assert_eq!(link.state(), LinkState::Disconnected);

        // Once disconnected every command is a quiet no-op
        assert!(!link.release_all());
        assert!(!link.ping());
    }

    #[test]
    fn test_pulse_and_angle_clamping() {
        let link: SerialLink<MockTransport> = SerialLink::new();
        let mock = MockTransport::answering_ok();
        link.attach(mock.clone(), "mock0").unwrap();

        assert!(link.write_pulse(1, 5000));
        assert!(link.set_angle(1, 400));

        assert_eq!(
            mock.sent_lines(),
            vec!["P\n", "W 1 3000\n", "S 1 180\n"]
        );
    }

    #[test]
    fn test_release_commands() {
        let link: SerialLink<MockTransport> = SerialLink::new();
        let mock = MockTransport::answering_ok();
        link.attach(mock.clone(), "mock0").unwrap();

        assert!(link.release_channel(4));
        assert!(link.release_all());
        assert_eq!(mock.sent_lines(), vec!["P\n", "R 4\n", "X\n"]);
    }
}
