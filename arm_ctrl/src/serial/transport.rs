//! Transport abstraction for the serial link
//!
//! The [`Transport`] trait is the seam between the protocol logic and the
//! physical port, so the link can be exercised against a scripted mock in
//! tests. The production implementation wraps a `serialport` handle.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A bidirectional line transport to the controller board.
pub trait Transport: Send {
    /// Send one newline-terminated line.
    fn send_line(&mut self, line: &str) -> io::Result<()>;

    /// Receive one line, waiting at most `timeout`. The returned line has its
    /// trailing newline (and any carriage return) stripped.
    fn recv_line(&mut self, timeout: Duration) -> io::Result<String>;

    /// Discard any buffered input.
    fn discard_input(&mut self) -> io::Result<()>;
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Production transport over a physical serial port.
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SerialTransport {
    /// Open the named port at the given baud rate.
    pub fn open(port_name: &str, baud_rate: u32) -> serialport::Result<Self> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(Duration::from_millis(100))
            .open()?;

        Ok(Self { port })
    }
}

impl Transport for SerialTransport {
    fn send_line(&mut self, line: &str) -> io::Result<()> {
        self.port.write_all(line.as_bytes())?;
        self.port.flush()
    }

    fn recv_line(&mut self, timeout: Duration) -> io::Result<String> {
        self.port.set_timeout(timeout).map_err(io::Error::from)?;

        // Read byte-wise up to the newline, bounded by an overall deadline so
        // a trickle of garbage cannot hold us here past the timeout
        let deadline = Instant::now() + timeout;
        let mut line = Vec::new();
        let mut byte = [0u8; 1];

        loop {
            match self.port.read(&mut byte) {
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(_) => {
                    if byte[0] == b'\n' {
                        break;
                    }
                    line.push(byte[0]);
                }
                Err(e) => return Err(e),
            }

            if Instant::now() >= deadline {
                return Err(io::ErrorKind::TimedOut.into());
            }
        }

        if line.last() == Some(&b'\r') {
            line.pop();
        }

        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::from)
    }
}

// ---------------------------------------------------------------------------
// MOCK (tests only)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Scripted transport recording every sent line.
    ///
    /// Replies are popped from a queue; when the queue is empty the fallback
    /// reply function is consulted with the offending line.
    #[derive(Clone, Default)]
    pub struct MockTransport {
        inner: Arc<Mutex<MockInner>>,
    }

    #[derive(Default)]
    struct MockInner {
        sent: Vec<String>,
        replies: VecDeque<io::Result<String>>,
        /// Reply used once the scripted queue is drained, `None` simulates a
        /// receive timeout.
        fallback: Option<String>,
    }

    impl MockTransport {
        /// Mock which answers the handshake ping and then every command with
        /// the standard acknowledgement.
        pub fn answering_ok() -> Self {
            let mock = Self::default();
            mock.push_reply("PONG");
            mock.set_fallback(Some("OK"));
            mock
        }

        pub fn push_reply(&self, line: &str) {
            self.lock().replies.push_back(Ok(line.to_string()));
        }

        pub fn push_error(&self, kind: io::ErrorKind) {
            self.lock().replies.push_back(Err(kind.into()));
        }

        pub fn set_fallback(&self, line: Option<&str>) {
            self.lock().fallback = line.map(str::to_string);
        }

        pub fn sent_lines(&self) -> Vec<String> {
            self.lock().sent.clone()
        }

        fn lock(&self) -> std::sync::MutexGuard<MockInner> {
            self.inner.lock().unwrap_or_else(|e| e.into_inner())
        }
    }

    impl Transport for MockTransport {
        fn send_line(&mut self, line: &str) -> io::Result<()> {
            self.lock().sent.push(line.to_string());
            Ok(())
        }

        fn recv_line(&mut self, _timeout: Duration) -> io::Result<String> {
            let mut inner = self.lock();

            match inner.replies.pop_front() {
                Some(reply) => reply,
                None => match inner.fallback {
                    Some(ref line) => Ok(line.clone()),
                    None => Err(io::ErrorKind::TimedOut.into()),
                },
            }
        }

        fn discard_input(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
