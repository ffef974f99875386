//! Fixed-rate sender loop
//!
//! A background thread that drains the servo state's pending diffs through
//! the serial link at a fixed cadence. It is the sole writer to the hardware
//! and always re-reads the flattened current-target table, so concurrent
//! motion commands can never produce stale or out-of-order hardware writes.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, trace, warn};

// Internal
use crate::serial::{transport::Transport, SerialLink};
use crate::servo_state::ServoState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Send cycle period (about 30 Hz).
pub const SEND_CYCLE: Duration = Duration::from_millis(33);

/// Spacing between per-channel writes within one cycle, keeping the board's
/// input buffer from saturating.
pub const INTER_CHANNEL_DELAY: Duration = Duration::from_millis(2);

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Handle onto the running sender thread.
pub struct SenderLoop {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SenderLoop {
    /// Spawn the sender thread over the given link and state.
    ///
    /// The thread runs until [`SenderLoop::stop`] is called or the link
    /// leaves the connected state.
    pub fn start<T: Transport + 'static>(link: Arc<SerialLink<T>>, state: ServoState) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_t = stop.clone();

        let handle = thread::Builder::new()
            .name("sender_loop".into())
            .spawn(move || run(link, state, stop_t))
            .ok();

        if handle.is_none() {
            warn!("Could not spawn the sender loop thread");
        }

        Self { stop, handle }
    }

    /// True while the sender thread is alive.
    pub fn is_running(&self) -> bool {
        match self.handle {
            Some(ref h) => !h.is_finished(),
            None => false,
        }
    }

    /// Stop the thread and join it.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);

        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Body of the sender thread.
fn run<T: Transport>(link: Arc<SerialLink<T>>, state: ServoState, stop: Arc<AtomicBool>) {
    debug!("Sender loop started");

    while !stop.load(Ordering::Relaxed) {
        let cycle_start = Instant::now();

        if !link.is_connected() {
            debug!("Link no longer connected, sender loop exiting");
            break;
        }

        for (channel, pulse_us) in state.pending_updates() {
            if stop.load(Ordering::Relaxed) {
                break;
            }

            if link.write_pulse(channel, pulse_us) {
                state.mark_sent(channel, pulse_us);
                trace!("Channel {} -> {} us", channel, pulse_us);
            } else {
                // Left pending, retried on the next cycle
                warn!("Write to channel {} not acknowledged", channel);
            }

            thread::sleep(INTER_CHANNEL_DELAY);
        }

        // Sleep out the remainder of the cycle budget
        let elapsed = cycle_start.elapsed();
        if elapsed < SEND_CYCLE {
            thread::sleep(SEND_CYCLE - elapsed);
        }
    }

    debug!("Sender loop stopped");
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::serial::transport::mock::MockTransport;

    fn connected_link(mock: &MockTransport) -> Arc<SerialLink<MockTransport>> {
        let link = Arc::new(SerialLink::new());
        link.attach(mock.clone(), "mock0").unwrap();
        link
    }

    #[test]
    fn test_drains_pending_and_marks_sent() {
        let mock = MockTransport::answering_ok();
        let link = connected_link(&mock);
        let state = ServoState::new();

        state.update(0, 1500);
        state.update(1, 2000);

        let sender = SenderLoop::start(link, state.clone());
        thread::sleep(Duration::from_millis(100));
        sender.stop();

        assert!(state.pending_updates().is_empty());

        let sent = mock.sent_lines();
        assert!(sent.contains(&"W 0 1500\n".to_string()), "sent: {:?}", sent);
        assert!(sent.contains(&"W 1 2000\n".to_string()), "sent: {:?}", sent);
    }

    #[test]
    fn test_unacknowledged_channel_stays_pending_and_is_retried() {
        let mock = MockTransport::default();
        mock.push_reply("PONG");
        let link = connected_link(&mock);
        let state = ServoState::new();

        state.update(3, 1200);

        // First attempt gets garbage, later attempts succeed
        mock.push_reply("NOPE");
        mock.set_fallback(Some("OK"));

        let sender = SenderLoop::start(link, state.clone());
        thread::sleep(Duration::from_millis(150));
        sender.stop();

        assert!(state.pending_updates().is_empty());

        // The same line went out at least twice
        let writes = mock
            .sent_lines()
            .iter()
            .filter(|l| l.as_str() == "W 3 1200\n")
            .count();
        assert!(writes >= 2, "writes: {}", writes);
    }

    #[test]
    fn test_quiet_when_nothing_pending() {
        let mock = MockTransport::answering_ok();
        let link = connected_link(&mock);
        let state = ServoState::new();

        state.update(5, 1000);
        state.mark_sent(5, 1000);

        let sender = SenderLoop::start(link, state);
        thread::sleep(Duration::from_millis(80));
        sender.stop();

        // Only the handshake ping went out
        assert_eq!(mock.sent_lines(), vec!["P\n"]);
    }

    #[test]
    fn test_exits_when_link_drops() {
        let mock = MockTransport::answering_ok();
        let link = connected_link(&mock);
        let state = ServoState::new();

        let sender = SenderLoop::start(link.clone(), state);
        assert!(sender.is_running());

        link.disconnect();
        thread::sleep(Duration::from_millis(100));
        assert!(!sender.is_running());

        sender.stop();
    }
}
