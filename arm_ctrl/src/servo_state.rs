//! Thread-safe servo state table
//!
//! Tracks per-channel target and last-sent pulse widths. Motion tasks write
//! targets from their own threads while the sender loop diffs and drains the
//! table; a single internal lock covers both maps so every operation is
//! atomic.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{Channel, PulseUs};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Shared per-channel pulse state.
///
/// Cloning is cheap and yields a handle onto the same underlying table.
#[derive(Clone, Default)]
pub struct ServoState {
    inner: Arc<Mutex<StateMaps>>,
}

#[derive(Default)]
struct StateMaps {
    /// Most recently demanded pulse per channel.
    target: BTreeMap<Channel, PulseUs>,

    /// Pulse last acknowledged by the board per channel.
    last_sent: BTreeMap<Channel, PulseUs>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ServoState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the target pulse for a channel.
    pub fn update(&self, channel: Channel, pulse_us: PulseUs) {
        self.lock().target.insert(channel, pulse_us);
    }

    /// All channels whose target differs from the last-sent value, or which
    /// have never been sent.
    pub fn pending_updates(&self) -> Vec<(Channel, PulseUs)> {
        let maps = self.lock();

        maps.target
            .iter()
            .filter(|(ch, pulse)| maps.last_sent.get(ch) != Some(pulse))
            .map(|(ch, pulse)| (*ch, *pulse))
            .collect()
    }

    /// Record a pulse as acknowledged by the board.
    pub fn mark_sent(&self, channel: Channel, pulse_us: PulseUs) {
        self.lock().last_sent.insert(channel, pulse_us);
    }

    /// Wipe all last-sent records, forcing every current target to be re-sent
    /// on the next diff. Used after emergency stop or a forced resync.
    pub fn clear_history(&self) {
        self.lock().last_sent.clear();
    }

    /// The current target pulse for a channel, if one has been set.
    pub fn get_target(&self, channel: Channel) -> Option<PulseUs> {
        self.lock().target.get(&channel).copied()
    }

    /// Take the lock, recovering the data if a writer panicked while holding
    /// it.
    fn lock(&self) -> MutexGuard<StateMaps> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_pending_diff() {
        let state = ServoState::new();

        // A fresh target is pending
        state.update(3, 1500);
        assert_eq!(state.pending_updates(), vec![(3, 1500)]);
        assert_eq!(state.get_target(3), Some(1500));

        // Acknowledged targets are not pending
        state.mark_sent(3, 1500);
        assert!(state.pending_updates().is_empty());

        // Re-demanding the same pulse stays quiet
        state.update(3, 1500);
        assert!(state.pending_updates().is_empty());

        // A different pulse is pending again
        state.update(3, 1600);
        assert_eq!(state.pending_updates(), vec![(3, 1600)]);
    }

    #[test]
    fn test_clear_history_forces_resend() {
        let state = ServoState::new();

        state.update(0, 900);
        state.update(7, 2100);
        state.mark_sent(0, 900);
        state.mark_sent(7, 2100);
        assert!(state.pending_updates().is_empty());

        state.clear_history();
        assert_eq!(state.pending_updates(), vec![(0, 900), (7, 2100)]);
    }

    #[test]
    fn test_clone_shares_table() {
        let state = ServoState::new();
        let handle = state.clone();

        handle.update(5, 1234);
        assert_eq!(state.get_target(5), Some(1234));
    }
}
