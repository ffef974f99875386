//! Interpolated motion planning
//!
//! A motion task linearly interpolates each channel from its current target
//! to the requested pulse over the demanded duration, writing waypoints into
//! the shared [`ServoState`] at a fixed internal granularity. Only one task
//! is ever active per planner; a new move cancels and joins the old task
//! first.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, warn};

// Internal
use crate::servo_state::ServoState;
use crate::{Channel, PulseUs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Interval between interpolation steps (50 Hz internal granularity).
pub const UPDATE_INTERVAL: Duration = Duration::from_millis(20);

/// Bound on how long a cancelled task is waited for before being detached.
pub const TASK_JOIN_TIMEOUT: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// TYPES
// ---------------------------------------------------------------------------

/// Callback invoked when a motion completes without being cancelled.
pub type OnComplete = Box<dyn FnOnce() + Send + 'static>;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Generates time-interpolated pulse waypoints into a [`ServoState`].
pub struct MotionPlanner {
    state: ServoState,

    update_interval: Duration,

    /// The in-flight task, if any. Superseded by the next move.
    task: Option<MotionTask>,
}

/// Handle onto one spawned interpolation thread.
struct MotionTask {
    cancel: Arc<AtomicBool>,

    /// Completion flag plus condvar so waiters can block with a timeout.
    done: Arc<(Mutex<bool>, Condvar)>,

    handle: JoinHandle<()>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl MotionPlanner {
    pub fn new(state: ServoState) -> Self {
        Self::with_interval(state, UPDATE_INTERVAL)
    }

    /// Create a planner with a non-default step interval, used by tests to
    /// speed up interpolation.
    pub fn with_interval(state: ServoState, update_interval: Duration) -> Self {
        Self {
            state,
            update_interval,
            task: None,
        }
    }

    /// Start a move towards the given channel targets over `duration_s`
    /// seconds.
    ///
    /// Any in-flight task is cancelled and joined (bounded) first. Each
    /// channel starts from its current [`ServoState`] target, falling back to
    /// the requested pulse if it has never been commanded. A duration at or
    /// below one update interval collapses to a single step.
    pub fn move_to(
        &mut self,
        targets: &[(Channel, PulseUs)],
        duration_s: f64,
        on_complete: Option<OnComplete>,
    ) {
        // Only one task per planner
        self.stop();

        let spans: Vec<(Channel, f64, PulseUs)> = targets
            .iter()
            .map(|&(ch, pulse)| {
                let start = self.state.get_target(ch).unwrap_or(pulse);
                (ch, start as f64, pulse)
            })
            .collect();

        let interval_s = self.update_interval.as_secs_f64();
        let steps = ((duration_s / interval_s) as u64).max(1);

        debug!(
            "Starting motion: {} channel(s), {:.2} s, {} step(s)",
            spans.len(),
            duration_s,
            steps
        );

        let cancel = Arc::new(AtomicBool::new(false));
        let done = Arc::new((Mutex::new(false), Condvar::new()));

        let state = self.state.clone();
        let update_interval = self.update_interval;
        let cancel_t = cancel.clone();
        let done_t = done.clone();

        let handle = thread::spawn(move || {
            run_interpolation(
                state,
                spans,
                steps,
                update_interval,
                cancel_t,
                on_complete,
            );

            let (lock, cvar) = &*done_t;
            *lock.lock().unwrap_or_else(|e| e.into_inner()) = true;
            cvar.notify_all();
        });

        self.task = Some(MotionTask {
            cancel,
            done,
            handle,
        });
    }

    /// Cancel the in-flight task, if any, and join it with a bounded timeout.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.cancel.store(true, Ordering::Relaxed);

            if !task.join_timeout(TASK_JOIN_TIMEOUT) {
                warn!("Motion task did not stop within the join timeout");
            }
        }
    }

    /// Block until the in-flight task finishes or the timeout elapses.
    ///
    /// Returns true if the task finished (or none was running).
    pub fn wait(&mut self, timeout: Duration) -> bool {
        match self.task.take() {
            Some(task) => {
                if task.wait_done(timeout) {
                    let _ = task.handle.join();
                    true
                } else {
                    // Still running, keep the handle
                    self.task = Some(task);
                    false
                }
            }
            None => true,
        }
    }

    /// True while an interpolation task is running.
    pub fn is_moving(&self) -> bool {
        match self.task {
            Some(ref task) => !task.is_done(),
            None => false,
        }
    }
}

impl MotionTask {
    fn is_done(&self) -> bool {
        *self.done.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait for the task to signal completion, up to `timeout`, without
    /// joining the thread.
    fn wait_done(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (lock, cvar) = &*self.done;

        let mut done = lock.lock().unwrap_or_else(|e| e.into_inner());
        while !*done {
            let now = Instant::now();
            if now >= deadline {
                break;
            }

            let (guard, _) = cvar
                .wait_timeout(done, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            done = guard;
        }

        *done
    }

    /// Wait for the task to finish, up to `timeout`. Returns true and joins
    /// the thread on completion; otherwise the thread is left detached.
    fn join_timeout(self, timeout: Duration) -> bool {
        let finished = self.wait_done(timeout);

        if finished {
            // Thread has signalled completion, the join cannot block for long
            let _ = self.handle.join();
        }

        finished
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Body of the interpolation thread.
fn run_interpolation(
    state: ServoState,
    spans: Vec<(Channel, f64, PulseUs)>,
    steps: u64,
    update_interval: Duration,
    cancel: Arc<AtomicBool>,
    on_complete: Option<OnComplete>,
) {
    for step in 1..=steps {
        if cancel.load(Ordering::Relaxed) {
            debug!("Motion cancelled at step {}/{}", step, steps);
            return;
        }

        let t = step as f64 / steps as f64;

        for &(ch, start, end) in spans.iter() {
            let pulse = (start + (end as f64 - start) * t).round();
            state.update(ch, pulse as PulseUs);
        }

        thread::sleep(update_interval);
    }

    // Remove interpolation rounding drift by writing the exact targets
    for &(ch, _, end) in spans.iter() {
        state.update(ch, end);
    }

    if let Some(callback) = on_complete {
        callback();
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    /// Planner with a 5 ms step so tests stay fast.
    fn planner() -> (ServoState, MotionPlanner) {
        let state = ServoState::new();
        let planner = MotionPlanner::with_interval(state.clone(), Duration::from_millis(5));
        (state, planner)
    }

    #[test]
    fn test_monotonic_interpolation() {
        let (state, mut planner) = planner();
        state.update(0, 500);
        state.mark_sent(0, 500);

        planner.move_to(&[(0, 2500)], 0.2, None);

        // Sampled targets never decrease
        let mut last = 500;
        for _ in 0..10 {
            thread::sleep(Duration::from_millis(20));
            let sample = state.get_target(0).unwrap();
            assert!(sample >= last, "{} < {}", sample, last);
            last = sample;
        }

        assert!(planner.wait(Duration::from_secs(2)));
        // Exact target after completion, no rounding drift
        assert_eq!(state.get_target(0), Some(2500));
        assert!(!planner.is_moving());
    }

    #[test]
    fn test_instant_jump_for_short_duration() {
        let (state, mut planner) = planner();
        state.update(2, 1000);

        // Duration below one interval collapses to a single step
        planner.move_to(&[(2, 2000)], 0.001, None);
        assert!(planner.wait(Duration::from_secs(1)));
        assert_eq!(state.get_target(2), Some(2000));
    }

    #[test]
    fn test_stop_leaves_last_written_pulse() {
        let (state, mut planner) = planner();
        state.update(1, 500);

        planner.move_to(&[(1, 2500)], 1.0, None);
        thread::sleep(Duration::from_millis(100));
        planner.stop();
        assert!(!planner.is_moving());

        // No rollback: the state holds whatever was last interpolated
        let held = state.get_target(1).unwrap();
        assert!(held > 500 && held < 2500, "held {}", held);

        let settled = state.get_target(1).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(state.get_target(1), Some(settled));
    }

    #[test]
    fn test_new_move_supersedes_running_one() {
        let (state, mut planner) = planner();
        state.update(3, 500);

        planner.move_to(&[(3, 2500)], 5.0, None);
        thread::sleep(Duration::from_millis(30));

        // Second move starts from wherever the first got to
        planner.move_to(&[(3, 600)], 0.05, None);
        assert!(planner.wait(Duration::from_secs(1)));
        assert_eq!(state.get_target(3), Some(600));
    }

    #[test]
    fn test_on_complete_runs_after_exact_write() {
        let (state, mut planner) = planner();
        state.update(4, 1000);

        let seen = Arc::new(Mutex::new(None));
        let seen_cb = seen.clone();
        let state_cb = state.clone();

        planner.move_to(
            &[(4, 1800)],
            0.05,
            Some(Box::new(move || {
                *seen_cb.lock().unwrap() = state_cb.get_target(4);
            })),
        );

        assert!(planner.wait(Duration::from_secs(1)));
        assert_eq!(*seen.lock().unwrap(), Some(1800));
    }

    #[test]
    fn test_fallback_start_is_requested_target() {
        let (state, mut planner) = planner();

        // Channel never commanded: the start snapshot falls back to the
        // requested pulse, so the first step already writes it
        planner.move_to(&[(9, 1450)], 0.02, None);
        assert!(planner.wait(Duration::from_secs(1)));
        assert_eq!(state.get_target(9), Some(1450));
    }
}
