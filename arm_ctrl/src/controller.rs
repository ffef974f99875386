//! Robot controller facade
//!
//! Composes the arm configuration table, IK solver, pulse mapper, servo
//! state, motion planner, serial link and sender loop behind the small set
//! of operations used by everything outside the core.
//!
//! In steady state hardware failures never cross this API as errors: they
//! degrade to boolean or struct signals so the control loop keeps running.
//! Only `connect` surfaces a hard failure.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{info, warn};
use nalgebra::Point3;
use serde::Serialize;

// Internal
use crate::arm_config::{Arm, ArmModel, ConfigError, JointId, MinPos};
use crate::ik::{self, IkResult};
use crate::motion::MotionPlanner;
use crate::params::ArmCtrlParams;
use crate::pulse_map::kinematic_to_pulse;
use crate::sender::SenderLoop;
use crate::serial::transport::{SerialTransport, Transport};
use crate::serial::{LinkError, SerialLink};
use crate::servo_state::ServoState;
use crate::{Channel, PulseUs};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Duration of the home and zero moves.
///
/// Units: seconds
pub const HOME_MOVE_DURATION_S: f64 = 2.0;

/// Duration of a gripper open/close move.
///
/// Units: seconds
pub const GRIP_MOVE_DURATION_S: f64 = 0.5;

/// Grace added on top of a move's duration when blocking for completion.
const MOVE_WAIT_GRACE: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The controller facade over one or two arms on a single board.
pub struct RobotController<T: Transport = SerialTransport> {
    params: ArmCtrlParams,

    state: ServoState,

    planner: MotionPlanner,

    link: Arc<SerialLink<T>>,

    /// The sender loop handle, present while connected.
    sender: Option<SenderLoop>,
}

/// Outcome of a position move request.
#[derive(Debug, Clone, Serialize)]
pub struct MoveResult {
    /// True if the motion was started (and, for waited moves, completed).
    pub success: bool,

    /// The resolved per-channel pulse targets.
    pub targets: Vec<(Channel, PulseUs)>,

    /// Base yaw toward the target.
    ///
    /// Units: degrees
    pub yaw_deg: f64,

    /// True if the solution satisfies exact reach within joint limits;
    /// false marks a best-effort Pointing move.
    pub valid: bool,
}

/// Status report for the controller.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub connected: bool,

    pub port: Option<String>,

    pub sender_running: bool,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl RobotController<SerialTransport> {
    /// Connect to the board on the configured serial port and start the
    /// sender loop.
    pub fn connect(&mut self) -> Result<(), LinkError> {
        if self.link.is_connected() {
            return Ok(());
        }

        self.link
            .connect(&self.params.serial_port, self.params.baud_rate)?;
        self.start_sender();

        info!("Connected to {}", self.params.serial_port);
        Ok(())
    }
}

impl<T: Transport + 'static> RobotController<T> {
    /// Build a controller from validated parameters.
    pub fn new(params: ArmCtrlParams) -> Result<Self, ConfigError> {
        params.left_arm.validate()?;
        if let Some(ref right) = params.right_arm {
            right.validate()?;
        }

        let state = ServoState::new();

        Ok(Self {
            params,
            planner: MotionPlanner::new(state.clone()),
            state,
            link: Arc::new(SerialLink::new()),
            sender: None,
        })
    }

    /// Run the handshake over an already-opened transport and start the
    /// sender loop. Used by tests and by callers that manage ports
    /// themselves.
    pub fn attach_transport(&mut self, transport: T, port_name: &str) -> Result<(), LinkError> {
        self.link.attach(transport, port_name)?;
        self.start_sender();
        Ok(())
    }

    /// Stop the sender loop and close the link.
    pub fn disconnect(&mut self) {
        self.planner.stop();

        if let Some(sender) = self.sender.take() {
            sender.stop();
        }
        self.link.disconnect();

        info!("Disconnected");
    }

    /// Solve IK for a workspace target without moving.
    ///
    /// Returns `None` only if the requested arm is not configured.
    pub fn solve(
        &self,
        x: f64,
        y: f64,
        z: f64,
        arm: Arm,
        orientation_deg: Option<f64>,
    ) -> Option<IkResult> {
        self.model(arm)
            .map(|model| ik::solve(model, Point3::new(x, y, z), orientation_deg))
    }

    /// Move a set of channels to raw pulse targets over `duration_s`.
    ///
    /// With `wait` set, blocks until the interpolation completes and returns
    /// whether it did; otherwise returns true immediately.
    pub fn move_to_pulses(
        &mut self,
        targets: &[(Channel, PulseUs)],
        duration_s: f64,
        wait: bool,
    ) -> bool {
        if targets.is_empty() {
            return true;
        }

        self.planner.move_to(targets, duration_s, None);

        if wait {
            self.planner
                .wait(Duration::from_secs_f64(duration_s.max(0.0)) + MOVE_WAIT_GRACE)
        } else {
            true
        }
    }

    /// Solve IK for a workspace target and move the arm to the best
    /// solution.
    ///
    /// An unreachable target still produces a best-effort move toward it,
    /// marked by `valid = false` in the result.
    pub fn move_to_position(
        &mut self,
        x: f64,
        y: f64,
        z: f64,
        arm: Arm,
        duration_s: f64,
        orientation_deg: Option<f64>,
    ) -> MoveResult {
        let result = match self.solve(x, y, z, arm, orientation_deg) {
            Some(r) => r,
            None => {
                warn!("Arm {:?} is not configured", arm);
                return MoveResult {
                    success: false,
                    targets: Vec::new(),
                    yaw_deg: 0.0,
                    valid: false,
                };
            }
        };

        if !result.is_reachable {
            warn!(
                "Target ({:.1}, {:.1}, {:.1}) unreachable, moving best-effort",
                x, y, z
            );
        }

        let targets = match result.best {
            Some(ref best) => self.solution_to_pulses(arm, best),
            None => Vec::new(),
        };

        let success = !targets.is_empty() && self.move_to_pulses(&targets, duration_s, true);

        MoveResult {
            success,
            targets,
            yaw_deg: result.yaw_deg,
            valid: result.is_reachable,
        }
    }

    /// Move every configured joint to its home pulse.
    ///
    /// History is cleared first so the full set is guaranteed to be re-sent.
    pub fn go_home(&mut self) -> bool {
        self.state.clear_history();

        let targets: Vec<(Channel, PulseUs)> = self
            .arms()
            .iter()
            .flat_map(|(_, model)| model.joints())
            .map(|(_, joint)| (joint.channel, joint.home_pulse_us))
            .collect();

        self.move_to_pulses(&targets, HOME_MOVE_DURATION_S, true)
    }

    /// Move every configured joint to its logical zero pulse.
    ///
    /// History is cleared first so the full set is guaranteed to be re-sent.
    pub fn go_zero(&mut self) -> bool {
        self.state.clear_history();

        let targets: Vec<(Channel, PulseUs)> = self
            .arms()
            .iter()
            .flat_map(|(_, model)| model.joints())
            .map(|(_, joint)| (joint.channel, joint.zero_pulse_us))
            .collect();

        self.move_to_pulses(&targets, HOME_MOVE_DURATION_S, true)
    }

    /// Open the gripper of the given arm.
    pub fn open_gripper(&mut self, arm: Arm) -> bool {
        self.move_gripper(arm, true)
    }

    /// Close the gripper of the given arm.
    pub fn close_gripper(&mut self, arm: Arm) -> bool {
        self.move_gripper(arm, false)
    }

    /// Emergency stop: cancel any in-flight motion, release every channel,
    /// and clear the send history so a later reconnect re-sends everything.
    ///
    /// Unconditionally safe to call, including while disconnected.
    pub fn release_all(&mut self) {
        self.planner.stop();

        if !self.link.release_all() {
            // Disconnected or unacknowledged, nothing held on the hardware
            // side that we can affect
            warn!("Release-all was not acknowledged by the board");
        }

        self.state.clear_history();
        info!("All channels released");
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    pub fn get_status(&self) -> ControllerStatus {
        ControllerStatus {
            connected: self.link.is_connected(),
            port: self.link.port_name(),
            sender_running: self.sender.as_ref().map(|s| s.is_running()).unwrap_or(false),
        }
    }

    // ---- PRIVATE ----

    fn start_sender(&mut self) {
        self.sender = Some(SenderLoop::start(self.link.clone(), self.state.clone()));
    }

    fn model(&self, arm: Arm) -> Option<&ArmModel> {
        match arm {
            Arm::Left => Some(&self.params.left_arm),
            Arm::Right => self.params.right_arm.as_ref(),
        }
    }

    fn arms(&self) -> Vec<(Arm, &ArmModel)> {
        let mut arms = vec![(Arm::Left, &self.params.left_arm)];
        if let Some(ref right) = self.params.right_arm {
            arms.push((Arm::Right, right));
        }
        arms
    }

    /// Map a solution's kinematic angles onto per-channel pulses.
    fn solution_to_pulses(&self, arm: Arm, solution: &crate::ik::IkSolution) -> Vec<(Channel, PulseUs)> {
        let model = match self.model(arm) {
            Some(m) => m,
            None => return Vec::new(),
        };

        solution
            .joint_angles_deg
            .iter()
            .filter_map(|&(id, angle_deg)| {
                model
                    .joint(id)
                    .map(|cfg| (cfg.channel, kinematic_to_pulse(angle_deg, cfg)))
            })
            .collect()
    }

    fn move_gripper(&mut self, arm: Arm, open: bool) -> bool {
        let (channel, pulse_us) = match self.model(arm).and_then(|m| m.gripper.as_ref()) {
            Some(cfg) => {
                // The min_pos polarity tells us which end of the pulse range
                // is the open pose
                let open_at_min = cfg.min_pos == MinPos::Open;
                let pulse = if open == open_at_min {
                    cfg.pulse_min_us
                } else {
                    cfg.pulse_max_us
                };
                (cfg.channel, pulse)
            }
            None => {
                warn!("Arm {:?} has no gripper configured", arm);
                return false;
            }
        };

        self.move_to_pulses(&[(channel, pulse_us)], GRIP_MOVE_DURATION_S, true)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::arm_config::JointConfig;
    use crate::serial::transport::mock::MockTransport;
    use std::thread;

    fn joint(channel: u8, link_mm: f64, home_pulse_us: PulseUs) -> JointConfig {
        JointConfig {
            channel,
            pulse_min_us: 500,
            pulse_max_us: 2500,
            zero_offset_deg: 135.0,
            actuation_range_deg: 270,
            min_pos: MinPos::Bottom,
            link_length_mm: link_mm,
            home_pulse_us,
            zero_pulse_us: 1500,
        }
    }

    fn params() -> ArmCtrlParams {
        let mut gripper = joint(3, 0.0, 1000);
        gripper.min_pos = MinPos::Open;

        ArmCtrlParams {
            serial_port: "/dev/null".into(),
            baud_rate: 115200,
            left_arm: ArmModel {
                base_position_mm: nalgebra::Point2::new(0.0, 0.0),
                base_yaw: joint(0, 107.0, 1400),
                shoulder: joint(1, 105.0, 1600),
                elbow: joint(2, 150.0, 1700),
                wrist_pitch: None,
                wrist_roll: None,
                gripper: Some(gripper),
            },
            right_arm: None,
        }
    }

    fn controller() -> RobotController<MockTransport> {
        RobotController::new(params()).unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_model() {
        let mut p = params();
        p.left_arm.elbow.pulse_min_us = 2500;
        p.left_arm.elbow.pulse_max_us = 500;
        assert!(RobotController::<MockTransport>::new(p).is_err());
    }

    #[test]
    fn test_status_tracks_connection() {
        let mut ctrl = controller();

        let status = ctrl.get_status();
        assert!(!status.connected);
        assert!(!status.sender_running);
        assert!(status.port.is_none());

        ctrl.attach_transport(MockTransport::answering_ok(), "mock0")
            .unwrap();
        let status = ctrl.get_status();
        assert!(status.connected);
        assert!(status.sender_running);
        assert_eq!(status.port.as_deref(), Some("mock0"));

        ctrl.disconnect();
        let status = ctrl.get_status();
        assert!(!status.connected);
        assert!(!status.sender_running);
    }

    #[test]
    fn test_move_to_position_reaches_hardware() {
        let mut ctrl = controller();
        let mock = MockTransport::answering_ok();
        ctrl.attach_transport(mock.clone(), "mock0").unwrap();

        let result = ctrl.move_to_position(200.0, 0.0, 50.0, Arm::Left, 0.2, None);
        assert!(result.success);
        assert!(result.valid);
        assert_eq!(result.targets.len(), 3);

        // Let the sender drain the final waypoints
        thread::sleep(Duration::from_millis(150));
        assert!(ctrl.state.pending_updates().is_empty());

        // Every resolved channel made it onto the wire
        let sent = mock.sent_lines().join("");
        for &(ch, pulse) in result.targets.iter() {
            assert!(
                sent.contains(&format!("W {} {}\n", ch, pulse)),
                "missing channel {} pulse {}",
                ch,
                pulse
            );
        }

        ctrl.disconnect();
    }

    #[test]
    fn test_move_to_position_unknown_arm_fails() {
        let mut ctrl = controller();
        let result = ctrl.move_to_position(100.0, 0.0, 50.0, Arm::Right, 0.1, None);
        assert!(!result.success);
        assert!(!result.valid);
        assert!(result.targets.is_empty());
    }

    #[test]
    fn test_unreachable_target_is_marked_best_effort() {
        let mut ctrl = controller();
        let result = ctrl.move_to_position(1000.0, 0.0, 50.0, Arm::Left, 0.1, None);

        // The move happens but is flagged invalid
        assert!(result.success);
        assert!(!result.valid);
        assert!(!result.targets.is_empty());
    }

    #[test]
    fn test_go_home_clears_history_and_targets_home_pulses() {
        let mut ctrl = controller();

        // Pretend everything was already sent
        ctrl.state.update(0, 1400);
        ctrl.state.mark_sent(0, 1400);

        assert!(ctrl.go_home());

        // Home pulses are targeted and everything is pending again,
        // including the channel whose target did not change
        assert_eq!(ctrl.state.get_target(0), Some(1400));
        assert_eq!(ctrl.state.get_target(1), Some(1600));
        assert_eq!(ctrl.state.get_target(2), Some(1700));
        assert_eq!(ctrl.state.get_target(3), Some(1000));
        assert_eq!(ctrl.state.pending_updates().len(), 4);
    }

    #[test]
    fn test_go_zero_targets_zero_pulses() {
        let mut ctrl = controller();
        assert!(ctrl.go_zero());

        for ch in 0..4 {
            assert_eq!(ctrl.state.get_target(ch), Some(1500));
        }
    }

    #[test]
    fn test_gripper_uses_min_pos_polarity() {
        let mut ctrl = controller();

        // min_pos == Open: open is the minimum pulse
        assert!(ctrl.open_gripper(Arm::Left));
        assert_eq!(ctrl.state.get_target(3), Some(500));

        assert!(ctrl.close_gripper(Arm::Left));
        assert_eq!(ctrl.state.get_target(3), Some(2500));

        // No gripper on an unconfigured arm
        assert!(!ctrl.open_gripper(Arm::Right));
    }

    #[test]
    fn test_release_all_safe_when_disconnected() {
        let mut ctrl = controller();
        ctrl.state.update(1, 1800);
        ctrl.state.mark_sent(1, 1800);

        ctrl.release_all();
        assert_eq!(ctrl.state.pending_updates(), vec![(1, 1800)]);
    }

    #[test]
    fn test_release_all_sends_release_command() {
        let mut ctrl = controller();
        let mock = MockTransport::answering_ok();
        ctrl.attach_transport(mock.clone(), "mock0").unwrap();

        ctrl.release_all();
        assert!(mock.sent_lines().contains(&"X\n".to_string()));

        ctrl.disconnect();
    }
}
