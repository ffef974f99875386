//! Joint and arm configuration model
//!
//! All configuration is resolved into these typed structures once at load
//! time. The hot paths (IK, pulse mapping, the sender loop) never look values
//! up dynamically or apply defaults themselves.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

// Internal
use crate::{Channel, PulseUs};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Default minimum pulse width for a standard hobby servo.
pub const DEFAULT_PULSE_MIN_US: PulseUs = 500;

/// Default maximum pulse width for a standard hobby servo.
pub const DEFAULT_PULSE_MAX_US: PulseUs = 2500;

/// Default servo actuation range in degrees.
pub const DEFAULT_ACTUATION_RANGE_DEG: u16 = 180;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Identifies one of the controller's arms.
#[derive(Serialize, Deserialize, Debug, Hash, Eq, PartialEq, Copy, Clone)]
#[serde(rename_all = "lowercase")]
pub enum Arm {
    Left,
    Right,
}

/// IDs of the joints making up an arm chain, in chain order.
#[derive(Serialize, Deserialize, Debug, Hash, Eq, PartialEq, Copy, Clone)]
pub enum JointId {
    BaseYaw,
    Shoulder,
    Elbow,
    WristPitch,
    WristRoll,
    Gripper,
}

/// The physical pose a servo sits in at its minimum pulse width.
///
/// Determines the polarity of the pulse-to-motion relationship, and for
/// grippers which end of the pulse range is "open".
#[derive(Serialize, Deserialize, Debug, Eq, PartialEq, Copy, Clone)]
#[serde(rename_all = "lowercase")]
pub enum MinPos {
    Top,
    Bottom,
    Left,
    Right,
    Cw,
    Ccw,
    Open,
    Close,
}

/// Possible errors in a loaded arm configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Joint {0:?}: pulse bounds are inverted ({1} >= {2})")]
    InvertedPulseBounds(JointId, PulseUs, PulseUs),

    #[error("Joint {0:?}: actuation range must be greater than zero")]
    ZeroActuationRange(JointId),
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Configuration of a single servo joint.
///
/// Loaded once from the parameter file and immutable during operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JointConfig {
    /// Channel index on the controller board.
    pub channel: Channel,

    /// Pulse width at the servo's minimum position.
    ///
    /// Units: microseconds
    #[serde(default = "default_pulse_min_us")]
    pub pulse_min_us: PulseUs,

    /// Pulse width at the servo's maximum position.
    ///
    /// Units: microseconds
    #[serde(default = "default_pulse_max_us")]
    pub pulse_max_us: PulseUs,

    /// The physical servo angle corresponding to the kinematic chain's
    /// logical zero.
    ///
    /// Units: degrees
    pub zero_offset_deg: f64,

    /// Total mechanical rotation this servo model supports.
    ///
    /// Units: degrees
    #[serde(default = "default_actuation_range_deg")]
    pub actuation_range_deg: u16,

    /// The physical pose at minimum pulse, fixing the joint's polarity.
    pub min_pos: MinPos,

    /// Length of the link driven by this joint.
    ///
    /// Units: millimeters
    #[serde(default)]
    pub link_length_mm: f64,

    /// Pulse width of the joint's home (stowed) position.
    ///
    /// Units: microseconds
    pub home_pulse_us: PulseUs,

    /// Pulse width of the joint's logical zero position.
    ///
    /// Units: microseconds
    pub zero_pulse_us: PulseUs,
}

/// One kinematic chain with its calibrated base position.
///
/// Chains carry at minimum base yaw, shoulder and elbow joints; wrist and
/// gripper joints are present on the higher-DOF arms only. Immutable during
/// operation, swapped only on reconfiguration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmModel {
    /// Position of the arm's base in the workspace frame, supplied by
    /// external calibration.
    ///
    /// Units: millimeters
    pub base_position_mm: Point2<f64>,

    pub base_yaw: JointConfig,

    pub shoulder: JointConfig,

    pub elbow: JointConfig,

    #[serde(default)]
    pub wrist_pitch: Option<JointConfig>,

    #[serde(default)]
    pub wrist_roll: Option<JointConfig>,

    #[serde(default)]
    pub gripper: Option<JointConfig>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl MinPos {
    /// Polarity of a kinematic angle relative to increasing physical angle.
    ///
    /// Joints whose minimum pulse sits at the bottom/right/ccw/open pose move
    /// in the positive kinematic direction as the pulse increases.
    pub fn polarity(&self) -> f64 {
        match self {
            MinPos::Bottom | MinPos::Right | MinPos::Ccw | MinPos::Open => 1.0,
            MinPos::Top | MinPos::Left | MinPos::Cw | MinPos::Close => -1.0,
        }
    }
}

impl JointConfig {
    /// Convert a kinematic joint angle into the servo's physical angle.
    ///
    /// The physical angle is measured from the servo's minimum position and
    /// spans `[0, actuation_range_deg]`.
    pub fn to_physical_deg(&self, kinematic_deg: f64) -> f64 {
        self.zero_offset_deg + self.min_pos.polarity() * kinematic_deg
    }

    /// Kinematic angle limits implied by the servo's physical range.
    ///
    /// Returns `(min_deg, max_deg)` with `min_deg <= max_deg`.
    pub fn limits_deg(&self) -> (f64, f64) {
        let range = self.actuation_range_deg as f64;
        let a = -self.zero_offset_deg * self.min_pos.polarity();
        let b = (range - self.zero_offset_deg) * self.min_pos.polarity();

        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }

    /// True if the kinematic angle lies within the servo's physical range.
    pub fn contains_deg(&self, kinematic_deg: f64) -> bool {
        // Absorb floating point noise at the range edges
        const EPS_DEG: f64 = 1e-6;

        let physical = self.to_physical_deg(kinematic_deg);
        physical >= -EPS_DEG && physical <= self.actuation_range_deg as f64 + EPS_DEG
    }

    fn validate(&self, id: JointId) -> Result<(), ConfigError> {
        if self.pulse_min_us >= self.pulse_max_us {
            return Err(ConfigError::InvertedPulseBounds(
                id,
                self.pulse_min_us,
                self.pulse_max_us,
            ));
        }
        if self.actuation_range_deg == 0 {
            return Err(ConfigError::ZeroActuationRange(id));
        }

        Ok(())
    }
}

impl ArmModel {
    /// All joints present on this chain, in chain order.
    pub fn joints(&self) -> Vec<(JointId, &JointConfig)> {
        let mut joints = vec![
            (JointId::BaseYaw, &self.base_yaw),
            (JointId::Shoulder, &self.shoulder),
            (JointId::Elbow, &self.elbow),
        ];

        if let Some(ref j) = self.wrist_pitch {
            joints.push((JointId::WristPitch, j));
        }
        if let Some(ref j) = self.wrist_roll {
            joints.push((JointId::WristRoll, j));
        }
        if let Some(ref j) = self.gripper {
            joints.push((JointId::Gripper, j));
        }

        joints
    }

    /// Look up a joint by its ID.
    pub fn joint(&self, id: JointId) -> Option<&JointConfig> {
        match id {
            JointId::BaseYaw => Some(&self.base_yaw),
            JointId::Shoulder => Some(&self.shoulder),
            JointId::Elbow => Some(&self.elbow),
            JointId::WristPitch => self.wrist_pitch.as_ref(),
            JointId::WristRoll => self.wrist_roll.as_ref(),
            JointId::Gripper => self.gripper.as_ref(),
        }
    }

    /// Height of the shoulder pivot above the base plane (d1).
    ///
    /// Units: millimeters
    pub fn shoulder_height_mm(&self) -> f64 {
        self.base_yaw.link_length_mm
    }

    /// Length of the upper arm link (a2).
    ///
    /// Units: millimeters
    pub fn upper_arm_mm(&self) -> f64 {
        self.shoulder.link_length_mm
    }

    /// Length of the forearm link (a3).
    ///
    /// Units: millimeters
    pub fn forearm_mm(&self) -> f64 {
        self.elbow.link_length_mm
    }

    /// Length of the hand link beyond the wrist pitch joint, zero if the
    /// chain has no wrist pitch.
    ///
    /// Units: millimeters
    pub fn hand_mm(&self) -> f64 {
        self.wrist_pitch
            .as_ref()
            .map(|j| j.link_length_mm)
            .unwrap_or(0.0)
    }

    /// Check the invariants of every joint in the chain.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (id, joint) in self.joints() {
            joint.validate(id)?;
        }

        Ok(())
    }
}

impl std::str::FromStr for Arm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "left" | "l" => Ok(Arm::Left),
            "right" | "r" => Ok(Arm::Right),
            other => Err(format!("Unknown arm: {}", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn default_pulse_min_us() -> PulseUs {
    DEFAULT_PULSE_MIN_US
}

fn default_pulse_max_us() -> PulseUs {
    DEFAULT_PULSE_MAX_US
}

fn default_actuation_range_deg() -> u16 {
    DEFAULT_ACTUATION_RANGE_DEG
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn joint(zero_offset_deg: f64, min_pos: MinPos) -> JointConfig {
        JointConfig {
            channel: 0,
            pulse_min_us: 500,
            pulse_max_us: 2500,
            zero_offset_deg,
            actuation_range_deg: 180,
            min_pos,
            link_length_mm: 100.0,
            home_pulse_us: 1500,
            zero_pulse_us: 1500,
        }
    }

    #[test]
    fn test_limits_follow_polarity() {
        let j = joint(90.0, MinPos::Bottom);
        let (lo, hi) = j.limits_deg();
        assert_eq!((lo, hi), (-90.0, 90.0));
        assert!(j.contains_deg(0.0));
        assert!(j.contains_deg(90.0));
        assert!(!j.contains_deg(91.0));

        // Reversed polarity with an asymmetric zero offset
        let j = joint(45.0, MinPos::Top);
        let (lo, hi) = j.limits_deg();
        assert_eq!((lo, hi), (-135.0, 45.0));
        assert!(j.contains_deg(-135.0));
        assert!(!j.contains_deg(46.0));
    }

    #[test]
    fn test_validate_rejects_bad_joints() {
        let mut j = joint(90.0, MinPos::Bottom);
        j.pulse_min_us = 2500;
        j.pulse_max_us = 500;
        assert!(j.validate(JointId::Shoulder).is_err());

        let mut j = joint(90.0, MinPos::Bottom);
        j.actuation_range_deg = 0;
        assert!(j.validate(JointId::Elbow).is_err());
    }
}
