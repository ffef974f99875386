//! Inverse kinematics module
//!
//! Closed-form solutions for the 4-6 joint arm chains. Solving is a pure
//! function of the arm model and the target: unreachable targets and joint
//! limit violations are encoded in the returned [`IkResult`], never raised as
//! errors.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod solver;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::Point3;
use serde::Serialize;

// Internal
use crate::arm_config::JointId;
pub use solver::{forward_planar, solve};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Fixed cost penalty applied to candidates that are not Elbow Up.
///
/// Acts as a tie-break so the solver prefers Elbow Up when both branches are
/// comparable, without excluding Elbow Down outright.
pub const ELBOW_DOWN_PENALTY: f64 = 30.0;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// The geometric branch a candidate solution belongs to.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize)]
pub enum SolutionKind {
    /// Elbow bends above the shoulder-wrist line.
    ElbowUp,

    /// Elbow bends below the shoulder-wrist line.
    ElbowDown,

    /// Best-effort fallback orienting toward an unreachable target.
    Pointing,
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// One candidate joint-angle solution.
#[derive(Debug, Clone, Serialize)]
pub struct IkSolution {
    /// Kinematic joint angles in chain order, degrees.
    pub joint_angles_deg: Vec<(JointId, f64)>,

    /// Which geometric branch this candidate is.
    pub kind: SolutionKind,

    /// True if every joint angle is within its configured limits.
    pub is_valid: bool,

    /// Weighted deviation from the neutral pose, plus branch penalty.
    pub cost: f64,
}

/// The full result of one solve.
#[derive(Debug, Clone, Serialize)]
pub struct IkResult {
    /// The requested target point.
    ///
    /// Units: millimeters
    pub target_mm: Point3<f64>,

    /// Base yaw toward the target.
    ///
    /// Units: degrees
    pub yaw_deg: f64,

    /// All computed candidates, including invalid ones.
    pub solutions: Vec<IkSolution>,

    /// The minimum-cost valid candidate, or the Pointing fallback if no
    /// candidate is valid.
    pub best: Option<IkSolution>,

    /// False if the target is out of reach or every candidate violates a
    /// joint limit.
    pub is_reachable: bool,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl std::fmt::Display for SolutionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            SolutionKind::ElbowUp => write!(f, "Elbow Up"),
            SolutionKind::ElbowDown => write!(f, "Elbow Down"),
            SolutionKind::Pointing => write!(f, "Pointing"),
        }
    }
}

impl IkSolution {
    /// Get the angle of one joint in this solution, if the chain has it.
    pub fn angle_deg(&self, id: JointId) -> Option<f64> {
        self.joint_angles_deg
            .iter()
            .find(|(jid, _)| *jid == id)
            .map(|(_, a)| *a)
    }
}
