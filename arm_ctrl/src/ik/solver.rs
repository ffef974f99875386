//! Closed-form inverse kinematics solver
//!
//! The chain is reduced to a 2-link planar subproblem (shoulder/elbow) after
//! extracting the base yaw, solved with the Law of Cosines, and expanded back
//! into full-chain candidates for both elbow branches.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::debug;
use nalgebra::Point3;

// Internal
use super::{IkResult, IkSolution, SolutionKind, ELBOW_DOWN_PENALTY};
use crate::arm_config::{ArmModel, JointId};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Tolerance on the reach boundary checks.
///
/// Units: millimeters
const REACH_EPS_MM: f64 = 1e-9;

/// Accumulated pitch of the end effector for a straight-down approach.
///
/// Units: degrees
const APPROACH_PITCH_DEG: f64 = -90.0;

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Solve the chain for a target point and optional end effector orientation.
///
/// The target is given in the workspace frame; the arm's calibrated base
/// position is subtracted before solving. The returned result always carries
/// a best solution: either the minimum-cost valid candidate, or the invalid
/// "Pointing" fallback which orients toward the target without satisfying
/// exact reach.
pub fn solve(model: &ArmModel, target_mm: Point3<f64>, orientation_deg: Option<f64>) -> IkResult {
    // Base yaw from the horizontal target components, zero if the target sits
    // on the yaw axis
    let dx = target_mm.x - model.base_position_mm.x;
    let dy = target_mm.y - model.base_position_mm.y;
    let yaw_deg = if dx == 0.0 && dy == 0.0 {
        0.0
    } else {
        dy.atan2(dx).to_degrees()
    };

    // Planar subproblem: horizontal reach and vertical offset of the wrist
    // point from the shoulder pivot. A straight-down hand link raises the
    // wrist point above the target by the hand length.
    let d1 = model.shoulder_height_mm();
    let a2 = model.upper_arm_mm();
    let a3 = model.forearm_mm();
    let a4 = model.hand_mm();

    let r = dx.hypot(dy);
    let z_off = target_mm.z + a4 - d1;
    let d = r.hypot(z_off);

    let max_reach = a2 + a3;
    let min_reach = (a2 - a3).abs();

    let mut solutions = Vec::new();

    if d > max_reach + REACH_EPS_MM || d < min_reach - REACH_EPS_MM {
        debug!(
            "Target out of reach: d = {:.2} mm, window [{:.2}, {:.2}] mm",
            d, min_reach, max_reach
        );

        let pointing = pointing_fallback(model, yaw_deg, r, z_off, orientation_deg);
        solutions.push(pointing.clone());

        return IkResult {
            target_mm,
            yaw_deg,
            solutions,
            best: Some(pointing),
            is_reachable: false,
        };
    }

    // Law of Cosines for the elbow angle magnitude. The cosine argument is
    // clamped to absorb floating error at the reach boundaries.
    let cos_elbow = ((d * d - a2 * a2 - a3 * a3) / (2.0 * a2 * a3)).max(-1.0).min(1.0);
    let phi = cos_elbow.acos();

    let gamma = z_off.atan2(r);
    let beta = (a3 * phi.sin()).atan2(a2 + a3 * phi.cos());

    let branches = [
        (SolutionKind::ElbowUp, gamma + beta, -phi),
        (SolutionKind::ElbowDown, gamma - beta, phi),
    ];

    for &(kind, shoulder_rad, elbow_rad) in branches.iter() {
        let candidate = build_candidate(
            model,
            kind,
            yaw_deg,
            shoulder_rad.to_degrees(),
            elbow_rad.to_degrees(),
            orientation_deg,
        );
        debug!(
            "{} candidate: {:?} (valid: {}, cost: {:.2})",
            kind, candidate.joint_angles_deg, candidate.is_valid, candidate.cost
        );
        solutions.push(candidate);
    }

    // Minimum-cost valid candidate wins; if joint limits reject everything
    // fall back to Pointing
    let best = solutions
        .iter()
        .filter(|s| s.is_valid)
        .min_by(|a, b| a.cost.partial_cmp(&b.cost).expect("cost is never NaN"))
        .cloned();

    match best {
        Some(best) => IkResult {
            target_mm,
            yaw_deg,
            solutions,
            best: Some(best),
            is_reachable: true,
        },
        None => {
            let pointing = pointing_fallback(model, yaw_deg, r, z_off, orientation_deg);
            solutions.push(pointing.clone());

            IkResult {
                target_mm,
                yaw_deg,
                solutions,
                best: Some(pointing),
                is_reachable: false,
            }
        }
    }
}

/// Planar forward kinematics of the shoulder/elbow pair.
///
/// Returns `(reach_mm, height_mm)` of the wrist point for the given kinematic
/// shoulder and elbow angles. Used to verify solutions against the requested
/// target.
pub fn forward_planar(model: &ArmModel, shoulder_deg: f64, elbow_deg: f64) -> (f64, f64) {
    let a2 = model.upper_arm_mm();
    let a3 = model.forearm_mm();

    let q2 = shoulder_deg.to_radians();
    let q23 = (shoulder_deg + elbow_deg).to_radians();

    (
        a2 * q2.cos() + a3 * q23.cos(),
        model.shoulder_height_mm() + a2 * q2.sin() + a3 * q23.sin(),
    )
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Expand a planar shoulder/elbow pair into a full-chain candidate.
fn build_candidate(
    model: &ArmModel,
    kind: SolutionKind,
    yaw_deg: f64,
    shoulder_deg: f64,
    elbow_deg: f64,
    orientation_deg: Option<f64>,
) -> IkSolution {
    let mut angles = vec![
        (JointId::BaseYaw, yaw_deg),
        (JointId::Shoulder, shoulder_deg),
        (JointId::Elbow, elbow_deg),
    ];

    // Wrist pitch keeps the end effector on the fixed approach angle
    // relative to the accumulated shoulder and elbow pitch
    if model.wrist_pitch.is_some() {
        angles.push((
            JointId::WristPitch,
            APPROACH_PITCH_DEG - shoulder_deg - elbow_deg,
        ));
    }

    // Wrist roll is the requested orientation minus the base yaw
    if model.wrist_roll.is_some() {
        angles.push((
            JointId::WristRoll,
            wrap_deg_180(orientation_deg.unwrap_or(0.0) - yaw_deg),
        ));
    }

    let is_valid = angles
        .iter()
        .all(|&(id, angle_deg)| match model.joint(id) {
            Some(cfg) => cfg.contains_deg(angle_deg),
            None => false,
        });

    let cost = cost_of(model, &angles, kind);

    IkSolution {
        joint_angles_deg: angles,
        kind,
        is_valid,
        cost,
    }
}

/// Build the best-effort fallback for an unsatisfiable target: shoulder aimed
/// along the target direction with the elbow straight.
fn pointing_fallback(
    model: &ArmModel,
    yaw_deg: f64,
    r: f64,
    z_off: f64,
    orientation_deg: Option<f64>,
) -> IkSolution {
    let shoulder_deg = if r == 0.0 && z_off == 0.0 {
        0.0
    } else {
        z_off.atan2(r).to_degrees()
    };

    let mut fallback = build_candidate(
        model,
        SolutionKind::Pointing,
        yaw_deg,
        shoulder_deg,
        0.0,
        orientation_deg,
    );

    // The fallback never satisfies exact reach
    fallback.is_valid = false;
    fallback
}

/// Weighted deviation from the neutral pose, plus the non-Elbow-Up penalty.
fn cost_of(model: &ArmModel, angles: &[(JointId, f64)], kind: SolutionKind) -> f64 {
    let mut cost = 0.0;

    for &(id, angle_deg) in angles {
        cost += joint_weight(id) * (angle_deg - neutral_deg(model, id)).abs();
    }

    if kind != SolutionKind::ElbowUp {
        cost += ELBOW_DOWN_PENALTY;
    }

    cost
}

/// Cost weight per joint, heavier on the joints carrying the most mass.
fn joint_weight(id: JointId) -> f64 {
    match id {
        JointId::BaseYaw => 1.5,
        JointId::Shoulder => 1.2,
        JointId::Elbow => 1.0,
        _ => 0.5,
    }
}

/// Neutral angle for the cost term: mid-range for the shoulder/elbow pair,
/// logical zero for everything else.
fn neutral_deg(model: &ArmModel, id: JointId) -> f64 {
    match id {
        JointId::Shoulder | JointId::Elbow => match model.joint(id) {
            Some(cfg) => {
                let (lo, hi) = cfg.limits_deg();
                (lo + hi) / 2.0
            }
            None => 0.0,
        },
        _ => 0.0,
    }
}

/// Wrap an angle into `[-180, 180)` degrees.
fn wrap_deg_180(angle_deg: f64) -> f64 {
    let mut a = (angle_deg + 180.0) % 360.0;
    if a < 0.0 {
        a += 360.0;
    }
    a - 180.0
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
