//! Physical angle to hardware pulse width mapping
//!
//! Servos with heterogeneous actuation ranges (180 and 270 degree models on
//! the same arm) are normalised here: a physical angle in
//! `[0, actuation_range_deg]` maps linearly onto the joint's calibrated pulse
//! range.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// Internal
use crate::arm_config::JointConfig;
use crate::PulseUs;
use util::maths::{clamp, lin_map};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Hard safety bound on any pulse written to the board.
///
/// Units: microseconds
pub const PULSE_HARD_LIMIT_US: PulseUs = 3000;

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Convert a physical joint angle into a hardware pulse width.
///
/// The angle is clamped into the joint's actuation range, linearly mapped
/// onto its pulse bounds, and the rounded result clamped into the hard
/// safety bound.
pub fn physical_to_pulse(angle_deg: f64, cfg: &JointConfig) -> PulseUs {
    let range_deg = cfg.actuation_range_deg as f64;
    let angle_deg = clamp(&angle_deg, &0.0, &range_deg);

    let pulse_us = lin_map(
        (0.0, range_deg),
        (cfg.pulse_min_us as f64, cfg.pulse_max_us as f64),
        angle_deg,
    )
    .round();

    clamp(&pulse_us, &0.0, &(PULSE_HARD_LIMIT_US as f64)) as PulseUs
}

/// Convert a hardware pulse width back into a physical joint angle.
///
/// Inverse of [`physical_to_pulse`] up to one pulse unit's worth of degrees
/// of rounding (about `actuation_range_deg / 2000` degrees for a standard
/// servo).
pub fn pulse_to_angle(pulse_us: PulseUs, cfg: &JointConfig) -> f64 {
    let range_deg = cfg.actuation_range_deg as f64;

    let angle_deg = lin_map(
        (cfg.pulse_min_us as f64, cfg.pulse_max_us as f64),
        (0.0, range_deg),
        pulse_us as f64,
    );

    clamp(&angle_deg, &0.0, &range_deg)
}

/// Convert a kinematic joint angle (relative to the chain's logical zero)
/// into a hardware pulse width.
pub fn kinematic_to_pulse(kinematic_deg: f64, cfg: &JointConfig) -> PulseUs {
    physical_to_pulse(cfg.to_physical_deg(kinematic_deg), cfg)
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::arm_config::MinPos;

    fn cfg(range_deg: u16) -> JointConfig {
        JointConfig {
            channel: 0,
            pulse_min_us: 500,
            pulse_max_us: 2500,
            zero_offset_deg: range_deg as f64 / 2.0,
            actuation_range_deg: range_deg,
            min_pos: MinPos::Bottom,
            link_length_mm: 0.0,
            home_pulse_us: 1500,
            zero_pulse_us: 1500,
        }
    }

    #[test]
    fn test_endpoints() {
        let c = cfg(180);
        assert_eq!(physical_to_pulse(0.0, &c), 500);
        assert_eq!(physical_to_pulse(90.0, &c), 1500);
        assert_eq!(physical_to_pulse(180.0, &c), 2500);
    }

    #[test]
    fn test_out_of_range_angles_clamp() {
        let c = cfg(180);
        assert_eq!(physical_to_pulse(-45.0, &c), 500);
        assert_eq!(physical_to_pulse(500.0, &c), 2500);
        assert_eq!(pulse_to_angle(0, &c), 0.0);
        assert_eq!(pulse_to_angle(3000, &c), 180.0);
    }

    #[test]
    fn test_hard_limit() {
        let mut c = cfg(180);
        c.pulse_max_us = 4000;
        assert_eq!(physical_to_pulse(180.0, &c), PULSE_HARD_LIMIT_US);
    }

    #[test]
    fn test_round_trip() {
        // One pulse unit of rounding corresponds to range/2000 degrees
        for &range_deg in &[180u16, 270u16] {
            let c = cfg(range_deg);
            let tol_deg = range_deg as f64 / 2000.0;

            let mut angle_deg = 0.0;
            while angle_deg <= range_deg as f64 {
                let back = pulse_to_angle(physical_to_pulse(angle_deg, &c), &c);
                assert!(
                    (back - angle_deg).abs() <= tol_deg,
                    "range {}: {} -> {}",
                    range_deg,
                    angle_deg,
                    back
                );
                angle_deg += 0.37;
            }
        }
    }

    #[test]
    fn test_kinematic_polarity() {
        let mut c = cfg(180);

        // Positive polarity: positive kinematic angles increase the pulse
        c.min_pos = MinPos::Bottom;
        assert!(kinematic_to_pulse(30.0, &c) > kinematic_to_pulse(0.0, &c));

        // Negative polarity: positive kinematic angles decrease the pulse
        c.min_pos = MinPos::Top;
        assert!(kinematic_to_pulse(30.0, &c) < kinematic_to_pulse(0.0, &c));
    }
}
