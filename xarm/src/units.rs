/*!
Raw position / angle conversion.

Servo positions are reported in controller-native units from 0 to 1000. The
full range covers 240 degrees of travel with 500 at the centre, so one raw
unit is 0.24 degrees.
*/

use crate::error::{Error, Result};
use crate::protocol::{POSITION_MAX, POSITION_MIN};

/// Degrees per raw position unit
pub const DEGREES_PER_UNIT: f32 = 0.24;

/// Raw position that maps to 0 degrees
pub const CENTER_POSITION: i32 = 500;

/// Convert a raw position (0..=1000) to degrees, centre = 0
pub fn position_to_angle(position: i32) -> f32 {
    (position - CENTER_POSITION) as f32 * DEGREES_PER_UNIT
}

/// Convert degrees back to the nearest raw position. Angles far outside the
/// servo range saturate at the `i32` bounds instead of overflowing.
pub fn angle_to_position(angle: f32) -> i32 {
    (angle / DEGREES_PER_UNIT + CENTER_POSITION as f32).round() as i32
}

/// Check an angle is a finite number of degrees within servo travel and
/// convert it to a raw position
pub fn validate_angle(angle: f32) -> Result<u16> {
    if !angle.is_finite() {
        return Err(Error::validation(format!(
            "Parameter 'angle' must be a finite number of degrees, got {}",
            angle
        )));
    }
    validate_position(angle_to_position(angle))
}

/// Check a raw position against the servo range and narrow it to `u16`
pub fn validate_position(position: i32) -> Result<u16> {
    if !(POSITION_MIN..=POSITION_MAX).contains(&position) {
        return Err(Error::validation(format!(
            "Parameter 'position' must be between {} and {}, got {}",
            POSITION_MIN, POSITION_MAX, position
        )));
    }
    Ok(position as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_points() {
        assert_eq!(position_to_angle(500), 0.0);
        assert!((position_to_angle(0) + 120.0).abs() < 1e-3);
        assert!((position_to_angle(1000) - 120.0).abs() < 1e-3);
        assert_eq!(angle_to_position(0.0), 500);
        assert_eq!(angle_to_position(-120.0), 0);
        assert_eq!(angle_to_position(120.0), 1000);
    }

    #[test]
    fn test_round_trip_whole_range() {
        for p in POSITION_MIN..=POSITION_MAX {
            assert_eq!(angle_to_position(position_to_angle(p)), p, "position {}", p);
        }
    }

    #[test]
    fn test_monotonic() {
        let mut previous = position_to_angle(POSITION_MIN);
        for p in (POSITION_MIN + 1)..=POSITION_MAX {
            let angle = position_to_angle(p);
            assert!(angle > previous);
            previous = angle;
        }
    }

    #[test]
    fn test_validate_position() {
        assert_eq!(validate_position(0).unwrap(), 0);
        assert_eq!(validate_position(1000).unwrap(), 1000);
        assert!(validate_position(-1).unwrap_err().is_validation());
        assert!(validate_position(1001).unwrap_err().is_validation());
    }

    #[test]
    fn test_extreme_angles_saturate() {
        assert_eq!(angle_to_position(1.0e12), i32::MAX);
        assert_eq!(angle_to_position(-1.0e12), i32::MIN);
        assert_eq!(angle_to_position(f32::MAX), i32::MAX);
    }

    #[test]
    fn test_validate_angle() {
        assert_eq!(validate_angle(0.0).unwrap(), 500);
        assert_eq!(validate_angle(-120.0).unwrap(), 0);
        assert!(validate_angle(120.5).unwrap_err().is_validation());
        assert!(validate_angle(1.0e12).unwrap_err().is_validation());
        for angle in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            assert!(validate_angle(angle).unwrap_err().is_validation());
        }
    }
}
