//! Planned move segments and their derived step-clock constants.
//!
//! A [`Dda`] describes one straight-line segment with a trapezoidal (or
//! triangular) speed profile, in the units the step-time recurrences consume:
//! distances in mm, speeds in mm/s, times in step-clock ticks. The look-ahead
//! planner owns the profile decisions; [`Dda::plan`] only turns an agreed
//! profile into the clock constants, so the simulator and the tests can build
//! valid descriptors without the planner.

use crate::drive_movement::KC;

/// Step timer tick rate in Hz. The step timer divides the 48 MHz peripheral
/// clock by four.
pub const STEP_CLOCK_RATE: u32 = 12_000_000;

/// `STEP_CLOCK_RATE` squared, pre-widened for the quadratic constants.
pub const STEP_CLOCK_RATE_SQUARED: u64 = (STEP_CLOCK_RATE as u64) * (STEP_CLOCK_RATE as u64);

/// Below this inter-step interval (4 us) a Cartesian drive commits to batches
/// of 2/4/8 steps per recurrence call.
pub const MIN_CALC_INTERVAL_CARTESIAN: u32 = (4 * STEP_CLOCK_RATE) / 1_000_000;

/// Delta recurrences are heavier, so batching starts earlier (8 us) and goes
/// up to 16 steps per call.
pub const MIN_CALC_INTERVAL_DELTA: u32 = (8 * STEP_CLOCK_RATE) / 1_000_000;

/// Most drives any machine configuration can address.
pub const MAX_DRIVES: usize = 8;

pub const X_AXIS: usize = 0;
pub const Y_AXIS: usize = 1;
pub const Z_AXIS: usize = 2;

/// A planned move segment, as handed to the per-drive prepare routines.
///
/// All clock fields are in step-clock ticks measured from segment start.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Dda {
    pub total_distance: f32,
    pub acceleration: f32,
    pub start_speed: f32,
    pub top_speed: f32,
    pub end_speed: f32,
    pub accel_distance: f32,
    pub decel_distance: f32,
    /// Per-drive unit direction vector; extruder entries hold the extrusion
    /// fraction of the move.
    pub direction_vector: [f32; MAX_DRIVES],
    pub is_delta: bool,
    pub start_speed_times_c_div_a: u32,
    pub top_speed_times_c_div_a_plus_decel_start_clocks: u32,
    pub extra_acceleration_clocks: i32,
    pub clocks_needed: u32,
    /// Z component of the direction vector scaled by `KC`.
    pub c_kc: i32,
}

/// Derived per-segment values the planner hands to each prepare routine
/// alongside the [`Dda`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PrepParams {
    pub decel_start_distance: f32,
    pub top_speed_times_c_div_a: u32,
    /// Fraction of the pressure-advance time credited to the acceleration
    /// phase, `(top_speed - start_speed) / top_speed`.
    pub comp_factor: f32,
    // Delta-only move geometry, filled in by `set_delta`.
    pub initial_x: f32,
    pub initial_y: f32,
    pub diagonal_squared: f32,
    pub a2plusb2: f32,
    pub a2b2_d2: f32,
}

impl PrepParams {
    /// Record the whole-move geometry a Delta prepare needs: the effector
    /// start position and the squared diagonal rod length.
    pub fn set_delta(&mut self, initial_x: f32, initial_y: f32, diagonal_squared: f32, dda: &Dda) {
        self.initial_x = initial_x;
        self.initial_y = initial_y;
        self.diagonal_squared = diagonal_squared;
        self.a2plusb2 = dda.direction_vector[X_AXIS] * dda.direction_vector[X_AXIS]
            + dda.direction_vector[Y_AXIS] * dda.direction_vector[Y_AXIS];
        self.a2b2_d2 = self.a2plusb2 * diagonal_squared;
    }
}

/// Physical description of a planned segment, before clock conversion.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MoveProfile {
    pub total_distance: f32,
    pub start_speed: f32,
    pub top_speed: f32,
    pub end_speed: f32,
    pub acceleration: f32,
    pub direction_vector: [f32; MAX_DRIVES],
    pub is_delta: bool,
}

impl Dda {
    /// Derive the clock constants for a feasible profile (one where the
    /// acceleration and deceleration distances fit inside the total).
    ///
    /// Phase times are derived in f64: at 12 MHz an f32 mantissa is too
    /// short to place tick counts of second-long moves exactly.
    pub fn plan(profile: &MoveProfile) -> (Dda, PrepParams) {
        let a = profile.acceleration as f64;
        let vs = profile.start_speed as f64;
        let vt = profile.top_speed as f64;
        let ve = profile.end_speed as f64;
        let total = profile.total_distance as f64;

        let accel_distance = (vt * vt - vs * vs) / (2.0 * a);
        let decel_distance = (vt * vt - ve * ve) / (2.0 * a);
        let steady_distance = (total - accel_distance - decel_distance).max(0.0);
        debug_assert!(
            accel_distance + decel_distance <= total * (1.0 + 1e-4),
            "profile does not fit its distance"
        );

        let accel_stop_time = (vt - vs) / a;
        let decel_start_time = accel_stop_time + steady_distance / vt;
        let total_time = decel_start_time + (vt - ve) / a;

        let c = STEP_CLOCK_RATE as f64;
        let top_speed_times_c_div_a = (vt * c / a).round() as u32;

        let dda = Dda {
            total_distance: profile.total_distance,
            acceleration: profile.acceleration,
            start_speed: profile.start_speed,
            top_speed: profile.top_speed,
            end_speed: profile.end_speed,
            accel_distance: accel_distance as f32,
            decel_distance: decel_distance as f32,
            direction_vector: profile.direction_vector,
            is_delta: profile.is_delta,
            start_speed_times_c_div_a: (vs * c / a).round() as u32,
            top_speed_times_c_div_a_plus_decel_start_clocks: top_speed_times_c_div_a
                + (decel_start_time * c).round() as u32,
            extra_acceleration_clocks: ((accel_stop_time - accel_distance / vt) * c).round() as i32,
            clocks_needed: (total_time * c).round() as u32,
            c_kc: (profile.direction_vector[Z_AXIS] * KC as f32).round() as i32,
        };
        let params = PrepParams {
            decel_start_distance: (total - decel_distance) as f32,
            top_speed_times_c_div_a,
            comp_factor: if vt > 0.0 {
                ((vt - vs) / vt) as f32
            } else {
                0.0
            },
            ..PrepParams::default()
        };
        (dda, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_x() -> [f32; MAX_DRIVES] {
        let mut v = [0.0; MAX_DRIVES];
        v[X_AXIS] = 1.0;
        v
    }

    #[test]
    fn plans_symmetric_triangle() {
        // 1 mm at 1000 mm/s^2 peaking at sqrt(1000) is a pure triangle.
        let (dda, params) = Dda::plan(&MoveProfile {
            total_distance: 1.0,
            start_speed: 0.0,
            top_speed: 1000.0f32.sqrt(),
            end_speed: 0.0,
            acceleration: 1000.0,
            direction_vector: unit_x(),
            is_delta: false,
        });
        assert!((dda.accel_distance - 0.5).abs() < 1e-4);
        assert!((dda.decel_distance - 0.5).abs() < 1e-4);
        assert_eq!(dda.start_speed_times_c_div_a, 0);
        // Total time is 2 * v/a.
        let expect = (2.0 * (1000.0f64.sqrt() / 1000.0) * STEP_CLOCK_RATE as f64).round() as u32;
        assert!(dda.clocks_needed.abs_diff(expect) <= 2);
        assert!((params.decel_start_distance - 0.5).abs() < 1e-4);
    }

    #[test]
    fn plans_trapezoid_clocks() {
        let (dda, params) = Dda::plan(&MoveProfile {
            total_distance: 1.0,
            start_speed: 0.0,
            top_speed: 10.0,
            end_speed: 0.0,
            acceleration: 1000.0,
            direction_vector: unit_x(),
            is_delta: false,
        });
        // 0.01 s accel + 0.09 s cruise + 0.01 s decel.
        assert_eq!(dda.clocks_needed, 1_320_000);
        assert_eq!(params.top_speed_times_c_div_a, 120_000);
        assert_eq!(
            dda.top_speed_times_c_div_a_plus_decel_start_clocks,
            120_000 + 1_200_000
        );
        // Acceleration takes 0.01 s but covers only 0.05 mm of cruise time.
        assert_eq!(dda.extra_acceleration_clocks, 60_000);
        assert!((params.comp_factor - 1.0).abs() < 1e-6);
        assert!((params.decel_start_distance - 0.95).abs() < 1e-6);
    }

    #[test]
    fn cruise_only_profile_has_no_phase_offsets() {
        let (dda, params) = Dda::plan(&MoveProfile {
            total_distance: 10.0,
            start_speed: 20.0,
            top_speed: 20.0,
            end_speed: 20.0,
            acceleration: 500.0,
            direction_vector: unit_x(),
            is_delta: false,
        });
        assert_eq!(dda.accel_distance, 0.0);
        assert_eq!(dda.decel_distance, 0.0);
        assert_eq!(dda.extra_acceleration_clocks, 0);
        assert_eq!(dda.clocks_needed, 6_000_000);
        assert_eq!(params.decel_start_distance, 10.0);
        assert_eq!(params.comp_factor, 0.0);
    }

    #[test]
    fn set_delta_derives_horizontal_share() {
        let mut v = [0.0; MAX_DRIVES];
        v[X_AXIS] = 0.6;
        v[Y_AXIS] = 0.0;
        v[Z_AXIS] = 0.8;
        let (dda, mut params) = Dda::plan(&MoveProfile {
            total_distance: 50.0,
            start_speed: 0.0,
            top_speed: 50.0,
            end_speed: 0.0,
            acceleration: 1000.0,
            direction_vector: v,
            is_delta: true,
        });
        params.set_delta(10.0, -5.0, 62_500.0, &dda);
        assert!((params.a2plusb2 - 0.36).abs() < 1e-6);
        assert!((params.a2b2_d2 - 0.36 * 62_500.0).abs() < 1e-2);
        assert_eq!(dda.c_kc, (0.8 * KC as f32).round() as i32);
    }
}
