//! Extruder preparation.
//!
//! An extruder is a Cartesian drive whose prepared constants fold in
//! pressure advance: filament pressure lags nozzle speed by the compensation
//! time, so extra filament is fed while accelerating and taken back while
//! decelerating. The compensation can shift the acceleration window, extend
//! the deceleration window, and introduce a reverse phase no plain axis
//! ever has. Step times then come from the Cartesian recurrence.

use super::{
    CartesianParams, DriveMovement, K1, MoveParams, distance_clocks_squared,
    two_csquared_times_mm_per_step_div_a,
};
use crate::dda::{Dda, PrepParams, STEP_CLOCK_RATE};
use crate::platform::Platform;

impl DriveMovement {
    /// Prepare this record for an extruder move. With `do_compensation`
    /// false, or on a retracting move, this degenerates to the plain
    /// Cartesian preparation.
    pub fn prepare_extruder<P: Platform>(
        &mut self,
        dda: &Dda,
        params: &PrepParams,
        platform: &P,
        do_compensation: bool,
    ) {
        let dv = dda.direction_vector[self.drive as usize];
        let steps_per_mm = platform.drive_steps_per_unit(self.drive as usize) * dv.abs();

        let compensation_time = if do_compensation && dv > 0.0 {
            platform.pressure_advance(self.drive as usize)
        } else {
            0.0
        };
        let mut cart = CartesianParams {
            two_csquared_times_mm_per_step_div_a: two_csquared_times_mm_per_step_div_a(
                steps_per_mm,
                dda.acceleration,
            ),
            compensation_clocks: (compensation_time * STEP_CLOCK_RATE as f32).round() as u32,
            accel_compensation_clocks: (compensation_time
                * STEP_CLOCK_RATE as f32
                * params.comp_factor)
                .round() as u32,
            ..CartesianParams::default()
        };

        // Net step count allowing for compensation; negative means the
        // segment as a whole retracts.
        let compensation_distance = (dda.end_speed - dda.start_speed) * compensation_time;
        let net_steps = (compensation_distance * steps_per_mm) as i32 + self.total_steps as i32;

        let accel_compensation_distance = compensation_time * (dda.top_speed - dda.start_speed);
        cart.accel_stop_step =
            ((dda.accel_distance + accel_compensation_distance) * steps_per_mm) as u32 + 1;
        cart.mm_per_step_times_ck_div_top_speed =
            ((STEP_CLOCK_RATE as u64 * K1 as u64) as f32 / (steps_per_mm * dda.top_speed)) as u32;

        // With less than half a step of deceleration, rounding makes the
        // quadratic constants unusable; skip the phase entirely.
        if dda.decel_distance * steps_per_mm < 0.5 {
            self.total_steps = net_steps.max(0) as u32;
            cart.decel_start_step = (net_steps + 1) as u32;
            self.reverse_start_step = (net_steps + 1) as u32;
            self.two_distance_to_stop_times_csquared_div_a = 0;
        } else {
            cart.decel_start_step =
                ((params.decel_start_distance + accel_compensation_distance) * steps_per_mm) as u32
                    + 1;
            // Signed: compensation can exceed the top-speed clocks.
            let initial_decel_speed_clocks =
                params.top_speed_times_c_div_a as i32 - cart.compensation_clocks as i32;
            self.two_distance_to_stop_times_csquared_div_a =
                (initial_decel_speed_clocks as i64 * initial_decel_speed_clocks as i64) as u64
                    + distance_clocks_squared(
                        params.decel_start_distance + accel_compensation_distance,
                        dda.acceleration,
                    );

            // Distance along the move at which extrusion speed hits zero and
            // reverse motion starts.
            let initial_decel_speed = dda.top_speed - dda.acceleration * compensation_time;
            let reverse_start_distance = if initial_decel_speed > 0.0 {
                initial_decel_speed * initial_decel_speed / (2.0 * dda.acceleration)
                    + params.decel_start_distance
            } else {
                params.decel_start_distance
            };

            if reverse_start_distance >= dda.total_distance {
                // No reverse phase.
                self.total_steps = net_steps.max(0) as u32;
                self.reverse_start_step = (net_steps + 1) as u32;
            } else {
                self.reverse_start_step = if initial_decel_speed < 0.0 {
                    cart.decel_start_step
                } else {
                    (self.two_distance_to_stop_times_csquared_div_a
                        / cart.two_csquared_times_mm_per_step_div_a) as u32
                        + 1
                };
                // Step indices round down, so net_steps = 1 can meet
                // reverse_start_step = 1, which would make the total -1.
                // Suppress the reversal instead.
                let overall_steps = 2 * (self.reverse_start_step as i32 - 1) - net_steps;
                if overall_steps > 0 {
                    self.total_steps = overall_steps as u32;
                    cart.four_max_step_distance_minus_two_distance_to_stop_times_csquared_div_a =
                        (2 * (self.reverse_start_step as u64 - 1)
                            * cart.two_csquared_times_mm_per_step_div_a)
                            as i64
                            - self.two_distance_to_stop_times_csquared_div_a as i64;
                } else {
                    tracing::debug!(
                        drive = self.drive,
                        net_steps,
                        reverse_start_step = self.reverse_start_step,
                        "suppressing extruder reversal that would leave no steps"
                    );
                    self.total_steps = net_steps.max(0) as u32;
                    self.reverse_start_step = self.total_steps + 1;
                }
            }
        }
        self.mp = MoveParams::Cartesian(cart);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dda::{MAX_DRIVES, MoveProfile};
    use crate::platform::RecordingPlatform;

    const EXTRUDER: usize = 3;

    fn extruder_move(start_speed: f32, end_speed: f32) -> (Dda, PrepParams) {
        let mut v = [0.0; MAX_DRIVES];
        v[EXTRUDER] = 1.0;
        Dda::plan(&MoveProfile {
            total_distance: 1.0,
            start_speed,
            top_speed: 10.0,
            end_speed,
            acceleration: 1000.0,
            direction_vector: v,
            is_delta: false,
        })
    }

    fn platform_100() -> RecordingPlatform {
        let mut p = RecordingPlatform::new();
        p.set_steps_per_unit(EXTRUDER, 100.0);
        p
    }

    #[test]
    fn no_advance_matches_cartesian_preparation() {
        let (dda, params) = extruder_move(0.0, 0.0);

        let mut ext = DriveMovement::empty();
        ext.drive = EXTRUDER as u8;
        ext.begin_segment(100, true);
        ext.prepare_extruder(&dda, &params, &platform_100(), true);

        let mut cart = DriveMovement::empty();
        cart.begin_segment(100, true);
        cart.prepare_cartesian_axis(&dda, &params);

        assert_eq!(ext.total_steps(), 100);
        assert_eq!(ext.reverse_start_step(), 101);
        assert_eq!(
            ext.two_distance_to_stop_times_csquared_div_a,
            cart.two_distance_to_stop_times_csquared_div_a
        );
        let MoveParams::Cartesian(e) = ext.params() else {
            panic!("wrong variant");
        };
        let MoveParams::Cartesian(c) = cart.params() else {
            panic!("wrong variant");
        };
        assert_eq!(e.accel_stop_step, c.accel_stop_step);
        assert_eq!(e.decel_start_step, c.decel_start_step);
        assert_eq!(e.compensation_clocks, 0);
        assert_eq!(e.accel_compensation_clocks, 0);
    }

    #[test]
    fn retraction_with_advance_gains_a_reverse_phase() {
        // Cruise at 10 mm/s straight into a hard stop, with 50 ms of
        // pressure advance: the pressure unwinds by reversing.
        let (dda, params) = extruder_move(10.0, 0.0);
        let mut platform = platform_100();
        platform.set_pressure_advance(EXTRUDER, 0.05);

        let mut dm = DriveMovement::empty();
        dm.drive = EXTRUDER as u8;
        dm.begin_segment(100, true);
        dm.prepare_extruder(&dda, &params, &platform, true);

        let MoveParams::Cartesian(cart) = *dm.params() else {
            panic!("wrong variant");
        };
        assert_eq!(cart.compensation_clocks, 600_000);
        // Start speed equals top speed, so none of it lands in acceleration.
        assert_eq!(cart.accel_compensation_clocks, 0);
        assert_eq!(cart.accel_stop_step, 1);
        assert_eq!(cart.decel_start_step, 95);
        // Net extrusion is 100 - 10 * 0.05 * 100 = 50 steps, reached by
        // going 94 forward and 44 back.
        assert_eq!(dm.reverse_start_step(), 95);
        assert_eq!(dm.total_steps(), 138);
        assert!(
            cart.four_max_step_distance_minus_two_distance_to_stop_times_csquared_div_a > 0
        );
    }

    #[test]
    fn compensation_disabled_ignores_pressure_advance() {
        let (dda, params) = extruder_move(10.0, 0.0);
        let mut platform = platform_100();
        platform.set_pressure_advance(EXTRUDER, 0.05);

        let mut dm = DriveMovement::empty();
        dm.drive = EXTRUDER as u8;
        dm.begin_segment(100, true);
        dm.prepare_extruder(&dda, &params, &platform, false);

        let MoveParams::Cartesian(cart) = dm.params() else {
            panic!("wrong variant");
        };
        assert_eq!(cart.compensation_clocks, 0);
        assert_eq!(dm.total_steps(), 100);
        assert_eq!(dm.reverse_start_step(), 101);
    }

    #[test]
    fn sub_step_deceleration_clamps_to_net_steps() {
        // End fast enough that the deceleration distance is under half a
        // step.
        let mut v = [0.0; MAX_DRIVES];
        v[EXTRUDER] = 1.0;
        let (dda, params) = Dda::plan(&MoveProfile {
            total_distance: 1.0,
            start_speed: 10.0,
            top_speed: 10.0,
            end_speed: 9.99,
            acceleration: 1000.0,
            direction_vector: v,
            is_delta: false,
        });
        let mut platform = platform_100();
        platform.set_pressure_advance(EXTRUDER, 0.05);

        let mut dm = DriveMovement::empty();
        dm.drive = EXTRUDER as u8;
        dm.begin_segment(100, true);
        dm.prepare_extruder(&dda, &params, &platform, true);

        // (9.99 - 10) * 0.05 * 100 rounds towards zero: no step lost.
        assert_eq!(dm.total_steps(), 100);
        assert_eq!(dm.reverse_start_step(), 101);
        assert_eq!(dm.two_distance_to_stop_times_csquared_div_a, 0);
    }
}
