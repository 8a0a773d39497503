//! Cartesian axis preparation and step-time recurrence.

use super::{
    CartesianParams, DmState, DriveMovement, K1, MoveParams, distance_clocks_squared,
    two_csquared_times_mm_per_step_div_a,
};
use crate::dda::{Dda, MIN_CALC_INTERVAL_CARTESIAN, PrepParams, STEP_CLOCK_RATE};
use crate::math::{isqrt64, isquare64};
use crate::platform::Platform;

impl DriveMovement {
    /// Prepare this record for a Cartesian axis move.
    pub fn prepare_cartesian_axis(&mut self, dda: &Dda, params: &PrepParams) {
        let steps_per_mm = self.total_steps as f32 / dda.total_distance;
        let mut cart = CartesianParams {
            two_csquared_times_mm_per_step_div_a: two_csquared_times_mm_per_step_div_a(
                steps_per_mm,
                dda.acceleration,
            ),
            accel_stop_step: (dda.accel_distance * steps_per_mm) as u32 + 1,
            mm_per_step_times_ck_div_top_speed: ((STEP_CLOCK_RATE as u64 * K1 as u64) as f32
                / (steps_per_mm * dda.top_speed))
                .round() as u32,
            ..CartesianParams::default()
        };

        // With less than half a step of deceleration, rounding makes the
        // quadratic constants unusable; skip the phase entirely.
        if dda.decel_distance * steps_per_mm < 0.5 {
            cart.decel_start_step = self.total_steps + 1;
            self.two_distance_to_stop_times_csquared_div_a = 0;
        } else {
            cart.decel_start_step = (params.decel_start_distance * steps_per_mm) as u32 + 1;
            self.two_distance_to_stop_times_csquared_div_a =
                isquare64(params.top_speed_times_c_div_a)
                    + distance_clocks_squared(params.decel_start_distance, dda.acceleration);
        }

        // Cartesian axes never reverse.
        self.reverse_start_step = self.total_steps + 1;
        self.mp = MoveParams::Cartesian(cart);
    }

    /// Compute the due time of the step at the cursor, plus any batch it
    /// commits to. Returns false when the segment is finished or errored.
    ///
    /// Also used for extruders, whose prepared constants fold pressure
    /// advance into the same three-phase recurrence.
    pub fn calc_next_step_cartesian<P: Platform>(
        &mut self,
        dda: &Dda,
        platform: &mut P,
        live: bool,
    ) -> bool {
        let MoveParams::Cartesian(cart) = self.mp else {
            self.state = DmState::StepError;
            return false;
        };

        // Work out how many steps to calculate at a time. The step before
        // reverse_start_step must be single stepped so the direction cannot
        // flip early.
        let mut shift_factor = 0u32;
        if self.step_interval < MIN_CALC_INTERVAL_CARTESIAN {
            let steps_to_limit = (if self.next_step <= self.reverse_start_step
                && self.reverse_start_step <= self.total_steps
            {
                self.reverse_start_step
            } else {
                self.total_steps
            }) - self.next_step;
            if self.step_interval < MIN_CALC_INTERVAL_CARTESIAN / 4 && steps_to_limit > 8 {
                shift_factor = 3; // octal stepping
            } else if self.step_interval < MIN_CALC_INTERVAL_CARTESIAN / 2 && steps_to_limit > 4 {
                shift_factor = 2; // quad stepping
            } else if steps_to_limit > 2 {
                shift_factor = 1; // double stepping
            }
        }
        self.steps_till_recalc = (1 << shift_factor) - 1;

        let next_calc_step = self.next_step + self.steps_till_recalc;
        let last_step_time = self.next_step_time;
        let mut batch_end_time = if next_calc_step < cart.accel_stop_step {
            // Acceleration phase.
            let adjusted_start_speed_clocks =
                dda.start_speed_times_c_div_a + cart.compensation_clocks;
            isqrt64(
                isquare64(adjusted_start_speed_clocks)
                    + cart.two_csquared_times_mm_per_step_div_a * next_calc_step as u64,
            ) - adjusted_start_speed_clocks
        } else if next_calc_step < cart.decel_start_step {
            // Steady speed phase.
            ((cart.mm_per_step_times_ck_div_top_speed as u64 * next_calc_step as u64 / K1 as u64)
                as i64
                + dda.extra_acceleration_clocks as i64
                - cart.accel_compensation_clocks as i64) as u32
        } else if next_calc_step < self.reverse_start_step {
            // Deceleration phase, no reversal yet. The root can round past
            // zero when the end speed is zero or tiny.
            let t = cart.two_csquared_times_mm_per_step_div_a * next_calc_step as u64;
            let adjusted_top_speed_clocks = dda
                .top_speed_times_c_div_a_plus_decel_start_clocks
                .wrapping_sub(cart.compensation_clocks);
            if t < self.two_distance_to_stop_times_csquared_div_a {
                adjusted_top_speed_clocks
                    .wrapping_sub(isqrt64(self.two_distance_to_stop_times_csquared_div_a - t))
            } else {
                adjusted_top_speed_clocks
            }
        } else {
            // Deceleration phase, reversing or already reversed.
            if next_calc_step == self.reverse_start_step {
                self.direction = !self.direction;
                if live {
                    platform.set_direction(self.drive as usize, self.direction);
                }
            }
            let adjusted_top_speed_clocks = dda
                .top_speed_times_c_div_a_plus_decel_start_clocks
                .wrapping_sub(cart.compensation_clocks);
            adjusted_top_speed_clocks.wrapping_add(isqrt64(
                ((cart.two_csquared_times_mm_per_step_div_a * next_calc_step as u64) as i64
                    - cart.four_max_step_distance_minus_two_distance_to_stop_times_csquared_div_a)
                    as u64,
            ))
        };

        if batch_end_time > dda.clocks_needed {
            // At very low end speeds the ideal time of the final step is
            // extremely sensitive to rounding; bring a late final step
            // forward to the finish time. Any other late step is an error.
            if self.next_step >= self.total_steps {
                batch_end_time = dda.clocks_needed;
            } else {
                self.state = DmState::StepError;
                self.step_interval = 10_000_000u32.wrapping_add(batch_end_time);
                return false;
            }
        }

        // Spread the batch uniformly over its span; single steps land on the
        // computed time exactly.
        self.step_interval = batch_end_time.wrapping_sub(last_step_time) >> shift_factor;
        self.next_step_time = last_step_time.wrapping_add(self.step_interval);
        true
    }
}
