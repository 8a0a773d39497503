//! Delta tower preparation and step-time recurrence.
//!
//! A tower carriage does not move linearly with the effector: its height is
//! the solution of the diagonal-rod equation, so the recurrence tracks a
//! height counter and re-projects it onto distance along the move each time.
//! A mostly-horizontal move can take a carriage up and over its peak, which
//! is the one place besides pressure advance where a drive reverses
//! mid-segment.

use super::{
    DeltaParams, DmState, DriveMovement, K1, K2, KC, MoveParams, distance_clocks_squared,
    two_csquared_times_mm_per_step_div_a,
};
use crate::dda::{Dda, MIN_CALC_INTERVAL_DELTA, PrepParams, STEP_CLOCK_RATE, X_AXIS, Y_AXIS, Z_AXIS};
use crate::geometry::TowerGeometry;
use crate::math::{isqrt64, isquare64};
use crate::platform::Platform;

impl DriveMovement {
    /// Prepare this record for a Delta tower move.
    pub fn prepare_delta_axis<G: TowerGeometry, P: Platform>(
        &mut self,
        dda: &Dda,
        params: &PrepParams,
        towers: &G,
        platform: &P,
    ) {
        let steps_per_mm = platform.drive_steps_per_unit(self.drive as usize);
        let a = params.initial_x - towers.tower_x(self.drive as usize);
        let b = params.initial_y - towers.tower_y(self.drive as usize);
        let a_a_plus_b_b =
            a * dda.direction_vector[X_AXIS] + b * dda.direction_vector[Y_AXIS];
        let d_squared_minus_a_squared_minus_b_squared = params.diagonal_squared - a * a - b * b;
        let h0_minus_z0 = d_squared_minus_a_squared_minus_b_squared.sqrt();
        let mut delta = DeltaParams {
            hmz0s_k: (h0_minus_z0 * steps_per_mm * K2 as f32).round() as i32,
            minus_a_a_plus_b_b_times_ks: -((a_a_plus_b_b * steps_per_mm * K2 as f32).round()
                as i32),
            d_squared_minus_a_squared_minus_b_squared_times_k_squared_s_squared:
                (d_squared_minus_a_squared_minus_b_squared as f64
                    * ((steps_per_mm * K2 as f32) as f64).powi(2))
                .round() as i64,
            two_csquared_times_mm_per_step_div_a: two_csquared_times_mm_per_step_div_a(
                steps_per_mm,
                dda.acceleration,
            ),
            ..DeltaParams::default()
        };

        // Find the distance along the move at which this carriage peaks.
        if params.a2plusb2 <= 0.0 {
            // Pure Z motion; the quadratic below divides by a2plusb2.
            self.direction = dda.direction_vector[Z_AXIS] >= 0.0;
            self.reverse_start_step = self.total_steps + 1;
        } else {
            // One root of the quadratic has the carriage below the bed; take
            // the other.
            let cross = a * dda.direction_vector[Y_AXIS] - b * dda.direction_vector[X_AXIS];
            let drev = ((dda.direction_vector[Z_AXIS]
                * (params.a2b2_d2 - cross * cross).sqrt())
                - a_a_plus_b_b)
                / params.a2plusb2;
            if drev > 0.0 && drev < dda.total_distance {
                let hrev = dda.direction_vector[Z_AXIS] * drev
                    + (d_squared_minus_a_squared_minus_b_squared
                        - 2.0 * drev * a_a_plus_b_b
                        - params.a2plusb2 * drev * drev)
                        .sqrt();
                let num_steps_up = ((hrev - h0_minus_z0) * steps_per_mm) as i32;

                // We may be almost at the peak already, in which case there
                // is no real reversal.
                if num_steps_up < 1
                    || (self.direction && num_steps_up as u32 <= self.total_steps)
                {
                    self.reverse_start_step = self.total_steps + 1;
                } else {
                    self.reverse_start_step = num_steps_up as u32 + 1;
                    if self.direction {
                        // Net up: up, then down by a lesser amount.
                        self.total_steps = 2 * num_steps_up as u32 - self.total_steps;
                    } else {
                        // Net down: up first, then down by a greater amount.
                        self.direction = true;
                        self.total_steps = 2 * num_steps_up as u32 + self.total_steps;
                    }
                }
            } else {
                self.reverse_start_step = self.total_steps + 1;
            }
        }

        delta.accel_stop_ds_k = (dda.accel_distance * steps_per_mm * K2 as f32).round() as u32;
        delta.mm_per_step_times_ck_div_top_speed =
            ((STEP_CLOCK_RATE as f32 * K1 as f32) / (steps_per_mm * dda.top_speed)).round() as u32;

        if dda.decel_distance * steps_per_mm < 0.5 {
            delta.decel_start_ds_k = u32::MAX;
            self.two_distance_to_stop_times_csquared_div_a = 0;
        } else {
            delta.decel_start_ds_k =
                (params.decel_start_distance * steps_per_mm * K2 as f32).round() as u32;
            self.two_distance_to_stop_times_csquared_div_a =
                isquare64(params.top_speed_times_c_div_a)
                    + distance_clocks_squared(params.decel_start_distance, dda.acceleration);
        }
        self.mp = MoveParams::Delta(delta);
    }

    /// Compute the due time of the step at the cursor, plus any batch it
    /// commits to. Returns false when the segment is finished or errored.
    pub fn calc_next_step_delta<P: Platform>(
        &mut self,
        dda: &Dda,
        platform: &mut P,
        live: bool,
    ) -> bool {
        // Work out how many steps to calculate at a time. The step before
        // reverse_start_step must be single stepped so the direction cannot
        // flip early.
        let mut shift_factor = 0u32;
        if self.step_interval < MIN_CALC_INTERVAL_DELTA {
            let steps_to_limit = (if self.next_step < self.reverse_start_step
                && self.reverse_start_step <= self.total_steps
            {
                self.reverse_start_step
            } else {
                self.total_steps
            }) - self.next_step;
            if self.step_interval < MIN_CALC_INTERVAL_DELTA / 8 && steps_to_limit > 16 {
                shift_factor = 4; // hexadecimal stepping
            } else if self.step_interval < MIN_CALC_INTERVAL_DELTA / 4 && steps_to_limit > 8 {
                shift_factor = 3; // octal stepping
            } else if self.step_interval < MIN_CALC_INTERVAL_DELTA / 2 && steps_to_limit > 4 {
                shift_factor = 2; // quad stepping
            } else if steps_to_limit > 2 {
                shift_factor = 1; // double stepping
            }
        }
        self.steps_till_recalc = (1 << shift_factor) - 1;

        if self.next_step == self.reverse_start_step {
            self.direction = false; // over the peak, going down now
            if live {
                platform.set_direction(self.drive as usize, false);
            }
        }

        let MoveParams::Delta(delta) = &mut self.mp else {
            self.state = DmState::StepError;
            return false;
        };

        // Advance the height counter by the whole batch.
        let mut shifted_k2 = (K2 << shift_factor) as i32;
        if !self.direction {
            shifted_k2 = -shifted_k2;
        }
        delta.hmz0s_k += shifted_k2;

        // Re-project the carriage height onto distance along the move, all
        // scaled by K2 (and KC for the Z direction cosine).
        let hmz0sc_k = ((delta.hmz0s_k as i64 * dda.c_kc as i64) / KC as i64) as i32;
        let t1 = delta.minus_a_a_plus_b_b_times_ks + hmz0sc_k;
        // Rounding can push the radicand negative near the peak.
        let t2a = delta.d_squared_minus_a_squared_minus_b_squared_times_k_squared_s_squared
            - delta.hmz0s_k as i64 * delta.hmz0s_k as i64
            + t1 as i64 * t1 as i64;
        let t2 = if t2a > 0 { isqrt64(t2a as u64) as i32 } else { 0 };
        let ds_k = if self.direction { t1 - t2 } else { t1 + t2 };

        if ds_k < 0 {
            self.state = DmState::StepError;
            self.next_step += 1_000_000; // marker for the post-mortem dump
            return false;
        }
        let ds_k = ds_k as u32;

        let last_step_time = self.next_step_time;
        let mut batch_end_time = if ds_k < delta.accel_stop_ds_k {
            // Acceleration phase.
            isqrt64(
                isquare64(dda.start_speed_times_c_div_a)
                    + delta.two_csquared_times_mm_per_step_div_a * ds_k as u64 / K2 as u64,
            ) - dda.start_speed_times_c_div_a
        } else if ds_k < delta.decel_start_ds_k {
            // Steady speed phase.
            ((delta.mm_per_step_times_ck_div_top_speed as u64 * ds_k as u64
                / (K1 as u64 * K2 as u64)) as i64
                + dda.extra_acceleration_clocks as i64) as u32
        } else {
            // Deceleration phase; the root can round past zero when the end
            // speed is zero or tiny.
            let t = delta.two_csquared_times_mm_per_step_div_a * ds_k as u64 / K2 as u64;
            if t < self.two_distance_to_stop_times_csquared_div_a {
                dda.top_speed_times_c_div_a_plus_decel_start_clocks
                    .wrapping_sub(isqrt64(self.two_distance_to_stop_times_csquared_div_a - t))
            } else {
                dda.top_speed_times_c_div_a_plus_decel_start_clocks
            }
        };

        if batch_end_time > dda.clocks_needed {
            // Tower geometry can delay the penultimate step as well as the
            // last; bring either forward to the finish time. Any earlier
            // late step is an error.
            if self.next_step + 1 >= self.total_steps {
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
