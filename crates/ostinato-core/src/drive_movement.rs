//! Per-drive step timing state.
//!
//! A [`DriveMovement`] is the state machine that, once prepared against a
//! [`Dda`], answers one question from the step interrupt: when is this
//! drive's next pulse due, and in which direction. Everything on that path is
//! bounded-width integer arithmetic; floats appear only in the prepare
//! routines, which run in planner context.
//!
//! The prepare routines and recurrences live in the kinematics submodules
//! (`cartesian`, `delta`, `extruder`).

use core::fmt;

use crate::dda::Dda;
use crate::platform::Platform;

mod cartesian;
mod delta;
mod extruder;

/// Scaling constant for the cruise-phase recurrence. The cruise constant
/// `mm_per_step_times_ck_div_top_speed` is the per-step interval in ticks
/// times `K1`; a power of two keeps the divide a shift.
///
/// Changing `K1`, `K2` or `KC` changes the fixed-point contract with the
/// planner: every planner-side constant scaled by them must be re-derived.
pub const K1: u32 = 128;

/// Scaling constant for the Delta height counter and distance projection.
pub const K2: u32 = 512;

/// Scaling constant for the Z component of the direction vector mixed into
/// the Delta projection (`Dda::c_kc`).
pub const KC: i32 = 1 << 20;

/// Execution state of a drive movement record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DmState {
    Idle,
    Moving,
    /// A step landed after the segment's allotted clocks, or the Delta
    /// projection went negative. Fatal to the segment; diagnostics are left
    /// in `step_interval` / `next_step` for the post-mortem dump.
    StepError,
}

/// Kinematic constants for a Cartesian axis or an extruder.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CartesianParams {
    /// First step index no longer in the acceleration phase.
    pub accel_stop_step: u32,
    pub decel_start_step: u32,
    /// Cruise interval in ticks, scaled by `K1`.
    pub mm_per_step_times_ck_div_top_speed: u32,
    /// Squared-clock cost of one step of displacement while accelerating.
    pub two_csquared_times_mm_per_step_div_a: u64,
    pub four_max_step_distance_minus_two_distance_to_stop_times_csquared_div_a: i64,
    /// Pressure-advance time in ticks; zero for plain axes.
    pub compensation_clocks: u32,
    pub accel_compensation_clocks: u32,
}

/// Kinematic constants and the running height counter for a Delta tower.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DeltaParams {
    /// Carriage height above the effector, in steps scaled by `K2`. Updated
    /// every recurrence call; the only mutable member of the variant.
    pub hmz0s_k: i32,
    pub minus_a_a_plus_b_b_times_ks: i32,
    pub d_squared_minus_a_squared_minus_b_squared_times_k_squared_s_squared: i64,
    /// Phase thresholds against the projected move distance `ds_k`.
    pub accel_stop_ds_k: u32,
    pub decel_start_ds_k: u32,
    pub mm_per_step_times_ck_div_top_speed: u32,
    pub two_csquared_times_mm_per_step_div_a: u64,
}

/// Kinematic payload of a record. Chosen at prepare time, fixed until the
/// segment completes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MoveParams {
    Cartesian(CartesianParams),
    Delta(DeltaParams),
}

/// Per-drive step timing record. Pool-allocated; see [`crate::pool::DmPool`].
#[derive(Clone, Debug)]
pub struct DriveMovement {
    pub(crate) drive: u8,
    pub(crate) state: DmState,
    /// true = forward. May flip once mid-segment, at `reverse_start_step`.
    pub(crate) direction: bool,
    pub(crate) total_steps: u32,
    /// Cursor, 1..=total_steps + 1. The record is finished once it passes
    /// `total_steps`.
    pub(crate) next_step: u32,
    /// Remaining steps to emit at uniform spacing before the recurrence runs
    /// again.
    pub(crate) steps_till_recalc: u32,
    /// Most recent inter-step time in ticks.
    pub(crate) step_interval: u32,
    /// Due time of the next pulse, in ticks from segment start.
    pub(crate) next_step_time: u32,
    /// Step index at which `direction` flips; `total_steps + 1` when the
    /// segment never reverses.
    pub(crate) reverse_start_step: u32,
    pub(crate) two_distance_to_stop_times_csquared_div_a: u64,
    pub(crate) mp: MoveParams,
    /// Pool free-list link.
    pub(crate) next_free: Option<u16>,
}

impl DriveMovement {
    pub(crate) fn empty() -> Self {
        Self {
            drive: 0,
            state: DmState::Idle,
            direction: true,
            total_steps: 0,
            next_step: 0,
            steps_till_recalc: 0,
            step_interval: 0,
            next_step_time: 0,
            reverse_start_step: 0,
            two_distance_to_stop_times_csquared_div_a: 0,
            mp: MoveParams::Cartesian(CartesianParams::default()),
            next_free: None,
        }
    }

    /// Stamp the planner-computed step count and initial direction, and reset
    /// the step cursor, ahead of one of the prepare routines.
    pub fn begin_segment(&mut self, total_steps: u32, forward: bool) {
        self.total_steps = total_steps;
        self.direction = forward;
        self.next_step = 0;
        self.next_step_time = 0;
        self.steps_till_recalc = 0;
        // Large initial interval so the first recurrence call single-steps.
        self.step_interval = 999_999;
    }

    pub fn drive(&self) -> u8 {
        self.drive
    }

    pub fn state(&self) -> DmState {
        self.state
    }

    pub fn direction(&self) -> bool {
        self.direction
    }

    pub fn total_steps(&self) -> u32 {
        self.total_steps
    }

    pub fn next_step(&self) -> u32 {
        self.next_step
    }

    pub fn next_step_time(&self) -> u32 {
        self.next_step_time
    }

    pub fn step_interval(&self) -> u32 {
        self.step_interval
    }

    pub fn reverse_start_step(&self) -> u32 {
        self.reverse_start_step
    }

    pub fn params(&self) -> &MoveParams {
        &self.mp
    }

    /// Advance to the next step and compute its due time. Returns false when
    /// the segment is finished or the record entered `StepError`.
    ///
    /// Batched steps (committed by a previous recurrence call) only bump the
    /// due time by the stored interval; everything else dispatches to the
    /// kinematic recurrence.
    pub fn calc_next_step<P: Platform>(&mut self, dda: &Dda, platform: &mut P, live: bool) -> bool {
        self.next_step += 1;
        if self.next_step <= self.total_steps {
            if self.steps_till_recalc != 0 {
                self.steps_till_recalc -= 1;
                self.next_step_time = self.next_step_time.wrapping_add(self.step_interval);
                return true;
            }
            match self.mp {
                MoveParams::Cartesian(_) => self.calc_next_step_cartesian(dda, platform, live),
                MoveParams::Delta(_) => self.calc_next_step_delta(dda, platform, live),
            }
        } else {
            self.state = DmState::Idle;
            false
        }
    }

    /// Collapse the profile to pure cruise and slow it by the given factor.
    /// Called when an endstop is nearing; later recurrence calls take only
    /// the cruise branch.
    pub fn reduce_speed(&mut self, inverse_speed_factor: u32) {
        match &mut self.mp {
            MoveParams::Delta(delta) => {
                delta.accel_stop_ds_k = 0;
                delta.decel_start_ds_k = u32::MAX;
                delta.mm_per_step_times_ck_div_top_speed *= inverse_speed_factor;
            }
            MoveParams::Cartesian(cart) => {
                cart.accel_stop_step = 0;
                cart.decel_start_step = self.total_steps + 1;
                cart.mm_per_step_times_ck_div_top_speed *= inverse_speed_factor;
            }
        }
    }
}

/// Squared-clock cost of one step of displacement during the constant
/// acceleration phases: `2 C^2 / (steps_per_mm * a)`.
pub(crate) fn two_csquared_times_mm_per_step_div_a(steps_per_mm: f32, acceleration: f32) -> u64 {
    ((2.0 * crate::dda::STEP_CLOCK_RATE_SQUARED as f64)
        / (steps_per_mm as f64 * acceleration as f64))
        .round() as u64
}

/// Clock-squared equivalent of a deceleration distance:
/// `d * 2 C^2 / a`.
pub(crate) fn distance_clocks_squared(distance: f32, acceleration: f32) -> u64 {
    ((distance as f64 * 2.0 * crate::dda::STEP_CLOCK_RATE_SQUARED as f64) / acceleration as f64)
        .round() as u64
}

/// Post-mortem dump, mirroring what the motion diagnostics print.
impl fmt::Display for DriveMovement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.state == DmState::Idle {
            return write!(f, "DM{}: not moving", self.drive);
        }
        write!(
            f,
            "DM{}{} dir={} steps={} next={} rev={} interval={} 2dtstc2diva={}",
            self.drive,
            if self.state == DmState::StepError {
                " ERR:"
            } else {
                ":"
            },
            if self.direction { 'F' } else { 'B' },
            self.total_steps,
            self.next_step,
            self.reverse_start_step,
            self.step_interval,
            self.two_distance_to_stop_times_csquared_div_a,
        )?;
        match &self.mp {
            MoveParams::Cartesian(cart) => write!(
                f,
                " accelStopStep={} decelStartStep={} 2c2mmsda={} mmsckdts={} fmsdmtstdca2={} cc={} acc={}",
                cart.accel_stop_step,
                cart.decel_start_step,
                cart.two_csquared_times_mm_per_step_div_a,
                cart.mm_per_step_times_ck_div_top_speed,
                cart.four_max_step_distance_minus_two_distance_to_stop_times_csquared_div_a,
                cart.compensation_clocks,
                cart.accel_compensation_clocks,
            ),
            MoveParams::Delta(delta) => write!(
                f,
                " hmz0sK={} minusAaPlusBbTimesKs={} h2={} 2c2mmsda={} asdsk={} dsdsk={} mmsckdts={}",
                delta.hmz0s_k,
                delta.minus_a_a_plus_b_b_times_ks,
                delta.d_squared_minus_a_squared_minus_b_squared_times_k_squared_s_squared,
                delta.two_csquared_times_mm_per_step_div_a,
                delta.accel_stop_ds_k,
                delta.decel_start_ds_k,
                delta.mm_per_step_times_ck_div_top_speed,
            ),
        }
    }
}
