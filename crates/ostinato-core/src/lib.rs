//! Per-drive step timing for the Ostinato motion controller.
//!
//! Given a planned move segment and a kinematic model (Cartesian axis, Delta
//! tower, or extruder with pressure advance), this crate computes the instant
//! and direction of every stepper pulse, one step at a time, in fixed-width
//! integer arithmetic fit for a step-generation interrupt.
//!
//! This crate intentionally avoids any board- or transport-specific
//! dependencies.

pub mod dda;
pub mod drive_movement;
pub mod geometry;
pub mod math;
pub mod platform;
pub mod pool;
pub mod sim;
