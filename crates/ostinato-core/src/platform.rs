//! Seam between the engine and the board support layer.

use crate::dda::MAX_DRIVES;

/// What the engine needs from the platform: drive calibration at prepare
/// time, and direction pin changes at step time.
pub trait Platform {
    fn drive_steps_per_unit(&self, drive: usize) -> f32;

    /// Pressure advance in seconds for an extruder drive. Implementations
    /// map the drive index onto their extruder table; non-extruder drives
    /// return zero.
    fn pressure_advance(&self, drive: usize) -> f32;

    /// Latch the direction pin for a drive before its next step pulse.
    fn set_direction(&mut self, drive: usize, forward: bool);
}

/// Platform stand-in that records direction changes instead of toggling
/// pins. Used by the simulator and the tests.
#[derive(Clone, Debug)]
pub struct RecordingPlatform {
    steps_per_unit: [f32; MAX_DRIVES],
    pressure_advance: [f32; MAX_DRIVES],
    pub direction_changes: Vec<(usize, bool)>,
}

impl RecordingPlatform {
    pub fn new() -> Self {
        Self {
            steps_per_unit: [80.0; MAX_DRIVES],
            pressure_advance: [0.0; MAX_DRIVES],
            direction_changes: Vec::new(),
        }
    }

    pub fn set_steps_per_unit(&mut self, drive: usize, steps: f32) {
        self.steps_per_unit[drive] = steps;
    }

    pub fn set_pressure_advance(&mut self, drive: usize, seconds: f32) {
        self.pressure_advance[drive] = seconds;
    }
}

impl Default for RecordingPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for RecordingPlatform {
    fn drive_steps_per_unit(&self, drive: usize) -> f32 {
        self.steps_per_unit[drive]
    }

    fn pressure_advance(&self, drive: usize) -> f32 {
        self.pressure_advance[drive]
    }

    fn set_direction(&mut self, drive: usize, forward: bool) {
        self.direction_changes.push((drive, forward));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_direction_changes_in_order() {
        let mut platform = RecordingPlatform::new();
        platform.set_direction(0, true);
        platform.set_direction(2, false);
        assert_eq!(platform.direction_changes, vec![(0, true), (2, false)]);
    }

    #[test]
    fn calibration_defaults() {
        let mut platform = RecordingPlatform::new();
        assert_eq!(platform.drive_steps_per_unit(3), 80.0);
        assert_eq!(platform.pressure_advance(3), 0.0);
        platform.set_steps_per_unit(3, 420.0);
        platform.set_pressure_advance(3, 0.05);
        assert_eq!(platform.drive_steps_per_unit(3), 420.0);
        assert_eq!(platform.pressure_advance(3), 0.05);
    }
}
