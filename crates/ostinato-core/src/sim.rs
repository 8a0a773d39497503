//! Offline execution of prepared drive movements.
//!
//! Stands in for the step interrupt when there is no hardware: drives every
//! prepared record to completion against one segment, merging pulses across
//! drives in due-time order the way the interrupt dispatcher does. The
//! property tests and the CLI simulator both run on this.

use thiserror::Error;

use crate::dda::Dda;
use crate::drive_movement::DmState;
use crate::platform::Platform;
use crate::pool::{DmHandle, DmPool};

#[derive(Debug, Error)]
pub enum SimError {
    #[error("drive movement pool exhausted")]
    PoolExhausted,
    #[error("drive {drive} step error at step {step}: {dump}")]
    Step { drive: u8, step: u32, dump: String },
}

pub type Result<T> = std::result::Result<T, SimError>;

/// One emitted step pulse.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepPulse {
    pub drive: u8,
    /// Ticks from segment start.
    pub time: u32,
    pub forward: bool,
}

/// Run every listed record to completion. Pulses come back ordered by due
/// time, ties broken by list position. Finished records are left idle for
/// the caller to inspect and release.
pub fn run_segment<P: Platform>(
    pool: &mut DmPool,
    handles: &[DmHandle],
    dda: &Dda,
    platform: &mut P,
    live: bool,
) -> Result<Vec<StepPulse>> {
    let mut pulses = Vec::new();
    let mut pending: Vec<DmHandle> = Vec::with_capacity(handles.len());
    for &handle in handles {
        let dm = pool.get_mut(handle);
        if dm.calc_next_step(dda, platform, live) {
            pending.push(handle);
        } else if dm.state() == DmState::StepError {
            return Err(step_error(pool, handle));
        }
    }

    while !pending.is_empty() {
        // Service whichever drive is due first, as the dispatcher would.
        let mut earliest = 0;
        for (i, &candidate) in pending.iter().enumerate().skip(1) {
            if pool.get(candidate).next_step_time() < pool.get(pending[earliest]).next_step_time()
            {
                earliest = i;
            }
        }
        let handle = pending[earliest];
        let dm = pool.get_mut(handle);
        pulses.push(StepPulse {
            drive: dm.drive(),
            time: dm.next_step_time(),
            forward: dm.direction(),
        });
        if !dm.calc_next_step(dda, platform, live) {
            if dm.state() == DmState::StepError {
                return Err(step_error(pool, handle));
            }
            pending.remove(earliest);
        }
    }
    Ok(pulses)
}

fn step_error(pool: &DmPool, handle: DmHandle) -> SimError {
    let dm = pool.get(handle);
    tracing::warn!(drive = dm.drive(), "{dm}");
    SimError::Step {
        drive: dm.drive(),
        step: dm.next_step(),
        dump: dm.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dda::{MAX_DRIVES, MoveProfile, X_AXIS, Y_AXIS};
    use crate::platform::RecordingPlatform;

    // Two axes sharing one cruise-only diagonal move, one at half the step
    // rate of the other.
    fn diagonal_move() -> (Dda, crate::dda::PrepParams) {
        let mut v = [0.0; MAX_DRIVES];
        v[X_AXIS] = 0.8;
        v[Y_AXIS] = 0.6;
        Dda::plan(&MoveProfile {
            total_distance: 5.0,
            start_speed: 20.0,
            top_speed: 20.0,
            end_speed: 20.0,
            acceleration: 1000.0,
            direction_vector: v,
            is_delta: false,
        })
    }

    #[test]
    fn merges_pulses_across_drives_by_due_time() {
        let (dda, params) = diagonal_move();
        let mut pool = DmPool::new(4);
        let mut platform = RecordingPlatform::new();

        let x = pool.allocate(0, DmState::Moving).unwrap();
        pool.get_mut(x).begin_segment(400, true);
        pool.get_mut(x).prepare_cartesian_axis(&dda, &params);
        let y = pool.allocate(1, DmState::Moving).unwrap();
        pool.get_mut(y).begin_segment(300, true);
        pool.get_mut(y).prepare_cartesian_axis(&dda, &params);

        let pulses = run_segment(&mut pool, &[x, y], &dda, &mut platform, false).unwrap();
        assert_eq!(pulses.len(), 700);
        assert_eq!(pulses.iter().filter(|p| p.drive == 0).count(), 400);
        for pair in pulses.windows(2) {
            assert!(pair[0].time <= pair[1].time, "pulses out of order");
        }
        assert_eq!(pool.get(x).state(), DmState::Idle);
        assert_eq!(pool.get(y).state(), DmState::Idle);
    }

    #[test]
    fn zero_step_records_finish_immediately() {
        let (dda, params) = diagonal_move();
        let mut pool = DmPool::new(2);
        let mut platform = RecordingPlatform::new();

        let h = pool.allocate(0, DmState::Moving).unwrap();
        pool.get_mut(h).begin_segment(0, true);
        pool.get_mut(h).prepare_cartesian_axis(&dda, &params);

        let pulses = run_segment(&mut pool, &[h], &dda, &mut platform, false).unwrap();
        assert!(pulses.is_empty());
        assert_eq!(pool.get(h).state(), DmState::Idle);
    }

    #[test]
    fn late_steps_surface_as_errors() {
        let (mut dda, params) = diagonal_move();
        let mut pool = DmPool::new(2);
        let mut platform = RecordingPlatform::new();

        let h = pool.allocate(0, DmState::Moving).unwrap();
        pool.get_mut(h).begin_segment(400, true);
        pool.get_mut(h).prepare_cartesian_axis(&dda, &params);
        // Cut the segment's clock budget in half; a mid-segment step must
        // now land late.
        dda.clocks_needed /= 2;

        let err = run_segment(&mut pool, &[h], &dda, &mut platform, false).unwrap_err();
        match err {
            SimError::Step { drive, .. } => assert_eq!(drive, 0),
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(pool.get(h).state(), DmState::StepError);
        // The diagnostic beacon marks the failure for the dump.
        assert!(pool.get(h).step_interval() > 10_000_000);
    }
}
