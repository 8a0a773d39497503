use crate::config::Config;
use anyhow::{Context, Result, bail};
use clap::Args;
use ostinato_core::dda::{Dda, MAX_DRIVES, MoveProfile, STEP_CLOCK_RATE, X_AXIS, Y_AXIS, Z_AXIS};
use ostinato_core::drive_movement::DmState;
use ostinato_core::pool::{DmHandle, DmPool};
use ostinato_core::sim::{self, SimError};
use std::path::PathBuf;

#[derive(Args)]
pub struct SimulateArgs {
    /// Path to the machine configuration (TOML or JSON).
    pub config: PathBuf,

    /// Move distance in mm.
    #[arg(long, default_value_t = 10.0)]
    pub distance: f32,

    /// Peak speed in mm/s.
    #[arg(long, default_value_t = 50.0)]
    pub speed: f32,

    /// Speed entering the segment in mm/s.
    #[arg(long, default_value_t = 0.0)]
    pub start_speed: f32,

    /// Speed leaving the segment in mm/s.
    #[arg(long, default_value_t = 0.0)]
    pub end_speed: f32,

    /// Acceleration in mm/s^2.
    #[arg(long, default_value_t = 1000.0)]
    pub accel: f32,

    /// Per-drive direction components, comma separated (e.g. "0.6,0.8,0,1").
    /// Axis components should form a unit vector; extruder components are
    /// the extrusion fraction of the move.
    #[arg(long, default_value = "1")]
    pub direction: String,

    /// Effector start position for delta machines, as "x,y,z".
    #[arg(long, default_value = "0,0,0")]
    pub from: String,

    /// Ignore configured pressure advance.
    #[arg(long)]
    pub no_pressure_advance: bool,

    /// Print every pulse as well as the per-drive summary.
    #[arg(long)]
    pub pulses: bool,
}

impl SimulateArgs {
    pub fn run(&self) -> Result<()> {
        // Initialize tracing
        tracing_subscriber::fmt::init();

        let config = Config::from_file(&self.config)?;
        config.validate()?;

        if self.distance <= 0.0 {
            bail!("--distance must be positive");
        }
        if self.accel <= 0.0 {
            bail!("--accel must be positive");
        }
        if self.speed <= 0.0 || self.speed < self.start_speed || self.speed < self.end_speed {
            bail!("--speed must be positive and at least the start and end speeds");
        }
        let accel_distance =
            (self.speed * self.speed - self.start_speed * self.start_speed) / (2.0 * self.accel);
        let decel_distance =
            (self.speed * self.speed - self.end_speed * self.end_speed) / (2.0 * self.accel);
        if accel_distance + decel_distance > self.distance * 1.0001 {
            bail!(
                "speeds do not fit the distance: {:.3} mm needed to accelerate and decelerate",
                accel_distance + decel_distance
            );
        }

        let direction = parse_vector(&self.direction, config.num_drives())?;
        let profile = MoveProfile {
            total_distance: self.distance,
            start_speed: self.start_speed,
            top_speed: self.speed,
            end_speed: self.end_speed,
            acceleration: self.accel,
            direction_vector: direction,
            is_delta: config.delta.is_some(),
        };
        let (dda, mut params) = Dda::plan(&profile);

        let mut platform = config.platform();
        let mut pool = DmPool::new(config.machine.pool_size);
        let mut handles: Vec<DmHandle> = Vec::new();

        if let Some(towers) = config.towers() {
            let [x0, y0, z0] = parse_point(&self.from)?;
            params.set_delta(x0, y0, towers.diagonal_squared(), &dda);
            for drive in 0..3 {
                let h0 = towers.carriage_height(drive, x0, y0, z0);
                let h1 = towers.carriage_height(
                    drive,
                    x0 + direction[X_AXIS] * self.distance,
                    y0 + direction[Y_AXIS] * self.distance,
                    z0 + direction[Z_AXIS] * self.distance,
                );
                if !h0.is_finite() || !h1.is_finite() {
                    bail!("move leaves the reachable area of tower {drive}");
                }
                let steps = ((h1 - h0).abs() * config.machine.steps_per_mm[drive]) as u32;
                let handle = allocate(&mut pool, drive as u8)?;
                let dm = pool.get_mut(handle);
                dm.begin_segment(steps, h1 >= h0);
                dm.prepare_delta_axis(&dda, &params, &towers, &platform);
                handles.push(handle);
            }
        }

        for drive in 0..config.num_drives() {
            if config.delta.is_some() && drive < 3 {
                continue; // tower drives prepared above
            }
            let component = direction[drive];
            if component.abs() <= f32::EPSILON {
                continue;
            }
            let steps = (self.distance * component.abs() * config.machine.steps_per_mm[drive])
                .round() as u32;
            let handle = allocate(&mut pool, drive as u8)?;
            let dm = pool.get_mut(handle);
            dm.begin_segment(steps, component > 0.0);
            if drive < config.machine.num_axes {
                dm.prepare_cartesian_axis(&dda, &params);
            } else {
                dm.prepare_extruder(&dda, &params, &platform, !self.no_pressure_advance);
            }
            handles.push(handle);
        }

        if handles.is_empty() {
            bail!("no drive takes part in this move");
        }

        let pulses = sim::run_segment(&mut pool, &handles, &dda, &mut platform, true)
            .context("simulation stopped")?;

        if self.pulses {
            for pulse in &pulses {
                println!(
                    "{:>10}  drive {}  {}",
                    pulse.time,
                    pulse.drive,
                    if pulse.forward { "+" } else { "-" }
                );
            }
        }

        println!(
            "{} pulses over {} clocks ({:.4} s)",
            pulses.len(),
            dda.clocks_needed,
            dda.clocks_needed as f64 / STEP_CLOCK_RATE as f64
        );
        for &handle in &handles {
            let dm = pool.get(handle);
            let emitted = pulses.iter().filter(|p| p.drive == dm.drive()).count();
            let reversal = if dm.reverse_start_step() <= dm.total_steps() {
                format!("reverses at step {}", dm.reverse_start_step())
            } else {
                "no reversal".to_string()
            };
            let flips = platform
                .direction_changes
                .iter()
                .filter(|(d, _)| *d == dm.drive() as usize)
                .count();
            println!(
                "  drive {}: {} pulses ({} planned), {}, {} direction change(s)",
                dm.drive(),
                emitted,
                dm.total_steps(),
                reversal,
                flips
            );
        }

        for handle in handles {
            pool.release(handle);
        }
        tracing::debug!(min_free = pool.min_free(), "record pool low-water mark");
        Ok(())
    }
}

fn allocate(pool: &mut DmPool, drive: u8) -> Result<DmHandle> {
    pool.allocate(drive, DmState::Moving)
        .ok_or_else(|| SimError::PoolExhausted.into())
}

fn parse_vector(input: &str, num_drives: usize) -> Result<[f32; MAX_DRIVES]> {
    let mut vector = [0.0f32; MAX_DRIVES];
    for (i, part) in input.split(',').enumerate() {
        if i >= num_drives {
            bail!("--direction has more components than the machine has drives");
        }
        vector[i] = part
            .trim()
            .parse()
            .with_context(|| format!("bad direction component {:?}", part.trim()))?;
    }
    Ok(vector)
}

fn parse_point(input: &str) -> Result<[f32; 3]> {
    let parts: Vec<&str> = input.split(',').collect();
    if parts.len() != 3 {
        bail!("--from must be \"x,y,z\"");
    }
    let mut point = [0.0f32; 3];
    for (i, part) in parts.iter().enumerate() {
        point[i] = part
            .trim()
            .parse()
            .with_context(|| format!("bad coordinate {:?}", part.trim()))?;
    }
    Ok(point)
}
