use anyhow::{Context, Result};
use ostinato_core::dda::MAX_DRIVES;
use ostinato_core::geometry::DeltaTowers;
use ostinato_core::platform::RecordingPlatform;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Machine description for the step timing tools
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Drive calibration and sizing
    #[serde(default)]
    pub machine: MachineConfig,

    /// Present only on linear delta machines
    pub delta: Option<DeltaConfig>,
}

/// Drive calibration and sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Steps per mm, one entry per drive
    #[serde(default = "default_steps_per_mm")]
    pub steps_per_mm: Vec<f32>,

    /// Pressure advance in seconds, one entry per drive (axes stay zero)
    #[serde(default)]
    pub pressure_advance: Vec<f32>,

    /// Drive movement records to pre-allocate
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Leading drives that are axes; the rest are extruders
    #[serde(default = "default_num_axes")]
    pub num_axes: usize,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            steps_per_mm: default_steps_per_mm(),
            pressure_advance: Vec::new(),
            pool_size: default_pool_size(),
            num_axes: default_num_axes(),
        }
    }
}

/// Linear delta geometry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaConfig {
    /// Diagonal rod length in mm
    pub diagonal: f32,

    /// Horizontal distance from the centre to each tower in mm
    pub radius: f32,
}

fn default_steps_per_mm() -> Vec<f32> {
    vec![80.0, 80.0, 80.0, 420.0]
}

fn default_pool_size() -> usize {
    16
}

fn default_num_axes() -> usize {
    3
}

impl Config {
    /// Load configuration from a file, auto-detecting TOML or JSON format
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        // Try to determine format from extension
        let extension = path.extension().and_then(|s| s.to_str());

        match extension {
            Some("toml") => Self::from_toml(&content),
            Some("json") => Self::from_json(&content),
            _ => {
                // Try TOML first (preferred), fall back to JSON
                Self::from_toml(&content).or_else(|_| Self::from_json(&content))
            }
        }
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("failed to parse config as TOML")
    }

    /// Parse configuration from JSON string
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("failed to parse config as JSON")
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let machine = &self.machine;
        if machine.steps_per_mm.is_empty() {
            anyhow::bail!("machine.steps_per_mm cannot be empty");
        }
        if machine.steps_per_mm.len() > MAX_DRIVES {
            anyhow::bail!("machine.steps_per_mm supports at most {MAX_DRIVES} drives");
        }
        if machine.steps_per_mm.iter().any(|s| *s <= 0.0) {
            anyhow::bail!("machine.steps_per_mm entries must be positive");
        }
        if machine.pressure_advance.len() > machine.steps_per_mm.len() {
            anyhow::bail!("machine.pressure_advance has more entries than there are drives");
        }
        if machine.pool_size == 0 {
            anyhow::bail!("machine.pool_size must be at least 1");
        }
        if machine.num_axes > machine.steps_per_mm.len() {
            anyhow::bail!("machine.num_axes exceeds the number of drives");
        }

        if let Some(delta) = &self.delta {
            if machine.num_axes < 3 {
                anyhow::bail!("a delta machine needs three tower drives");
            }
            if delta.diagonal <= 0.0 || delta.radius <= 0.0 {
                anyhow::bail!("delta.diagonal and delta.radius must be positive");
            }
            if delta.diagonal <= delta.radius {
                anyhow::bail!("delta.diagonal must exceed delta.radius");
            }
        }

        Ok(())
    }

    pub fn num_drives(&self) -> usize {
        self.machine.steps_per_mm.len()
    }

    /// Build the recording platform the simulator drives.
    pub fn platform(&self) -> RecordingPlatform {
        let mut platform = RecordingPlatform::new();
        for (drive, steps) in self.machine.steps_per_mm.iter().enumerate() {
            platform.set_steps_per_unit(drive, *steps);
        }
        for (drive, seconds) in self.machine.pressure_advance.iter().enumerate() {
            platform.set_pressure_advance(drive, *seconds);
        }
        platform
    }

    pub fn towers(&self) -> Option<DeltaTowers> {
        self.delta
            .as_ref()
            .map(|d| DeltaTowers::new(d.radius, d.diagonal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_toml() {
        let toml = r#"
[machine]
steps_per_mm = [160.0, 160.0, 160.0, 420.0]
pressure_advance = [0.0, 0.0, 0.0, 0.05]
pool_size = 8
num_axes = 3

[delta]
diagonal = 250.0
radius = 100.0
"#;

        let config = Config::from_toml(toml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.machine.steps_per_mm.len(), 4);
        assert_eq!(config.machine.pool_size, 8);
        assert_eq!(config.delta.as_ref().unwrap().diagonal, 250.0);
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{
            "machine": {
                "steps_per_mm": [80.0, 80.0, 400.0],
                "num_axes": 2
            }
        }"#;

        let config = Config::from_json(json).unwrap();
        config.validate().unwrap();
        assert_eq!(config.machine.steps_per_mm.len(), 3);
        assert_eq!(config.machine.num_axes, 2);
        assert!(config.delta.is_none());
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_toml("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.machine.steps_per_mm, vec![80.0, 80.0, 80.0, 420.0]);
        assert_eq!(config.machine.pool_size, 16);
        assert_eq!(config.machine.num_axes, 3);
    }

    #[test]
    fn rejects_flat_delta_geometry() {
        let config = Config::from_toml(
            r#"
[delta]
diagonal = 90.0
radius = 100.0
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn platform_carries_calibration() {
        let config = Config::from_toml(
            r#"
[machine]
steps_per_mm = [100.0, 200.0]
pressure_advance = [0.0, 0.03]
num_axes = 1
"#,
        )
        .unwrap();
        let platform = config.platform();
        use ostinato_core::platform::Platform;
        assert_eq!(platform.drive_steps_per_unit(1), 200.0);
        assert_eq!(platform.pressure_advance(1), 0.03);
    }
}
