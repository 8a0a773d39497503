use crate::config::Config;
use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

#[derive(Args)]
pub struct CheckConfigArgs {
    /// Path to the configuration file (TOML or JSON).
    pub config: PathBuf,
}

impl CheckConfigArgs {
    pub fn run(&self) -> Result<()> {
        let config = Config::from_file(&self.config)?;
        config.validate()?;

        println!("OK {}", self.config.display());
        println!(
            "  {} drives ({} axes), pool of {} records",
            config.num_drives(),
            config.machine.num_axes,
            config.machine.pool_size
        );
        match &config.delta {
            Some(delta) => println!(
                "  delta: diagonal {} mm, radius {} mm",
                delta.diagonal, delta.radius
            ),
            None => println!("  cartesian"),
        }
        Ok(())
    }
}
