use anyhow::Result;
use clap::Subcommand;
use xshell::{Shell, cmd};

#[derive(Subcommand)]
pub enum Command {
    /// Build the workspace
    Build,
    /// Run CI checks (fmt check, clippy, test)
    Ci,
    /// Apply rustfmt to all files
    Fmt,
    /// Run tests
    Test,
}

impl Command {
    pub fn run(self, sh: &Shell) -> Result<()> {
        match self {
            Command::Build => build(sh),
            Command::Ci => ci(sh),
            Command::Fmt => fmt(sh, false),
            Command::Test => test(sh),
        }
    }
}

fn build(sh: &Shell) -> Result<()> {
    cmd!(sh, "cargo build --workspace").run()?;
    Ok(())
}

fn ci(sh: &Shell) -> Result<()> {
    fmt(sh, true)?;
    clippy(sh)?;
    test(sh)?;
    Ok(())
}

fn fmt(sh: &Shell, check: bool) -> Result<()> {
    ensure_nightly_rustfmt(sh)?;
    if check {
        eprintln!("Running cargo fmt check...");
        cmd!(sh, "cargo +nightly fmt --all -- --check").run()?;
    } else {
        eprintln!("Applying cargo fmt...");
        cmd!(sh, "cargo +nightly fmt --all").run()?;
    }
    Ok(())
}

fn clippy(sh: &Shell) -> Result<()> {
    eprintln!("Running cargo clippy...");
    cmd!(
        sh,
        "cargo clippy --all-features --all-targets --workspace -- -D warnings"
    )
    .run()?;
    Ok(())
}

fn test(sh: &Shell) -> Result<()> {
    cmd!(sh, "cargo test --workspace").run()?;
    Ok(())
}

/// Ensures nightly rustfmt is available, installing if necessary
fn ensure_nightly_rustfmt(sh: &Shell) -> Result<()> {
    if cmd!(sh, "cargo +nightly fmt --version")
        .quiet()
        .run()
        .is_err()
    {
        eprintln!("Installing nightly rustfmt...");
        cmd!(
            sh,
            "rustup toolchain install nightly --profile minimal --component rustfmt"
        )
        .run()?;
    }
    Ok(())
}
