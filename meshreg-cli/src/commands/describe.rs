//! `meshreg describe` — show what would be registered for a manifest.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use meshreg_core::{descriptor, manifest};
use meshreg_registrar::HealthProbe;

use super::ProbeArgs;

#[derive(Args, Debug)]
pub struct DescribeArgs {
    /// Instance manifest (YAML).
    pub manifest: PathBuf,

    /// Probe the instance's health endpoint and let the verdict set the status.
    #[arg(long)]
    pub probe: bool,

    #[command(flatten)]
    pub probe_args: ProbeArgs,
}

impl DescribeArgs {
    pub fn run(self) -> Result<()> {
        let snapshot = manifest::load_snapshot_at(&self.manifest)
            .with_context(|| format!("failed to load manifest {}", self.manifest.display()))?;

        let verdict = if self.probe {
            let healthy = match self.probe_args.build().probe(&snapshot) {
                Ok(healthy) => healthy,
                Err(err) => {
                    eprintln!("{} {err}", "probe failed:".yellow());
                    false
                }
            };
            Some(healthy)
        } else {
            None
        };

        let instance = descriptor::build(&snapshot, verdict);
        println!(
            "{}",
            serde_json::to_string_pretty(&instance).context("failed to serialize descriptor")?
        );
        Ok(())
    }
}
