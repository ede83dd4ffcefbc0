pub mod describe;
pub mod pods;
pub mod run;

use std::time::Duration;

use clap::Args;

use meshreg_registrar::probe::{HEALTH_PATH, HEALTH_PORT};
use meshreg_registrar::{HttpProbe, ProbePolarity};

/// Health probe flags shared by `run` and `describe`.
#[derive(Args, Debug, Clone)]
pub struct ProbeArgs {
    /// How the health endpoint's status code maps to a verdict.
    #[arg(long, env = "PROBE_POLARITY", default_value_t = ProbePolarity::Corrected)]
    pub probe_polarity: ProbePolarity,

    /// Probe timeout in milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub probe_timeout_ms: u64,
}

impl ProbeArgs {
    pub fn build(&self) -> HttpProbe {
        HttpProbe::with_target(
            self.probe_polarity,
            Duration::from_millis(self.probe_timeout_ms),
            HEALTH_PORT,
            HEALTH_PATH,
        )
    }
}
