//! `meshreg run` — start the registration daemon.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use meshreg_core::config::DEFAULT_DISCOVERY_ADDRESS;
use meshreg_core::DiscoveryConfig;
use meshreg_daemon::{DaemonSettings, RetryPolicy, DEFAULT_LISTEN, DEFAULT_RETRY_WORKERS};
use meshreg_registrar::{Connector, DryRunConnector, HttpConnector, Registrar};

use super::ProbeArgs;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Comma-separated registry nodes.
    #[arg(long, env = "DISCOVERY_ADDRESS", default_value = DEFAULT_DISCOVERY_ADDRESS)]
    pub discovery_address: String,

    /// Zone reported for instances that do not set one.
    #[arg(long, env = "ZONE", default_value = "")]
    pub zone: String,

    #[arg(long, env = "ENV", default_value = "")]
    pub env: String,

    #[arg(long, env = "REGION", default_value = "")]
    pub region: String,

    /// Directory of instance manifests to watch.
    #[arg(long, env = "MESHREG_MANIFESTS", default_value = "manifests")]
    pub manifests: PathBuf,

    /// Listen address of the status API.
    #[arg(long, env = "MESHREG_LISTEN", default_value = DEFAULT_LISTEN)]
    pub listen: SocketAddr,

    #[arg(long, default_value_t = DEFAULT_RETRY_WORKERS)]
    pub retry_workers: usize,

    /// Overall retry rate, items per second.
    #[arg(long, default_value_t = 10)]
    pub retry_qps: u32,

    #[arg(long, default_value_t = 100)]
    pub retry_burst: u32,

    #[command(flatten)]
    pub probe: ProbeArgs,

    /// Log registry calls instead of sending them.
    #[arg(long)]
    pub dry_run: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,
}

impl RunArgs {
    pub fn run(self) -> Result<()> {
        let config = DiscoveryConfig::new(&self.discovery_address, self.zone, self.env, self.region)
            .context("invalid discovery configuration")?;
        let config = Arc::new(config);
        let retry_policy =
            RetryPolicy::with_rate(self.retry_qps, self.retry_burst).context("invalid retry policy")?;

        let connector: Arc<dyn Connector> = if self.dry_run {
            Arc::new(DryRunConnector)
        } else {
            Arc::new(HttpConnector::new(config.clone()))
        };
        let registrar = Arc::new(Registrar::new(connector, Arc::new(self.probe.build())));

        let settings = DaemonSettings {
            manifests: self.manifests,
            listen: self.listen,
            retry_workers: self.retry_workers,
            retry_policy,
            log_json: self.log_json,
        };
        meshreg_daemon::start_blocking(settings, registrar).context("daemon exited with an error")
    }
}
