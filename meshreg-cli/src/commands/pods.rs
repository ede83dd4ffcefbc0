//! `meshreg pods` — list instances from a running daemon's status API.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use meshreg_daemon::api::InstanceInfo;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Args, Debug)]
pub struct PodsArgs {
    /// Base URL of the status API.
    #[arg(long, env = "MESHREG_URL", default_value = "http://127.0.0.1:8080")]
    pub url: String,

    /// Query `/api/status/nodes` instead of `/api/topology/pods`.
    #[arg(long)]
    pub nodes: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct PodRow {
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "ip")]
    ip: String,
    #[tabled(rename = "ready")]
    ready: String,
}

impl PodsArgs {
    pub fn run(self) -> Result<()> {
        let path = if self.nodes { "/api/status/nodes" } else { "/api/topology/pods" };
        let endpoint = format!("{}{path}", self.url.trim_end_matches('/'));

        let pods: Vec<InstanceInfo> = ureq::get(&endpoint)
            .timeout(REQUEST_TIMEOUT)
            .call()
            .with_context(|| format!("failed to reach status api at {endpoint}"))?
            .into_json()
            .with_context(|| format!("unexpected response from {endpoint}"))?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&pods)?);
            return Ok(());
        }

        print_table(&pods);
        Ok(())
    }
}

fn print_table(pods: &[InstanceInfo]) {
    if pods.is_empty() {
        println!("No instances.");
        return;
    }

    let rows: Vec<PodRow> = pods
        .iter()
        .map(|pod| PodRow {
            name: pod.name.clone(),
            ip: pod.ip.clone(),
            ready: if pod.ready {
                "yes".green().to_string()
            } else {
                "no".red().to_string()
            },
        })
        .collect();

    let ready = pods.iter().filter(|pod| pod.ready).count();
    println!("{}", Table::new(rows).with(Style::rounded()));
    println!("{} instances, {} ready", pods.len(), ready);
}
