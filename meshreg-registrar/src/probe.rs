//! Instance health probe.
//!
//! One `GET http://<pod-ip>:<port><path>` with a short client timeout. Any
//! transport error counts as unhealthy. How a response code maps to a verdict
//! is decided by [`ProbePolarity`].

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use meshreg_core::InstanceSnapshot;

use crate::error::ProbeError;

pub const HEALTH_PATH: &str = "/healthcheck";
pub const HEALTH_PORT: u16 = 80;
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Verdict source for the registrar.
pub trait HealthProbe: Send + Sync {
    /// `Ok(true)` when the instance should receive traffic.
    fn probe(&self, snapshot: &InstanceSnapshot) -> Result<bool, ProbeError>;
}

/// Mapping from HTTP status code to health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbePolarity {
    /// `200 OK` is healthy, every other code is unhealthy.
    #[default]
    Corrected,
    /// `200 OK` is unhealthy, every other code is healthy. Kept for
    /// deployments whose health endpoints were written against that contract.
    Literal,
}

impl ProbePolarity {
    pub fn is_healthy(self, status: u16) -> bool {
        let ok = status == 200;
        match self {
            ProbePolarity::Corrected => ok,
            ProbePolarity::Literal => !ok,
        }
    }
}

impl fmt::Display for ProbePolarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbePolarity::Corrected => write!(f, "corrected"),
            ProbePolarity::Literal => write!(f, "literal"),
        }
    }
}

impl FromStr for ProbePolarity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "corrected" => Ok(Self::Corrected),
            "literal" => Ok(Self::Literal),
            other => Err(format!(
                "unknown probe polarity '{other}'; expected: corrected, literal"
            )),
        }
    }
}

/// Blocking HTTP probe built on a `ureq` agent.
#[derive(Clone)]
pub struct HttpProbe {
    agent: ureq::Agent,
    port: u16,
    path: String,
    polarity: ProbePolarity,
}

impl HttpProbe {
    pub fn new(polarity: ProbePolarity) -> Self {
        Self::with_target(polarity, PROBE_TIMEOUT, HEALTH_PORT, HEALTH_PATH)
    }

    pub fn with_target(
        polarity: ProbePolarity,
        timeout: Duration,
        port: u16,
        path: impl Into<String>,
    ) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .redirects(0)
            .build();
        Self {
            agent,
            port,
            path: path.into(),
            polarity,
        }
    }

    pub fn polarity(&self) -> ProbePolarity {
        self.polarity
    }

    fn url(&self, snapshot: &InstanceSnapshot) -> String {
        format!("http://{}:{}{}", snapshot.pod_ip, self.port, self.path)
    }
}

impl HealthProbe for HttpProbe {
    fn probe(&self, snapshot: &InstanceSnapshot) -> Result<bool, ProbeError> {
        let url = self.url(snapshot);
        let status = match self.agent.get(&url).call() {
            Ok(response) => response.status(),
            Err(ureq::Error::Status(code, _)) => code,
            Err(ureq::Error::Transport(transport)) => {
                return Err(ProbeError::Transport {
                    url,
                    message: transport.to_string(),
                })
            }
        };
        let healthy = self.polarity.is_healthy(status);
        tracing::debug!(url = %url, status, healthy, polarity = %self.polarity, "health probe");
        Ok(healthy)
    }
}
