//! HTTP discovery client.
//!
//! Speaks the registry's form-encoded `/discovery/{register,renew,cancel}`
//! endpoints. Each request is tried against the configured nodes in order
//! until one answers with `code == 0`.
//!
//! After a successful register the handle keeps a renewal thread alive that
//! re-announces the instance every `renew_interval`. Cancel or drop stops it.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use serde::Deserialize;

use meshreg_core::{DiscoveryConfig, InstanceDescriptor, InstanceKey};

use crate::client::{Connector, DiscoveryClient};
use crate::error::ClientError;

/// Registry reply code for "instance not known".
pub const CODE_NOT_FOUND: i64 = -404;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct Reply {
    code: i64,
    #[serde(default)]
    message: String,
}

/// Builds [`HttpDiscoveryClient`] handles sharing one agent and one config.
#[derive(Clone)]
pub struct HttpConnector {
    agent: ureq::Agent,
    config: Arc<DiscoveryConfig>,
}

impl HttpConnector {
    pub fn new(config: Arc<DiscoveryConfig>) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        Self { agent, config }
    }
}

impl Connector for HttpConnector {
    fn connect(
        &self,
        key: &InstanceKey,
        hostname: &str,
    ) -> Result<Arc<dyn DiscoveryClient>, ClientError> {
        if self.config.nodes.is_empty() {
            return Err(ClientError::Config("node list is empty".to_string()));
        }
        if hostname.is_empty() {
            return Err(ClientError::Config(format!("instance {key} has no hostname")));
        }
        Ok(Arc::new(HttpDiscoveryClient {
            wire: Arc::new(Wire {
                agent: self.agent.clone(),
                config: self.config.clone(),
                hostname: hostname.to_owned(),
            }),
            renewer: Mutex::new(None),
        }))
    }
}

pub struct HttpDiscoveryClient {
    wire: Arc<Wire>,
    renewer: Mutex<Option<mpsc::Sender<()>>>,
}

impl DiscoveryClient for HttpDiscoveryClient {
    fn register(&self, instance: &InstanceDescriptor) -> Result<(), ClientError> {
        let form = self.wire.register_form(instance)?;
        self.wire.post("register", &form)?;

        let stop = spawn_renewer(self.wire.clone(), form, instance.app_id.clone());
        let previous = self
            .renewer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(stop);
        // Dropping the old sender ends the previous renewal loop.
        drop(previous);
        Ok(())
    }

    fn cancel(&self, app_id: &str) -> Result<(), ClientError> {
        self.renewer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let form = self.wire.identity_form(app_id);
        self.wire.post("cancel", &form)
    }
}

type Form = Vec<(&'static str, String)>;

struct Wire {
    agent: ureq::Agent,
    config: Arc<DiscoveryConfig>,
    hostname: String,
}

impl Wire {
    fn or_config(value: &str, fallback: &str) -> String {
        if value.is_empty() {
            fallback.to_owned()
        } else {
            value.to_owned()
        }
    }

    fn identity_form(&self, app_id: &str) -> Form {
        vec![
            ("zone", self.config.zone.clone()),
            ("env", self.config.env.clone()),
            ("appid", app_id.to_owned()),
            ("hostname", self.hostname.clone()),
        ]
    }

    fn register_form(&self, d: &InstanceDescriptor) -> Result<Form, ClientError> {
        let mut form = vec![
            ("zone", Self::or_config(&d.zone, &self.config.zone)),
            ("env", Self::or_config(&d.env, &self.config.env)),
            ("region", Self::or_config(&d.region, &self.config.region)),
            ("appid", d.app_id.clone()),
            ("hostname", self.hostname.clone()),
            ("status", d.status.code().to_string()),
            ("version", d.version.clone()),
            ("latest_timestamp", d.last_ts.to_string()),
            ("metadata", serde_json::to_string(&d.metadata)?),
        ];
        form.extend(d.addrs.iter().map(|addr| ("addrs", addr.clone())));
        Ok(form)
    }

    fn post(&self, op: &'static str, form: &Form) -> Result<(), ClientError> {
        let pairs: Vec<(&str, &str)> = form.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let mut last_err = ClientError::Config("node list is empty".to_string());

        for node in &self.config.nodes {
            let url = format!("{}/discovery/{op}", base_url(node));
            let err = match self.agent.post(&url).send_form(&pairs) {
                Ok(response) => match response.into_json::<Reply>() {
                    Ok(reply) if reply.code == 0 => return Ok(()),
                    Ok(reply) => ClientError::Rejected {
                        node: node.clone(),
                        op,
                        code: reply.code,
                        message: reply.message,
                    },
                    Err(err) => ClientError::Transport {
                        node: node.clone(),
                        message: format!("unreadable reply: {err}"),
                    },
                },
                Err(ureq::Error::Status(code, response)) => ClientError::Rejected {
                    node: node.clone(),
                    op,
                    code: i64::from(code),
                    message: response.status_text().to_owned(),
                },
                Err(ureq::Error::Transport(transport)) => ClientError::Transport {
                    node: node.clone(),
                    message: transport.to_string(),
                },
            };
            // Not-found is authoritative; asking another node won't change it.
            if matches!(err, ClientError::Rejected { code: CODE_NOT_FOUND, .. }) {
                return Err(err);
            }
            tracing::debug!(node = %node, op, error = %err, "discovery node attempt failed");
            last_err = err;
        }
        Err(last_err)
    }
}

fn base_url(node: &str) -> String {
    if node.contains("://") {
        node.trim_end_matches('/').to_owned()
    } else {
        format!("http://{}", node.trim_end_matches('/'))
    }
}

fn spawn_renewer(wire: Arc<Wire>, register_form: Form, app_id: String) -> mpsc::Sender<()> {
    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let interval = wire.config.renew_interval;
    thread::spawn(move || loop {
        match stop_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        let renewed = wire.post("renew", &wire.identity_form(&app_id));
        let outcome = match renewed {
            Err(ClientError::Rejected { code: CODE_NOT_FOUND, .. }) => {
                tracing::info!(app_id = %app_id, hostname = %wire.hostname, "renew not found, re-registering");
                wire.post("register", &register_form)
            }
            other => other,
        };
        if let Err(err) = outcome {
            tracing::warn!(app_id = %app_id, hostname = %wire.hostname, error = %err, "renew failed");
        }
    });
    stop_tx
}
