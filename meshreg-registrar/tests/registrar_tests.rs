//! Registrar handle-cache and retry-safety tests against an in-memory registry.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use meshreg_core::descriptor::env_keys;
use meshreg_core::{
    Container, ContainerStatus, EnvVar, InstanceDescriptor, InstanceKey, InstanceSnapshot,
    InstanceStatus, Phase,
};
use rstest::rstest;

use meshreg_registrar::{
    ClientError, Connector, DiscoveryClient, HealthProbe, HealthVerdict, ProbeError, Registrar,
    RegistrarError,
};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Calls {
    registered: Mutex<Vec<InstanceDescriptor>>,
    cancelled: Mutex<Vec<String>>,
}

struct FakeClient {
    calls: Arc<Calls>,
    fail_register: bool,
    fail_cancel: bool,
}

impl DiscoveryClient for FakeClient {
    fn register(&self, instance: &InstanceDescriptor) -> Result<(), ClientError> {
        if self.fail_register {
            return Err(ClientError::Transport {
                node: "fake".into(),
                message: "connection reset".into(),
            });
        }
        self.calls.registered.lock().unwrap().push(instance.clone());
        Ok(())
    }

    fn cancel(&self, app_id: &str) -> Result<(), ClientError> {
        self.calls.cancelled.lock().unwrap().push(app_id.to_string());
        if self.fail_cancel {
            return Err(ClientError::Rejected {
                node: "fake".into(),
                op: "cancel",
                code: -500,
                message: "boom".into(),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
struct FakeConnector {
    calls: Arc<Calls>,
    connects: AtomicUsize,
    fail_connect: AtomicBool,
    fail_register: bool,
    fail_cancel: bool,
    connect_delay: Option<Duration>,
}

impl Connector for FakeConnector {
    fn connect(
        &self,
        _key: &InstanceKey,
        _hostname: &str,
    ) -> Result<Arc<dyn DiscoveryClient>, ClientError> {
        if let Some(delay) = self.connect_delay {
            thread::sleep(delay);
        }
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(ClientError::Config("nodes unreachable".into()));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeClient {
            calls: self.calls.clone(),
            fail_register: self.fail_register,
            fail_cancel: self.fail_cancel,
        }))
    }
}

struct FixedProbe(Result<bool, ()>);

impl HealthProbe for FixedProbe {
    fn probe(&self, _snapshot: &InstanceSnapshot) -> Result<bool, ProbeError> {
        self.0.map_err(|()| ProbeError::Transport {
            url: "http://fake/healthcheck".into(),
            message: "timed out".into(),
        })
    }
}

fn registrar(connector: Arc<FakeConnector>, probe: Result<bool, ()>) -> Registrar {
    Registrar::new(connector, Arc::new(FixedProbe(probe)))
}

fn pod(name: &str) -> InstanceSnapshot {
    InstanceSnapshot {
        name: name.into(),
        namespace: "shop".into(),
        resource_version: "1".into(),
        phase: Phase::Running,
        pod_ip: "10.2.0.8".into(),
        containers: vec![Container {
            name: "app".into(),
            env: vec![EnvVar::new(env_keys::UNIQUE_ID, "orders")],
        }],
        container_statuses: vec![ContainerStatus { name: "app".into(), ready: true }],
    }
}

// ---------------------------------------------------------------------------
// 1. Register
// ---------------------------------------------------------------------------

#[test]
fn register_creates_one_handle_and_reuses_it() {
    let connector = Arc::new(FakeConnector::default());
    let reg = registrar(connector.clone(), Ok(true));

    reg.register(&pod("web-0")).expect("first register");
    reg.register(&pod("web-0")).expect("replayed register");

    assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    assert_eq!(reg.len(), 1);
    assert!(reg.contains(&InstanceKey::from("shop/web-0")));

    let registered = connector.calls.registered.lock().unwrap();
    assert_eq!(registered.len(), 2);
    assert_eq!(registered[0].hostname, "web-0");
    assert_eq!(registered[0].addrs, vec!["http://10.2.0.8:80".to_string()]);
    assert_eq!(registered[0].status, InstanceStatus::Receiving);
}

#[rstest]
#[case::healthy(Ok(true), InstanceStatus::Receiving)]
#[case::unhealthy(Ok(false), InstanceStatus::NotReceiving)]
#[case::probe_error(Err(()), InstanceStatus::NotReceiving)]
fn register_status_follows_probe(#[case] probe: Result<bool, ()>, #[case] expected: InstanceStatus) {
    let connector = Arc::new(FakeConnector::default());
    let reg = registrar(connector.clone(), probe);

    reg.register(&pod("web-0")).expect("register");

    let registered = connector.calls.registered.lock().unwrap();
    assert_eq!(registered[0].status, expected);
}

#[test]
fn register_failure_is_returned_and_keeps_handle() {
    let connector = Arc::new(FakeConnector {
        fail_register: true,
        ..Default::default()
    });
    let reg = registrar(connector.clone(), Ok(true));

    let err = reg.register(&pod("web-0")).unwrap_err();
    assert!(matches!(err, RegistrarError::Register { ref app_id, .. } if app_id == "orders"));
    assert_eq!(err.key().as_str(), "shop/web-0");
    assert_eq!(reg.len(), 1, "register never destroys a handle");
}

#[test]
fn connect_failure_surfaces_and_caches_nothing() {
    let connector = Arc::new(FakeConnector::default());
    connector.fail_connect.store(true, Ordering::SeqCst);
    let reg = registrar(connector.clone(), Ok(true));

    let err = reg.register(&pod("web-0")).unwrap_err();
    assert!(matches!(err, RegistrarError::Connect { .. }), "got: {err}");
    assert!(reg.is_empty());

    let err = reg.cancel(&pod("web-0")).unwrap_err();
    assert!(matches!(err, RegistrarError::Connect { .. }), "got: {err}");
    assert!(connector.calls.cancelled.lock().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// 2. Cancel
// ---------------------------------------------------------------------------

#[test]
fn cancel_uses_app_id_and_evicts() {
    let connector = Arc::new(FakeConnector::default());
    let reg = registrar(connector.clone(), Ok(true));

    reg.register(&pod("web-0")).expect("register");
    reg.cancel(&pod("web-0")).expect("cancel");

    assert_eq!(*connector.calls.cancelled.lock().unwrap(), vec!["orders".to_string()]);
    assert!(reg.is_empty());
}

#[test]
fn cancel_error_is_swallowed_and_still_evicts() {
    let connector = Arc::new(FakeConnector {
        fail_cancel: true,
        ..Default::default()
    });
    let reg = registrar(connector.clone(), Ok(true));

    reg.register(&pod("web-0")).expect("register");
    reg.cancel(&pod("web-0")).expect("cancel errors are not surfaced");
    assert!(reg.is_empty());
}

#[test]
fn cancel_of_unknown_instance_creates_then_drops_handle() {
    let connector = Arc::new(FakeConnector::default());
    let reg = registrar(connector.clone(), Ok(true));

    reg.cancel(&pod("never-registered")).expect("cancel");

    assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    assert_eq!(connector.calls.cancelled.lock().unwrap().len(), 1);
    assert!(reg.is_empty());
}

#[test]
fn replayed_cancel_is_harmless() {
    let connector = Arc::new(FakeConnector::default());
    let reg = registrar(connector.clone(), Ok(true));

    reg.register(&pod("web-0")).expect("register");
    reg.cancel(&pod("web-0")).expect("cancel");
    reg.cancel(&pod("web-0")).expect("replayed cancel");

    assert_eq!(connector.calls.cancelled.lock().unwrap().len(), 2);
    assert!(reg.is_empty());
}

// ---------------------------------------------------------------------------
// 3. Health check
// ---------------------------------------------------------------------------

#[test]
fn healthy_probe_leaves_registry_alone_but_evicts() {
    let connector = Arc::new(FakeConnector::default());
    let reg = registrar(connector.clone(), Ok(true));
    reg.register(&pod("web-0")).expect("register");

    let verdict = reg.health_check_or_cancel(&pod("web-0")).expect("check");

    assert_eq!(verdict, HealthVerdict::Healthy);
    assert!(connector.calls.cancelled.lock().unwrap().is_empty());
    assert!(reg.is_empty());
}

#[rstest]
#[case::unhealthy(Ok(false))]
#[case::probe_error(Err(()))]
fn unhealthy_or_failed_probe_cancels(#[case] probe: Result<bool, ()>) {
    let connector = Arc::new(FakeConnector::default());
    let reg = registrar(connector.clone(), probe);

    let verdict = reg.health_check_or_cancel(&pod("web-0")).expect("check");

    assert_eq!(verdict, HealthVerdict::Cancelled);
    assert_eq!(*connector.calls.cancelled.lock().unwrap(), vec!["orders".to_string()]);
    assert!(reg.is_empty());
}

// ---------------------------------------------------------------------------
// 4. Concurrency
// ---------------------------------------------------------------------------

#[test]
fn concurrent_registers_converge_to_one_handle() {
    let connector = Arc::new(FakeConnector {
        connect_delay: Some(Duration::from_millis(20)),
        ..Default::default()
    });
    let reg = Arc::new(registrar(connector.clone(), Ok(true)));

    thread::scope(|scope| {
        for _ in 0..16 {
            let reg = reg.clone();
            scope.spawn(move || reg.register(&pod("web-0")).expect("register"));
        }
    });

    assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    assert_eq!(reg.keys(), vec![InstanceKey::from("shop/web-0")]);
    assert_eq!(connector.calls.registered.lock().unwrap().len(), 16);

    reg.cancel(&pod("web-0")).expect("cancel");
    assert_eq!(connector.connects.load(Ordering::SeqCst), 1, "cancel reused the cached handle");
    assert!(reg.is_empty());
}

#[test]
fn distinct_keys_get_distinct_handles() {
    let connector = Arc::new(FakeConnector::default());
    let reg = registrar(connector.clone(), Ok(true));

    reg.register(&pod("web-0")).expect("register");
    reg.register(&pod("web-1")).expect("register");

    assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    assert_eq!(reg.len(), 2);
}
