//! Descriptor mapping tests: readiness, probe override, env scanning order.

use meshreg_core::descriptor::{self, env_keys, meta_keys};
use meshreg_core::{Container, ContainerStatus, EnvVar, InstanceSnapshot, InstanceStatus, Phase};
use rstest::rstest;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn pod(containers: Vec<Container>, ready: &[bool]) -> InstanceSnapshot {
    InstanceSnapshot {
        name: "orders-7d9f".into(),
        namespace: "shop".into(),
        resource_version: "42".into(),
        phase: Phase::Running,
        pod_ip: "172.16.4.9".into(),
        containers,
        container_statuses: ready
            .iter()
            .enumerate()
            .map(|(i, r)| ContainerStatus { name: format!("c{i}"), ready: *r })
            .collect(),
    }
}

fn container(env: &[(&str, &str)]) -> Container {
    Container {
        name: "app".into(),
        env: env.iter().map(|(k, v)| EnvVar::new(*k, *v)).collect(),
    }
}

// ---------------------------------------------------------------------------
// 1. Identity fields
// ---------------------------------------------------------------------------

#[test]
fn hostname_and_address_come_from_pod() {
    let d = descriptor::build(&pod(vec![], &[true]), None);
    assert_eq!(d.hostname, "orders-7d9f");
    assert_eq!(d.addrs, vec!["http://172.16.4.9:80".to_string()]);
    assert!(d.last_ts > 0);
}

#[test]
fn env_fields_map_onto_descriptor() {
    let c = container(&[
        (env_keys::CLUSTER_UID, "zone-a"),
        (env_keys::RUNTIME, "go"),
        (env_keys::UNIQUE_ID, "orders"),
        (env_keys::SITE_UID, "cn-east"),
        (env_keys::VERSION, "1.4.2"),
        (env_keys::SERVICE_NAME, "orders-svc"),
        (env_keys::PROTOCOL_MODE, "grpc"),
        (env_keys::IMAGE_URL, "registry.local/orders:1.4.2"),
        (env_keys::GATEWAY_ADDR, "10.0.0.1:8080"),
        (env_keys::WEIGHT, "30"),
    ]);
    let d = descriptor::build_at(&pod(vec![c], &[true]), None, 7);

    assert_eq!(d.zone, "zone-a");
    assert_eq!(d.env, "go");
    assert_eq!(d.app_id, "orders");
    assert_eq!(d.region, "cn-east");
    assert_eq!(d.version, "1.4.2");
    assert_eq!(d.metadata[meta_keys::RUNTIME], "go");
    assert_eq!(d.metadata[meta_keys::SERVICE_NAME], "orders-svc");
    assert_eq!(d.metadata[meta_keys::MODE], "grpc");
    assert_eq!(d.metadata[meta_keys::SERVICE_IMAGE], "registry.local/orders:1.4.2");
    assert_eq!(d.metadata[meta_keys::SERVICE_GATEWAY_ADDR], "10.0.0.1:8080");
    assert_eq!(d.metadata[meta_keys::WEIGHT], "30");
    assert_eq!(d.metadata[meta_keys::CERT_SN], "");
}

// ---------------------------------------------------------------------------
// 2. Status
// ---------------------------------------------------------------------------

#[rstest]
#[case(&[true, true], InstanceStatus::Receiving)]
#[case(&[true, false], InstanceStatus::NotReceiving)]
#[case(&[false], InstanceStatus::NotReceiving)]
#[case(&[], InstanceStatus::Receiving)]
fn status_follows_readiness_without_probe(
    #[case] ready: &[bool],
    #[case] expected: InstanceStatus,
) {
    let d = descriptor::build_at(&pod(vec![], ready), None, 0);
    assert_eq!(d.status, expected);
}

#[rstest]
#[case(&[false], Some(true), InstanceStatus::Receiving)]
#[case(&[true], Some(false), InstanceStatus::NotReceiving)]
#[case(&[true], Some(true), InstanceStatus::Receiving)]
fn probe_verdict_overrides_readiness(
    #[case] ready: &[bool],
    #[case] probe: Option<bool>,
    #[case] expected: InstanceStatus,
) {
    let d = descriptor::build_at(&pod(vec![], ready), probe, 0);
    assert_eq!(d.status, expected);
}

// ---------------------------------------------------------------------------
// 3. Weight and last-writer-wins
// ---------------------------------------------------------------------------

#[rstest]
#[case(&[])]
#[case(&[(env_keys::WEIGHT, "")])]
fn weight_defaults_to_ten(#[case] env: &[(&str, &str)]) {
    let d = descriptor::build_at(&pod(vec![container(env)], &[true]), None, 0);
    assert_eq!(d.metadata[meta_keys::WEIGHT], "10");
}

#[test]
fn later_container_wins_on_conflict() {
    let first = container(&[(env_keys::UNIQUE_ID, "svc1"), (env_keys::WEIGHT, "20")]);
    let second = container(&[(env_keys::WEIGHT, "5")]);
    let d = descriptor::build_at(&pod(vec![first, second], &[true, true]), None, 0);
    assert_eq!(d.app_id, "svc1");
    assert_eq!(d.metadata[meta_keys::WEIGHT], "5");
}

#[test]
fn empty_weight_after_set_weight_falls_back_to_default() {
    let first = container(&[(env_keys::WEIGHT, "20")]);
    let second = container(&[(env_keys::WEIGHT, "")]);
    let d = descriptor::build_at(&pod(vec![first, second], &[true, true]), None, 0);
    assert_eq!(d.weight(), "10");
}

// ---------------------------------------------------------------------------
// 4. Serialized shape
// ---------------------------------------------------------------------------

#[test]
fn descriptor_serializes_with_snake_case_status() {
    let d = descriptor::build_at(&pod(vec![], &[false]), None, 1_700_000_000);
    let json = serde_json::to_value(&d).expect("serialize");

    assert_eq!(json["status"], "not_receiving");
    assert_eq!(json["last_ts"], 1_700_000_000);
    assert_eq!(json["metadata"][meta_keys::WEIGHT], "10");
    assert_eq!(json["metadata"][meta_keys::CERT_SN], "");
    assert!(json["metadata"].get(meta_keys::RUNTIME).is_none(), "unset env leaves no key");
}
