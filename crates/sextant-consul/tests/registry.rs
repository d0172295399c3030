//! Integration tests for the Consul backend against a fake agent.

#![allow(clippy::unwrap_used)]

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{connection_string, eventually, spawn_fake, RecordingListener};
use sextant_consul::convert::to_registration;
use sextant_consul::{ConsulAttrs, ConsulConfig, ConsulRegistry};
use sextant_core::{
    Listener, PluginConfig, PluginDirectory, RegistrationStatus, RegistryError, ServerInstance,
    ServiceRegistry, STATUS_DEREGISTER, STATUS_OK,
};

fn registry_for(connection: &str) -> ConsulRegistry {
    let plugin = PluginConfig::parse(connection).unwrap();
    ConsulRegistry::new(&ConsulConfig::from_plugin_config(&plugin).unwrap()).unwrap()
}

fn registry(addr: std::net::SocketAddr) -> ConsulRegistry {
    registry_for(&connection_string(addr))
}

fn instance(id: &str, port: u16) -> ServerInstance {
    ServerInstance::new(id, "store", format!("127.0.0.1:{port}")).with_tag("primary")
}

#[tokio::test]
async fn register_sends_service_with_check() {
    let (fake, addr) = spawn_fake().await;
    let registry = registry(addr);
    let mut me = instance("store-1", 6071);
    me.plugin_attrs.set("interval", "15s");

    registry.register(&me).await.unwrap();

    let stored = fake.get("store-1").unwrap().registration;
    assert_eq!(stored.name, "store");
    assert_eq!(stored.address, "127.0.0.1");
    assert_eq!(stored.port, 6071);
    assert_eq!(stored.tags, ["primary"]);
    assert_eq!(stored.check.http.as_deref(), Some("http://127.0.0.1:6071/health"));
    assert_eq!(stored.check.interval, "15s");
    assert_eq!(stored.check.deregister_critical_service_after, "2h");
    assert_eq!(registry.registered_ids(), ["store-1"]);
}

#[tokio::test]
async fn tcp_check_from_attrs() {
    let (fake, addr) = spawn_fake().await;
    let registry = registry(addr);
    let mut me = instance("store-1", 6071);
    me.plugin_attrs.set("check_type", "tcp");

    registry.register(&me).await.unwrap();

    let check = fake.get("store-1").unwrap().registration.check;
    assert_eq!(check.tcp.as_deref(), Some("127.0.0.1:6071"));
    assert_eq!(check.http, None);
}

#[tokio::test]
async fn rejected_register_is_not_remembered() {
    let (fake, addr) = spawn_fake().await;
    let registry = registry(addr);
    fake.reject_register.store(true, Ordering::SeqCst);

    let err = registry.register(&instance("store-1", 6071)).await.unwrap_err();

    assert!(matches!(err, RegistryError::Rejected { status: 400, .. }));
    assert!(registry.registered_ids().is_empty());
}

#[tokio::test]
async fn lookup_reports_aggregated_status() {
    let (fake, addr) = spawn_fake().await;
    let registry = registry(addr);
    registry.register(&instance("store-1", 6071)).await.unwrap();
    registry.register(&instance("store-2", 6072)).await.unwrap();
    fake.set_checks("store-2", &["passing", "warning", "critical"]);

    let found = registry.lookup("store", &[]).await.unwrap();

    assert_eq!(found.len(), 2);
    assert_eq!(found[0].id, "store-1");
    assert_eq!(found[0].status, STATUS_OK);
    assert_eq!(found[0].address, "127.0.0.1:6071");
    assert_eq!(found[1].status, "critical");
}

#[tokio::test]
async fn lookup_sends_one_tag_parameter_per_tag() {
    let (fake, addr) = spawn_fake().await;
    let registry = registry(addr);
    registry
        .register(&instance("store-1", 6071).with_tag("zone-a"))
        .await
        .unwrap();
    registry.register(&instance("store-2", 6072)).await.unwrap();

    let found = registry
        .lookup("store", &["primary".into(), "zone-a".into()])
        .await
        .unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, "store-1");
    assert_eq!(fake.queries().last().unwrap(), "tag=primary&tag=zone-a");
}

#[tokio::test]
async fn lookup_of_unknown_service_is_empty() {
    let (_fake, addr) = spawn_fake().await;
    assert!(registry(addr).lookup("nobody", &[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn datacenter_and_token_are_sent() {
    let (fake, addr) = spawn_fake().await;
    let registry = registry_for(&format!(
        "{}&datacenter=dc2&token=s3cr3t",
        connection_string(addr)
    ));

    registry.register(&instance("store-1", 6071)).await.unwrap();
    registry.lookup("store", &[]).await.unwrap();

    assert_eq!(fake.queries().last().unwrap(), "dc=dc2");
    assert!(fake
        .tokens()
        .iter()
        .all(|t| t.as_deref() == Some("s3cr3t")));
}

#[tokio::test]
async fn unregister_removes_service() {
    let (fake, addr) = spawn_fake().await;
    let registry = registry(addr);
    registry.register(&instance("store-1", 6071)).await.unwrap();

    registry.unregister("store-1").await.unwrap();

    assert!(fake.get("store-1").is_none());
    assert!(registry.registered_ids().is_empty());
}

#[tokio::test]
async fn unregister_unknown_id_sends_nothing() {
    let (fake, addr) = spawn_fake().await;
    let registry = registry(addr);

    let err = registry.unregister("ghost").await.unwrap_err();

    assert!(matches!(err, RegistryError::NotRegistered(ref id) if id == "ghost"));
    assert_eq!(fake.deregistrations(), 0);
}

#[tokio::test]
async fn failed_unregister_can_be_retried() {
    let (fake, addr) = spawn_fake().await;
    let registry = registry(addr);
    registry.register(&instance("store-1", 6071)).await.unwrap();
    fake.reject_deregister.store(true, Ordering::SeqCst);

    let err = registry.unregister("store-1").await.unwrap_err();

    assert!(matches!(
        err,
        RegistryError::Rejected {
            status: 500,
            operation: "deregister",
            ..
        }
    ));
    assert_eq!(registry.registered_ids(), ["store-1"]);
    assert_eq!(fake.ids(), ["store-1"]);

    fake.reject_deregister.store(false, Ordering::SeqCst);
    registry.unregister("store-1").await.unwrap();

    assert_eq!(fake.deregistrations(), 2);
    assert!(fake.ids().is_empty());
    assert!(registry.registered_ids().is_empty());
}

#[tokio::test]
async fn shutdown_deregisters_after_failed_unregister() {
    let (fake, addr) = spawn_fake().await;
    let registry = registry(addr);
    registry.register(&instance("store-1", 6071)).await.unwrap();
    fake.reject_deregister.store(true, Ordering::SeqCst);
    assert!(registry.unregister("store-1").await.is_err());

    fake.reject_deregister.store(false, Ordering::SeqCst);
    registry.shutdown(false).await;

    assert!(fake.ids().is_empty());
}

#[tokio::test]
async fn graceful_shutdown_deregisters() {
    let (fake, addr) = spawn_fake().await;
    let registry = registry(addr);
    registry.register(&instance("store-1", 6071)).await.unwrap();
    registry.register(&instance("store-2", 6072)).await.unwrap();

    registry.shutdown(false).await;

    assert!(fake.ids().is_empty());
    assert!(matches!(
        registry.lookup("store", &[]).await,
        Err(RegistryError::ShutDown)
    ));
}

#[tokio::test]
async fn interrupting_shutdown_leaves_services() {
    let (fake, addr) = spawn_fake().await;
    let registry = registry(addr);
    registry.register(&instance("store-1", 6071)).await.unwrap();

    registry.shutdown(true).await;

    assert_eq!(fake.ids(), ["store-1"]);
    assert_eq!(fake.deregistrations(), 0);
}

#[tokio::test]
async fn subscription_sees_health_transitions() {
    let (fake, addr) = spawn_fake().await;
    let registry = registry(addr);
    let peer = to_registration(
        &ServerInstance::new("store-9", "store", "10.0.0.9:6071"),
        &ConsulAttrs::default(),
    )
    .unwrap();
    fake.insert(peer, &["passing"]);

    let recording = RecordingListener::new();
    registry
        .subscribe("store", Arc::clone(&recording) as Listener)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(recording.events().is_empty());

    fake.set_checks("store-9", &["warning"]);
    eventually(|| recording.events().len() == 1).await;

    fake.remove("store-9");
    eventually(|| recording.events().len() == 2).await;

    let events = recording.events();
    assert_eq!(events[0].0, RegistrationStatus::Register);
    assert_eq!(events[0].1[0].status, "warning");
    assert_eq!(events[1].0, RegistrationStatus::Unregister);
    assert_eq!(events[1].1[0].id, "store-9");
    assert_eq!(events[1].1[0].status, STATUS_DEREGISTER);

    registry.shutdown(true).await;
}

#[tokio::test]
async fn installed_scheme_connects_through_directory() {
    let (_fake, addr) = spawn_fake().await;
    let directory = PluginDirectory::with_defaults();
    sextant_consul::install(&directory);

    let connection = directory.connect(&connection_string(addr)).unwrap();

    assert_eq!(connection.registry.name(), "consul");
    assert_eq!(connection.template.plugin_attrs.get("timeout"), Some("3s"));
    assert!(connection.registry.check_attrs(&connection.template.plugin_attrs).is_ok());
}
