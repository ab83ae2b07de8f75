use std::time::Duration;

use mcu_core::{
    BrokerClient, BrokerEndpoint, ClusterNode, HealthChecker, Job, LoadSample, McuError, RateStore,
    RegistryClient,
};
use mcu_infrastructure::{InMemoryRateStore, SimulatedBroker, SimulatedRegistry};
use serde_json::json;

fn endpoint(host: &str) -> BrokerEndpoint {
    BrokerEndpoint::new(
        "guest:guest",
        format!("amqp://{host}:5672"),
        format!("http://{host}:15672/api/healthchecks/node"),
    )
}

fn node() -> ClusterNode {
    ClusterNode {
        purpose: "mcu".to_string(),
        ip: "127.0.0.1".to_string(),
        port: 12009,
        hostname: "test".to_string(),
        load_item: "cpu".to_string(),
        last_heartbeat: None,
    }
}

fn sample() -> LoadSample {
    LoadSample {
        item: "cpu".to_string(),
        value: 12.5,
        busy_workers: 1,
        timestamp: chrono::Utc::now(),
    }
}

#[tokio::test]
async fn test_broker_fetch_in_order() {
    let broker = SimulatedBroker::new(Duration::ZERO);
    let first = Job::new("live", json!({"room": 1}));
    let second = Job::new("live", json!({"room": 2}));
    broker.push(first.clone()).await;
    broker.push(second.clone()).await;

    let ep = endpoint("a");
    assert_eq!(broker.fetch(&ep, "live").await.unwrap().unwrap().id, first.id);
    assert_eq!(broker.fetch(&ep, "live").await.unwrap().unwrap().id, second.id);
    assert!(broker.fetch(&ep, "live").await.unwrap().is_none());
    assert_eq!(broker.fetch_count("live").await, 2);
}

#[tokio::test]
async fn test_broker_failing_endpoint() {
    let broker = SimulatedBroker::new(Duration::ZERO);
    broker.seed("live", 1).await;
    let ep = endpoint("down");
    broker.set_failing(&ep, true);

    let err = broker.fetch(&ep, "live").await.unwrap_err();
    assert!(matches!(err, McuError::TransientQueue { .. }));
    assert!(!broker.check(&ep).await);
    assert_eq!(broker.pending("live").await, 1);

    broker.set_failing(&ep, false);
    assert!(broker.check(&ep).await);
    assert!(broker.fetch(&ep, "live").await.unwrap().is_some());
}

#[tokio::test]
async fn test_broker_publish_records_message() {
    let broker = SimulatedBroker::new(Duration::ZERO);
    let ep = endpoint("a");
    let job = Job::new("cloudproc", json!({"file": "a.mp4"}));
    broker
        .publish(&ep, "cloudproc", &job.to_bytes().unwrap())
        .await
        .unwrap();

    let published = broker.published("cloudproc").await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0]["payload"]["file"], "a.mp4");
    assert_eq!(broker.queue_depth(&ep, "cloudproc").await.unwrap(), 1);
}

#[tokio::test]
async fn test_registry_join_failures_then_success() {
    let registry = SimulatedRegistry::new(Duration::ZERO);
    registry.fail_next_joins(2);

    assert!(registry.join(&node()).await.is_err());
    assert!(registry.join(&node()).await.is_err());
    assert!(registry.join(&node()).await.is_ok());
    assert!(registry.is_joined());
    assert_eq!(registry.join_attempts().await.len(), 3);
}

#[tokio::test]
async fn test_registry_forgotten_node_reports_lost() {
    let registry = SimulatedRegistry::new(Duration::ZERO);
    registry.join(&node()).await.unwrap();
    registry.report_load(&node(), &sample()).await.unwrap();

    registry.forget_node();
    let err = registry.report_load(&node(), &sample()).await.unwrap_err();
    assert!(matches!(err, McuError::ClusterMembershipLost(_)));

    registry.join(&node()).await.unwrap();
    registry.report_load(&node(), &sample()).await.unwrap();
    assert_eq!(registry.reports().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_in_memory_rate_store_window_expiry() {
    let store = InMemoryRateStore::new();
    let ttl = Duration::from_millis(1000);

    assert_eq!(store.incr_window("mcu:rate:0", 1, ttl).await.unwrap(), 1);
    assert_eq!(store.incr_window("mcu:rate:0", 3, ttl).await.unwrap(), 4);

    tokio::time::advance(Duration::from_millis(1001)).await;
    assert_eq!(store.incr_window("mcu:rate:0", 1, ttl).await.unwrap(), 1);

    store
        .set_queue_depth("mcu:queue_depth", 7, ttl)
        .await
        .unwrap();
    assert_eq!(store.queue_depth("mcu:queue_depth").await.unwrap(), 7);
    tokio::time::advance(Duration::from_millis(1001)).await;
    assert_eq!(store.queue_depth("mcu:queue_depth").await.unwrap(), 0);
}
