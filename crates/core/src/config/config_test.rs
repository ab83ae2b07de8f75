use std::io::Write;
use std::time::Duration;

use tempfile::NamedTempFile;

use super::*;

const SAMPLE: &str = r#"
service = "mcu"

[[rabbit]]
auth = "yulu:yulu"
url = "127.0.0.1:5672"
monitor_url = "http://127.0.0.1:15672/api/health/checks/port-listener/5672"

[[queues]]
name = "test-pro"
limit = -1
priority = 0
enable = true

[[queues.urls]]
auth = "yulu:yulu"
url = "rabbitmq:5672"
monitorUrl = "http://rabbitmq:15672/api/health/checks/port-listener/5672"

[[queues]]
name = "vip"
limit = 2
priority = 10

[[queues.urls]]
auth = "yulu:yulu"
url = "rabbitmq:5672"
monitor_url = "http://rabbitmq:15672/api/health/checks/port-listener/5672"

[worker]
num_workers = 4
retry_delay_policy = [100, 500, 1000]

[cluster]
ip = "10.1.2.3"
join_retry = 60

[mock]
use = true
count = 5
"#;

#[test]
fn test_defaults_match_original_tables() {
    let config = AppConfig::default();
    assert_eq!(config.worker.num_workers, 1);
    assert_eq!(
        config.worker.retry_schedule(),
        vec![
            Duration::from_millis(100),
            Duration::from_millis(500),
            Duration::from_millis(1000)
        ]
    );
    assert_eq!(config.worker.task_idle_time(), Duration::from_secs(3 * 60 * 60));
    assert_eq!(config.notify.post_process_queue, "cloudproc");
    assert_eq!(config.notify.monitor_notify, "monitor");
    assert_eq!(config.cluster.purpose, "mcu");
    assert_eq!(config.cluster.port, 12009);
    assert_eq!(config.cluster.join_retry_interval(), Duration::from_secs(60));
    assert_eq!(config.cluster.load_period(), Duration::from_millis(1000));
    assert_eq!(config.cluster.load.item.name, "cpu");
    assert_eq!(config.rate.qps, 0);
    assert!(!config.mock.enabled);
    assert_eq!(config.mock.count, 25);
}

#[test]
fn test_from_toml() {
    let config = AppConfig::from_toml(SAMPLE).unwrap();
    assert_eq!(config.queues.len(), 2);
    assert_eq!(config.queues[1].name, "vip");
    assert_eq!(config.queues[1].limit, 2);
    assert!(config.queues[1].enabled);
    assert_eq!(config.worker.num_workers, 4);
    assert_eq!(config.cluster.ip, "10.1.2.3");
    assert!(config.mock.enabled);
    assert_eq!(config.mock.count, 5);
    assert_eq!(config.queue_index()["vip"].priority, 10);
}

#[test]
fn test_load_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(SAMPLE.as_bytes()).unwrap();

    let config = AppConfig::load(file.path().to_str()).unwrap();
    assert_eq!(config.queues.len(), 2);
    assert_eq!(config.cluster.ip, "10.1.2.3");
}

#[test]
fn test_load_missing_file_fails() {
    assert!(AppConfig::load(Some("/nonexistent/mcu.toml")).is_err());
}

#[test]
fn test_resolve_environment() {
    let mut config = AppConfig::default();
    config.resolve_environment_with(|key| match key {
        "POD_IP" => Some("172.16.0.9".to_string()),
        "MCU_FONT" => Some("/opt/fonts/wm.ttf".to_string()),
        _ => None,
    });
    assert_eq!(config.cluster.ip, "172.16.0.9");
    assert_eq!(config.worker.recorder.water_mark_font, "/opt/fonts/wm.ttf");
    assert_eq!(config.worker.recorder.cover_path, "fonts/640x360.png");

    let mut fallback = AppConfig::default();
    fallback.resolve_environment_with(|_| None);
    assert_eq!(fallback.cluster.ip, "127.0.0.1");

    let mut explicit = AppConfig::default();
    explicit.cluster.ip = "10.0.0.5".to_string();
    explicit.resolve_environment_with(|_| Some("172.16.0.9".to_string()));
    assert_eq!(explicit.cluster.ip, "10.0.0.5");
}

#[test]
fn test_validation_rejects_bad_queues() {
    let mut config = AppConfig::from_toml(SAMPLE).unwrap();
    config.queues[1].limit = -2;
    assert!(config.validate().is_err());

    let mut config = AppConfig::from_toml(SAMPLE).unwrap();
    config.queues[1].name = "test-pro".to_string();
    assert!(config.validate().is_err());

    let mut config = AppConfig::from_toml(SAMPLE).unwrap();
    config.queues[0].endpoints.clear();
    assert!(config.validate().is_err());
    config.queues[0].enabled = false;
    assert!(config.validate().is_ok());
}

#[test]
fn test_validation_rejects_bad_worker_settings() {
    let mut config = AppConfig::from_toml(SAMPLE).unwrap();
    config.worker.num_workers = 0;
    assert!(config.validate().is_err());

    let mut config = AppConfig::from_toml(SAMPLE).unwrap();
    config.worker.retry_delay_policy.clear();
    assert!(config.validate().is_err());

    let mut config = AppConfig::from_toml(SAMPLE).unwrap();
    config.rate.ql_coefficient = f64::NAN;
    assert!(config.validate().is_err());
}

#[test]
fn test_redis_debug_and_url() {
    let redis = RedisConfig {
        password: Some("privated".to_string()),
        ..RedisConfig::default()
    };
    assert_eq!(redis.build_url(), "redis://:privated@127.0.0.1:6379/0");
    assert!(!format!("{redis:?}").contains("privated"));
}

#[test]
fn test_notify_endpoints_fallback() {
    let mut config = AppConfig::from_toml(SAMPLE).unwrap();
    assert_eq!(config.notify_endpoints()[0].url, "127.0.0.1:5672");
    config.rabbit.clear();
    assert_eq!(config.notify_endpoints()[0].url, "rabbitmq:5672");
}

#[test]
fn test_toml_round_trip_keeps_queues() {
    let config = AppConfig::from_toml(SAMPLE).unwrap();
    let rendered = config.to_toml().unwrap();
    let reparsed = AppConfig::from_toml(&rendered).unwrap();
    assert_eq!(reparsed.queues, config.queues);
}

#[test]
fn test_shipped_config_is_valid() {
    let config = AppConfig::from_toml(include_str!("../../../../config/mcu.toml")).unwrap();
    assert_eq!(config.queues.len(), 1);
    assert_eq!(config.queues[0].endpoints.len(), 1);
    assert_eq!(config.rate.backlog_service, "mcu");
    assert_eq!(config.api.bind_address, "0.0.0.0:3000");
    assert!(!config.mock.enabled);
}
