use std::fs;

use tao::logging::{LoggingConfig, init};
use tempfile::TempDir;

// 注意: 全局订阅器在进程内只能初始化一次, 本文件只有一个测试调用 init()

#[test]
fn test_logging_config_deserialize_defaults() {
    let config: LoggingConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config, LoggingConfig::default());
    assert!(config.directory.is_none());
    assert_eq!(config.console_level, "warn");

    let config: LoggingConfig = serde_json::from_str(
        r#"{"directory": "logs", "retention_days": 7, "compress_history": false}"#,
    )
    .unwrap();
    assert_eq!(config.directory.as_deref(), Some("logs"));
    assert_eq!(config.retention_days, 7);
    assert!(!config.compress_history);
    assert_eq!(config.file_prefix, "tao-lc3");
    assert_eq!(config.level, "info");
}

#[test]
fn test_logging_config_serialize() {
    let config = LoggingConfig::default().with_verbosity(2);
    let json = serde_json::to_string(&config).unwrap();
    let parsed: LoggingConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.console_level, "debug");
    assert_eq!(parsed, config);
}

#[test]
fn test_logging_init_creates_log_file() {
    let dir = TempDir::new().unwrap();
    let log_dir = dir.path().join("logs");
    let config = LoggingConfig {
        directory: Some(log_dir.to_string_lossy().to_string()),
        file_prefix: "test".to_string(),
        retention_days: 7,
        compress_history: false,
        ..LoggingConfig::default()
    };

    init(config.clone()).unwrap();
    tracing::info!("日志系统测试");
    log::info!("来自 log 门面的记录");

    let today = chrono::Local::now().date_naive();
    let log_path = log_dir.join(format!("test.{}.log", today.format("%Y-%m-%d")));
    assert!(log_dir.is_dir(), "日志目录应该被创建");
    assert!(fs::metadata(&log_path).is_ok(), "当天日志文件应该被创建");

    // 重复初始化报错
    assert!(init(config).is_err());
}
