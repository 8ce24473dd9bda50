use gcodelink_communication::SerialParity;
use gcodelink_settings::{Config, ConfigError, SettingsError};
use std::time::Duration;
use tempfile::TempDir;

fn sample_config() -> Config {
    let mut config = Config::new();
    config.connection.port = "/dev/ttyUSB1".to_string();
    config.connection.baud_rate = 57600;
    config.connection.parity = SerialParity::Odd;
    config.link.status_poll_interval_ms = 100;
    config.link.pause_commands = vec!["M0".to_string(), "M60".to_string()];
    config.link.comment_marker = '#';
    config
}

#[test]
fn test_toml_save_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let config = sample_config();
    config.save_to_file(&path).unwrap();
    let loaded = Config::load_from_file(&path).unwrap();

    assert_eq!(loaded, config);
    assert!(!loaded.connection.is_auto_port());
}

#[test]
fn test_json_save_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");

    let config = sample_config();
    config.save_to_file(&path).unwrap();
    let loaded = Config::load_from_file(&path).unwrap();

    assert_eq!(loaded, config);
}

#[test]
fn test_partial_file_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "[connection]\nport = \"COM4\"\n\n[link]\norphan_ack_timeout_ms = 750\n",
    )
    .unwrap();

    let config = Config::load_from_file(&path).unwrap();
    assert_eq!(config.connection.port, "COM4");
    assert_eq!(config.connection.baud_rate, 115200);

    let link = config.link.to_link_config();
    assert_eq!(link.orphan_ack_timeout, Duration::from_millis(750));
    assert_eq!(link.status_poll_interval, Duration::from_millis(250));
    assert_eq!(link.comment_marker, ';');
}

#[test]
fn test_invalid_file_rejected() {
    let dir = TempDir::new().unwrap();

    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[connection]\nbaud_rate = 0\n").unwrap();
    assert!(matches!(
        Config::load_from_file(&path),
        Err(SettingsError::InvalidSetting { .. })
    ));

    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(matches!(
        Config::load_from_file(&path),
        Err(SettingsError::Json(_))
    ));

    let path = dir.path().join("config.yaml");
    assert!(matches!(
        Config::new().save_to_file(&path),
        Err(SettingsError::Config(ConfigError::UnsupportedFormat(_)))
    ));
}

#[test]
fn test_load_or_default() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing.toml");

    let config = Config::load_or_default(&path).unwrap();
    assert_eq!(config, Config::default());

    let path = dir.path().join("missing.json");
    assert!(matches!(
        Config::load_from_file(&path),
        Err(SettingsError::Read { .. })
    ));
}
