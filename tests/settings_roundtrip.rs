//! Persisting connection settings through the on-disk store

use serialview_core::core::settings::{self, SETTINGS_GROUP};
use serialview_core::{
    BaudRate, ConnectionSettings, DataBits, MemoryStore, Parity, ReadingMode, SettingsStore,
    StopBits, StoreValue, TomlStore,
};
use std::time::Duration;

fn sample() -> ConnectionSettings {
    ConnectionSettings::default()
        .baud_rate(BaudRate::B115200)
        .data_bits(DataBits::Seven)
        .parity(Parity::Even)
        .stop_bits(StopBits::Two)
        .timeout(None)
        .write_timeout(Some(Duration::from_millis(250)))
        .exclusive(None)
        .reading_mode(ReadingMode::Byte)
}

#[test]
fn test_settings_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.toml");
    let original = sample();

    let mut store = TomlStore::open(&path).unwrap();
    store.set("window", "width", StoreValue::Int(800));
    store.set("window", "theme", StoreValue::from("dark"));
    settings::save(&mut store, &original);
    store.save().unwrap();

    let reopened = TomlStore::open(&path).unwrap();
    let decoded = settings::decode(&reopened).unwrap();
    assert_eq!(decoded, original);
    assert_eq!(decoded.timeout, None);
    assert_eq!(decoded.exclusive, None);
    assert_eq!(reopened.get("window", "width"), Some(StoreValue::Int(800)));
}

#[test]
fn test_enums_are_stored_by_name() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.toml");

    let mut store = TomlStore::open(&path).unwrap();
    settings::save(&mut store, &sample());
    store.save().unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("[serial_port]"));
    assert!(text.contains("\"EVEN\""));
    assert!(text.contains("\"SEVEN\""));
    assert!(text.contains("\"BYTE\""));
    assert!(!text.contains("exclusive"));
    assert!(!text.lines().any(|line| line.starts_with("timeout")));
}

#[test]
fn test_clearing_optional_removes_key() {
    let mut store = MemoryStore::new();
    let with_timeout = sample()
        .timeout(Some(Duration::from_secs(1)))
        .exclusive(Some(true));
    settings::save(&mut store, &with_timeout);
    assert_eq!(store.get(SETTINGS_GROUP, "exclusive"), Some(StoreValue::Bool(true)));

    settings::save(&mut store, &sample());
    assert_eq!(store.get(SETTINGS_GROUP, "timeout"), None);
    assert_eq!(store.get(SETTINGS_GROUP, "exclusive"), None);
    assert_eq!(settings::decode(&store).unwrap(), sample());
}

#[test]
fn test_fresh_store_decodes_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let store = TomlStore::open(dir.path().join("absent.toml")).unwrap();
    assert_eq!(settings::decode(&store).unwrap(), ConnectionSettings::default());
}

#[test]
fn test_corrupt_value_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.toml");
    std::fs::write(&path, "[serial_port]\nbaudrate = 12345\nparity = \"EVEN\"\n").unwrap();

    let store = TomlStore::open(&path).unwrap();
    assert!(settings::decode(&store).is_err());
    assert_eq!(settings::load_or_default(&store), ConnectionSettings::default());
}

#[test]
fn test_override_then_persist() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.toml");

    let mut store = TomlStore::open(&path).unwrap();
    let updated =
        settings::with_override(&ConnectionSettings::default(), "baudrate", "57600").unwrap();
    settings::save(&mut store, &updated);
    store.save().unwrap();

    let reopened = TomlStore::open(&path).unwrap();
    assert_eq!(settings::decode(&reopened).unwrap().baud_rate, BaudRate::B57600);
}
