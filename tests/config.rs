use std::time::Duration;

use lancet::{
    config::{Config, ConfigError},
    sans::{fram::CrcPolicy, nfc::ReadMode, vendor::TransmitterKind},
};

#[test]
fn empty_document() {
    let config = Config::from_toml_str("").unwrap();

    assert_eq!(config, Config::default());
    assert_eq!(config.reading_interval, 5);
    assert_eq!(config.preferred_transmitter, TransmitterKind::None);
    assert_eq!(config.crc_policy, CrcPolicy::Advisory);
    assert_eq!(config.silence_timeout(), None);
    assert!(config.oop.enabled);
    assert_eq!(config.oop.site, "http://www.glucose.space/");
}

#[test]
fn full_document() {
    let config = Config::from_toml_str(
        r#"
        reading_interval = 1
        preferred_transmitter = "miaomiao"
        crc_policy = "strict"
        nfc_read_mode = "multiple"
        silence_timeout_secs = 600

        [oop]
        enabled = false
        site = "https://oop.example.org/"
        token = "secret"
        "#,
    )
    .unwrap();

    assert_eq!(config.reading_interval, 1);
    assert_eq!(config.preferred_transmitter, TransmitterKind::MiaoMiao);
    assert_eq!(config.crc_policy, CrcPolicy::Strict);
    assert_eq!(config.nfc_read_mode, ReadMode::Multiple);
    assert_eq!(config.silence_timeout(), Some(Duration::from_secs(600)));
    assert!(!config.oop.enabled);
    assert_eq!(config.oop.site, "https://oop.example.org/");
    assert_eq!(config.oop.token, "secret");
}

#[test]
fn zero_interval() {
    let err = Config::from_toml_str("reading_interval = 0").unwrap_err();
    assert!(matches!(err, ConfigError::ReadingInterval(0)));
}

#[test]
fn invalid_documents() {
    for document in [
        "reading_interval = 300",
        "preferred_transmitter = \"blucon\"",
        "crc_policy = \"lenient\"",
        "unknown = true",
        "[oop]\nendpoint = \"x\"",
    ] {
        let err = Config::from_toml_str(document).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)), "{document}");
    }
}
