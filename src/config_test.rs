use std::collections::HashMap;

use super::*;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn empty_environment_yields_defaults() {
    let config = SyncConfig::from_lookup(lookup_from(&[])).expect("config");
    assert_eq!(config, SyncConfig::default());
    assert_eq!(config.page_size, 10);
    assert_eq!(config.typing_idle, Duration::from_millis(2000));
}

#[test]
fn overrides_are_applied() {
    let config = SyncConfig::from_lookup(lookup_from(&[
        ("CHAT_WS_URL", "wss://chat.example.com/ws"),
        ("CHAT_API_URL", "https://api.example.com/v1/"),
        ("CHAT_PAGE_SIZE", "25"),
        ("CHAT_TYPING_IDLE_MS", "1500"),
        ("CHAT_RECONNECT", "false"),
        ("CHAT_AUTO_REJOIN", "0"),
    ]))
    .expect("config");

    assert_eq!(config.ws_url, "wss://chat.example.com/ws");
    assert_eq!(config.api_url, "https://api.example.com/v1");
    assert_eq!(config.page_size, 25);
    assert_eq!(config.typing_idle, Duration::from_millis(1500));
    assert!(!config.reconnect.enabled);
    assert!(!config.reconnect.auto_rejoin);
}

#[test]
fn malformed_numbers_fall_back_to_defaults() {
    let config = SyncConfig::from_lookup(lookup_from(&[
        ("CHAT_PAGE_SIZE", "ten"),
        ("CHAT_ECHO_TIMEOUT_MS", "-5"),
    ]))
    .expect("config");
    assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
    assert_eq!(config.echo_timeout, Duration::from_millis(DEFAULT_ECHO_TIMEOUT_MS));
}

#[test]
fn zero_page_size_is_rejected() {
    let err = SyncConfig::from_lookup(lookup_from(&[("CHAT_PAGE_SIZE", "0")])).expect_err("zero page size");
    assert_eq!(err, ConfigError::Zero { var: "CHAT_PAGE_SIZE" });
}

#[test]
fn malformed_bool_is_rejected() {
    let err = SyncConfig::from_lookup(lookup_from(&[("CHAT_RECONNECT", "maybe")])).expect_err("bad bool");
    assert!(matches!(err, ConfigError::InvalidBool { var: "CHAT_RECONNECT", .. }));
}

#[test]
fn backoff_doubles_until_ceiling() {
    let policy = ReconnectPolicy::default();
    assert_eq!(policy.backoff(0), Duration::from_millis(1000));
    assert_eq!(policy.backoff(1), Duration::from_millis(2000));
    assert_eq!(policy.backoff(3), Duration::from_millis(8000));
    assert_eq!(policy.backoff(4), Duration::from_millis(10_000));
    assert_eq!(policy.backoff(40), Duration::from_millis(10_000));
}
