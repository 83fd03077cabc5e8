use super::data::{parse_portal_ids, Config, LoginScheme, PortalConfig, RetryConfig};
use super::defaults::{DEFAULT_CHAT_PATH, DEFAULT_LOGIN_MARKERS, DEFAULT_LOGIN_PATH};
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_load_nonexistent_config() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("nonexistent_config.toml");

    let config = Config::load_from_path(&config_path).expect("Failed to load config");

    assert_eq!(config, Config::default());
}

#[test]
fn test_config_persistence_lifecycle() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("nested").join("config.toml");

    let config = Config {
        portal: PortalConfig {
            base_url: Some("https://portal.example.com".to_string()),
            username: Some("alice".to_string()),
            portal_ids: vec!["P1".to_string(), "P2".to_string()],
            login_scheme: LoginScheme::Form,
            ..Default::default()
        },
        retry: RetryConfig {
            max_transient_attempts: Some(5),
            ..Default::default()
        },
    };
    config
        .save_to_path(&config_path)
        .expect("Failed to save config");
    let loaded = Config::load_from_path(&config_path).expect("Failed to load config");
    assert_eq!(loaded, config);

    let mut modified = loaded;
    modified.portal.portal_ids.clear();
    modified.portal.username = None;
    modified
        .save_to_path(&config_path)
        .expect("Failed to save config");
    let reloaded = Config::load_from_path(&config_path).expect("Failed to load config");
    assert!(reloaded.portal.portal_ids.is_empty());
    assert_eq!(reloaded.portal.username, None);
    assert_eq!(reloaded.max_transient_attempts(), 5);
}

#[test]
fn parse_error_names_the_file() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("config.toml");
    std::fs::write(&config_path, "[portal\nbase_url = 1").expect("write");

    let err = Config::load_from_path(&config_path).expect_err("invalid TOML must fail");
    assert!(err.to_string().starts_with("Failed to parse config at"));
}

#[test]
fn toml_sections_deserialize() {
    let config: Config = toml::from_str(
        r#"
        [portal]
        base_url = "https://portal.example.com/api/"
        username = "bob"
        portal_ids = ["ops", "sales"]
        login_scheme = "form"
        session_cookie = "JSESSIONID"
        login_markers = ["<form id=\"signin\""]

        [retry]
        max_transient_attempts = 4
        base_delay_ms = 10
        attempt_timeout_ms = 250
        "#,
    )
    .expect("config should parse");

    assert_eq!(config.portal.portal_ids, vec!["ops", "sales"]);
    assert_eq!(config.portal.login_scheme, LoginScheme::Form);
    assert_eq!(config.portal.session_cookie.as_deref(), Some("JSESSIONID"));
    assert_eq!(config.login_markers(), vec!["<form id=\"signin\"".to_string()]);
    assert_eq!(config.max_transient_attempts(), 4);
    assert_eq!(config.base_delay(), Duration::from_millis(10));
    assert_eq!(config.attempt_timeout(), Duration::from_millis(250));
}

#[test]
fn defaults_fill_missing_values() {
    let config = Config::default();
    assert_eq!(config.login_path(), DEFAULT_LOGIN_PATH);
    assert_eq!(config.chat_path(), DEFAULT_CHAT_PATH);
    assert_eq!(config.token_pointer(), "/token");
    assert_eq!(config.max_transient_attempts(), 3);
    assert_eq!(config.login_markers().len(), DEFAULT_LOGIN_MARKERS.len());
    assert_eq!(config.portal.login_scheme, LoginScheme::Json);
}

#[test]
fn blank_and_invalid_values_fall_back() {
    let config = Config {
        portal: PortalConfig {
            login_path: Some("  ".to_string()),
            token_pointer: Some("token".to_string()),
            login_markers: Some(vec![" ".to_string()]),
            ..Default::default()
        },
        retry: RetryConfig {
            max_transient_attempts: Some(0),
            attempt_timeout_ms: Some(0),
            ..Default::default()
        },
    };
    assert_eq!(config.login_path(), DEFAULT_LOGIN_PATH);
    assert_eq!(config.token_pointer(), "/token");
    assert_eq!(config.login_markers().len(), DEFAULT_LOGIN_MARKERS.len());
    assert_eq!(config.max_transient_attempts(), 3);
    assert_eq!(config.attempt_timeout(), Duration::from_millis(15_000));
}

#[test]
fn overrides_replace_only_non_blank_values() {
    let mut config = Config {
        portal: PortalConfig {
            base_url: Some("https://file.example.com".to_string()),
            username: Some("file-user".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    config.apply_overrides(Some("https://env.example.com".to_string()), Some(" ".to_string()));
    assert_eq!(
        config.portal.base_url.as_deref(),
        Some("https://env.example.com")
    );
    assert_eq!(config.portal.username.as_deref(), Some("file-user"));
}

#[test]
fn portal_id_lists_keep_priority_and_drop_duplicates() {
    assert_eq!(parse_portal_ids("P1, P2 P1,,P3"), vec!["P1", "P2", "P3"]);
    assert!(parse_portal_ids(" , ").is_empty());
}
