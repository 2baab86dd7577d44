use clap::Parser;
use serial_test::serial;
use speedtest_exporter::{cli::Cli, config::Config};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;

/// A helper function to run a test with a temporary config file.
fn with_config_file<F>(toml_content: &str, test_fn: F)
where
    F: FnOnce(PathBuf),
{
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", toml_content).unwrap();
    let path = file.path().to_path_buf();
    test_fn(path);
}

fn load(args: &[&str]) -> anyhow::Result<Config> {
    let mut argv = vec!["speedtest-exporter"];
    argv.extend_from_slice(args);
    Config::load(&Cli::try_parse_from(argv).unwrap())
}

const FULL_CONFIG: &str = r#"
    log_level = "warn"

    [metrics]
    listen_address = "127.0.0.1:9300"
    path = "/speed"
    operational_metrics = false

    [speedtest]
    cli_path = "/opt/speedtest/speedtest-cli"
    insecure = true
    timeout_seconds = 120

    [schedule]
    interval_seconds = 600
    retry_interval_seconds = 20

    [servers]
    max_distance_km = 40
    name_pattern = "Fiber"
"#;

#[test]
#[serial]
fn test_load_full_valid_config() {
    with_config_file(FULL_CONFIG, |path| {
        let config = load(&["--config", path.to_str().unwrap()]).unwrap();

        assert_eq!(config.log_level, "warn");
        assert_eq!(config.metrics.listen_address, "127.0.0.1:9300");
        assert_eq!(config.metrics.path, "/speed");
        assert!(!config.metrics.operational_metrics);
        assert_eq!(
            config.speedtest.cli_path,
            PathBuf::from("/opt/speedtest/speedtest-cli")
        );
        assert!(config.speedtest.insecure);
        assert_eq!(config.speedtest.timeout(), Some(Duration::from_secs(120)));
        assert_eq!(config.schedule.interval(), Duration::from_secs(600));
        assert_eq!(config.schedule.retry_interval(), Duration::from_secs(20));
        assert_eq!(config.servers.max_distance_km, 40);
        assert_eq!(config.servers.name_pattern, "Fiber");
        assert_eq!(config.servers.server_id, 0);
    });
}

#[test]
#[serial]
fn test_partial_file_keeps_defaults() {
    with_config_file("[schedule]\ninterval_seconds = 300\n", |path| {
        let config = load(&["-c", path.to_str().unwrap()]).unwrap();
        assert_eq!(config.schedule.interval_seconds, 300);
        assert_eq!(config.schedule.retry_interval_seconds, 60);
        assert_eq!(config.metrics, Config::default().metrics);
        assert_eq!(config.speedtest, Config::default().speedtest);
    });
}

#[test]
#[serial]
fn test_no_file_uses_defaults() {
    assert_eq!(load(&[]).unwrap(), Config::default());
}

#[test]
#[serial]
fn test_missing_file_is_an_error() {
    let err = load(&["--config", "/nonexistent/speedtest-exporter.toml"]).unwrap_err();
    assert!(err.to_string().contains("not found"), "{}", err);
}

#[test]
#[serial]
fn test_cli_flags_override_file() {
    with_config_file(FULL_CONFIG, |path| {
        let config = load(&[
            "-c",
            path.to_str().unwrap(),
            "-p",
            "/metrics",
            "-l",
            ":9101",
            "-i",
            "1h",
            "--max-distance",
            "15",
            "--server-id",
            "99",
            "-d",
        ])
        .unwrap();

        assert_eq!(config.metrics.path, "/metrics");
        assert_eq!(config.metrics.listen_address, ":9101");
        assert_eq!(config.schedule.interval_seconds, 3600);
        // Untouched by flags.
        assert_eq!(config.schedule.retry_interval_seconds, 20);
        assert_eq!(config.servers.max_distance_km, 15);
        assert_eq!(config.servers.server_id, 99);
        assert_eq!(config.servers.name_pattern, "Fiber");
        assert_eq!(config.log_filter(), "debug");
    });
}

#[test]
#[serial]
fn test_environment_overrides_file_but_not_cli() {
    with_config_file(FULL_CONFIG, |path| {
        std::env::set_var("SPEEDTEST_EXPORTER_SCHEDULE__INTERVAL_SECONDS", "900");
        std::env::set_var("SPEEDTEST_EXPORTER_SERVERS__NAME_PATTERN", "Cable");
        std::env::set_var("SPEEDTEST_EXPORTER_LOG_LEVEL", "error");

        let result = load(&["-c", path.to_str().unwrap(), "--server-name", "Fiber|Cable"]);

        std::env::remove_var("SPEEDTEST_EXPORTER_SCHEDULE__INTERVAL_SECONDS");
        std::env::remove_var("SPEEDTEST_EXPORTER_SERVERS__NAME_PATTERN");
        std::env::remove_var("SPEEDTEST_EXPORTER_LOG_LEVEL");

        let config = result.unwrap();
        assert_eq!(config.schedule.interval_seconds, 900);
        assert_eq!(config.log_level, "error");
        assert_eq!(config.servers.name_pattern, "Fiber|Cable");
    });
}

#[test]
#[serial]
fn test_invalid_values_are_rejected() {
    with_config_file("[schedule]\ninterval_seconds = 0\n", |path| {
        assert!(load(&["-c", path.to_str().unwrap()]).is_err());
    });
    with_config_file("[metrics]\nlisten_address = \"not an address\"\n", |path| {
        assert!(load(&["-c", path.to_str().unwrap()]).is_err());
    });
    assert!(load(&["--server-name", "(unclosed"]).is_err());
    assert!(load(&["-p", "metrics"]).is_err());
}

#[test]
fn test_bad_duration_flag_fails_parsing() {
    assert!(Cli::try_parse_from(["speedtest-exporter", "-i", "soon"]).is_err());
}

#[test]
#[serial]
fn test_hostname_listen_address_is_accepted() {
    let config = load(&["-l", "localhost:9101"]).unwrap();
    assert_eq!(config.metrics.bind_addresses(), vec!["localhost:9101"]);

    let config = load(&["-l", "[::1]:9101"]).unwrap();
    assert_eq!(config.metrics.listen_address, "[::1]:9101");
}
