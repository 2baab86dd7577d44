#[path = "../helpers/mod.rs"]
mod helpers;

use helpers::app::TestAppBuilder;
use helpers::fixtures::{measurement, sample_value, server, speed_line};
use speedtest_exporter::speedtest::{test_utils::FakeSpeedtestRunner, SpeedtestError};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_scrape_serves_published_measurement() {
    let runner = FakeSpeedtestRunner::new();
    runner.push_measure(Ok(measurement("1.2.3.4", 100_000_000.0, 50_000_000.0, 15.2)));
    let app = TestAppBuilder::new().with_runner(runner).build().await.unwrap();
    app.wait_for_publish(TIMEOUT).await;

    let response = reqwest::get(app.url("/metrics")).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("text/plain"), "{}", content_type);

    let body = response.text().await.unwrap();
    assert_eq!(sample_value(speed_line(&body, "download")), 100_000_000.0);
    assert_eq!(sample_value(speed_line(&body, "upload")), 50_000_000.0);
    assert!(body.contains("speedtest_ping_msec 15.2"), "{}", body);

    app.shutdown(TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn test_custom_path_and_unknown_path() {
    let runner = FakeSpeedtestRunner::new();
    runner.push_measure(Ok(measurement("1.2.3.4", 1.0, 1.0, 1.0)));
    let app = TestAppBuilder::new()
        .with_runner(runner)
        .with_config_modifier(|c| c.metrics.path = "/probe".to_string())
        .build()
        .await
        .unwrap();

    let (status, _) = app.get("/metrics").await;
    assert_eq!(status, 404);
    let (status, body) = app.get("/probe").await;
    assert_eq!(status, 200);
    assert!(body.contains("speedtest_ping_msec"), "{}", body);

    app.shutdown(TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn test_discovery_failure_is_scraped_as_zero() {
    let runner = FakeSpeedtestRunner::new();
    runner.push_list(Ok(vec![server(7, "Far Away ISP (Paris, France)", 900)]));
    let app = TestAppBuilder::new()
        .with_runner(runner.clone())
        .with_config_modifier(|c| c.servers.max_distance_km = 100)
        .build()
        .await
        .unwrap();

    // Zero samples appear only once the failed discovery has been handled.
    let body = tokio::time::timeout(TIMEOUT, async {
        loop {
            let (_, body) = app.get("/metrics").await;
            if body.contains("direction=\"upload\"") {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("zeroed snapshot never exported");

    let upload = speed_line(&body, "upload");
    assert!(upload.contains("client_ip=\"\""), "{}", upload);
    assert_eq!(sample_value(upload), 0.0);
    assert!(runner.measure_calls().is_empty());

    app.shutdown(TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn test_shutdown_interrupts_running_cycle_wait() {
    let runner = FakeSpeedtestRunner::new();
    runner.push_measure(Err(SpeedtestError::NoServersFound));
    let app = TestAppBuilder::new()
        .with_runner(runner.clone())
        .with_config_modifier(|c| c.schedule.interval_seconds = 24 * 60 * 60)
        .build()
        .await
        .unwrap();

    tokio::time::timeout(TIMEOUT, async {
        while runner.measure_calls().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    // The controller is now in a day-long sleep.
    app.shutdown(TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn test_build_fails_when_port_is_taken() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let taken = listener.local_addr().unwrap();

    let result = TestAppBuilder::new()
        .with_config_modifier(|c| c.metrics.listen_address = taken.to_string())
        .build()
        .await;

    let err = result.err().expect("binding a taken port should fail");
    assert!(format!("{:#}", err).contains("failed to bind"), "{:#}", err);
}

#[tokio::test]
async fn test_operational_metrics_follow_snapshot() {
    let runner = FakeSpeedtestRunner::new();
    runner.push_measure(Ok(measurement("1.2.3.4", 1.0, 1.0, 1.0)));
    let app = TestAppBuilder::new()
        .with_runner(runner)
        .with_config_modifier(|c| c.metrics.operational_metrics = true)
        .build()
        .await
        .unwrap();
    app.wait_for_publish(TIMEOUT).await;

    let body = tokio::time::timeout(TIMEOUT, async {
        loop {
            let (_, body) = app.get("/metrics").await;
            if body.contains("speedtest_cycles_total") {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("operational metrics never exported");

    assert!(body.contains("outcome=\"published\""), "{}", body);
    let snapshot_at = body.find("speedtest_ping_msec").unwrap();
    let operational_at = body.find("speedtest_cycles_total").unwrap();
    assert!(snapshot_at < operational_at, "{}", body);

    app.shutdown(TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn test_hostname_listen_address_resolves_and_binds() {
    let runner = FakeSpeedtestRunner::new();
    runner.push_measure(Ok(measurement("1.2.3.4", 1.0, 1.0, 1.0)));
    let builder = TestAppBuilder::new()
        .with_runner(runner)
        .with_config_modifier(|c| c.metrics.listen_address = "localhost:0".to_string());
    builder.config.validate().unwrap();

    let app = builder.build().await.unwrap();
    let (status, body) = app.get("/metrics").await;
    assert_eq!(status, 200);
    assert!(body.contains("speedtest_ping_msec"), "{}", body);

    app.shutdown(TIMEOUT).await.unwrap();
}
