use std::time::Duration;

use color_eyre::Result;
use esc_telemetry::{
    config::Config,
    control::TelemetryControl,
    ingest::ConnectionState,
    mock::MockPorts,
    sink::BroadcastSink,
};

mod common;

fn config(sessions: &std::path::Path) -> Config {
    Config {
        sessions_dir: sessions.into(),
        poll_interval_ms: 1,
        read_backoff_ms: 5,
        read_timeout_ms: 50,
        ..Config::default()
    }
}

#[tokio::test]
async fn device_lines_reach_websocket_and_session() -> Result<()> {
    esc_telemetry::logging::init(tracing::Level::DEBUG, None);

    let tmp = tempfile::tempdir()?;
    let ports = MockPorts::new()
        .with_port("/dev/ttyS0", "Builtin", true)
        .with_port("/dev/ttyACM0", "Teensyduino", true);
    let device = ports.attach_link();

    let sink = BroadcastSink::default();
    let port = common::start_server(sink.clone()).await;
    let mut client = common::connect(port).await?;

    let mut control =
        TelemetryControl::new(ports.clone(), sink, config(tmp.path())).set_env_override(None);
    assert!(control.start_from_config());

    let state = control
        .handle_mut()
        .expect("A run was started")
        .wait_for(ConnectionState::Running)
        .await;
    assert_eq!(state, ConnectionState::Running);
    assert_eq!(ports.opened(), vec!["/dev/ttyACM0".to_string()]);

    device.send_line("ts_ms,rpm,status");
    device.send_line("");
    device.send_line("100,8000,OK");
    device.send_error(std::io::ErrorKind::TimedOut);
    device.send(b"200,90".to_vec());
    device.send(b"00\n300\n".to_vec());

    assert_eq!(
        common::receive(&mut client).await?,
        r#"{"ts_ms":"100","rpm":"8000","status":"OK"}"#
    );
    assert_eq!(
        common::receive(&mut client).await?,
        r#"{"ts_ms":"200","rpm":"9000","status":""}"#
    );
    assert_eq!(
        common::receive(&mut client).await?,
        r#"{"ts_ms":"300","rpm":"","status":""}"#
    );

    let summary = control.stop().await.expect("A run was active");
    assert_eq!(summary.state, ConnectionState::Stopped);
    assert_eq!(summary.port.as_deref(), Some("/dev/ttyACM0"));
    assert_eq!(summary.stats.headers, 1);
    assert_eq!(summary.stats.records, 3);
    assert_eq!(summary.stats.read_errors, 1);

    let session = summary.session.expect("A session file was written");
    assert!(session.starts_with(tmp.path()));

    let contents = std::fs::read_to_string(session)?;
    let lines = contents.lines().collect::<Vec<_>>();

    assert_eq!(lines[0], esc_telemetry::telemetry::DEFAULT_COLUMNS.join(","));
    assert_eq!(
        &lines[1..],
        ["ts_ms,rpm,status", "100,8000,OK", "200,9000,", "300,,"]
    );

    Ok(())
}

#[tokio::test]
async fn missing_device_fails_without_publishing() -> Result<()> {
    let tmp = tempfile::tempdir()?;

    let sink = BroadcastSink::default();
    let port = common::start_server(sink.clone()).await;
    let mut client = common::connect(port).await?;

    let mut control = TelemetryControl::new(MockPorts::new(), sink, config(tmp.path()))
        .set_env_override(None);
    assert!(control.start_from_config());

    let summary = tokio::time::timeout(Duration::from_secs(5), control.stop()).await?;
    let summary = summary.expect("A run was started");

    assert!(matches!(
        summary.state,
        ConnectionState::Failed | ConnectionState::Stopped
    ));
    assert!(summary.session.is_none());
    common::receive_nothing(&mut client).await;

    assert_eq!(std::fs::read_dir(tmp.path())?.count(), 0);

    Ok(())
}
