use color_eyre::Result;
use pretty_assertions::assert_eq;
use serial_bridge::mock::MockPorts;

mod common;
use common::*;

#[tokio::test]
async fn status() -> Result<()> {
    let ports = MockPorts::new(&["COM3", "COM4"]);
    let (bridge, port) = start_server(&ports).await;

    let status: serde_json::Value = serde_json::from_str(&http_get(port, "/status").await?)?;
    assert_eq!(status["isConnected"], false);
    assert_eq!(status["portList"].as_array().map(Vec::len), Some(2));

    let mut client = connect_attached(&bridge, port).await?;
    send(
        &mut client,
        r#"{"cmd":"serial_connect","port":"COM4","baud":57600}"#,
    )
    .await?;
    wait_until(|| bridge.status().is_connected).await?;

    let status: serde_json::Value = serde_json::from_str(&http_get(port, "/status").await?)?;
    assert_eq!(status["isConnected"], true);
    assert_eq!(status["connectedPort"], "COM4");
    assert_eq!(status["connectedBaud"], 57600);

    Ok(())
}

#[tokio::test]
async fn ports() -> Result<()> {
    let ports = MockPorts::new(&["/dev/ttyMock0"]);
    let (_bridge, port) = start_server(&ports).await;

    let list: serde_json::Value = serde_json::from_str(&http_get(port, "/ports").await?)?;
    assert_eq!(list[0]["device"], "/dev/ttyMock0");

    ports.add_port("/dev/ttyMock1");
    let list: serde_json::Value = serde_json::from_str(&http_get(port, "/ports").await?)?;
    assert_eq!(list.as_array().map(Vec::len), Some(2));

    Ok(())
}

#[tokio::test]
async fn root_version_and_config() -> Result<()> {
    let ports = MockPorts::new(&["COM3"]);
    let (_bridge, port) = start_server(&ports).await;

    let root: serde_json::Value = serde_json::from_str(&http_get(port, "/").await?)?;
    assert_eq!(root["data"], "Serial Bridge API");

    let version = http_get(port, "/version").await?;
    assert!(version.contains(env!("CARGO_PKG_VERSION")));

    let config = http_get(port, "/config").await?;
    let config = serial_bridge::config::Config::deserialize(&config)?;
    assert_eq!(config, test_config());

    Ok(())
}
