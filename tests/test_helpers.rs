//! Test helpers and utilities for integration tests

use fleetmq::testing::{MockTransport, TestPacket};
use fleetmq::{ClientConfig, HaBrokerClient, JsonSerializer, Serializer, Transport};
use std::sync::Arc;
use std::time::Duration;

/// Serializer with the test packet kind registered
#[allow(dead_code)]
pub fn test_serializer() -> Arc<dyn Serializer> {
    let mut serializer = JsonSerializer::new();
    serializer.register::<TestPacket>(TestPacket::KIND);
    Arc::new(serializer)
}

/// Build a client over the given mock transport and host list
#[allow(dead_code)]
pub async fn test_client(transport: &Arc<MockTransport>, hosts: &str) -> HaBrokerClient {
    let config = ClientConfig {
        host: Some(hosts.to_string()),
        ..Default::default()
    };
    HaBrokerClient::new(
        Arc::clone(transport) as Arc<dyn Transport>,
        test_serializer(),
        &config,
    )
    .await
    .expect("client construction should succeed")
}

/// Let spawned event-pump and timer tasks run
#[allow(dead_code)]
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}
