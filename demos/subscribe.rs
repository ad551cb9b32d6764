//! Subscribe to a topic and publish on another, surviving bridge restarts.
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=info,rosbridge_client=debug cargo run --example subscribe --features tracing
//! ```
//!
//! Point it at another bridge with `ROSBRIDGE_URL=ws://robot:9090`. Publishes for a minute, then exits.

use std::time::Duration;

use futures::StreamExt as _;
use rosbridge_client::ws::config::{Config, ReconnectConfig};
use rosbridge_client::{ConnectionManager, TopicManager, TopicOptions};
use serde_json::json;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let url = std::env::var("ROSBRIDGE_URL").unwrap_or_else(|_| "ws://localhost:9090".to_owned());
    let config = Config::default()
        .with_url(url)
        .with_heartbeat_interval(Duration::from_secs(5))
        .with_reconnect(ReconnectConfig::new(
            Duration::from_millis(500),
            Duration::from_secs(10),
        ));
    let connection = ConnectionManager::new(config);

    let mut states = connection.state_receiver();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            info!(%state, "connection");
        }
    });
    connection.on("error", |event| warn!(?event, "bridge error"));

    let topics = TopicManager::new(connection.clone());
    topics.subscribe("/rosout", "rcl_interfaces/msg/Log", |message| {
        info!(topic = "/rosout", msg = %message["msg"]);
    })?;

    let odom = rosbridge_client::Topic::with_options(
        &connection,
        "/odom",
        "nav_msgs/msg/Odometry",
        TopicOptions::builder().throttle_rate(500).build(),
    );
    let mut poses = Box::pin(odom.messages()?);

    let mut tick = tokio::time::interval(Duration::from_secs(1));
    let mut count = 0_u64;
    while count < 60 {
        tokio::select! {
            Some(message) = poses.next() => {
                info!(topic = "/odom", position = %message["pose"]["pose"]["position"]);
            }
            _ = tick.tick() => {
                count += 1;
                topics.publish("/chatter", "std_msgs/msg/String", &json!({"data": format!("hello {count}")}))?;
            }
        }
    }

    topics.clear_all();
    connection.close();
    Ok(())
}
