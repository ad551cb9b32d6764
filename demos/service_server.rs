//! Serve a service from the client side of the bridge.
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=info,rosbridge_client=debug cargo run --example service_server --features tracing
//! ```
//!
//! Then call it from ROS: `ros2 service call /add_two_ints example_interfaces/srv/AddTwoInts "{a: 1, b: 2}"`.
//! The advertisement is restored whenever the bridge comes back.

use std::time::Duration;

use rosbridge_client::ws::config::Config;
use rosbridge_client::{ConnectionManager, Service};
use serde_json::json;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let url = std::env::var("ROSBRIDGE_URL").unwrap_or_else(|_| "ws://localhost:9090".to_owned());
    let config = Config::default()
        .with_url(url)
        .with_heartbeat_interval(Duration::from_secs(5));
    let connection = ConnectionManager::new(config);

    let service = Service::new(
        &connection,
        "/add_two_ints",
        "example_interfaces/srv/AddTwoInts",
    );
    service.advertise(|args, response| {
        let (Some(a), Some(b)) = (args["a"].as_i64(), args["b"].as_i64()) else {
            return Err("a and b must be integers".into());
        };
        info!(a, b, "add_two_ints");
        response.insert("sum".to_owned(), json!(a + b));
        Ok(true)
    })?;

    tokio::time::sleep(Duration::from_secs(300)).await;

    service.unadvertise()?;
    connection.close();
    Ok(())
}
