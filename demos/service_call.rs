//! Call services and read parameters through `rosapi`.
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=info cargo run --example service_call --features tracing
//! ```

use std::time::Duration;

use rosbridge_client::error::Kind;
use rosbridge_client::ws::config::Config;
use rosbridge_client::{ConnectionManager, ConnectionState, ParamManager, ServiceManager};
use serde_json::json;
use tracing::{debug, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let url = std::env::var("ROSBRIDGE_URL").unwrap_or_else(|_| "ws://localhost:9090".to_owned());
    let connection = ConnectionManager::new(Config::default().with_url(url));

    // Calls fail fast while disconnected, so wait for the socket first
    let mut states = connection.state_receiver();
    states
        .wait_for(|state| *state == ConnectionState::Connected)
        .await?;

    let services = ServiceManager::with_timeout(connection.clone(), Duration::from_secs(5));
    match services
        .call("/rosapi/topics", "rosapi/Topics", json!({}), None)
        .await
    {
        Ok(values) => info!(endpoint = "/rosapi/topics", topics = %values["topics"]),
        Err(e) => debug!(endpoint = "/rosapi/topics", error = %e),
    }

    match services
        .call(
            "/add_two_ints",
            "example_interfaces/srv/AddTwoInts",
            json!({"a": 20, "b": 22}),
            Some(Duration::from_secs(1)),
        )
        .await
    {
        Ok(values) => info!(endpoint = "/add_two_ints", sum = %values["sum"]),
        Err(e) if e.kind() == Kind::Timeout => info!(endpoint = "/add_two_ints", "no server answered"),
        Err(e) => debug!(endpoint = "/add_two_ints", error = %e),
    }

    let params = ParamManager::new(connection.clone());
    params.set("/demo/greeting", "hello", None).await?;
    let greeting = params.get("/demo/greeting", None).await?;
    info!(param = "/demo/greeting", value = %greeting);
    params.delete("/demo/greeting", None).await?;

    connection.close();
    Ok(())
}
