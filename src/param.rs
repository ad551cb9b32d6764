//! Parameter server access through the `rosapi` services.

use serde::Serialize;
use serde_json::{Value, json};

use crate::Result;
use crate::service::Service;
use crate::ws::ConnectionManager;

const GET_PARAM: (&str, &str) = ("/rosapi/get_param", "rosapi/GetParam");
const SET_PARAM: (&str, &str) = ("/rosapi/set_param", "rosapi/SetParam");
const DELETE_PARAM: (&str, &str) = ("/rosapi/delete_param", "rosapi/DeleteParam");

/// A named parameter on the ROS parameter server.
#[derive(Debug, Clone)]
pub struct Param {
    connection: ConnectionManager,
    name: String,
}

impl Param {
    #[must_use]
    pub fn new<N: Into<String>>(connection: &ConnectionManager, name: N) -> Self {
        Self {
            connection: connection.clone(),
            name: name.into(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn service(&self, (name, service_type): (&str, &str)) -> Service {
        Service::new(&self.connection, name, service_type)
    }

    /// Current value as reported by `rosapi`: JSON text, or `""` when unset.
    pub async fn get(&self) -> Result<Value> {
        let mut values = self
            .service(GET_PARAM)
            .call_service(json!({ "name": self.name, "default": "" }))
            .await?;
        Ok(values
            .get_mut("value")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }

    /// Set the parameter. `value` is sent JSON-encoded.
    pub async fn set<V: Serialize + ?Sized>(&self, value: &V) -> Result<()> {
        let encoded = serde_json::to_string(value)?;
        self.service(SET_PARAM)
            .call_service(json!({ "name": self.name, "value": encoded }))
            .await?;
        Ok(())
    }

    pub async fn delete(&self) -> Result<()> {
        self.service(DELETE_PARAM)
            .call_service(json!({ "name": self.name }))
            .await?;
        Ok(())
    }
}
