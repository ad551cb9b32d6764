use serde_json::Value;

use crate::Result;
use crate::error::{Error, Kind};
use crate::events::{STATUS, service_request_event, status_event};

/// An inbound message and the event name it is re-emitted under.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub struct Routed {
    pub event: String,
    pub payload: Value,
}

/// Decode an inbound frame and decide where it goes.
///
/// - `publish` is routed to the topic name, carrying only `msg`
/// - `service_response` is routed to its correlation id, carrying the whole message
/// - `status` is routed to `status:<id>`, or to `status` without an id
/// - `service_request` is routed to `service_request:<service>`, carrying the whole message
///
/// Other operations yield `Ok(None)`. Malformed JSON and messages missing the
/// field they are routed by are [`Kind::Protocol`] errors.
pub fn route_message(text: &str) -> Result<Option<Routed>> {
    let mut message: Value =
        serde_json::from_str(text).map_err(|e| Error::with_source(Kind::Protocol, e))?;

    let Some(op) = message.get("op").and_then(Value::as_str).map(str::to_owned) else {
        return Ok(None);
    };

    let routed = match op.as_str() {
        "publish" => {
            let topic = required_str(&message, "topic", &op)?.to_owned();
            let payload = message
                .get_mut("msg")
                .map(Value::take)
                .unwrap_or(Value::Null);
            Routed {
                event: topic,
                payload,
            }
        }
        "service_response" => Routed {
            event: correlation_id(&message)
                .ok_or_else(|| Error::protocol("service_response without id"))?,
            payload: message,
        },
        "status" => Routed {
            event: correlation_id(&message)
                .map_or_else(|| STATUS.to_owned(), |id| status_event(&id)),
            payload: message,
        },
        "service_request" => Routed {
            event: service_request_event(required_str(&message, "service", &op)?),
            payload: message,
        },
        _ => return Ok(None),
    };

    Ok(Some(routed))
}

fn required_str<'a>(message: &'a Value, field: &str, op: &str) -> Result<&'a str> {
    message
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::protocol(format!("{op} without {field}")))
}

/// Ids are generated as strings locally but other peers may use numbers.
fn correlation_id(message: &Value) -> Option<String> {
    match message.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// Interpret a `service_response` addressed to a call of `service`.
///
/// `result: false` fails with the remote error text; a missing `result` is a
/// protocol violation. Otherwise resolves with `values`, or an empty object.
pub fn service_outcome(service: &str, message: &Value) -> Result<Value> {
    match message.get("result") {
        None => Err(Error::protocol("Invalid service response")),
        Some(Value::Bool(false)) => {
            let reason = match message.get("error") {
                Some(Value::String(text)) if !text.is_empty() => text.clone(),
                Some(other) if !other.is_null() && other != &Value::Bool(false) => {
                    other.to_string()
                }
                _ => format!("Service {service} call failed"),
            };
            Err(Error::service(service, reason))
        }
        Some(_) => Ok(match message.get("values") {
            None | Some(Value::Null) => Value::Object(serde_json::Map::new()),
            Some(values) => values.clone(),
        }),
    }
}
