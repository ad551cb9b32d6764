use serde::Serialize;
use serde_json::Value;

/// Outbound rosbridge operation.
///
/// Serializes to a JSON object tagged by `op`. Optional transport hints are
/// omitted from the wire message when unset.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Subscribe {
        topic: String,
        #[serde(rename = "type")]
        message_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        compression: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        throttle_rate: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        queue_length: Option<u32>,
    },
    Unsubscribe {
        topic: String,
    },
    Advertise {
        topic: String,
        #[serde(rename = "type")]
        message_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        latch: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        queue_size: Option<u32>,
    },
    Unadvertise {
        topic: String,
    },
    Publish {
        topic: String,
        msg: Value,
    },
    CallService {
        id: String,
        service: String,
        #[serde(rename = "type")]
        service_type: String,
        args: Value,
    },
    AdvertiseService {
        service: String,
        #[serde(rename = "type")]
        service_type: String,
    },
    UnadvertiseService {
        service: String,
    },
    /// Reply to an inbound `service_request` (server role).
    ServiceResponse {
        service: String,
        /// Echoes the id of the request being answered
        id: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        values: Option<Value>,
        result: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Transport hints attached to `subscribe` and `advertise`.
///
/// Zero, `false` and empty values mean "not set".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Hints<'a> {
    pub compression: Option<&'a str>,
    pub throttle_rate: Option<u32>,
    pub queue_length: Option<u32>,
    pub queue_size: Option<u32>,
    pub latch: bool,
}

fn set(value: Option<u32>) -> Option<u32> {
    value.filter(|v| *v > 0)
}

impl Request {
    pub(crate) fn subscribe(topic: &str, message_type: &str, hints: Hints<'_>) -> Self {
        Self::Subscribe {
            topic: topic.to_owned(),
            message_type: message_type.to_owned(),
            compression: hints
                .compression
                .filter(|c| !c.is_empty())
                .map(str::to_owned),
            throttle_rate: set(hints.throttle_rate),
            queue_length: set(hints.queue_length),
        }
    }

    #[must_use]
    pub fn unsubscribe(topic: &str) -> Self {
        Self::Unsubscribe {
            topic: topic.to_owned(),
        }
    }

    pub(crate) fn advertise(topic: &str, message_type: &str, hints: Hints<'_>) -> Self {
        Self::Advertise {
            topic: topic.to_owned(),
            message_type: message_type.to_owned(),
            latch: hints.latch.then_some(true),
            queue_size: set(hints.queue_size),
        }
    }

    #[must_use]
    pub fn unadvertise(topic: &str) -> Self {
        Self::Unadvertise {
            topic: topic.to_owned(),
        }
    }

    #[must_use]
    pub fn publish(topic: &str, msg: Value) -> Self {
        Self::Publish {
            topic: topic.to_owned(),
            msg,
        }
    }

    #[must_use]
    pub fn call_service<I, S, T>(id: I, service: S, service_type: T, args: Value) -> Self
    where
        I: Into<String>,
        S: Into<String>,
        T: Into<String>,
    {
        Self::CallService {
            id: id.into(),
            service: service.into(),
            service_type: service_type.into(),
            args,
        }
    }

    #[must_use]
    pub fn advertise_service(service: &str, service_type: &str) -> Self {
        Self::AdvertiseService {
            service: service.to_owned(),
            service_type: service_type.to_owned(),
        }
    }

    #[must_use]
    pub fn unadvertise_service(service: &str) -> Self {
        Self::UnadvertiseService {
            service: service.to_owned(),
        }
    }

    /// Reply to request `id` with `result`. A failed reply carries `error`
    /// instead of `values`.
    #[must_use]
    pub fn service_response(
        service: &str,
        id: Value,
        result: std::result::Result<Value, Option<String>>,
    ) -> Self {
        let (values, result, error) = match result {
            Ok(values) => (Some(values), true, None),
            Err(error) => (None, false, error),
        };
        Self::ServiceResponse {
            service: service.to_owned(),
            id,
            values,
            result,
            error,
        }
    }
}
