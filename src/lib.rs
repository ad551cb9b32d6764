#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod error;
pub mod events;
pub mod managers;
pub mod param;
pub mod protocol;
pub(crate) mod registration;
pub mod service;
pub mod topic;
pub mod ws;

use crate::error::Error;

pub use crate::events::{Event, EventDispatcher, ListenerId};
pub use crate::managers::{DEFAULT_CALL_TIMEOUT, ParamManager, ServiceManager, TopicManager};
pub use crate::param::Param;
pub use crate::service::{Service, ServiceHandler};
pub use crate::topic::{Topic, TopicOptions};
pub use crate::ws::{ConnectionManager, ConnectionState};

pub type Result<T> = std::result::Result<T, Error>;
