use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use dyn_clone::DynClone;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;

/// Domain message read from or appended to a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub uuid: Uuid,
    pub name: String,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub payload: Value,
    pub metadata: BTreeMap<String, String>,
}

impl Message {
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = uuid;

        self
    }

    pub fn version(mut self, version: u64) -> Self {
        self.version = version;

        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;

        self
    }

    pub fn payload<D: Serialize>(mut self, value: D) -> Result<Self> {
        self.payload = serde_json::to_value(&value)?;

        Ok(self)
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());

        self
    }

    /// Sets the `aggregate_id` and `aggregate_type` metadata used by the
    /// unique version index.
    pub fn aggregate(self, aggregate_type: impl ToString, aggregate_id: impl ToString) -> Self {
        self.metadata("aggregate_type", aggregate_type)
            .metadata("aggregate_id", aggregate_id)
    }

    pub fn to_payload<D: DeserializeOwned>(&self) -> Result<D> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    pub fn aggregate_id(&self) -> Option<&str> {
        self.metadata.get("aggregate_id").map(String::as_str)
    }

    pub fn aggregate_type(&self) -> Option<&str> {
        self.metadata.get("aggregate_type").map(String::as_str)
    }
}

impl Default for Message {
    fn default() -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: String::default(),
            version: 1,
            created_at: Utc::now(),
            payload: Value::default(),
            metadata: BTreeMap::default(),
        }
    }
}

/// Primitive fields of a message, the shape exchanged with the table rows.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageFields {
    pub uuid: Uuid,
    pub message_name: String,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub payload: Value,
    pub metadata: BTreeMap<String, String>,
}

/// Builds messages back from stored fields, dispatching on the event name.
pub trait MessageFactory: DynClone + Send + Sync {
    fn create_from_fields(&self, name: &str, fields: MessageFields) -> anyhow::Result<Message>;
}

dyn_clone::clone_trait_object!(MessageFactory);

/// Turns messages into the fields written to a row.
pub trait MessageConverter: DynClone + Send + Sync {
    fn to_fields(&self, message: &Message) -> anyhow::Result<MessageFields>;
}

dyn_clone::clone_trait_object!(MessageConverter);

/// Accepts every event name and copies the fields verbatim.
#[derive(Debug, Clone, Default)]
pub struct DefaultMessageFactory;

impl MessageFactory for DefaultMessageFactory {
    fn create_from_fields(&self, name: &str, fields: MessageFields) -> anyhow::Result<Message> {
        Ok(Message {
            uuid: fields.uuid,
            name: name.to_owned(),
            version: fields.version,
            created_at: fields.created_at,
            payload: fields.payload,
            metadata: fields.metadata,
        })
    }
}

type Constructor = Arc<dyn Fn(MessageFields) -> anyhow::Result<Message> + Send + Sync>;

/// Factory restricted to registered event names.
///
/// ```rust
/// use streamtable_store::{MessageFactory, MessageRegistry};
///
/// let registry = MessageRegistry::default()
///     .register("user-created")
///     .register_with("user-renamed", |fields| {
///         let mut message = streamtable_store::Message::new("user-renamed");
///         message.uuid = fields.uuid;
///         message.version = fields.version;
///         message.created_at = fields.created_at;
///         message.payload = fields.payload;
///         message.metadata = fields.metadata;
///         Ok(message)
///     });
///
/// assert!(registry.contains("user-created"));
/// assert!(!registry.contains("user-deleted"));
/// ```
#[derive(Clone, Default)]
pub struct MessageRegistry {
    constructors: HashMap<String, Constructor>,
}

impl MessageRegistry {
    pub fn register(self, name: impl Into<String>) -> Self {
        self.register_with(name, |fields| {
            let name = fields.message_name.to_owned();
            DefaultMessageFactory.create_from_fields(&name, fields)
        })
    }

    pub fn register_with<F>(mut self, name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(MessageFields) -> anyhow::Result<Message> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Arc::new(constructor));

        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }
}

impl MessageFactory for MessageRegistry {
    fn create_from_fields(&self, name: &str, fields: MessageFields) -> anyhow::Result<Message> {
        let Some(constructor) = self.constructors.get(name) else {
            anyhow::bail!("no message registered for event `{name}`");
        };

        constructor(fields)
    }
}

/// Hands the message fields through untouched.
#[derive(Debug, Clone, Default)]
pub struct NoOpMessageConverter;

impl MessageConverter for NoOpMessageConverter {
    fn to_fields(&self, message: &Message) -> anyhow::Result<MessageFields> {
        Ok(MessageFields {
            uuid: message.uuid,
            message_name: message.name.to_owned(),
            version: message.version,
            created_at: message.created_at,
            payload: message.payload.clone(),
            metadata: message.metadata.clone(),
        })
    }
}
