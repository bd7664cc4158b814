use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, StoreError},
    message::Message,
};

/// Name of a stream, unique per store. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StreamName(String);

impl StreamName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();

        if name.is_empty() {
            return Err(StoreError::InvalidStreamName);
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StreamName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for StreamName {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for StreamName {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for StreamName {
    type Error = StoreError;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl From<StreamName> for String {
    fn from(val: StreamName) -> Self {
        val.0
    }
}

#[derive(Debug, Clone)]
pub struct Stream {
    pub name: StreamName,
    pub events: Vec<Message>,
}

impl Stream {
    pub fn new(name: StreamName, events: Vec<Message>) -> Self {
        Self { name, events }
    }
}
