use dyn_clone::DynClone;
use serde_json::Value;

use crate::error::Result;

/// Encodes message payloads into the `payload` text column.
pub trait PayloadCodec: DynClone + Send + Sync {
    fn serialize(&self, payload: &Value) -> Result<String>;

    fn deserialize(&self, payload: &str) -> Result<Value>;
}

dyn_clone::clone_trait_object!(PayloadCodec);

#[derive(Debug, Clone, Default)]
pub struct JsonPayloadCodec;

impl PayloadCodec for JsonPayloadCodec {
    fn serialize(&self, payload: &Value) -> Result<String> {
        Ok(serde_json::to_string(payload)?)
    }

    fn deserialize(&self, payload: &str) -> Result<Value> {
        Ok(serde_json::from_str(payload)?)
    }
}
