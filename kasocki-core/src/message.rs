//! Deserializer pipeline: turns a raw [`BrokerRecord`] into the JSON object
//! delivered to the client, augmented with origin metadata.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::broker::BrokerRecord;
use crate::error::KasockiError;

/// Reserved key under which origin metadata is attached to a deserialized
/// message.
pub const ORIGIN_KEY: &str = "origin";

/// A pluggable deserializer: turns a raw broker record into a JSON value.
/// Boxed as a trait object (rather than a generic type parameter) so a
/// session can be configured with a deserializer at construction time
/// without becoming generic over it, mirroring the broker adapter's own
/// trait-object seam.
pub type Deserializer = Arc<dyn Fn(&BrokerRecord) -> Result<Value, KasockiError> + Send + Sync>;

/// The default deserializer: decode the payload as UTF-8 and parse as JSON.
///
/// # Errors
///
/// Returns [`KasockiError::Deserialization`] if the payload is not valid
/// UTF-8 or not valid JSON.
pub fn default_deserializer(record: &BrokerRecord) -> Result<Value, KasockiError> {
    let text = std::str::from_utf8(&record.payload)
        .map_err(|e| KasockiError::Deserialization(format!("invalid utf-8 payload: {e}")))?;
    serde_json::from_str(text)
        .map_err(|e| KasockiError::Deserialization(format!("invalid json payload: {e}")))
}

/// Build the origin sub-object `{topic, partition, offset, timestamp, key}`
/// for a record.
#[must_use]
pub fn origin_metadata(record: &BrokerRecord) -> Value {
    let key = record
        .key
        .as_ref()
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned());
    serde_json::json!({
        "topic": record.topic,
        "partition": record.partition,
        "offset": record.offset,
        "timestamp": record.timestamp,
        "key": key,
    })
}

/// Run a deserializer over a record and attach origin metadata under
/// [`ORIGIN_KEY`]. If the deserializer's output is not a JSON object, it is
/// wrapped under a `value` key so origin metadata always has somewhere to
/// attach.
///
/// # Errors
///
/// Propagates whatever [`KasockiError`] the deserializer returns.
pub fn deserialize_message(deserializer: &Deserializer, record: &BrokerRecord) -> Result<Value, KasockiError> {
    let decoded = deserializer(record)?;
    let mut object = match decoded {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        },
    };
    object.insert(ORIGIN_KEY.to_string(), origin_metadata(record));
    Ok(Value::Object(object))
}
