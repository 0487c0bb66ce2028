//! Update records and the batch grouping processor.
//!
//! A [`Record`] is an opaque payload: an optional entity identifier plus a
//! flat map of attribute deltas. The dispatcher never looks inside the deltas;
//! the only thing it does with a record is count it or, when grouping is
//! requested, merge it with other records for the same entity.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Entity identifier of a record.
///
/// Upstream platforms send ids as strings or numbers. Grouping keys on the
/// canonical text (`42` and `"42"` name the same entity); serialization
/// emits the value exactly as it arrived.
///
/// ```
/// use notiflow_core::Record;
///
/// let record: Record = serde_json::from_str(r#"{"id":42,"x":1}"#).unwrap();
/// assert_eq!(record.entity_id(), Some("42"));
/// assert_eq!(serde_json::to_string(&record).unwrap(), r#"{"id":42,"x":1}"#);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct EntityId {
    key: String,
    raw: Value,
}

impl EntityId {
    /// Canonical text used as the merge key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.key
    }

    fn from_scalar(raw: Value) -> Option<Self> {
        let key = match &raw {
            Value::String(text) => text.clone(),
            Value::Number(number) => number.to_string(),
            Value::Bool(flag) => flag.to_string(),
            Value::Null | Value::Array(_) | Value::Object(_) => return None,
        };
        Some(Self { key, raw })
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self {
            raw: Value::String(id.clone()),
            key: id,
        }
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self::from(id.to_owned())
    }
}

impl From<i64> for EntityId {
    fn from(id: i64) -> Self {
        Self {
            key: id.to_string(),
            raw: Value::from(id),
        }
    }
}

impl From<u64> for EntityId {
    fn from(id: u64) -> Self {
        Self {
            key: id.to_string(),
            raw: Value::from(id),
        }
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key)
    }
}

impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        Self::from_scalar(raw).ok_or_else(|| {
            de::Error::custom("entity id must be a string, number or boolean")
        })
    }
}

/// One update payload as delivered by the upstream platform.
///
/// On the wire a record is a flat JSON object. The `id` key identifies the
/// entity; every other key is an attribute delta.
///
/// ```
/// use notiflow_core::Record;
///
/// let record: Record = serde_json::from_str(r#"{"id":"a","x":1}"#).unwrap();
/// assert_eq!(record.entity_id(), Some("a"));
/// assert_eq!(record.traits["x"], 1);
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Record {
    /// Entity identifier. Records without one are never merged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,

    /// Attribute deltas keyed by attribute name.
    #[serde(flatten)]
    pub traits: Map<String, Value>,
}

impl Record {
    /// Create an empty record for `id`.
    #[must_use]
    pub fn new(id: impl Into<EntityId>) -> Self {
        Self {
            id: Some(id.into()),
            traits: Map::new(),
        }
    }

    /// Create a record with no entity identifier.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Set an attribute delta.
    #[must_use]
    pub fn with_trait(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.traits.insert(key.into(), value.into());
        self
    }

    /// Entity identifier, if any.
    #[must_use]
    pub fn entity_id(&self) -> Option<&str> {
        self.id.as_ref().map(EntityId::as_str)
    }

    /// Apply `later` on top of this record, last write wins per key.
    fn absorb(&mut self, later: Self) {
        self.traits.extend(later.traits);
    }
}

/// Normalize a sequence of records before dispatch.
///
/// With `group_traits == false` the input is returned untouched, so arrival
/// order is preserved and later updates for an entity are never applied
/// before earlier ones.
///
/// With `group_traits == true`, records that share an entity id are merged
/// into one. Later attribute values overwrite earlier ones for the same key,
/// and the merged record takes the position of its *last* contributing input
/// record. Records for other entities keep their relative order.
///
/// ```
/// use notiflow_core::{group, Record};
///
/// let records = vec![
///     Record::new("a").with_trait("x", 1),
///     Record::new("a").with_trait("x", 2),
///     Record::new("b").with_trait("y", 5),
/// ];
/// let grouped = group(records, true);
/// assert_eq!(grouped.len(), 2);
/// assert_eq!(grouped[0], Record::new("a").with_trait("x", 2));
/// assert_eq!(grouped[1], Record::new("b").with_trait("y", 5));
/// ```
#[must_use]
pub fn group(records: Vec<Record>, group_traits: bool) -> Vec<Record> {
    if !group_traits {
        return records;
    }

    let mut last_position: HashMap<String, usize> = HashMap::new();
    for (position, record) in records.iter().enumerate() {
        if let Some(id) = record.entity_id() {
            last_position.insert(id.to_owned(), position);
        }
    }

    let mut pending: HashMap<String, Record> = HashMap::with_capacity(last_position.len());
    let mut grouped = Vec::with_capacity(last_position.len());

    for (position, record) in records.into_iter().enumerate() {
        let Some(id) = record.entity_id().map(str::to_owned) else {
            grouped.push(record);
            continue;
        };

        let merged = match pending.remove(&id) {
            Some(mut earlier) => {
                earlier.absorb(record);
                earlier
            }
            None => record,
        };

        if last_position.get(&id) == Some(&position) {
            grouped.push(merged);
        } else {
            pending.insert(id, merged);
        }
    }

    grouped
}
