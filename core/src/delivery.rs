//! Inbound delivery requests.

use crate::record::Record;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Which dispatch path a request takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPath {
    /// One notification, subject to flow control.
    Single,
    /// Explicit bulk delivery. Pre-authorized, never flow controlled.
    Batch,
}

impl DeliveryPath {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Batch => "batch",
        }
    }
}

/// One inbound call from the upstream platform.
///
/// Wire shape:
///
/// ```json
/// {
///   "topic": "user:update",
///   "isBatch": false,
///   "groupTraits": true,
///   "records": [{"id": "a", "x": 1}],
///   "settings": {"segment": "vip"}
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRequest {
    /// Event topic used for handler lookup.
    pub topic: String,

    /// Ordered update records.
    #[serde(default)]
    pub records: Vec<Record>,

    /// Whether the caller chose the batch path.
    #[serde(default)]
    pub is_batch: bool,

    /// Explicit grouping instruction. Defaults depend on the path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_traits: Option<bool>,

    /// Configuration snapshot attached by the upstream platform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Map<String, Value>>,
}

impl DeliveryRequest {
    /// Create a single-event request.
    #[must_use]
    pub fn single(topic: impl Into<String>, records: Vec<Record>) -> Self {
        Self {
            topic: topic.into(),
            records,
            is_batch: false,
            group_traits: None,
            settings: None,
        }
    }

    /// Create a batch request.
    #[must_use]
    pub fn batch(topic: impl Into<String>, records: Vec<Record>) -> Self {
        Self {
            is_batch: true,
            ..Self::single(topic, records)
        }
    }

    /// Set the grouping instruction explicitly.
    #[must_use]
    pub const fn with_group_traits(mut self, group_traits: bool) -> Self {
        self.group_traits = Some(group_traits);
        self
    }

    /// Attach a settings snapshot.
    #[must_use]
    pub fn with_settings(mut self, settings: Map<String, Value>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Force the batch path (used by the dedicated batch endpoint).
    #[must_use]
    pub const fn into_batch(mut self) -> Self {
        self.is_batch = true;
        self
    }

    /// Dispatch path for this request.
    #[must_use]
    pub const fn path(&self) -> DeliveryPath {
        if self.is_batch {
            DeliveryPath::Batch
        } else {
            DeliveryPath::Single
        }
    }

    /// Effective grouping instruction.
    ///
    /// The single-notification path groups by default; batch paths do not.
    #[must_use]
    pub fn group_traits(&self) -> bool {
        self.group_traits
            .unwrap_or(matches!(self.path(), DeliveryPath::Single))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_from_minimal_body() {
        let request: DeliveryRequest =
            serde_json::from_value(json!({"topic": "user:update"})).unwrap();

        assert_eq!(request.path(), DeliveryPath::Single);
        assert!(request.records.is_empty());
        assert!(request.group_traits());
        assert!(request.settings.is_none());
    }

    #[test]
    fn test_batch_does_not_group_by_default() {
        let request: DeliveryRequest = serde_json::from_value(json!({
            "topic": "user:update",
            "isBatch": true,
            "records": [{"id": "a"}]
        }))
        .unwrap();

        assert_eq!(request.path(), DeliveryPath::Batch);
        assert!(!request.group_traits());
    }

    #[test]
    fn test_explicit_group_traits_wins() {
        let request = DeliveryRequest::batch("t", Vec::new()).with_group_traits(true);
        assert!(request.group_traits());

        let request = DeliveryRequest::single("t", Vec::new()).with_group_traits(false);
        assert!(!request.group_traits());
    }
}
