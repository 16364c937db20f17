//! Queue messages and the event payload the import entry point is invoked with.
//!
//! A message carries the three document attributes (`id`, `name`, `modifiedTime`) as
//! string message attributes and a human-readable body:
//!
//! ```json
//! {"messageAttributes": {"id": {"stringValue": "D1", "dataType": "String"}, ...},
//!  "body": "Sending import event to queue for document D1"}
//! ```
//!
//! An event payload is either `{"Records": [message, ...]}`, a bare JSON array of
//! messages, or newline-delimited messages (the format [`crate::dispatch::SpoolQueue`]
//! writes).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::types::{ImportNotification, ID_ATTRIBUTE, MODIFIED_TIME_ATTRIBUTE, NAME_ATTRIBUTE};

/// A typed message attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAttribute {
    #[serde(rename = "dataType", default = "string_data_type")]
    pub data_type: String,
    #[serde(rename = "stringValue", default)]
    pub string_value: Option<String>,
}

fn string_data_type() -> String {
    "String".to_string()
}

impl MessageAttribute {
    pub fn string(value: impl Into<String>) -> Self {
        Self {
            data_type: string_data_type(),
            string_value: Some(value.into()),
        }
    }
}

/// One queue message describing a document to import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    #[serde(rename = "messageAttributes", default)]
    pub attributes: BTreeMap<String, MessageAttribute>,
    #[serde(default)]
    pub body: String,
}

impl QueueMessage {
    /// Build the message for a notification.
    pub fn from_notification(notification: &ImportNotification) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert(ID_ATTRIBUTE.to_string(), MessageAttribute::string(&notification.id));
        attributes.insert(NAME_ATTRIBUTE.to_string(), MessageAttribute::string(&notification.name));
        attributes.insert(
            MODIFIED_TIME_ATTRIBUTE.to_string(),
            MessageAttribute::string(&notification.modified_time),
        );
        Self {
            attributes,
            body: format!("Sending import event to queue for document {}", notification.id),
        }
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .and_then(|a| a.string_value.as_deref())
    }

    /// Extract the notification. The `id` attribute is required; the others default to
    /// empty strings since the importer only relies on the id.
    pub fn to_notification(&self) -> PipelineResult<ImportNotification> {
        let id = self
            .attribute(ID_ATTRIBUTE)
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| PipelineError::Event(format!("message is missing the '{ID_ATTRIBUTE}' attribute")))?;
        Ok(ImportNotification::new(
            id,
            self.attribute(NAME_ATTRIBUTE).unwrap_or_default(),
            self.attribute(MODIFIED_TIME_ATTRIBUTE).unwrap_or_default(),
        ))
    }
}

/// A batch of queue messages delivered to the import entry point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPayload {
    #[serde(rename = "Records", default)]
    pub records: Vec<QueueMessage>,
}

impl EventPayload {
    /// Read a payload from a file.
    pub fn from_path(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Parse a payload from JSON (`{"Records": [...]}` or an array) or NDJSON.
    pub fn from_json_str(input: &str) -> PipelineResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }

        // First try parsing as a single JSON value.
        if let Ok(v) = serde_json::from_str::<serde_json::Value>(trimmed) {
            return match v {
                serde_json::Value::Array(_) => Ok(Self {
                    records: serde_json::from_value(v)?,
                }),
                serde_json::Value::Object(_) if v.get("Records").is_some() => Ok(serde_json::from_value(v)?),
                serde_json::Value::Object(_) => Ok(Self {
                    records: vec![serde_json::from_value(v)?],
                }),
                _ => Err(PipelineError::Event(
                    "event must be an object, an array of records, or NDJSON".to_string(),
                )),
            };
        }

        // Fall back to NDJSON.
        let mut records = Vec::new();
        for (i, line) in trimmed.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let record = serde_json::from_str::<QueueMessage>(line)
                .map_err(|e| PipelineError::Event(format!("invalid ndjson at line {}: {}", i + 1, e)))?;
            records.push(record);
        }
        Ok(Self { records })
    }

    /// Extract one notification per record, in order.
    pub fn notifications(&self) -> PipelineResult<Vec<ImportNotification>> {
        self.records.iter().map(QueueMessage::to_notification).collect()
    }
}
