//! Static client registry.
//!
//! The registry is a JSON array of [`ClientConfig`] entries. A document resolves to the
//! **first** entry, in registry order, whose match key it matches, even when a later entry
//! would be a more specific match. Overlapping keys are reported by
//! [`ClientRegistry::ambiguities`] and rejected by [`ClientRegistry::validate`].
//!
//! The original registry field names are accepted:
//!
//! ```json
//! [{"order_url": "https://docs.google.com/spreadsheets/d/SHEET123/edit",
//!   "active_client": true, "table_name": "acme", "adj_cli": "Acme",
//!   "aws_schema": "client_order_data", "recomendation": false}]
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::types::document_url;

fn default_warehouse_schema() -> String {
    "client_order_data".to_string()
}

/// How one monitored document maps to warehouse tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Fragment matched against the document id / URL.
    #[serde(alias = "order_url")]
    pub match_key: String,
    /// Whether the client is imported during the incremental (daytime) window.
    #[serde(default)]
    pub active_client: bool,
    /// Base name of the warehouse tables (`{table_name}_orders`, `{table_name}_promo_codes`).
    pub table_name: String,
    #[serde(default, alias = "adj_cli")]
    pub display_name: String,
    #[serde(default = "default_warehouse_schema", alias = "aws_schema")]
    pub warehouse_schema: String,
    #[serde(default, alias = "recomendation")]
    pub recommendation: bool,
}

impl ClientConfig {
    /// Minimal config with the default schema, inactive, no recommendations.
    pub fn new(match_key: impl Into<String>, table_name: impl Into<String>) -> Self {
        let table_name = table_name.into();
        Self {
            match_key: match_key.into(),
            active_client: false,
            display_name: table_name.clone(),
            table_name,
            warehouse_schema: default_warehouse_schema(),
            recommendation: false,
        }
    }

    /// True when this entry's key names the document: either the key contains the
    /// document id (a full spreadsheet URL), or the document URL contains the key.
    pub fn matches(&self, document_id: &str) -> bool {
        self.match_key.contains(document_id) || document_url(document_id).contains(&self.match_key)
    }

    /// Document id this entry is aimed at: the `/d/{id}` segment of a spreadsheet URL,
    /// otherwise the trimmed key itself.
    pub fn target_id(&self) -> &str {
        let key = self.match_key.trim();
        key.find("/d/")
            .map(|pos| {
                let rest = &key[pos + 3..];
                let end = rest.find(['/', '#', '?']).unwrap_or(rest.len());
                &rest[..end]
            })
            .filter(|id| !id.is_empty())
            .unwrap_or(key)
    }
}

/// Ordered list of client configurations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientRegistry {
    entries: Vec<ClientConfig>,
}

impl ClientRegistry {
    /// Build a registry, rejecting empty and duplicate match keys.
    pub fn from_entries(entries: Vec<ClientConfig>) -> PipelineResult<Self> {
        {
            let mut seen: HashMap<&str, usize> = HashMap::with_capacity(entries.len());
            for (idx, entry) in entries.iter().enumerate() {
                let key = entry.match_key.trim();
                if key.is_empty() {
                    return Err(PipelineError::Registry(format!(
                        "entry {idx} ('{}') has an empty match key",
                        entry.table_name
                    )));
                }
                if let Some(first) = seen.insert(key, idx) {
                    return Err(PipelineError::Registry(format!(
                        "entries {first} and {idx} share match key '{key}'"
                    )));
                }
            }
        }

        let registry = Self { entries };
        for (first, second) in registry.ambiguities() {
            warn!(
                first,
                second,
                first_key = %registry.entries[first].match_key,
                second_key = %registry.entries[second].match_key,
                "overlapping registry keys, the earlier entry wins"
            );
        }
        Ok(registry)
    }

    /// Parse a registry from its JSON text.
    pub fn from_json_str(input: &str) -> PipelineResult<Self> {
        let entries: Vec<ClientConfig> = serde_json::from_str(input)?;
        Self::from_entries(entries)
    }

    /// Load a registry file.
    pub fn load(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let registry = Self::from_json_str(&text)?;
        debug!(path = %path.display(), entries = registry.len(), "loaded client registry");
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ClientConfig] {
        &self.entries
    }

    /// First entry, in registry order, that matches `document_id`.
    pub fn resolve(&self, document_id: &str) -> Option<&ClientConfig> {
        self.entries.iter().find(|c| c.matches(document_id))
    }

    /// Index pairs `(earlier, later)` that a single document could match: one key contains
    /// the other, or either entry matches the document the other one targets.
    pub fn ambiguities(&self) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        for (i, a) in self.entries.iter().enumerate() {
            for (j, b) in self.entries.iter().enumerate().skip(i + 1) {
                let nested = a.match_key.contains(&b.match_key) || b.match_key.contains(&a.match_key);
                if nested || a.matches(b.target_id()) || b.matches(a.target_id()) {
                    out.push((i, j));
                }
            }
        }
        out
    }

    /// Fail on the first pair of overlapping keys.
    pub fn validate(&self) -> PipelineResult<()> {
        match self.ambiguities().first() {
            Some(&(first, second)) => Err(PipelineError::AmbiguousRegistry {
                first,
                first_key: self.entries[first].match_key.clone(),
                second,
                second_key: self.entries[second].match_key.clone(),
            }),
            None => Ok(()),
        }
    }
}
