//! Configuration for the `sheet-pipeline` binary.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::importer::{DEFAULT_LOCAL_RADIO_QUERY, DEFAULT_NON_LOCAL_QUERY, ImportSettings};
use crate::observability::Severity;
use crate::scanner::{BootstrapWrite, ScanOptions, UnchangedPolicy};
use crate::warehouse::WarehouseCredentials;

/// Environment variable overriding [`PipelineConfig::access_key_id`].
pub const ACCESS_KEY_ID_ENV: &str = "SHEET_PIPELINE_ACCESS_KEY_ID";
/// Environment variable overriding [`PipelineConfig::secret_access_key`].
pub const SECRET_ACCESS_KEY_ENV: &str = "SHEET_PIPELINE_SECRET_ACCESS_KEY";

/// Main configuration, read from TOML. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Monitored folder, a sub-directory of `workbooks_dir`. Empty means the directory itself.
    pub folder_id: String,
    pub ledger_path: PathBuf,
    /// JSON array of client configurations.
    pub registry_path: PathBuf,
    /// Reject registries with overlapping match keys.
    pub strict_registry: bool,

    pub bucket: String,
    pub history_schema: String,
    /// Hour (0-24) from which all clients are fully reloaded; 24 disables full reloads.
    pub full_reload_from_hour: u32,
    pub create_tables: bool,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub local_radio_query: String,
    pub non_local_query: String,

    pub unchanged_policy: UnchangedPolicy,
    pub bootstrap: BootstrapWrite,
    pub alert_at_or_above: Severity,
    /// Optional append-only event log.
    pub event_log_path: Option<PathBuf>,
    /// Documents per listing page.
    pub page_size: usize,

    pub workbooks_dir: PathBuf,
    pub objects_dir: PathBuf,
    /// NDJSON file queued notifications are appended to.
    pub spool_path: PathBuf,
    /// SQL script warehouse statements are appended to.
    pub sql_log_path: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let import = ImportSettings::default();
        Self {
            folder_id: String::new(),
            ledger_path: PathBuf::from("ledger.json"),
            registry_path: PathBuf::from("client_list.json"),
            strict_registry: false,
            bucket: import.bucket,
            history_schema: import.history_schema,
            full_reload_from_hour: import.full_reload_from_hour,
            create_tables: import.create_tables,
            access_key_id: String::new(),
            secret_access_key: String::new(),
            local_radio_query: DEFAULT_LOCAL_RADIO_QUERY.to_string(),
            non_local_query: DEFAULT_NON_LOCAL_QUERY.to_string(),
            unchanged_policy: UnchangedPolicy::default(),
            bootstrap: BootstrapWrite::default(),
            alert_at_or_above: import.alert_at_or_above,
            event_log_path: None,
            page_size: 100,
            workbooks_dir: PathBuf::from("workbooks"),
            objects_dir: PathBuf::from("objects"),
            spool_path: PathBuf::from("events.ndjson"),
            sql_log_path: PathBuf::from("warehouse.sql"),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(input: &str) -> PipelineResult<Self> {
        let config: PipelineConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.full_reload_from_hour > 24 {
            return Err(PipelineError::Config(format!(
                "full_reload_from_hour must be between 0 and 24, got {}",
                self.full_reload_from_hour
            )));
        }
        if self.page_size == 0 {
            return Err(PipelineError::Config("page_size must be greater than zero".to_string()));
        }
        if self.bucket.trim().is_empty() {
            return Err(PipelineError::Config("bucket must not be empty".to_string()));
        }
        Ok(())
    }

    /// Replace credentials with values found through `lookup` (normally `std::env::var`).
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup(ACCESS_KEY_ID_ENV) {
            self.access_key_id = v;
        }
        if let Some(v) = lookup(SECRET_ACCESS_KEY_ENV) {
            self.secret_access_key = v;
        }
    }

    /// Directory holding the monitored workbooks.
    pub fn folder_dir(&self) -> PathBuf {
        if self.folder_id.is_empty() {
            self.workbooks_dir.clone()
        } else {
            self.workbooks_dir.join(&self.folder_id)
        }
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            unchanged_policy: self.unchanged_policy,
            bootstrap: self.bootstrap,
        }
    }

    pub fn import_settings(&self) -> ImportSettings {
        ImportSettings {
            bucket: self.bucket.clone(),
            credentials: WarehouseCredentials {
                access_key_id: self.access_key_id.clone(),
                secret_access_key: self.secret_access_key.clone(),
            },
            history_schema: self.history_schema.clone(),
            full_reload_from_hour: self.full_reload_from_hour,
            create_tables: self.create_tables,
            local_radio_query: self.local_radio_query.clone(),
            non_local_query: self.non_local_query.clone(),
            alert_at_or_above: self.alert_at_or_above,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.bucket, "adresults");
        assert_eq!(config.full_reload_from_hour, 20);
        assert_eq!(config.scan_options(), ScanOptions::default());
    }

    #[test]
    fn policies_parse_from_snake_case() {
        let config = PipelineConfig::from_toml_str(
            r#"
folder_id = "orders"
unchanged_policy = "reimport"
bootstrap = "after_dispatch"
alert_at_or_above = "critical"
full_reload_from_hour = 24
"#,
        )
        .unwrap();
        assert_eq!(config.unchanged_policy, UnchangedPolicy::Reimport);
        assert_eq!(config.bootstrap, BootstrapWrite::AfterDispatch);
        assert_eq!(config.alert_at_or_above, Severity::Critical);
        assert_eq!(config.folder_dir(), PathBuf::from("workbooks").join("orders"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            PipelineConfig::from_toml_str("full_reload_from_hour = 25"),
            Err(PipelineError::Config(_))
        ));
        assert!(matches!(
            PipelineConfig::from_toml_str("page_size = 0"),
            Err(PipelineError::Config(_))
        ));
        assert!(matches!(
            PipelineConfig::from_toml_str("page_size = \"many\""),
            Err(PipelineError::Toml(_))
        ));
    }

    #[test]
    fn env_overrides_replace_credentials() {
        let mut config = PipelineConfig {
            access_key_id: "from-file".to_string(),
            ..PipelineConfig::default()
        };
        config.apply_env_overrides(|key| (key == SECRET_ACCESS_KEY_ENV).then(|| "env-secret".to_string()));

        let creds = config.import_settings().credentials;
        assert_eq!(creds.access_key_id, "from-file");
        assert_eq!(creds.secret_access_key, "env-secret");
    }
}
