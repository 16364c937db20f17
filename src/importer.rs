//! Per-document import: worksheet tabs in, warehouse tables out.
//!
//! An import resolves the notified document against the [`ClientRegistry`], picks a
//! [`LoadBranch`] from the hour of day, then:
//!
//! 1. reads `Promo Codes` and writes the vendor-id formula into `B1`;
//! 2. reads `Current Year Orders` plus history (the `Historical Orders` tab on a full
//!    reload, the warehouse on an incremental load);
//! 3. reshapes orders and bulk loads `{table}_orders`;
//! 4. reshapes promo codes and bulk loads `{table}_promo_codes`;
//! 5. writes the reference tables back into the workbook.
//!
//! Any error in steps 1-4 ends the attempt with [`ImportOutcome::Failed`]. Writeback
//! errors are logged and reported in the [`ImportSummary`] only.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Timelike;
use tracing::{debug, error, info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::observability::{PipelineObserver, Severity, severity_for_error};
use crate::object_store::ObjectStore;
use crate::registry::{ClientConfig, ClientRegistry};
use crate::sheets::{
    CURRENT_ORDERS_TAB, HISTORICAL_ORDERS_TAB, PROMO_CODES_TAB, ReferenceTable, SpreadsheetStore,
    VENDOR_ID_CELL, VENDOR_ID_FORMULA,
};
use crate::transform::{RawTable, orders_dataset, promo_codes_dataset};
use crate::types::ImportNotification;
use crate::warehouse::{BulkLoader, Warehouse, WarehouseCredentials, history_sql};

pub const DEFAULT_LOCAL_RADIO_QUERY: &str =
    "SELECT client_name,combined,date_added,pseudo_vendor_id FROM matt_testing.local_radio_pseudo_id";

pub const DEFAULT_NON_LOCAL_QUERY: &str = "select vendor_id, station_name, market_name, Media_Type, Adjusted_Market_Name, Adjusted_Show_Name, Genre_itunes, Genre_ARM, Subgenre_iTunes, Subgenre_ARM, Itunes_URL, Unique_show_flag, Master_vendor_id from production.gsheet.unique_shows";

/// Settings shared by every import.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportSettings {
    /// Bucket the CSV snapshots are staged in.
    pub bucket: String,
    pub credentials: WarehouseCredentials,
    /// Schema queried for previous years' orders on incremental loads.
    pub history_schema: String,
    /// Hour of day (0-23) from which every client gets a full reload.
    pub full_reload_from_hour: u32,
    /// Issue `CREATE TABLE IF NOT EXISTS` before loading.
    pub create_tables: bool,
    pub local_radio_query: String,
    pub non_local_query: String,
    /// Failed imports at or above this severity are reported through `on_alert`.
    pub alert_at_or_above: Severity,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            bucket: "adresults".to_string(),
            credentials: WarehouseCredentials::default(),
            history_schema: "production.client_order_data".to_string(),
            full_reload_from_hour: 20,
            create_tables: true,
            local_radio_query: DEFAULT_LOCAL_RADIO_QUERY.to_string(),
            non_local_query: DEFAULT_NON_LOCAL_QUERY.to_string(),
            alert_at_or_above: Severity::Error,
        }
    }
}

/// Where an import takes previous years' orders from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadBranch {
    /// History from the `Historical Orders` tab.
    FullReload,
    /// History from the warehouse.
    Incremental,
}

impl fmt::Display for LoadBranch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoadBranch::FullReload => "full reload",
            LoadBranch::Incremental => "incremental",
        })
    }
}

/// Branch for an import at `hour`. `None` means the client is not imported at this hour.
pub fn select_branch(hour: u32, full_reload_from_hour: u32, active_client: bool) -> Option<LoadBranch> {
    if hour >= full_reload_from_hour {
        Some(LoadBranch::FullReload)
    } else if active_client {
        Some(LoadBranch::Incremental)
    } else {
        None
    }
}

/// Reference tables fetched once per import run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportContext {
    pub local_radio: ReferenceTable,
    pub non_local: ReferenceTable,
}

impl ImportContext {
    pub fn new(local_radio: ReferenceTable, non_local: ReferenceTable) -> Self {
        Self { local_radio, non_local }
    }

    /// Context with no reference rows; writebacks are skipped.
    pub fn empty() -> Self {
        Self::new(ReferenceTable::local_radio(Vec::new()), ReferenceTable::non_local(Vec::new()))
    }
}

/// Details of a completed import.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportSummary {
    pub table_name: String,
    pub display_name: String,
    pub document_url: String,
    pub branch: LoadBranch,
    pub promo_rows: usize,
    pub missing_vendor_ids: usize,
    pub recommendation: bool,
    pub writeback_errors: Vec<String>,
    pub elapsed: Duration,
}

impl ImportSummary {
    /// Wording for the new promo code count. Recommendation matching runs elsewhere.
    pub fn new_promo_codes(&self) -> &'static str {
        if self.recommendation {
            "pending recommendation run"
        } else {
            "recommendations needed"
        }
    }
}

/// Result of one import attempt.
#[derive(Debug)]
pub enum ImportOutcome {
    /// No registry entry matches the document.
    Skipped { document_id: String, reason: String },
    /// The client is inactive and it is not full-reload time.
    Inactive { table_name: String },
    Completed(ImportSummary),
    Failed {
        table_name: String,
        document_url: String,
        error: PipelineError,
    },
}

impl ImportOutcome {
    /// Table name, or the document id for skipped documents.
    pub fn label(&self) -> &str {
        match self {
            ImportOutcome::Skipped { document_id, .. } => document_id,
            ImportOutcome::Inactive { table_name } => table_name,
            ImportOutcome::Completed(summary) => &summary.table_name,
            ImportOutcome::Failed { table_name, .. } => table_name,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ImportOutcome::Failed { .. })
    }

    /// One entry of the end-of-run report.
    pub fn status_line(&self) -> String {
        match self {
            ImportOutcome::Skipped { document_id, reason } => format!("{document_id} skipped: {reason}"),
            ImportOutcome::Inactive { table_name } => format!("{table_name} is inactive, not imported"),
            ImportOutcome::Completed(s) => format!(
                "{} completed successfully \n Number of New Promo Codes: {}\nNumber of Missing Vendor ID's: {} out of {}\n{}",
                s.table_name,
                s.new_promo_codes(),
                s.missing_vendor_ids,
                s.promo_rows,
                s.document_url
            ),
            ImportOutcome::Failed {
                table_name,
                document_url,
                error,
            } => format!("{table_name} has errored: {error}\n{document_url}"),
        }
    }
}

/// Outcomes of one import run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub outcomes: Vec<ImportOutcome>,
}

impl RunSummary {
    pub fn push(&mut self, outcome: ImportOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn completed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ImportOutcome::Completed(_)))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failed()).count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ImportOutcome::Skipped { .. } | ImportOutcome::Inactive { .. }))
            .count()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for outcome in &self.outcomes {
            writeln!(f, "{}", outcome.status_line())?;
            if let ImportOutcome::Completed(s) = outcome {
                writeln!(f, "Total Time: {}", format_elapsed(s.elapsed))?;
                for e in &s.writeback_errors {
                    writeln!(f, "writeback failed: {e}")?;
                }
            }
        }
        write!(
            f,
            "imports: completed={}, failed={}, skipped={}",
            self.completed(),
            self.failed(),
            self.skipped()
        )
    }
}

/// `m:ss`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}

/// Imports documents into the warehouse.
pub struct Importer<S, O, W> {
    registry: ClientRegistry,
    settings: ImportSettings,
    sheets: S,
    objects: O,
    warehouse: W,
    observer: Option<Arc<dyn PipelineObserver>>,
}

impl<S, O, W> fmt::Debug for Importer<S, O, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Importer")
            .field("clients", &self.registry.len())
            .field("settings", &self.settings)
            .field("observer_set", &self.observer.is_some())
            .finish()
    }
}

impl<S, O, W> Importer<S, O, W>
where
    S: SpreadsheetStore,
    O: ObjectStore,
    W: Warehouse,
{
    pub fn new(registry: ClientRegistry, settings: ImportSettings, sheets: S, objects: O, warehouse: W) -> Self {
        Self {
            registry,
            settings,
            sheets,
            objects,
            warehouse,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &ImportSettings {
        &self.settings
    }

    pub fn sheets(&self) -> &S {
        &self.sheets
    }

    pub fn objects(&self) -> &O {
        &self.objects
    }

    pub fn warehouse(&self) -> &W {
        &self.warehouse
    }

    /// Fetch the reference tables for this run.
    pub fn prepare_context(&mut self) -> PipelineResult<ImportContext> {
        let local_radio = ReferenceTable::local_radio(self.warehouse.query(&self.settings.local_radio_query)?);
        let non_local = ReferenceTable::non_local(self.warehouse.query(&self.settings.non_local_query)?);
        info!(
            local_radio_rows = local_radio.rows.len(),
            non_local_rows = non_local.rows.len(),
            "fetched reference tables"
        );
        Ok(ImportContext::new(local_radio, non_local))
    }

    /// Import every notification with one shared context.
    pub fn run(&mut self, notifications: &[ImportNotification]) -> PipelineResult<RunSummary> {
        let context = self.prepare_context()?;
        let mut summary = RunSummary::default();
        for notification in notifications {
            summary.push(self.import(&context, notification));
        }
        info!(
            completed = summary.completed(),
            failed = summary.failed(),
            skipped = summary.skipped(),
            "import run finished"
        );
        Ok(summary)
    }

    /// Import one document, branching on the current local hour.
    pub fn import(&mut self, context: &ImportContext, notification: &ImportNotification) -> ImportOutcome {
        self.import_at_hour(context, notification, chrono::Local::now().hour())
    }

    /// Import one document as if it were `hour` o'clock.
    pub fn import_at_hour(
        &mut self,
        context: &ImportContext,
        notification: &ImportNotification,
        hour: u32,
    ) -> ImportOutcome {
        let outcome = self.attempt(context, notification, hour);

        if let Some(obs) = &self.observer {
            obs.on_import(&outcome);
            if let ImportOutcome::Failed { error, .. } = &outcome {
                let severity = severity_for_error(error);
                if severity >= self.settings.alert_at_or_above {
                    obs.on_alert(&outcome, severity, error);
                }
            }
        }
        outcome
    }

    fn attempt(&mut self, context: &ImportContext, notification: &ImportNotification, hour: u32) -> ImportOutcome {
        let Some(client) = self.registry.resolve(&notification.id).cloned() else {
            info!(
                document_id = %notification.id,
                name = %notification.name,
                "no client configuration found, skipping import"
            );
            return ImportOutcome::Skipped {
                document_id: notification.id.clone(),
                reason: "no matching client configuration".to_string(),
            };
        };
        info!(table = %client.table_name, client = %client.display_name, "found client configuration");

        let Some(branch) = select_branch(hour, self.settings.full_reload_from_hour, client.active_client) else {
            info!(table = %client.table_name, hour, "inactive client outside full reload hours");
            return ImportOutcome::Inactive {
                table_name: client.table_name,
            };
        };

        let start = Instant::now();
        info!(table = %client.table_name, %branch, "loading data for table");
        match self.load(context, notification, &client, branch) {
            Ok((promo_rows, missing_vendor_ids, writeback_errors)) => {
                let summary = ImportSummary {
                    table_name: client.table_name,
                    display_name: client.display_name,
                    document_url: notification.url(),
                    branch,
                    promo_rows,
                    missing_vendor_ids,
                    recommendation: client.recommendation,
                    writeback_errors,
                    elapsed: start.elapsed(),
                };
                info!(
                    table = %summary.table_name,
                    total_time = %format_elapsed(summary.elapsed),
                    "done with table"
                );
                ImportOutcome::Completed(summary)
            }
            Err(e) => {
                error!(table = %client.table_name, error = %e, "error while processing table");
                ImportOutcome::Failed {
                    table_name: client.table_name,
                    document_url: notification.url(),
                    error: e,
                }
            }
        }
    }

    /// Returns `(promo_rows, missing_vendor_ids, writeback_errors)`.
    fn load(
        &mut self,
        context: &ImportContext,
        notification: &ImportNotification,
        client: &ClientConfig,
        branch: LoadBranch,
    ) -> PipelineResult<(usize, usize, Vec<String>)> {
        let document_id = notification.id.as_str();
        let table = client.table_name.as_str();

        let promo_grid = self.sheets.read_tab(document_id, PROMO_CODES_TAB)?;
        self.sheets
            .write_formula(document_id, PROMO_CODES_TAB, VENDOR_ID_CELL, VENDOR_ID_FORMULA)?;

        let current = RawTable::from_grid(self.sheets.read_tab(document_id, CURRENT_ORDERS_TAB)?);
        let history = match branch {
            LoadBranch::FullReload => RawTable::from_grid(self.sheets.read_tab(document_id, HISTORICAL_ORDERS_TAB)?),
            LoadBranch::Incremental => {
                RawTable::from_grid(self.warehouse.query(&history_sql(&self.settings.history_schema, table))?)
            }
        };
        debug!(
            table,
            current_rows = current.rows.len(),
            history_rows = history.rows.len(),
            "read order rows"
        );
        let orders = orders_dataset(&current, &history)?;
        let promo = promo_codes_dataset(&RawTable::from_grid(promo_grid))?;

        let mut loader = BulkLoader::new(
            &mut self.objects,
            &mut self.warehouse,
            &self.settings.bucket,
            &self.settings.credentials,
            self.settings.create_tables,
        );
        loader.load(
            &client.warehouse_schema,
            &format!("{table}_orders"),
            &format!("{table}order_info.csv"),
            &orders,
        )?;
        loader.load(
            &client.warehouse_schema,
            &format!("{table}_promo_codes"),
            &format!("{table}.csv"),
            &promo,
        )?;
        let missing_vendor_ids = promo.null_count("vendor_id").unwrap_or(0);

        let mut writeback_errors = Vec::new();
        for reference in [&context.non_local, &context.local_radio] {
            if reference.is_empty() {
                continue;
            }
            match reference.write_to(&mut self.sheets, document_id) {
                Ok(()) => debug!(table, tab = %reference.tab, rows = reference.rows.len(), "updated reference tab"),
                Err(e) => {
                    warn!(table, tab = %reference.tab, error = %e, "reference tab update failed");
                    writeback_errors.push(format!("{}: {e}", reference.tab));
                }
            }
        }

        Ok((promo.row_count(), missing_vendor_ids, writeback_errors))
    }
}
