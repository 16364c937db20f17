//! Warehouse access and bulk loading.
//!
//! A load writes the dataset as CSV to the object store, truncates the target table and
//! issues a `COPY` from the uploaded object. Truncate-then-copy is not atomic: if the copy
//! fails the table stays empty until the next successful import.
//!
//! The `COPY` statement embeds the access key pair in its text, which is what the
//! warehouse expects for object-store credentials. Statements are therefore never logged
//! in full.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::object_store::ObjectStore;
use crate::transform::to_csv_bytes;
use crate::types::{DataSet, Grid, Schema};

/// SQL execution against the warehouse.
pub trait Warehouse {
    /// Execute a statement that returns no rows.
    fn execute(&mut self, sql: &str) -> PipelineResult<()>;

    /// Run a query; the result grid starts with the column names.
    fn query(&mut self, sql: &str) -> PipelineResult<Grid>;
}

impl<T: Warehouse + ?Sized> Warehouse for &mut T {
    fn execute(&mut self, sql: &str) -> PipelineResult<()> {
        (**self).execute(sql)
    }

    fn query(&mut self, sql: &str) -> PipelineResult<Grid> {
        (**self).query(sql)
    }
}

/// Object-store key pair embedded into `COPY` statements.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct WarehouseCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl fmt::Debug for WarehouseCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarehouseCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

pub fn qualified_table(schema: &str, table: &str) -> String {
    format!("{schema}.{table}")
}

pub fn truncate_sql(qualified: &str) -> String {
    format!("TRUNCATE {qualified}")
}

pub fn copy_sql(qualified: &str, bucket: &str, key: &str, credentials: &WarehouseCredentials) -> String {
    format!(
        "copy {qualified}\nfrom 's3://{bucket}/{key}'\ncredentials 'aws_access_key_id={};aws_secret_access_key={}'\nIGNOREHEADER 1\nEMPTYASNULL\ncsv;",
        credentials.access_key_id, credentials.secret_access_key
    )
}

/// `CREATE TABLE IF NOT EXISTS` with one column per schema field.
pub fn create_table_sql(qualified: &str, schema: &Schema) -> String {
    let columns: Vec<String> = schema
        .fields
        .iter()
        .map(|f| format!("{} {}", f.name, f.data_type.sql_type()))
        .collect();
    format!("CREATE TABLE IF NOT EXISTS {qualified} ({})", columns.join(", "))
}

/// Previous years' orders for a client.
pub fn history_sql(history_schema: &str, table_name: &str) -> String {
    format!(
        "select * from {history_schema}.{table_name}_orders where date_part('year', date) < date_part('year', current_date)"
    )
}

/// Loads datasets into warehouse tables through the object store.
pub struct BulkLoader<'a, O: ?Sized, W: ?Sized> {
    objects: &'a mut O,
    warehouse: &'a mut W,
    bucket: &'a str,
    credentials: &'a WarehouseCredentials,
    create_tables: bool,
}

impl<'a, O, W> BulkLoader<'a, O, W>
where
    O: ObjectStore + ?Sized,
    W: Warehouse + ?Sized,
{
    pub fn new(
        objects: &'a mut O,
        warehouse: &'a mut W,
        bucket: &'a str,
        credentials: &'a WarehouseCredentials,
        create_tables: bool,
    ) -> Self {
        Self {
            objects,
            warehouse,
            bucket,
            credentials,
            create_tables,
        }
    }

    /// Replace the contents of `schema.table` with `dataset`, staged at `key`.
    pub fn load(&mut self, schema: &str, table: &str, key: &str, dataset: &DataSet) -> PipelineResult<()> {
        let qualified = qualified_table(schema, table);
        if self.create_tables {
            self.warehouse
                .execute(&create_table_sql(&qualified, &dataset.schema))?;
        }

        let bytes = to_csv_bytes(dataset)?;
        self.objects.put_object(self.bucket, key, &bytes)?;
        debug!(table = %qualified, key, rows = dataset.row_count(), "staged csv snapshot");

        self.warehouse.execute(&truncate_sql(&qualified))?;
        self.warehouse
            .execute(&copy_sql(&qualified, self.bucket, key, self.credentials))?;
        info!(table = %qualified, rows = dataset.row_count(), "loaded table");
        Ok(())
    }
}

/// Appends every statement to a SQL script file instead of executing it.
///
/// Queries return an empty result.
#[derive(Debug, Clone)]
pub struct SqlScriptWarehouse {
    path: PathBuf,
}

impl SqlScriptWarehouse {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn append(&self, sql: &str) -> PipelineResult<()> {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| PipelineError::Warehouse(format!("cannot open {}: {e}", self.path.display())))?;
        writeln!(f, "{};\n", sql.trim_end().trim_end_matches(';'))
            .map_err(|e| PipelineError::Warehouse(format!("cannot append to {}: {e}", self.path.display())))
    }
}

impl Warehouse for SqlScriptWarehouse {
    fn execute(&mut self, sql: &str) -> PipelineResult<()> {
        self.append(sql)
    }

    fn query(&mut self, sql: &str) -> PipelineResult<Grid> {
        warn!(script = %self.path.display(), "query against a script warehouse returns no rows");
        self.append(&format!("-- query\n{sql}"))?;
        Ok(Grid::new())
    }
}

/// Records statements and answers queries from canned results.
#[derive(Debug, Default, Clone)]
pub struct MemoryWarehouse {
    statements: Vec<String>,
    results: Vec<(String, Grid)>,
    fail_on: Option<String>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer queries containing `fragment` with `grid`.
    pub fn with_result(mut self, fragment: impl Into<String>, grid: Grid) -> Self {
        self.results.push((fragment.into(), grid));
        self
    }

    /// Fail any statement or query containing `fragment`.
    pub fn failing_on(mut self, fragment: impl Into<String>) -> Self {
        self.fail_on = Some(fragment.into());
        self
    }

    /// Statements and queries seen so far, in order.
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    fn record(&mut self, sql: &str) -> PipelineResult<()> {
        self.statements.push(sql.to_string());
        match &self.fail_on {
            Some(fragment) if sql.contains(fragment.as_str()) => {
                Err(PipelineError::Warehouse(format!("statement rejected: {fragment}")))
            }
            _ => Ok(()),
        }
    }
}

impl Warehouse for MemoryWarehouse {
    fn execute(&mut self, sql: &str) -> PipelineResult<()> {
        self.record(sql)
    }

    fn query(&mut self, sql: &str) -> PipelineResult<Grid> {
        self.record(sql)?;
        Ok(self
            .results
            .iter()
            .find(|(fragment, _)| sql.contains(fragment.as_str()))
            .map(|(_, grid)| grid.clone())
            .unwrap_or_default())
    }
}
