use std::fs;
use std::path::Path;

use sheet_pipeline::dispatch::{QueueDispatcher, SpoolQueue};
use sheet_pipeline::event::EventPayload;
use sheet_pipeline::importer::{ImportSettings, Importer};
use sheet_pipeline::ledger::{ChangeLedger, JsonFileLedger};
use sheet_pipeline::local::LocalWorkbooks;
use sheet_pipeline::object_store::LocalObjectStore;
use sheet_pipeline::registry::ClientRegistry;
use sheet_pipeline::scanner::{Classification, DocumentSource, ScanOptions, Scanner};
use sheet_pipeline::sheets::SpreadsheetStore;
use sheet_pipeline::warehouse::SqlScriptWarehouse;

fn write_workbook(root: &Path, id: &str) {
    let dir = root.join(id);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("name"), "Acme Orders").unwrap();
    fs::write(
        dir.join("Promo Codes.csv"),
        "Show Name,Vendor ID,Client,Promo Code,Budget Show Name,Unique Code,Code Leak Date\n\
         Morning Show,101,Acme,SPRING10,Morning,Y,\n",
    )
    .unwrap();
    let header: Vec<String> = (1..=23).map(|i| format!("c{i}")).collect();
    let current = format!("{}\n2024-01-15,SPRING10,Acme,3,2,\"$1,200.50\"{}\n", header.join(","), ",".repeat(17));
    fs::write(dir.join("Current Year Orders.csv"), current).unwrap();
    fs::write(dir.join("Historical Orders.csv"), format!("{}\n", header.join(","))).unwrap();
}

#[test]
fn spooled_scan_feeds_the_import_entry_point() {
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("folder");
    write_workbook(&folder, "SHEET123");
    let ledger_path = dir.path().join("state").join("ledger.json");
    let spool_path = dir.path().join("events.ndjson");

    // Scan: one NEW document, one spooled event, one ledger record on disk.
    let source = LocalWorkbooks::new(&folder);
    let mut ledger = JsonFileLedger::open(&ledger_path).unwrap();
    let mut dispatcher = QueueDispatcher::new(SpoolQueue::new(&spool_path));
    let report = Scanner::new(ScanOptions::default())
        .scan(&source, &mut ledger, &mut dispatcher)
        .unwrap();
    assert_eq!(report.count(Classification::New), 1);

    let reopened = JsonFileLedger::open(&ledger_path).unwrap();
    let record = reopened.get("SHEET123").unwrap().unwrap();
    assert_eq!(record.name, "Acme Orders");

    // Import: the spool file is a valid event payload.
    let notifications = EventPayload::from_path(&spool_path).unwrap().notifications().unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].modified_time, record.modified_time);

    let registry = ClientRegistry::from_json_str(
        r#"[{"order_url": "https://docs.google.com/spreadsheets/d/SHEET123/edit", "active_client": true, "table_name": "acme"}]"#,
    )
    .unwrap();
    let settings = ImportSettings {
        full_reload_from_hour: 0,
        ..ImportSettings::default()
    };
    let sql_path = dir.path().join("warehouse.sql");
    let mut importer = Importer::new(
        registry,
        settings,
        LocalWorkbooks::new(&folder),
        LocalObjectStore::new(dir.path().join("objects")),
        SqlScriptWarehouse::new(&sql_path),
    );
    let summary = importer.run(&notifications).unwrap();
    assert_eq!(summary.completed(), 1, "{summary}");

    let orders = fs::read_to_string(dir.path().join("objects").join("adresults").join("acmeorder_info.csv")).unwrap();
    assert_eq!(orders.lines().nth(1).unwrap().split(',').nth(5), Some("1200.5"));

    let script = fs::read_to_string(&sql_path).unwrap();
    let truncate = script.find("TRUNCATE client_order_data.acme_orders").unwrap();
    let copy = script.find("copy client_order_data.acme_orders").unwrap();
    assert!(truncate < copy);
    assert!(script.contains("-- query\nSELECT client_name,combined,date_added,pseudo_vendor_id"));

    // The vendor formula lands in the sidecar; the promo tab keeps its header.
    let books = LocalWorkbooks::new(&folder);
    assert_eq!(books.formulas("SHEET123").unwrap()[0][1], "B1");
    assert_eq!(books.read_tab("SHEET123", "Promo Codes").unwrap()[0][1], "Vendor ID");

    // The import's own sidecar write does not make the document look edited.
    let mut ledger = JsonFileLedger::open(&ledger_path).unwrap();
    let mut dispatcher = QueueDispatcher::new(SpoolQueue::new(&spool_path));
    let rescan = Scanner::new(ScanOptions::default())
        .scan(&LocalWorkbooks::new(&folder), &mut ledger, &mut dispatcher)
        .unwrap();
    assert_eq!(rescan.count(Classification::Unchanged), 1);
    assert_eq!(rescan.dispatched(), 0);
}

#[test]
fn missing_workbook_folder_is_a_source_error() {
    let dir = tempfile::tempdir().unwrap();
    let source = LocalWorkbooks::new(dir.path().join("absent"));
    let first = source.documents().next().unwrap();
    assert!(first.is_err());
}
