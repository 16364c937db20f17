use sheet_pipeline::error::PipelineError;
use sheet_pipeline::registry::{ClientConfig, ClientRegistry};

const CLIENT_LIST: &str = r#"[
  {
    "order_url": "https://docs.google.com/spreadsheets/d/1AbCdEf/edit#gid=0",
    "active_client": true,
    "table_name": "acme",
    "adj_cli": "Acme Co",
    "aws_schema": "client_order_data",
    "recomendation": true
  },
  {
    "order_url": "https://docs.google.com/spreadsheets/d/9ZyXw/edit",
    "active_client": false,
    "table_name": "globex",
    "adj_cli": "Globex",
    "aws_schema": "client_order_data_2"
  }
]"#;

#[test]
fn registry_file_keys_map_onto_client_config() {
    let registry = ClientRegistry::from_json_str(CLIENT_LIST).unwrap();
    assert_eq!(registry.len(), 2);

    let acme = registry.resolve("1AbCdEf").unwrap();
    assert_eq!(acme.table_name, "acme");
    assert_eq!(acme.display_name, "Acme Co");
    assert!(acme.active_client);
    assert!(acme.recommendation);

    let globex = registry.resolve("9ZyXw").unwrap();
    assert_eq!(globex.warehouse_schema, "client_order_data_2");
    assert!(!globex.recommendation);
}

#[test]
fn first_matching_entry_wins() {
    let registry = ClientRegistry::from_entries(vec![
        ClientConfig::new("abc", "first"),
        ClientConfig::new("abcdef", "second"),
    ])
    .unwrap();

    assert_eq!(registry.resolve("abcdef").unwrap().table_name, "first");
    assert_eq!(registry.resolve("abc").unwrap().table_name, "first");
}

#[test]
fn bare_id_key_resolves_and_unknown_id_does_not() {
    let mut acme = ClientConfig::new("SHEET123", "acme");
    acme.active_client = true;
    let registry = ClientRegistry::from_entries(vec![acme]).unwrap();

    assert_eq!(registry.resolve("SHEET123").unwrap().table_name, "acme");
    assert!(registry.resolve("OTHER999").is_none());
}

#[test]
fn overlapping_keys_are_reported_and_fail_validation() {
    let registry = ClientRegistry::from_entries(vec![
        ClientConfig::new("abc", "first"),
        ClientConfig::new("xyz", "other"),
        ClientConfig::new("abcdef", "second"),
    ])
    .unwrap();

    assert_eq!(registry.ambiguities(), vec![(0, 2)]);
    let err = registry.validate().unwrap_err();
    assert!(matches!(
        err,
        PipelineError::AmbiguousRegistry { first: 0, second: 2, .. }
    ));
    assert!(err.to_string().contains("'abcdef'"));
}

#[test]
fn url_keys_sharing_an_id_prefix_are_ambiguous() {
    let registry = ClientRegistry::from_entries(vec![
        ClientConfig::new("https://docs.google.com/spreadsheets/d/ABCD/edit", "first"),
        ClientConfig::new("https://docs.google.com/spreadsheets/d/ABCDE/edit", "second"),
    ])
    .unwrap();

    let matching: Vec<&str> = registry
        .entries()
        .iter()
        .filter(|c| c.matches("ABCD"))
        .map(|c| c.table_name.as_str())
        .collect();
    assert_eq!(matching, vec!["first", "second"]);
    assert_eq!(registry.resolve("ABCD").unwrap().table_name, "first");

    assert_eq!(registry.ambiguities(), vec![(0, 1)]);
    assert!(matches!(
        registry.validate(),
        Err(PipelineError::AmbiguousRegistry { first: 0, second: 1, .. })
    ));
}

#[test]
fn url_key_and_bare_key_for_the_same_document_are_ambiguous() {
    let registry = ClientRegistry::from_entries(vec![
        ClientConfig::new("SHEET123", "bare"),
        ClientConfig::new("https://docs.google.com/spreadsheets/d/SHEET123/edit", "url"),
    ])
    .unwrap();
    assert_eq!(registry.ambiguities(), vec![(0, 1)]);
}

#[test]
fn distinct_keys_validate() {
    let registry = ClientRegistry::from_json_str(CLIENT_LIST).unwrap();
    assert!(registry.ambiguities().is_empty());
    registry.validate().unwrap();
}

#[test]
fn duplicate_keys_are_rejected_on_load() {
    let err = ClientRegistry::from_entries(vec![ClientConfig::new("k", "a"), ClientConfig::new("k", "b")]).unwrap_err();
    assert!(matches!(err, PipelineError::Registry(_)));
}

#[test]
fn malformed_registry_is_a_json_error() {
    let err = ClientRegistry::from_json_str(r#"[{"active_client": true}]"#).unwrap_err();
    assert!(matches!(err, PipelineError::Json(_)));
}

#[test]
fn registry_loads_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("client_list.json");
    std::fs::write(&path, CLIENT_LIST).unwrap();

    let registry = ClientRegistry::load(&path).unwrap();
    assert_eq!(registry.entries()[1].table_name, "globex");
    assert!(ClientRegistry::load(dir.path().join("missing.json")).is_err());
}
