use sheet_pipeline::error::PipelineError;
use sheet_pipeline::event::EventPayload;
use sheet_pipeline::types::ImportNotification;

const SQS_EVENT: &str = r#"{
  "Records": [
    {
      "messageId": "059f36b4-87a3-44ab-83d2-661975830a7d",
      "body": "Sending import event to queue for document 1AbCdEf",
      "messageAttributes": {
        "id": { "stringValue": "1AbCdEf", "dataType": "String" },
        "name": { "stringValue": "Acme Orders", "dataType": "String" },
        "modifiedTime": { "stringValue": "2024-05-01T10:00:00.000Z", "dataType": "String" }
      },
      "eventSource": "aws:sqs"
    },
    {
      "body": "Sending import event to queue for document 9ZyXw",
      "messageAttributes": {
        "id": { "stringValue": "9ZyXw", "dataType": "String" }
      }
    }
  ]
}"#;

#[test]
fn queue_event_yields_notifications_in_order() {
    let payload = EventPayload::from_json_str(SQS_EVENT).unwrap();
    let notifications = payload.notifications().unwrap();

    assert_eq!(
        notifications,
        vec![
            ImportNotification::new("1AbCdEf", "Acme Orders", "2024-05-01T10:00:00.000Z"),
            ImportNotification::new("9ZyXw", "", ""),
        ]
    );
}

#[test]
fn ndjson_spool_is_accepted() {
    let input = concat!(
        r#"{"messageAttributes":{"id":{"stringValue":"A","dataType":"String"}},"body":"a"}"#,
        "\n\n",
        r#"{"messageAttributes":{"id":{"stringValue":"B","dataType":"String"}},"body":"b"}"#,
        "\n",
    );
    let ids: Vec<String> = EventPayload::from_json_str(input)
        .unwrap()
        .notifications()
        .unwrap()
        .into_iter()
        .map(|n| n.id)
        .collect();
    assert_eq!(ids, vec!["A", "B"]);
}

#[test]
fn bare_array_and_single_record_are_accepted() {
    let array = r#"[{"messageAttributes":{"id":{"stringValue":"A"}}}]"#;
    assert_eq!(EventPayload::from_json_str(array).unwrap().records.len(), 1);

    let single = r#"{"messageAttributes":{"id":{"stringValue":"A"}}}"#;
    let notifications = EventPayload::from_json_str(single).unwrap().notifications().unwrap();
    assert_eq!(notifications[0].id, "A");
}

#[test]
fn blank_input_is_an_empty_batch() {
    assert!(EventPayload::from_json_str("  \n").unwrap().records.is_empty());
}

#[test]
fn record_without_id_fails_the_batch() {
    let input = r#"{"Records":[{"messageAttributes":{"name":{"stringValue":"x"}}}]}"#;
    let err = EventPayload::from_json_str(input).unwrap().notifications().unwrap_err();
    assert!(matches!(err, PipelineError::Event(_)));
}

#[test]
fn scalar_and_broken_lines_are_rejected() {
    assert!(matches!(EventPayload::from_json_str("42"), Err(PipelineError::Event(_))));

    let err = EventPayload::from_json_str("{\"body\":\"a\"}\nnot json\n").unwrap_err();
    assert!(err.to_string().contains("line 2"));
}

#[test]
fn payload_reads_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("event.json");
    std::fs::write(&path, SQS_EVENT).unwrap();
    assert_eq!(EventPayload::from_path(&path).unwrap().records.len(), 2);
}
