use witness_core::wire::decode_witness;
use witness_core::{LearnSessionId, NetworkDirection};
use witness_services::{load_archive, replay_archive, Archive, Collector};

use crate::*;

fn archive_json(outbound: bool, bad_responses: &[usize]) -> serde_json::Value {
    let entries: Vec<serde_json::Value> = (0..10)
        .map(|i| {
            let content = if bad_responses.contains(&i) {
                serde_json::json!({"mimeType": "text/plain", "text": "!!not base64!!", "encoding": "base64"})
            } else {
                serde_json::json!({"mimeType": "application/json", "text": format!("{{\"id\": {i}}}")})
            };
            serde_json::json!({
                "startedDateTime": "2024-05-01T10:00:00Z",
                "serverIPAddress": "198.51.100.7",
                "request": {
                    "method": "GET",
                    "url": format!("http://catalog.example.com/v2/products/{i}"),
                    "headers": [{"name": "Accept", "value": "application/json"}]
                },
                "response": {"status": 200, "content": content}
            })
        })
        .collect();

    serde_json::json!({
        "log": {"version": "1.2", "entries": entries},
        "_capture": {"outbound": outbound}
    })
}

/// Ten entries with three malformed responses: seven succeed, three are
/// counted and sampled, and everything that parsed is still shipped.
#[tokio::test]
async fn test_replay_with_malformed_entries() {
    let mock = MockLearnService::start().await.unwrap();
    let session = LearnSessionId::new("lrn_replay");
    let mut inbound = collector(&mock, &session, NetworkDirection::Inbound);
    let mut outbound = collector(&mock, &session, NetworkDirection::Outbound);

    let path = std::env::temp_dir().join(format!("witness-it-{}.har", uuid::Uuid::new_v4()));
    std::fs::write(&path, archive_json(false, &[2, 5, 8]).to_string()).unwrap();
    let archive = load_archive(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    let report = replay_archive(&archive, &mut inbound, &mut outbound);
    assert_eq!(report.total_entries, 10);
    assert_eq!(report.successful_entries, 7);
    assert_eq!(report.errors.total_count(), 3);
    assert!(report.errors.samples().len() <= 3);

    inbound.close().await;
    outbound.close().await;

    let reports = mock.reports();
    // Seven pairs plus the three requests whose responses were unusable.
    assert_eq!(reports.len(), 10);
    assert!(reports.iter().all(|r| r.direction == NetworkDirection::Inbound));

    let complete = reports
        .iter()
        .map(|r| decode_witness(&r.witness_encoded).unwrap())
        .filter(|w| w.is_complete())
        .count();
    assert_eq!(complete, 7);
    assert_eq!(outbound.stats().snapshot().frames, 0);
}

#[tokio::test]
async fn test_outbound_archive_uses_outbound_collector() {
    let mock = MockLearnService::start().await.unwrap();
    let session = LearnSessionId::new("lrn_replay_out");
    let mut inbound = collector(&mock, &session, NetworkDirection::Inbound);
    let mut outbound = collector(&mock, &session, NetworkDirection::Outbound);

    let archive: Archive = serde_json::from_value(archive_json(true, &[])).unwrap();
    let report = replay_archive(&archive, &mut inbound, &mut outbound);
    assert_eq!(report.successful_entries, 10);

    inbound.close().await;
    outbound.close().await;

    let reports = mock.reports();
    assert_eq!(reports.len(), 10);
    assert!(reports.iter().all(|r| r.direction == NetworkDirection::Outbound));
    assert_eq!(inbound.stats().snapshot().frames, 0);
}
