use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use witness_core::wire::{decode_witness, witness_hash};
use witness_core::{
    Header, HttpRequest, HttpResponse, LearnSessionId, NetworkContent, NetworkDirection,
    NetworkTraffic,
};
use witness_services::Collector;

use crate::*;

const CLIENT: &str = "192.0.2.1:51000";
const SERVER: &str = "192.0.2.2:8080";

fn request(stream: Uuid, seq: u64, at: DateTime<Utc>) -> NetworkTraffic {
    NetworkTraffic {
        observation_time: at,
        src: CLIENT.parse().unwrap(),
        dst: SERVER.parse().unwrap(),
        content: NetworkContent::HttpRequest(HttpRequest {
            stream_id: stream,
            seq,
            method: "POST".to_string(),
            host: "orders.example.com".to_string(),
            path: "/v1/orders".to_string(),
            query: Vec::new(),
            headers: vec![Header::new("Content-Type", "application/json")],
            body: br#"{"sku": "A-1", "qty": 2}"#.to_vec(),
        }),
    }
}

fn response(stream: Uuid, seq: u64, at: DateTime<Utc>) -> NetworkTraffic {
    NetworkTraffic {
        observation_time: at,
        src: SERVER.parse().unwrap(),
        dst: CLIENT.parse().unwrap(),
        content: NetworkContent::HttpResponse(HttpResponse {
            stream_id: stream,
            seq,
            status_code: 201,
            headers: vec![Header::new("Content-Type", "application/json")],
            body: br#"{"id": 99}"#.to_vec(),
        }),
    }
}

fn noise(at: DateTime<Utc>) -> NetworkTraffic {
    NetworkTraffic {
        observation_time: at,
        src: CLIENT.parse().unwrap(),
        dst: SERVER.parse().unwrap(),
        content: NetworkContent::Unrecognized,
    }
}

/// A request at t=0 and its response at t=2s yield one report addressed
/// from the client, with a content hash.
#[tokio::test]
async fn test_live_pair_ships_one_report() {
    let mock = MockLearnService::start().await.unwrap();
    let session = LearnSessionId::new("lrn_pipeline");
    let mut collector = collector(&mock, &session, NetworkDirection::Inbound);

    let stream = Uuid::new_v4();
    let t0 = Utc::now();
    collector.process_at(request(stream, 0, t0), t0);
    collector.process_at(response(stream, 0, t0 + Duration::seconds(2)), t0 + Duration::seconds(2));
    collector.close().await;

    let received = mock.received();
    assert_eq!(received.len(), 1, "one batch expected");
    assert_eq!(received[0].session, "lrn_pipeline");

    let expected_auth = format!(
        "Basic {}",
        base64::encode(format!("{API_KEY_ID}:{API_KEY_SECRET}"))
    );
    assert_eq!(received[0].authorization.as_deref(), Some(expected_auth.as_str()));
    assert!(received[0].build.is_some(), "missing build header");

    let reports = mock.reports();
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.direction, NetworkDirection::Inbound);
    assert_eq!(report.origin(), CLIENT.parse().unwrap());
    assert_eq!(report.destination(), SERVER.parse().unwrap());
    assert!(!report.hash.is_empty());

    let witness = decode_witness(&report.witness_encoded).unwrap();
    assert!(witness.is_complete());
    assert_eq!(witness.method.status, Some(201));
    assert_eq!(report.hash, witness_hash(&witness).unwrap());

    let stats = collector.stats().snapshot();
    assert_eq!(stats.paired, 1);
    assert_eq!(stats.reports_uploaded, 1);
}

/// An unpaired response is shipped on its own once it is past the
/// expiration bound at a sweep, and never again.
#[tokio::test]
async fn test_unpaired_response_expires() {
    let mock = MockLearnService::start().await.unwrap();
    let session = LearnSessionId::new("lrn_expiry");
    let mut collector = collector(&mock, &session, NetworkDirection::Outbound);

    let stream = Uuid::new_v4();
    let t0 = Utc::now();
    collector.process_at(response(stream, 7, t0), t0);
    assert_eq!(collector.pending(), 1);

    // Expiration (60s) plus one cleanup interval (30s), and a bit.
    let later = t0 + Duration::seconds(91);
    collector.process_at(noise(later), later);
    assert_eq!(collector.pending(), 0, "expired half must leave the cache");

    collector.close().await;
    collector.close().await;

    let reports = mock.reports();
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.origin(), CLIENT.parse().unwrap());

    let witness = decode_witness(&report.witness_encoded).unwrap();
    assert!(witness.has_response());
    assert!(!witness.has_request());
    assert_eq!(collector.stats().snapshot().expired, 1);
}

/// Eleven pairs with the default batch size of ten go out as two batches.
#[tokio::test]
async fn test_full_batch_flushes_without_waiting() {
    let mock = MockLearnService::start().await.unwrap();
    let session = LearnSessionId::new("lrn_batches");
    let mut collector = collector(&mock, &session, NetworkDirection::Inbound);

    let stream = Uuid::new_v4();
    let t0 = Utc::now();
    for seq in 0..11 {
        collector.process_at(request(stream, seq, t0), t0);
        collector.process_at(response(stream, seq, t0), t0);
    }
    collector.close().await;

    let sizes: Vec<usize> = mock.received().iter().map(|r| r.reports.len()).collect();
    assert_eq!(sizes, vec![10, 1]);
}

/// A rejected upload drops the batch without stalling the collector.
#[tokio::test]
async fn test_failed_upload_drops_batch() {
    let mock = MockLearnService::start().await.unwrap();
    mock.script(&[401]);
    let session = LearnSessionId::new("lrn_rejected");
    let mut collector = collector(&mock, &session, NetworkDirection::Inbound);

    let stream = Uuid::new_v4();
    let t0 = Utc::now();
    collector.process_at(request(stream, 0, t0), t0);
    collector.process_at(response(stream, 0, t0), t0);
    collector.close().await;

    assert_eq!(mock.received().len(), 1, "401 is not retried");
    let stats = collector.stats().snapshot();
    assert_eq!(stats.batches_failed, 1);
    assert_eq!(stats.reports_uploaded, 0);
}
