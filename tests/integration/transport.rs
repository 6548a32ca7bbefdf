use std::time::Duration;

use witness_core::LearnSessionId;
use witness_services::{ClientError, LearnClient};

use crate::*;

fn session() -> LearnSessionId {
    LearnSessionId::new("lrn_transport")
}

#[tokio::test]
async fn test_unauthorized_is_user_actionable() {
    let mock = MockLearnService::start().await.unwrap();
    mock.script(&[401]);

    let err = client(&mock)
        .report_witnesses(&session(), Vec::new(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Unauthorized), "got {err:?}");
    assert!(err.to_string().contains("WITNESS_API_KEY_ID"));
    assert_eq!(mock.received().len(), 1);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let mock = MockLearnService::start().await.unwrap();
    mock.script(&[503, 429]);

    client(&mock)
        .report_witnesses(&session(), Vec::new(), None)
        .await
        .unwrap();

    assert_eq!(mock.received().len(), 3);
}

#[tokio::test]
async fn test_retries_are_bounded_and_last_status_passes_through() {
    let mock = MockLearnService::start().await.unwrap();
    mock.script(&[500, 500, 500, 500, 500]);

    let err = client(&mock)
        .report_witnesses(&session(), Vec::new(), None)
        .await
        .unwrap_err();

    match err {
        ClientError::Status { code, body } => {
            assert_eq!(code, 500);
            assert_eq!(body, "mock says 500");
        }
        other => panic!("expected status error, got {other:?}"),
    }
    // One attempt plus three retries.
    assert_eq!(mock.received().len(), 4);
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let mock = MockLearnService::start().await.unwrap();
    mock.script(&[400]);

    let err = client(&mock)
        .report_witnesses(&session(), Vec::new(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Status { code: 400, .. }));
    assert_eq!(mock.received().len(), 1);
}

#[tokio::test]
async fn test_deadline_bounds_the_call() {
    let mock = MockLearnService::start().await.unwrap();
    mock.delay_responses(Duration::from_secs(5));

    let err = client(&mock)
        .report_witnesses(&session(), Vec::new(), Some(Duration::from_millis(200)))
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::DeadlineExceeded(_)), "got {err:?}");
}

#[tokio::test]
async fn test_connection_refused_is_a_transport_error() {
    // Grab a free port, then close it again.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = witness_services::RestLearnClient::new(
        &format!("http://{addr}"),
        credentials(),
        &fast_transport(),
    )
    .unwrap();

    let err = client
        .report_witnesses(&session(), Vec::new(), Some(Duration::from_secs(5)))
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Transport(_)), "got {err:?}");
}
