//! Swap job polling scenarios against a mock queue.

use std::sync::Arc;
use std::time::Duration;

use faceswap_core::auth::{SessionManager, TokenPair};
use faceswap_core::swap::{JobPoller, PollConfig, SwapEvent, SwapState, TickOutcome};
use faceswap_core::{ApiClient, ApiError};
use serde_json::json;
use tokio::sync::mpsc;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FAST_POLL: Duration = Duration::from_millis(20);

async fn poller(server: &MockServer, config: PollConfig) -> (JobPoller, mpsc::Receiver<SwapEvent>) {
    let session = Arc::new(SessionManager::in_memory());
    session
        .sign_in(
            TokenPair {
                access_token: "a1".to_string(),
                refresh_token: None,
            },
            None,
        )
        .await;
    let api = ApiClient::new(format!("{}/api", server.uri()), session).unwrap();
    JobPoller::new(api, config)
}

fn fast(max_attempts: Option<u32>) -> PollConfig {
    PollConfig {
        interval: FAST_POLL,
        max_attempts,
    }
}

async fn mount_generate(server: &MockServer, job_id: &str) {
    Mock::given(method("POST"))
        .and(path("/api/swap/generate"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({"job_id": job_id})))
        .mount(server)
        .await;
}

fn status(job_id: &str, status: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"job_id": job_id, "status": status, "result": null}))
}

fn done(job_id: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "job_id": job_id,
        "status": "done",
        "result": {"links": [{"url": "https://x/y.png", "name": "y.png", "type": "image"}]}
    }))
}

async fn polls(server: &MockServer, job_id: &str) -> usize {
    let job_path = format!("/api/jobs/{}", job_id);
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == job_path)
        .count()
}

/// Receive events until the job ends, returning everything seen
async fn collect_until_terminal(rx: &mut mpsc::Receiver<SwapEvent>) -> Vec<SwapEvent> {
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for swap event")
            .expect("event channel closed");
        let terminal = matches!(event, SwapEvent::Done { .. } | SwapEvent::Failed { .. });
        seen.push(event);
        if terminal {
            return seen;
        }
    }
}

#[tokio::test]
async fn test_pending_three_times_then_done() {
    let server = MockServer::start().await;
    mount_generate(&server, "job-1").await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/job-1"))
        .respond_with(status("job-1", "pending"))
        .up_to_n_times(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/job-1"))
        .respond_with(done("job-1"))
        .mount(&server)
        .await;

    let (poller, mut rx) = poller(&server, fast(None)).await;
    let handle = poller.submit("f", "t", None).await.unwrap();
    assert_eq!(handle.job_id, "job-1");

    let events = collect_until_terminal(&mut rx).await;
    assert_eq!(events[0], SwapEvent::Submitted { job_id: "job-1".to_string() });
    let progress = events.iter().filter(|e| matches!(e, SwapEvent::Progress { .. })).count();
    assert_eq!(progress, 3);

    match poller.state().await {
        SwapState::Done { job_id, links } => {
            assert_eq!(job_id, "job-1");
            assert_eq!(links.len(), 1);
            assert_eq!(links[0].url, "https://x/y.png");
        }
        other => panic!("unexpected state: {other:?}"),
    }

    // No further ticks once done
    tokio::time::sleep(FAST_POLL * 6).await;
    assert_eq!(polls(&server, "job-1").await, 4);
}

#[tokio::test]
async fn test_failed_job_stops_polling() {
    let server = MockServer::start().await;
    mount_generate(&server, "job-2").await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/job-2"))
        .respond_with(status("job-2", "failed"))
        .mount(&server)
        .await;

    let (poller, mut rx) = poller(&server, fast(None)).await;
    poller.submit("f", "t", None).await.unwrap();

    let events = collect_until_terminal(&mut rx).await;
    match events.last() {
        Some(SwapEvent::Failed { job_id, message }) => {
            assert_eq!(job_id, "job-2");
            assert_eq!(message, &ApiError::JobFailed { job_id: "job-2".to_string() }.notification());
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(matches!(poller.state().await, SwapState::Failed { .. }));

    tokio::time::sleep(FAST_POLL * 6).await;
    assert_eq!(polls(&server, "job-2").await, 1);
}

#[tokio::test]
async fn test_transient_errors_keep_polling() {
    let server = MockServer::start().await;
    mount_generate(&server, "job-3").await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/job-3"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/job-3"))
        .respond_with(done("job-3"))
        .mount(&server)
        .await;

    let (poller, mut rx) = poller(&server, fast(None)).await;
    poller.submit("f", "t", None).await.unwrap();

    let events = collect_until_terminal(&mut rx).await;
    let misses = events.iter().filter(|e| matches!(e, SwapEvent::PollMiss { .. })).count();
    assert_eq!(misses, 2);
    assert!(matches!(events.last(), Some(SwapEvent::Done { .. })));
    assert!(matches!(poller.state().await, SwapState::Done { .. }));
}

#[tokio::test]
async fn test_attempt_limit_times_out() {
    let server = MockServer::start().await;
    mount_generate(&server, "job-4").await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/job-4"))
        .respond_with(status("job-4", "in_progress"))
        .mount(&server)
        .await;

    let (poller, mut rx) = poller(&server, fast(Some(3))).await;
    poller.submit("f", "t", None).await.unwrap();

    let events = collect_until_terminal(&mut rx).await;
    assert!(matches!(events.last(), Some(SwapEvent::Failed { .. })));
    match poller.state().await {
        SwapState::Failed { reason, .. } => assert!(reason.contains("did not finish")),
        other => panic!("unexpected state: {other:?}"),
    }

    tokio::time::sleep(FAST_POLL * 6).await;
    assert_eq!(polls(&server, "job-4").await, 3);
}

#[tokio::test]
async fn test_submit_failure_stays_idle() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/swap/generate"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (poller, _rx) = poller(&server, fast(None)).await;
    let err = poller.submit("f", "t", None).await.unwrap_err();
    assert!(matches!(err, ApiError::ServerError(_)));
    assert_eq!(poller.state().await, SwapState::Idle);
}

#[tokio::test]
async fn test_stale_poll_does_not_touch_new_job() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/swap/generate"))
        .and(body_partial_json(json!({"face_name": "first"})))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({"job_id": "job-a"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/swap/generate"))
        .and(body_partial_json(json!({"face_name": "second"})))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({"job_id": "job-b"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/job-a"))
        .respond_with(done("job-a").set_delay(Duration::from_millis(300)))
        .mount(&server)
        .await;

    // Long interval: only the manual tick below polls
    let (poller, _rx) = poller(&server, PollConfig {
        interval: Duration::from_secs(60),
        max_attempts: None,
    })
    .await;
    poller.submit("first", "t", None).await.unwrap();

    let (stale, resubmitted) = tokio::join!(poller.tick(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        poller.submit("second", "t", None).await
    });

    assert_eq!(stale.unwrap(), TickOutcome::Stale);
    assert_eq!(resubmitted.unwrap().job_id, "job-b");
    assert_eq!(
        poller.state().await,
        SwapState::Polling {
            job_id: "job-b".to_string(),
            attempts: 0
        }
    );
}

#[tokio::test]
async fn test_cancel_stops_polling() {
    let server = MockServer::start().await;
    mount_generate(&server, "job-5").await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/job-5"))
        .respond_with(status("job-5", "pending"))
        .mount(&server)
        .await;

    let (poller, _rx) = poller(&server, fast(None)).await;
    poller.submit("f", "t", None).await.unwrap();
    poller.cancel().await;

    assert_eq!(poller.state().await, SwapState::Idle);
    tokio::time::sleep(FAST_POLL * 5).await;
    assert_eq!(polls(&server, "job-5").await, 0);
}

#[tokio::test]
async fn test_dropping_poller_stops_polling() {
    let server = MockServer::start().await;
    mount_generate(&server, "job-6").await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/job-6"))
        .respond_with(status("job-6", "pending"))
        .mount(&server)
        .await;

    let (poller, _rx) = poller(&server, fast(None)).await;
    poller.submit("f", "t", None).await.unwrap();
    drop(poller);

    tokio::time::sleep(FAST_POLL * 5).await;
    assert_eq!(polls(&server, "job-6").await, 0);
}

#[tokio::test]
async fn test_unread_events_do_not_stall_polling() {
    let server = MockServer::start().await;
    mount_generate(&server, "job-7").await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/job-7"))
        .respond_with(status("job-7", "pending"))
        .mount(&server)
        .await;

    // More status checks than the event channel holds, and nobody reading
    let (poller, _rx) = poller(
        &server,
        PollConfig {
            interval: Duration::from_millis(5),
            max_attempts: Some(40),
        },
    )
    .await;
    poller.submit("f", "t", None).await.unwrap();

    let finished = tokio::time::timeout(Duration::from_secs(5), async {
        while !poller.state().await.is_terminal() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(finished.is_ok(), "attempt limit never reached");
    assert!(matches!(poller.state().await, SwapState::Failed { .. }));
    assert_eq!(polls(&server, "job-7").await, 40);

    let resubmitted = tokio::time::timeout(Duration::from_secs(2), poller.submit("f", "t", None)).await;
    assert!(matches!(resubmitted, Ok(Ok(_))));
    poller.cancel().await;
}
