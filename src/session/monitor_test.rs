use super::*;
use crate::session::test_support::{FakeStatus, coordinates, serve};
use axum::http::StatusCode;
use tokio::time::timeout;

fn event(state: BackendStatus) -> StreamItem {
    StreamItem::Event(StatusEvent { state, time: "1".into() })
}

async fn outcome(monitor: &ReadinessMonitor) -> Result<(), MonitorError> {
    timeout(Duration::from_secs(2), monitor.wait())
        .await
        .expect("monitor settled")
}

async fn start(fake: &FakeStatus, ready_timeout: Option<Duration>) -> ReadinessMonitor {
    let addr = serve(fake.router()).await;
    ReadinessMonitor::start(reqwest::Client::new(), &coordinates(addr), "/stream", ready_timeout)
}

// =============================================================================
// STATUS CLASSIFICATION
// =============================================================================

#[test]
fn status_body_is_matched_by_substring() {
    assert_eq!(BackendStatus::from_status_body("Ready"), BackendStatus::Ready);
    assert_eq!(BackendStatus::from_status_body("status: Loading\n"), BackendStatus::Loading);
    assert_eq!(BackendStatus::from_status_body("Starting"), BackendStatus::Starting);
    assert_eq!(
        BackendStatus::from_status_body(" Terminated \n"),
        BackendStatus::Terminal("Terminated".into())
    );
}

#[test]
fn transient_states() {
    assert!(BackendStatus::Loading.is_transient());
    assert!(BackendStatus::Starting.is_transient());
    assert!(!BackendStatus::Ready.is_transient());
    assert!(!BackendStatus::Terminal("Failed".into()).is_transient());
}

// =============================================================================
// DECODER
// =============================================================================

#[test]
fn decoder_reassembles_frames_split_across_chunks() {
    let mut decoder = StatusStreamDecoder::new();
    assert!(decoder.push(b"data: {\"state\":\"Sta").expect("push").is_empty());
    let items = decoder
        .push(b"rting\",\"time\":\"1\"}\n\ndata: {\"state\":\"Ready\",\"time\":\"1\"}\n")
        .expect("push");
    assert_eq!(items, vec![event(BackendStatus::Starting), event(BackendStatus::Ready)]);
}

#[test]
fn decoder_skips_malformed_payloads() {
    let mut decoder = StatusStreamDecoder::new();
    let items = decoder
        .push(b"data: {bad\ndata: {\"state\":\"Ready\",\"time\":\"1\"}\n")
        .expect("push");
    assert_eq!(items.len(), 2);
    assert!(matches!(&items[0], StreamItem::Malformed(MonitorError::MalformedStreamFrame { payload, .. }) if payload == "{bad"));
    assert_eq!(items[1], event(BackendStatus::Ready));
}

#[test]
fn decoder_stops_at_ready_and_leaves_the_rest_unparsed() {
    let mut decoder = StatusStreamDecoder::new();
    let items = decoder
        .push(b"data: {\"state\":\"Ready\",\"time\":\"1\"}\nretry: 1000\n")
        .expect("lines after Ready are not decoded");
    assert_eq!(items, vec![event(BackendStatus::Ready)]);
}

#[test]
fn decoder_stops_at_terminal_event() {
    let mut decoder = StatusStreamDecoder::new();
    let items = decoder
        .push(b"data: {\"state\":\"Failed\",\"time\":\"1\"}\ndata: {\"state\":\"Ready\",\"time\":\"2\"}\n")
        .expect("push");
    assert_eq!(items, vec![event(BackendStatus::Terminal("Failed".into()))]);
}

#[test]
fn decoder_rejects_lines_without_data_prefix() {
    let mut decoder = StatusStreamDecoder::new();
    let err = decoder.push(b"event: status\n").expect_err("bad prefix");
    assert_eq!(err, MonitorError::UnrecognizedFrameFormat("event: status".into()));
}

#[test]
fn decoder_finish_flushes_unterminated_line() {
    let mut decoder = StatusStreamDecoder::new();
    assert!(decoder.push(b"data: {\"state\":\"Ready\"}").expect("push").is_empty());
    let items = decoder.finish().expect("finish");
    assert_eq!(items, vec![StreamItem::Event(StatusEvent { state: BackendStatus::Ready, time: String::new() })]);
    assert!(decoder.finish().expect("finish twice").is_empty());
}

#[test]
fn unknown_stream_state_is_terminal() {
    let mut decoder = StatusStreamDecoder::new();
    let items = decoder
        .push(b"data: {\"state\":\"Failed\",\"time\":\"9\"}\n")
        .expect("push");
    assert_eq!(
        items,
        vec![StreamItem::Event(StatusEvent { state: BackendStatus::Terminal("Failed".into()), time: "9".into() })]
    );
}

// =============================================================================
// MONITOR
// =============================================================================

#[tokio::test]
async fn ready_on_first_poll_skips_stream() {
    let fake = FakeStatus::new("Ready");
    let monitor = start(&fake, None).await;

    assert_eq!(outcome(&monitor).await, Ok(()));
    assert_eq!(monitor.state(), MonitorState::Ready);
    assert_eq!(fake.stream_hits(), 0);
}

#[tokio::test]
async fn loading_then_stream_ready() {
    let fake = FakeStatus::new("Loading")
        .chunks(&[
            "data: {\"state\":\"Starting\",\"time\":\"1\"}\n",
            "data: {bad\n",
            "data: {\"state\":\"Ready\",\"time\":\"2\"}\n",
        ])
        .hold_open();
    let monitor = start(&fake, None).await;

    assert_eq!(outcome(&monitor).await, Ok(()));
    assert_eq!(fake.stream_hits(), 1);
}

#[tokio::test]
async fn ready_followed_by_other_lines_in_one_chunk_is_ready() {
    let fake = FakeStatus::new("Loading")
        .chunks(&["data: {\"state\":\"Ready\",\"time\":\"1\"}\nretry: 1000\n"])
        .hold_open();
    let monitor = start(&fake, None).await;

    assert_eq!(outcome(&monitor).await, Ok(()));
}

#[tokio::test]
async fn terminal_stream_event_fails() {
    let fake = FakeStatus::new("Starting")
        .chunks(&["data: {\"state\":\"Terminated\",\"time\":\"1\"}\n"])
        .hold_open();
    let monitor = start(&fake, None).await;

    assert_eq!(outcome(&monitor).await, Err(MonitorError::BackendTerminal("Terminated".into())));
}

#[tokio::test]
async fn terminal_poll_fails_without_stream() {
    let fake = FakeStatus::new("Terminated");
    let monitor = start(&fake, None).await;

    assert_eq!(outcome(&monitor).await, Err(MonitorError::BackendTerminal("Terminated".into())));
    assert_eq!(fake.stream_hits(), 0);
}

#[tokio::test]
async fn non_success_poll_carries_status_and_body() {
    let fake = FakeStatus::new("no such backend").poll_status(StatusCode::NOT_FOUND);
    let monitor = start(&fake, None).await;

    assert_eq!(
        outcome(&monitor).await,
        Err(MonitorError::StatusFetch { status: 404, body: "no such backend".into() })
    );
}

#[tokio::test]
async fn stream_closing_before_ready_fails() {
    let fake = FakeStatus::new("Starting").chunks(&["data: {\"state\":\"Starting\",\"time\":\"1\"}\n"]);
    let monitor = start(&fake, None).await;

    assert_eq!(outcome(&monitor).await, Err(MonitorError::StreamEnded));
}

#[tokio::test]
async fn bad_stream_line_fails() {
    let fake = FakeStatus::new("Loading").chunks(&["hello\n"]).hold_open();
    let monitor = start(&fake, None).await;

    assert_eq!(outcome(&monitor).await, Err(MonitorError::UnrecognizedFrameFormat("hello".into())));
}

#[tokio::test]
async fn ready_timeout_bounds_the_wait() {
    let fake = FakeStatus::new("Loading").hold_open();
    let limit = Duration::from_millis(100);
    let monitor = start(&fake, Some(limit)).await;

    assert_eq!(outcome(&monitor).await, Err(MonitorError::Timeout(limit)));
}

#[tokio::test]
async fn cancel_resolves_waiters_and_is_idempotent() {
    let fake = FakeStatus::new("Loading").hold_open();
    let mut monitor = start(&fake, None).await;
    let waiter = tokio::spawn(wait_ready(monitor.subscribe()));

    monitor.cancel();
    monitor.cancel();

    let result = timeout(Duration::from_secs(2), waiter)
        .await
        .expect("waiter settled")
        .expect("join");
    assert_eq!(result, Err(MonitorError::Cancelled));
    assert_eq!(monitor.state(), MonitorState::Pending);
}
