//! Data path tests: read loop ordering and cancellation, sequenced writes,
//! transfer counters, and modem signals.

mod common;

use common::{connect_default, session_with_device};
use pretty_assertions::assert_eq;
use serialhub::{InputSignals, OutputSignals, SessionError, SessionEvent};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn chunks_are_delivered_in_arrival_order() {
    let (session, _host, link) = session_with_device();
    connect_default(&session).await;

    let inbound: Vec<&[u8]> = vec![b"alpha", b"beta", b"gamma", b"delta", b"epsilon"];
    for chunk in &inbound {
        link.push_chunk(chunk);
    }
    link.finish();

    let mut received = Vec::new();
    session
        .read_loop(|c| received.push(c))
        .await
        .expect("read loop");

    let expected: Vec<Vec<u8>> = inbound.iter().map(|c| c.to_vec()).collect();
    assert_eq!(received, expected);

    let metrics = session.metrics();
    assert_eq!(metrics.chunks_received, 5);
    assert_eq!(
        metrics.bytes_received,
        expected.iter().map(|c| c.len() as u64).sum::<u64>()
    );
}

#[tokio::test]
async fn empty_chunks_are_skipped() {
    let (session, _host, link) = session_with_device();
    connect_default(&session).await;

    link.push_chunk(b"");
    link.push_chunk(b"payload");
    link.push_chunk(b"");
    link.finish();

    let mut received = Vec::new();
    session
        .read_loop(|c| received.push(c))
        .await
        .expect("read loop");
    assert_eq!(received, vec![b"payload".to_vec()]);
    assert_eq!(session.metrics().chunks_received, 1);
}

#[tokio::test]
async fn read_loop_exits_once_and_is_not_restartable() {
    let (session, _host, link) = session_with_device();
    connect_default(&session).await;

    link.push_chunk(b"only");
    link.finish();

    let mut first = Vec::new();
    session
        .read_loop(|c| first.push(c))
        .await
        .expect("first loop");
    assert_eq!(first, vec![b"only".to_vec()]);

    // the token is consumed; a second loop returns without reading
    let mut second = Vec::new();
    tokio::time::timeout(
        Duration::from_secs(1),
        session.read_loop(|c| second.push(c)),
    )
    .await
    .expect("second loop must return immediately")
    .expect("second loop");
    assert!(second.is_empty());
}

#[tokio::test]
async fn read_loop_detects_concurrent_disconnect() {
    let (session, _host, link) = session_with_device();
    connect_default(&session).await;
    link.push_chunk(b"before");

    let reader = Arc::clone(&session);
    let loop_task = tokio::spawn(async move {
        let mut chunks = Vec::new();
        reader.read_loop(|c| chunks.push(c)).await.expect("loop");
        chunks
    });

    // let the loop consume the queued chunk, then pull the plug while its
    // next read is pending
    tokio::time::sleep(Duration::from_millis(20)).await;
    session.disconnect().await.expect("disconnect");

    let chunks = tokio::time::timeout(Duration::from_secs(1), loop_task)
        .await
        .expect("loop must observe the cancellation")
        .expect("loop panicked");
    assert_eq!(chunks, vec![b"before".to_vec()]);
}

#[tokio::test]
async fn read_loop_after_disconnect_returns_before_reading() {
    let (session, _host, _link) = session_with_device();
    connect_default(&session).await;
    session.disconnect().await.expect("disconnect");

    let mut received = Vec::new();
    session
        .read_loop(|c| received.push(c))
        .await
        .expect("read loop on a dead session");
    assert!(received.is_empty());
}

#[tokio::test]
async fn write_preserves_order_and_returns_total_length() {
    let (session, _host, link) = session_with_device();
    connect_default(&session).await;

    let total = session
        .write(vec![b"AA".to_vec(), b"BBB".to_vec(), b"C".to_vec()])
        .expect("write");
    assert_eq!(total, 6);

    // disconnect drains the submission queue before closing the writer
    session.disconnect().await.expect("disconnect");
    assert_eq!(
        link.written(),
        vec![b"AA".to_vec(), b"BBB".to_vec(), b"C".to_vec()]
    );

    let metrics = session.metrics();
    assert_eq!(metrics.chunks_written, 3);
    assert_eq!(metrics.bytes_written, 6);
}

#[tokio::test]
async fn write_failure_is_isolated_per_buffer() {
    let (session, _host, link) = session_with_device();
    connect_default(&session).await;
    let mut events = session.subscribe();

    link.fail_next_write();
    let total = session
        .write(vec![b"lost".to_vec(), b"kept".to_vec()])
        .expect("submission still succeeds");
    assert_eq!(total, 8, "both buffers were accepted for submission");

    session.disconnect().await.expect("disconnect");
    assert_eq!(link.written(), vec![b"kept".to_vec()]);

    // exactly one failure event, then the disconnect notification
    assert!(matches!(
        events.try_recv().expect("failure event"),
        SessionEvent::WriteFailed(_)
    ));
    assert_eq!(
        events.try_recv().expect("disconnected event"),
        SessionEvent::Disconnected
    );
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn write_on_disconnected_session_touches_no_stream() {
    let (session, _host, link) = session_with_device();
    connect_default(&session).await;
    session.disconnect().await.expect("disconnect");

    let err = session
        .write(vec![b"late".to_vec()])
        .expect_err("not connected");
    assert!(matches!(err, SessionError::NotConnected));
    assert!(link.written().is_empty());
}

#[tokio::test]
async fn modem_signals_round_trip() {
    let (session, _host, link) = session_with_device();
    connect_default(&session).await;

    session
        .set_signals(OutputSignals {
            dtr: Some(true),
            rts: Some(true),
            brk: None,
        })
        .expect("set signals");
    assert_eq!(link.output_signals().dtr, Some(true));
    assert_eq!(link.output_signals().rts, Some(true));

    link.set_input_signals(InputSignals {
        cts: true,
        dsr: true,
        ..Default::default()
    });
    let input = session.get_signals().expect("get signals");
    assert!(input.cts && input.dsr);
    assert!(!input.dcd && !input.ri);

    session.disconnect().await.expect("disconnect");
    assert!(matches!(
        session.get_signals(),
        Err(SessionError::NotConnected)
    ));
}
