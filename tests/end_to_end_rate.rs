//! End-to-end streaming tests over the in-memory sink.
//!
//! Time is paused, so rates are exact up to tick alignment.

use std::time::Duration;

use handbridge::codec::FrameEncoder;
use handbridge::session::StreamSession;
use handbridge::tracking::{Chirality, JointSkeletonSampler, SkeletonLayout, SyntheticHands};
use handbridge::transport::{MemorySink, RetryPolicy, SendRate, Transport};

async fn stream_for(
    sink: &MemorySink,
    layout: SkeletonLayout,
    source_hz: u32,
    send_hz: u32,
    run_for: Duration,
) -> handbridge::SessionSummary {
    let session = StreamSession::start(
        SyntheticHands::new(layout, source_hz).with_seed(42),
        JointSkeletonSampler::new(layout),
        FrameEncoder::new(layout),
        Transport::from_sink(sink.clone(), RetryPolicy::EveryTick),
        SendRate::new(send_hz).unwrap(),
    )
    .await;
    tokio::time::sleep(run_for).await;
    session.stop().await
}

#[tokio::test(start_paused = true)]
async fn test_send_rate_independent_of_source_rate() {
    let sink = MemorySink::new();
    let summary = stream_for(
        &sink,
        SkeletonLayout::VisionOs,
        130,
        60,
        Duration::from_secs(1),
    )
    .await;

    // 130 updates/sec per hand from the source, but only ~60 messages out.
    assert!(summary.sampler.accepted >= 250, "{:?}", summary.sampler);
    let sent = sink.sent_count();
    assert!((58..=61).contains(&sent), "sent {sent}");
    assert_eq!(summary.transport.send_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_messages_decode_with_both_hands() {
    let sink = MemorySink::new();
    let layout = SkeletonLayout::OpenXr;
    stream_for(&sink, layout, 100, 30, Duration::from_millis(500)).await;

    let encoder = FrameEncoder::new(layout);
    let sent = sink.sent();
    assert!(sent.len() >= 10);
    // The first tick may precede the first capture; every later one carries both hands.
    for text in &sent[1..] {
        let decoded = encoder.decode(text).unwrap();
        let left = decoded.left.expect("left hand");
        let right = decoded.right.expect("right hand");
        assert_eq!(left.chirality(), Chirality::Left);
        assert_eq!(right.joints().len(), 26);
        assert_eq!(left.tracked_mask().bits(), layout.full_mask());
    }
}

#[tokio::test(start_paused = true)]
async fn test_slow_receiver_drops_instead_of_queueing() {
    // 60 Hz ticks against a 40 ms round trip: at most one send in flight.
    let sink = MemorySink::new().with_latency(Duration::from_millis(40));
    let summary = stream_for(
        &sink,
        SkeletonLayout::VisionOs,
        130,
        60,
        Duration::from_secs(1),
    )
    .await;

    let sent = sink.sent_count();
    assert!((18..=26).contains(&sent), "sent {sent}");
    assert!(summary.transport.frames_dropped >= 30);
    assert_eq!(summary.transport.send_failures, 0);
}
