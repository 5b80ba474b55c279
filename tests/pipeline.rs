use hand_telemetry::data::LANDMARK_COUNT;
use hand_telemetry::error::PipelineError;
use hand_telemetry::link::LinkState;
use hand_telemetry::pipeline::{stop_channel, Pipeline, StopHandle};
use hand_telemetry::pose::WRIST;
use hand_telemetry::transport::{memory_link, MemoryPeer};
use hand_telemetry::{
    wire, AngleVector, DetectedHand, Digit, Handedness, Landmark, LandmarkFrame, PipelineConfig,
    SessionEnd,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn straight_hand() -> DetectedHand {
    let mut landmarks = vec![None; LANDMARK_COUNT];
    landmarks[WRIST] = Some(Landmark::new(0.5, 0.9, 0.1));
    for (column, digit) in Digit::ALL.iter().enumerate() {
        let x = 0.25 + column as f64 * 0.125;
        for (step, index) in digit.landmarks().iter().enumerate() {
            landmarks[*index] = Some(Landmark::new(x, 0.25 + step as f64 * 0.125, 0.1));
        }
    }
    DetectedHand {
        handedness: Handedness::Left,
        landmarks,
    }
}

fn bent_hand() -> DetectedHand {
    let mut hand = straight_hand();
    // index tip bent to a right angle
    hand.landmarks[8] = Some(Landmark::new(0.5, 0.375, 0.1));
    hand
}

fn frame(hand: DetectedHand) -> LandmarkFrame {
    LandmarkFrame {
        primary: vec![hand],
        secondary: vec![],
    }
}

fn config(reconnect: bool) -> PipelineConfig {
    PipelineConfig {
        reconnect,
        ..PipelineConfig::default()
    }
}

fn encoded(vector: &AngleVector) -> Vec<u8> {
    wire::encode(vector)
}

fn sentinels(peer: &MemoryPeer) -> usize {
    peer.sent()
        .iter()
        .filter(|payload| payload.as_slice() == wire::SHUTDOWN_SENTINEL)
        .count()
}

async fn stop_after(stop: StopHandle, millis: u64) {
    tokio::time::sleep(Duration::from_millis(millis)).await;
    stop.stop();
}

#[tokio::test(start_paused = true)]
async fn extended_hand_sends_default_pose() {
    let (transport, peer) = memory_link();
    peer.close_on_shutdown(true);
    let (stop, signal) = stop_channel();
    let source = || Some(frame(straight_hand()));
    let mut pipeline = Pipeline::new(&config(true), transport, source, signal);

    let (report, ()) = tokio::join!(pipeline.run(), stop_after(stop, 1000));
    let report = report.unwrap();

    assert_eq!(report.transmissions, 1);
    assert_eq!(peer.sent()[0], encoded(&AngleVector::default_pose()));
}

#[tokio::test(start_paused = true)]
async fn unchanged_candidate_is_sent_once() {
    let (transport, peer) = memory_link();
    peer.close_on_shutdown(true);
    let (stop, signal) = stop_channel();
    let ticks = Arc::new(AtomicUsize::new(0));
    let counter = ticks.clone();
    let source = move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Some(frame(bent_hand()))
    };
    let mut pipeline = Pipeline::new(&config(true), transport, source, signal);

    // ticks at 0, 300, ..., 2700
    let (report, ()) = tokio::join!(pipeline.run(), stop_after(stop, 2850));
    let report = report.unwrap();

    assert_eq!(ticks.load(Ordering::SeqCst), 10);
    assert_eq!(report.transmissions, 1);
    assert_eq!(report.suppressed, 9);
    let sent = peer.sent();
    assert_eq!(sent.len(), 2);
    assert_ne!(sent[0], encoded(&AngleVector::default_pose()));
    assert_eq!(sent[1], wire::SHUTDOWN_SENTINEL.to_vec());
}

#[tokio::test(start_paused = true)]
async fn operator_stop_mid_tick_shuts_down_once() {
    let (transport, peer) = memory_link();
    let (stop, signal) = stop_channel();
    let ticks = Arc::new(AtomicUsize::new(0));
    let counter = ticks.clone();
    let hands = [straight_hand(), bent_hand()];
    let source = move || {
        let tick = counter.fetch_add(1, Ordering::SeqCst);
        if tick == 2 {
            stop.stop();
        }
        Some(frame(hands[tick % 2].clone()))
    };
    let mut pipeline = Pipeline::new(&config(true), transport, source, signal);

    let report = pipeline.run().await.unwrap();

    assert_eq!(report.last_end, Some(SessionEnd::OperatorStop));
    assert_eq!(ticks.load(Ordering::SeqCst), 3);
    assert_eq!(pipeline.channel().state(), LinkState::Idle);
    assert!(pipeline.channel().session().is_none());
    assert!(!peer.is_linked());

    let sent = peer.sent();
    assert_eq!(sent.len(), 4);
    assert_eq!(sentinels(&peer), 1);
    assert_eq!(sent.last().unwrap(), &wire::SHUTDOWN_SENTINEL.to_vec());
}

#[tokio::test(start_paused = true)]
async fn stale_input_holds_then_falls_back() {
    let (transport, peer) = memory_link();
    peer.close_on_shutdown(true);
    let (stop, signal) = stop_channel();
    let mut first = true;
    let source = move || {
        if first {
            first = false;
            Some(frame(bent_hand()))
        } else {
            None
        }
    };
    let mut pipeline = Pipeline::new(&config(true), transport, source, signal);

    // 0 fresh, 300 and 600 held, 900 past the timeout
    let (report, ()) = tokio::join!(pipeline.run(), stop_after(stop, 1000));
    let report = report.unwrap();

    assert_eq!(report.transmissions, 2);
    let sent = peer.sent();
    assert_ne!(sent[0], encoded(&AngleVector::default_pose()));
    assert_eq!(sent[1], encoded(&AngleVector::default_pose()));
}

#[tokio::test(start_paused = true)]
async fn link_loss_rescans_and_resends() {
    let (transport, peer) = memory_link();
    peer.close_on_shutdown(true);
    let (stop, signal) = stop_channel();
    let remote = peer.clone();
    let ticks = Arc::new(AtomicUsize::new(0));
    let counter = ticks.clone();
    let source = move || {
        match counter.fetch_add(1, Ordering::SeqCst) {
            1 => remote.drop_link(),
            3 => stop.stop(),
            _ => {}
        }
        Some(frame(bent_hand()))
    };
    let mut pipeline = Pipeline::new(&config(true), transport, source, signal);

    let report = pipeline.run().await.unwrap();

    assert_eq!(report.sessions, 2);
    assert_eq!(peer.connects(), 2);
    assert_eq!(report.last_end, Some(SessionEnd::OperatorStop));
    // the new session starts from a clean filter
    let sent = peer.sent();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[0], sent[1]);
    assert_eq!(sentinels(&peer), 1);
}

#[tokio::test(start_paused = true)]
async fn link_loss_without_reconnect_is_abnormal() {
    let (transport, peer) = memory_link();
    let (_stop, signal) = stop_channel();
    let remote = peer.clone();
    let mut ticks = 0;
    let source = move || {
        ticks += 1;
        if ticks == 2 {
            remote.drop_link();
        }
        Some(frame(bent_hand()))
    };
    let mut pipeline = Pipeline::new(&config(false), transport, source, signal);

    let report = pipeline.run().await.unwrap();

    assert_eq!(report.last_end, Some(SessionEnd::LinkLost));
    assert!(!SessionEnd::LinkLost.is_graceful());
    assert_eq!(pipeline.channel().state(), LinkState::Idle);
    assert_eq!(sentinels(&peer), 0);
}

#[tokio::test(start_paused = true)]
async fn peer_shutdown_ends_session_gracefully() {
    let (transport, peer) = memory_link();
    let (_stop, signal) = stop_channel();
    let remote = peer.clone();
    let mut ticks = 0;
    let source = move || {
        ticks += 1;
        if ticks == 2 {
            remote.notify(b"not angles");
            remote.notify(wire::SHUTDOWN_SENTINEL);
        }
        Some(frame(bent_hand()))
    };
    let mut pipeline = Pipeline::new(&config(false), transport, source, signal);

    let report = pipeline.run().await.unwrap();

    assert_eq!(report.last_end, Some(SessionEnd::PeerShutdown));
    assert_eq!(report.malformed_inbound, 1);
    assert_eq!(sentinels(&peer), 0);
    assert_eq!(peer.disconnects(), 1);
    assert_eq!(pipeline.channel().state(), LinkState::Idle);
}

#[tokio::test(start_paused = true)]
async fn failed_send_is_retried_next_tick() {
    let (transport, peer) = memory_link();
    peer.close_on_shutdown(true);
    peer.fail_next_sends(1);
    let (stop, signal) = stop_channel();
    let source = || Some(frame(bent_hand()));
    let mut pipeline = Pipeline::new(&config(true), transport, source, signal);

    let (report, ()) = tokio::join!(pipeline.run(), stop_after(stop, 700));
    let report = report.unwrap();

    assert_eq!(report.send_warnings, 1);
    assert_eq!(report.transmissions, 1);
    assert_eq!(peer.sent().len(), 2);
}

#[tokio::test]
async fn transport_init_failure_is_fatal() {
    let (transport, peer) = memory_link();
    peer.fail_open();
    let (_stop, signal) = stop_channel();
    let source = || -> Option<LandmarkFrame> { None };
    let mut pipeline = Pipeline::new(&config(true), transport, source, signal);

    assert!(matches!(
        pipeline.run().await,
        Err(PipelineError::TransportInit(_))
    ));
    assert_eq!(peer.connects(), 0);
}

#[tokio::test(start_paused = true)]
async fn stop_while_scanning_returns_idle() {
    let (transport, peer) = memory_link();
    peer.set_available(false);
    let (stop, signal) = stop_channel();
    let source = || -> Option<LandmarkFrame> { None };
    let mut pipeline = Pipeline::new(&config(true), transport, source, signal);

    let (report, ()) = tokio::join!(pipeline.run(), stop_after(stop, 5000));
    let report = report.unwrap();

    assert_eq!(report.sessions, 0);
    assert_eq!(report.last_end, None);
    assert_eq!(pipeline.channel().state(), LinkState::Idle);
    assert!(peer.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stop_abandons_stalled_send() {
    let (transport, peer) = memory_link();
    peer.stall_sends(true);
    let (stop, signal) = stop_channel();
    let source = || Some(frame(bent_hand()));
    let mut pipeline = Pipeline::new(&config(true), transport, source, signal);

    let run = async { tokio::join!(pipeline.run(), stop_after(stop, 1000)).0 };
    let report = tokio::time::timeout(Duration::from_secs(30), run)
        .await
        .expect("stop was not seen during a stalled send")
        .unwrap();

    assert_eq!(report.last_end, Some(SessionEnd::OperatorStop));
    assert_eq!(report.transmissions, 0);
    assert_eq!(pipeline.channel().state(), LinkState::Idle);
    assert!(pipeline.channel().session().is_none());
    assert_eq!(peer.disconnects(), 1);
    assert!(!peer.is_linked());
    assert!(peer.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stalled_sentinel_is_bounded_by_grace() {
    let (transport, peer) = memory_link();
    peer.stall_sentinel(true);
    let (stop, signal) = stop_channel();
    let source = || Some(frame(bent_hand()));
    let mut pipeline = Pipeline::new(&config(true), transport, source, signal);
    let started = tokio::time::Instant::now();

    let run = async { tokio::join!(pipeline.run(), stop_after(stop, 1000)).0 };
    let report = tokio::time::timeout(Duration::from_secs(30), run)
        .await
        .expect("shutdown outlived its grace period")
        .unwrap();

    // stop at 1s, then the 1s default grace
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(2000) && elapsed < Duration::from_millis(2100));
    assert_eq!(report.last_end, Some(SessionEnd::OperatorStop));
    assert_eq!(report.transmissions, 1);
    assert_eq!(pipeline.channel().state(), LinkState::Idle);
    assert_eq!(peer.disconnects(), 1);
    assert_eq!(sentinels(&peer), 0);
}

#[tokio::test(start_paused = true)]
async fn link_loss_during_stalled_send_is_abnormal() {
    let (transport, peer) = memory_link();
    peer.stall_sends(true);
    let (_stop, signal) = stop_channel();
    let source = || Some(frame(bent_hand()));
    let mut pipeline = Pipeline::new(&config(false), transport, source, signal);
    let remote = peer.clone();
    let vanish = async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        remote.drop_link();
    };

    let run = async { tokio::join!(pipeline.run(), vanish).0 };
    let report = tokio::time::timeout(Duration::from_secs(30), run)
        .await
        .expect("link loss was not seen during a stalled send")
        .unwrap();

    assert_eq!(report.last_end, Some(SessionEnd::LinkLost));
    assert_eq!(pipeline.channel().state(), LinkState::Idle);
    assert_eq!(sentinels(&peer), 0);
}
