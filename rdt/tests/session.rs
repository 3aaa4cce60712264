//! Integration tests for the async [`Session`].
//!
//! Tokio's clock is paused, so retransmission timeouts elapse instantly once
//! every task is idle and the tests stay fast and deterministic.

use std::time::Duration;

use rdt::config::ConfigError;
use rdt::segmenter::frame_count;
use rdt::sender::SendError;
use rdt::session::SessionError;
use rdt::simulator::SimulatorConfig;
use rdt::{Config, Session};

fn messages(count: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| (0..(i * 37) % 400 + 1).map(|b| (b + i) as u8).collect())
        .collect()
}

fn total_frames(config: &Config, messages: &[Vec<u8>]) -> u64 {
    messages
        .iter()
        .map(|m| frame_count(m.len(), config.max_payload()) as u64)
        .sum()
}

async fn collect(session: &mut Session, bytes: usize) -> Vec<u8> {
    let mut received = Vec::with_capacity(bytes);
    while received.len() < bytes {
        let payload = session.recv().await.expect("receiver stopped early");
        received.extend_from_slice(&payload);
    }
    received
}

#[tokio::test(start_paused = true)]
async fn clean_link_delivers_in_order() {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = Config::default();
    let batch = messages(25);
    let expected = batch.concat();

    let mut session = Session::spawn(config.clone(), SimulatorConfig::default()).unwrap();
    for message in batch.iter().cloned() {
        session.send(message).await.unwrap();
    }
    assert_eq!(collect(&mut session, expected.len()).await, expected);

    let report = session.close().await.unwrap();
    assert_eq!(report.delivered, total_frames(&config, &batch));
    assert_eq!(report.sender.acked, report.delivered);
    assert_eq!(report.sender.retransmitted, 0);
    assert_eq!(report.data_link.lost, 0);
}

#[tokio::test(start_paused = true)]
async fn faulty_link_still_delivers_exactly_once() {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = Config {
        window_size: 4,
        timeout: Duration::from_millis(50),
        ..Config::default()
    };
    let faults = SimulatorConfig {
        loss_rate: 0.25,
        corrupt_rate: 0.1,
        duplicate_rate: 0.1,
        reorder_rate: 0.2,
        seed: 17,
    };
    let batch = messages(20);
    let expected = batch.concat();

    let mut session = Session::spawn(config.clone(), faults).unwrap();
    for message in batch.iter().cloned() {
        session.send(message).await.unwrap();
    }
    assert_eq!(collect(&mut session, expected.len()).await, expected);

    let report = session.close().await.unwrap();
    assert_eq!(report.delivered, total_frames(&config, &batch));
    assert!(report.sender.retransmitted > 0);
    assert!(report.data_link.lost > 0);
}

#[tokio::test(start_paused = true)]
async fn close_waits_for_every_ack() {
    let config = Config::default();
    let faults = SimulatorConfig {
        loss_rate: 0.3,
        seed: 5,
        ..SimulatorConfig::default()
    };
    let batch = messages(10);

    let session = Session::spawn(config.clone(), faults).unwrap();
    for message in batch.iter().cloned() {
        session.send(message).await.unwrap();
    }
    let report = session.close().await.unwrap();
    assert_eq!(report.sender.acked, total_frames(&config, &batch));
    assert_eq!(report.delivered, report.sender.acked);
}

#[tokio::test]
async fn invalid_configuration_is_rejected() {
    let zero_window = Config {
        window_size: 0,
        ..Config::default()
    };
    assert!(matches!(
        Session::spawn(zero_window, SimulatorConfig::default()),
        Err(SessionError::Config(ConfigError::ZeroWindow))
    ));

    let bad_rate = SimulatorConfig {
        loss_rate: 2.0,
        ..SimulatorConfig::default()
    };
    assert!(matches!(
        Session::spawn(Config::default(), bad_rate),
        Err(SessionError::Faults(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn send_errors_reach_the_caller() {
    let config = Config {
        window_size: 1,
        max_queued_frames: 1,
        ..Config::default()
    };
    let mut session = Session::spawn(config, SimulatorConfig::default()).unwrap();

    let err = session.send(vec![0u8; 200]).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Send(SendError::QueueFull { requested: 2, .. })
    ));

    // The session keeps working after a rejected message.
    session.send(b"small".to_vec()).await.unwrap();
    assert_eq!(session.recv().await, Some(b"small".to_vec()));
    session.close().await.unwrap();
}

#[tokio::test]
async fn total_loss_is_rejected_up_front() {
    let dead = SimulatorConfig {
        loss_rate: 1.0,
        ..SimulatorConfig::default()
    };
    assert!(matches!(
        Session::spawn(Config::default(), dead),
        Err(SessionError::DeadLink(rate)) if rate == 1.0
    ));
}

#[tokio::test(start_paused = true)]
async fn held_frames_are_released_on_close() {
    // Every frame is held back until the next one overtakes it, so both
    // links still hold a frame when the transfer completes.
    let faults = SimulatorConfig {
        reorder_rate: 1.0,
        ..SimulatorConfig::default()
    };
    let mut session = Session::spawn(Config::default(), faults).unwrap();

    session.send(b"late".to_vec()).await.unwrap();
    assert_eq!(session.recv().await, Some(b"late".to_vec()));

    let report = session.close().await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(report.sender.acked, 1);
    assert_eq!(report.data_link.flushed, 1);
    assert_eq!(report.ack_link.flushed, 1);
}
