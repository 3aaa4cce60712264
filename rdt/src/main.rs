//! Entry point for `rdt`.
//!
//! Pushes a batch of random messages through a [`Session`] over a faulty
//! simulated link and checks that the delivered stream matches what was sent.
//! All protocol work is delegated to the library; `main.rs` owns only process
//! setup (logging, argument parsing).

use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rdt::simulator::SimulatorConfig;
use rdt::{Config, Session};

/// Reliable in-order delivery over a lossy simulated channel.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Maximum number of frames in flight.
    #[arg(long, default_value_t = 10)]
    window: usize,
    /// Fixed frame size in bytes, header included (10..=264).
    #[arg(long, default_value_t = 128)]
    frame_capacity: usize,
    /// Retransmission timeout in milliseconds.
    #[arg(long, default_value_t = 300)]
    timeout_ms: u64,
    /// Probability that a frame is lost.
    #[arg(long, default_value_t = 0.0)]
    loss: f64,
    /// Probability that a frame is corrupted.
    #[arg(long, default_value_t = 0.0)]
    corrupt: f64,
    /// Probability that a frame is duplicated.
    #[arg(long, default_value_t = 0.0)]
    duplicate: f64,
    /// Probability that a frame is reordered.
    #[arg(long, default_value_t = 0.0)]
    reorder: f64,
    /// Number of messages to send.
    #[arg(long, default_value_t = 100)]
    messages: usize,
    /// Upper bound on the length of each generated message.
    #[arg(long, default_value_t = 1024)]
    max_message_len: usize,
    /// Seed for message generation and the fault model.
    #[arg(long, default_value_t = 1)]
    seed: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    let config = Config {
        window_size: cli.window,
        frame_capacity: cli.frame_capacity,
        timeout: Duration::from_millis(cli.timeout_ms),
        ..Config::default()
    };
    let faults = SimulatorConfig {
        loss_rate: cli.loss,
        corrupt_rate: cli.corrupt,
        duplicate_rate: cli.duplicate,
        reorder_rate: cli.reorder,
        seed: cli.seed,
    };

    let mut rng = StdRng::seed_from_u64(cli.seed);
    let messages: Vec<Vec<u8>> = (0..cli.messages)
        .map(|_| {
            let len = rng.random_range(0..=cli.max_message_len);
            (0..len).map(|_| rng.random()).collect()
        })
        .collect();
    let expected: Vec<u8> = messages.concat();

    let mut session = Session::spawn(config, faults).context("starting session")?;
    for (i, message) in messages.into_iter().enumerate() {
        session
            .send(message)
            .await
            .with_context(|| format!("submitting message {i}"))?;
    }

    let mut received = Vec::with_capacity(expected.len());
    while received.len() < expected.len() {
        match session.recv().await {
            Some(payload) => received.extend_from_slice(&payload),
            None => break,
        }
    }
    let report = session.close().await.context("closing session")?;

    log::info!(
        "delivered {} bytes in {} payloads; {} transmitted, {} retransmitted",
        received.len(),
        report.delivered,
        report.sender.transmitted,
        report.sender.retransmitted
    );
    log::info!("data link: {:?}", report.data_link);
    log::info!("ack link: {:?}", report.ack_link);

    if received != expected {
        bail!(
            "delivered stream differs from submitted stream ({} of {} bytes)",
            received.len(),
            expected.len()
        );
    }
    println!(
        "ok: {} messages, {} bytes, {} retransmissions",
        cli.messages,
        expected.len(),
        report.sender.retransmitted
    );
    Ok(())
}
