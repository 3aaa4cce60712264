//! Async session: both protocol roles running as tokio actors.
//!
//! # Architecture
//!
//! ```text
//!  Application
//!      │  send(msg)                                     recv()
//!      ▼                                                   ▲
//!  ┌──────────────┐  data  ┌───────────────┐  data  ┌─────┴──────────┐
//!  │ sender actor │──────▶ │ FaultyChannel │──────▶ │ receiver actor │
//!  │  (endpoint + │        └───────────────┘        │   (endpoint)   │
//!  │   timer)     │  acks  ┌───────────────┐  acks  │                │
//!  │              │◀────── │ FaultyChannel │◀────── │                │
//!  └──────────────┘        └───────────────┘        └────────────────┘
//! ```
//!
//! Each actor owns its endpoint and consumes one ordered event stream, so the
//! handlers of a role never run concurrently.  The sender actor multiplexes
//! application messages, incoming acks and its retransmission deadline with
//! `tokio::select!`.
//!
//! # Shutdown
//!
//! [`Session::close`] stops accepting messages and lets the sender actor run
//! until every submitted frame is acknowledged.  The sender then drops its
//! side of the data link, which ends the receiver actor.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::{Config, ConfigError};
use crate::endpoint::{ReceiverContext, ReceiverEndpoint, SenderContext, SenderEndpoint};
use crate::sender::{SendError, SenderStats};
use crate::simulator::{ChannelStats, FaultyChannel, SimulatorConfig, SimulatorError};

const DATA_LINK: u64 = 0;
const ACK_LINK: u64 = 1;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid protocol configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid fault model: {0}")]
    Faults(#[from] SimulatorError),
    #[error(transparent)]
    Send(#[from] SendError),
    #[error("loss rate {0} leaves no frame to deliver")]
    DeadLink(f64),
    #[error("session actor has stopped")]
    Closed,
    #[error("session actor panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// What the session did, collected when it closes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionReport {
    pub sender: SenderStats,
    pub delivered: u64,
    pub data_link: ChannelStats,
    pub ack_link: ChannelStats,
}

type Reply = oneshot::Sender<Result<(), SendError>>;

/// Handle to a running session.
pub struct Session {
    cmd_tx: mpsc::UnboundedSender<(Vec<u8>, Reply)>,
    delivered_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    sender: JoinHandle<(SenderStats, ChannelStats)>,
    receiver: JoinHandle<(u64, ChannelStats)>,
}

impl Session {
    /// Spawn both actors on the current tokio runtime.
    ///
    /// A loss rate of 1 is rejected: no transfer over such a link could ever
    /// finish.
    pub fn spawn(config: Config, faults: SimulatorConfig) -> Result<Self, SessionError> {
        config.validate()?;
        faults.validate()?;
        if faults.loss_rate >= 1.0 {
            return Err(SessionError::DeadLink(faults.loss_rate));
        }

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (data_tx, data_rx) = mpsc::unbounded_channel();
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        let (delivered_tx, delivered_rx) = mpsc::unbounded_channel();

        let sender = SenderEndpoint::new(
            &config,
            SenderLink {
                deadline: Mutex::new(None),
                link: Link::new(FaultyChannel::new(faults.for_link(DATA_LINK))?, data_tx),
            },
        )?;
        let receiver = ReceiverEndpoint::new(
            &config,
            ReceiverLink {
                link: Link::new(FaultyChannel::new(faults.for_link(ACK_LINK))?, ack_tx),
                delivered_tx,
            },
        )?;

        log::info!(
            "[session] starting: window={} frame_capacity={} timeout={:?}",
            config.window_size,
            config.frame_capacity,
            config.timeout
        );
        if faults.is_transparent() {
            log::info!("[session] fault-free link");
        } else {
            log::info!("[session] fault model: {faults:?}");
        }

        Ok(Self {
            cmd_tx,
            delivered_rx,
            sender: tokio::spawn(sender_actor(sender, cmd_rx, ack_rx)),
            receiver: tokio::spawn(receiver_actor(receiver, data_rx)),
        })
    }

    /// Submit one message for delivery.
    ///
    /// Resolves once the sender has accepted (or rejected) the message, not
    /// once it has been delivered.
    pub async fn send(&self, message: Vec<u8>) -> Result<(), SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send((message, reply_tx))
            .map_err(|_| SessionError::Closed)?;
        reply_rx.await.map_err(|_| SessionError::Closed)??;
        Ok(())
    }

    /// Next payload delivered to the application, in sequence order.
    ///
    /// `None` once the receiver has stopped and everything was consumed.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.delivered_rx.recv().await
    }

    /// Wait for every submitted frame to be acknowledged, then stop both
    /// actors.
    ///
    /// There is no deadline: over a lossy link this returns only once the
    /// retransmissions get through.
    pub async fn close(self) -> Result<SessionReport, SessionError> {
        let Self {
            cmd_tx,
            delivered_rx,
            sender,
            receiver,
        } = self;
        drop(cmd_tx);
        let (sender, data_link) = sender.await?;
        let (delivered, ack_link) = receiver.await?;
        drop(delivered_rx);

        let report = SessionReport {
            sender,
            delivered,
            data_link,
            ack_link,
        };
        log::info!("[session] closed: {report:?}");
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Contexts
// ---------------------------------------------------------------------------

/// One direction of the simulated network.
struct Link {
    channel: Mutex<FaultyChannel>,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl Link {
    fn new(channel: FaultyChannel, tx: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Self {
            channel: Mutex::new(channel),
            tx,
        }
    }

    fn push(&self, frame: Vec<u8>) {
        for out in lock(&self.channel).transmit(frame) {
            // The far actor is gone; nothing left to deliver to.
            if self.tx.send(out).is_err() {
                log::trace!("[session] link closed; discarding frame");
            }
        }
    }

    /// Release a frame still held back by the reorder fault.
    fn flush(&self) {
        let Some(frame) = lock(&self.channel).flush() else {
            return;
        };
        log::debug!("[session] releasing {}-byte frame held at shutdown", frame.len());
        if self.tx.send(frame).is_err() {
            log::debug!("[session] link closed; held frame discarded");
        }
    }

    fn stats(&self) -> ChannelStats {
        lock(&self.channel).stats()
    }
}

struct SenderLink {
    deadline: Mutex<Option<tokio::time::Instant>>,
    link: Link,
}

impl SenderLink {
    fn deadline(&self) -> Option<tokio::time::Instant> {
        *lock(&self.deadline)
    }

    /// The deadline fired; the single-shot timer is spent.
    fn disarm(&self) {
        *lock(&self.deadline) = None;
    }
}

impl SenderContext for SenderLink {
    fn now(&self) -> Instant {
        tok_now().into_std()
    }

    fn start_timer(&self, after: Duration) {
        *lock(&self.deadline) = Some(tok_now() + after);
    }

    fn stop_timer(&self) {
        self.disarm();
    }

    fn to_lower_layer(&self, frame: Vec<u8>) {
        self.link.push(frame);
    }
}

struct ReceiverLink {
    link: Link,
    delivered_tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl ReceiverContext for ReceiverLink {
    fn to_lower_layer(&self, frame: Vec<u8>) {
        self.link.push(frame);
    }

    fn to_upper_layer(&self, payload: Vec<u8>) {
        if self.delivered_tx.send(payload).is_err() {
            log::trace!("[session] application stopped reading; payload discarded");
        }
    }
}

// ---------------------------------------------------------------------------
// Actors
// ---------------------------------------------------------------------------

async fn sender_actor(
    endpoint: SenderEndpoint<SenderLink>,
    mut cmd_rx: mpsc::UnboundedReceiver<(Vec<u8>, Reply)>,
    mut ack_rx: mpsc::UnboundedReceiver<Vec<u8>>,
) -> (SenderStats, ChannelStats) {
    endpoint.init();
    let mut draining = false;

    loop {
        if draining && endpoint.with_window(|w| w.is_idle()) {
            break;
        }
        let deadline = endpoint.context().deadline();

        tokio::select! {
            // ── application message ─────────────────────────────────────
            cmd = cmd_rx.recv(), if !draining => match cmd {
                Some((message, reply)) => {
                    let result = endpoint.on_message(&message);
                    // The caller may have given up waiting.
                    let _ = reply.send(result);
                }
                None => {
                    log::debug!("[session] application closed; draining");
                    draining = true;
                }
            },

            // ── ack from the channel ────────────────────────────────────
            frame = ack_rx.recv() => match frame {
                Some(frame) => endpoint.on_frame(&frame),
                None => {
                    log::warn!("[session] ack link closed; stopping sender");
                    break;
                }
            },

            // ── retransmission deadline ─────────────────────────────────
            _ = sleep_until(deadline), if deadline.is_some() => {
                endpoint.context().disarm();
                endpoint.on_timeout();
            }
        }
    }

    endpoint.teardown();
    endpoint.context().link.flush();
    let stats = endpoint.with_window(|w| w.stats());
    (stats, endpoint.context().link.stats())
}

async fn receiver_actor(
    endpoint: ReceiverEndpoint<ReceiverLink>,
    mut data_rx: mpsc::UnboundedReceiver<Vec<u8>>,
) -> (u64, ChannelStats) {
    endpoint.init();
    while let Some(frame) = data_rx.recv().await {
        if let Err(e) = endpoint.on_frame(&frame) {
            log::debug!("[session] receiver left frame unacknowledged: {e}");
        }
    }
    endpoint.teardown();
    endpoint.context().link.flush();
    let delivered = endpoint.with_window(|w| w.delivered());
    (delivered, endpoint.context().link.stats())
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    if let Some(deadline) = deadline {
        tokio::time::sleep_until(deadline).await;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// `tokio::time::Instant::now()`, so paused test clocks apply.
#[inline]
fn tok_now() -> tokio::time::Instant {
    tokio::time::Instant::now()
}
