//! `rdt`: reliable, in-order message delivery over an unreliable frame channel.
//!
//! # Architecture
//!
//! ```text
//!  application ──▶ SenderEndpoint                     ReceiverEndpoint ──▶ application
//!                   ├── segmenter  (message → frames)    │
//!                   ├── SenderWindow (W in flight,       ├── ReceiverWindow
//!                   │    per-frame acks, queue)          │    (cursor + reorder buffer)
//!                   └── RetransmitTimer                  │
//!                          │  data frames                │
//!                          └──────────▶ channel ─────────┘
//!                          ◀──────────  acks   ◀─────────┘
//! ```
//!
//! Frames are fixed-capacity and CRC-protected; the channel may lose,
//! corrupt, duplicate and reorder them.  The receiver acks every verified
//! frame individually and releases payloads strictly in sequence order.
//!
//! Each module has a single responsibility:
//! - [`config`]     : protocol parameters and validation
//! - [`packet`]     : wire format (encode / decode / checksum)
//! - [`segmenter`]  : message → numbered frames
//! - [`timer`]      : the single retransmission deadline
//! - [`sender`]     : send window state machine
//! - [`receiver`]   : reorder engine and in-order delivery
//! - [`endpoint`]   : harness-facing event handlers for both roles
//! - [`simulator`]  : seeded fault-injecting channel
//! - [`session`]    : tokio actors wiring both roles through the simulator

pub mod config;
pub mod endpoint;
pub mod packet;
pub mod receiver;
pub mod segmenter;
pub mod sender;
pub mod session;
pub mod simulator;
pub mod timer;

pub use config::Config;
pub use endpoint::{ReceiverContext, ReceiverEndpoint, SenderContext, SenderEndpoint};
pub use session::Session;
