//! Channel plugin framework for messaging platforms.
//!
//! # Architecture
//!
//! ```text
//! Messaging platform
//!     ↓ (platform-specific protocol)
//! ChannelPlugin::start() spawns listener
//!     ↓ (InboundEvent via mpsc)
//! dispatch loop → ReminderBot::handle_event()
//!     ↓ (Messenger calls)
//! Messaging platform
//! ```

use tokio::sync::mpsc;

use remindbot_types::InboundEvent;

/// Lifecycle state of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Stopped,
    Starting,
    Running,
    Error(String),
}

/// Bridges a messaging platform's inbound side to the dispatch loop.
///
/// Use `&self` for all methods; implementations keep mutable state behind
/// interior mutability.
#[async_trait::async_trait]
pub trait ChannelPlugin: Send + Sync {
    /// Platform identifier, e.g. "telegram".
    fn channel_type(&self) -> &str;

    /// Connect and start pushing inbound events into `sender`.
    async fn start(&self, sender: mpsc::Sender<InboundEvent>) -> anyhow::Result<()>;

    /// Stop the listener and wait for it to finish.
    async fn stop(&self) -> anyhow::Result<()>;

    fn status(&self) -> ChannelStatus;
}
