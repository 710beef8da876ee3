//! remindbot-gateway: the conversational reminder core.
//!
//! Provides:
//! - The reminder form state machine (name, message, type, schedule, confirm)
//! - The job lifecycle: transactional confirm, cancel, periodic restore
//! - The completion reactor that retires fired once-off jobs
//! - Command, message and callback handlers behind a single dispatch loop
//! - The channel plugin and messenger seams implemented by platform crates

pub mod channel;
pub mod dispatch;
pub mod draft;
pub mod error;
pub mod form;
pub mod formatting;
pub mod handlers;
pub mod lifecycle;
pub mod messenger;
pub mod reactor;

pub use channel::{ChannelPlugin, ChannelStatus};
pub use dispatch::run_dispatch_loop;
pub use draft::Draft;
pub use error::ReminderError;
pub use form::{Advance, FormMachine, Reply};
pub use handlers::ReminderBot;
pub use lifecycle::JobLifecycle;
pub use messenger::{DeliveryWorker, Messenger};
pub use reactor::CompletionReactor;
