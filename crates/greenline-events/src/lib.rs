//! greenline-events — stack-event polling and action waiting.
//!
//! A stack's event history is an append-only, replayable log that can
//! only be polled, never subscribed to. This crate builds two layers on
//! top of that log:
//!
//! - [`poller`]: scan the history for one matching event, and drain
//!   fresh events past a watermark for display.
//! - [`waiter`]: block until an asynchronous stack action (create,
//!   update, delete) starts and then finishes, reporting one of four
//!   terminal outcomes. Timeouts are outcomes here, never errors.

pub mod poller;
pub mod waiter;

pub use poller::{drain_new_events, find_event};
pub use waiter::{wait_for_action_to_complete, ActionOutcome, WaitConfig, WaitError};
