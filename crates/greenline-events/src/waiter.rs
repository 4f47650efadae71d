//! Waiting for an asynchronous stack action to start and finish.
//!
//! The wait runs two phases. First it watches for any in-progress event
//! on the stack resource itself, with a lenient look-back window so an
//! action that began just before the call (clock skew, propagation
//! delay, the stack not existing yet) is still detected. Once a start
//! event is found, it watches for a terminal event on the stack
//! resource whose logical id equals the stack name. The completion
//! deadline slides forward whenever fresh events arrive: an action that
//! keeps reporting progress never times out, an idle one does.
//!
//! Both timeouts are ordinary [`ActionOutcome`] values. Only provider
//! call failures surface as errors.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

use greenline_cloud::{epoch_ms, CloudError, Stack, StackEvent, StackProvider};

use crate::poller::{drain_new_events, find_event};

/// Timeout and pacing knobs for one wait call.
#[derive(Debug, Clone)]
pub struct WaitConfig {
    /// How long the action gets to produce its first progress event.
    pub warmup_timeout: Duration,
    /// Window before the call start in which a progress event still
    /// counts as the action starting.
    pub lenient_look_back: Duration,
    /// How long the action gets to finish, measured from the last
    /// observed event.
    pub action_timeout: Duration,
    /// Sleep between poll rounds.
    pub poll_interval: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            warmup_timeout: Duration::from_secs(120),
            lenient_look_back: Duration::from_secs(60),
            action_timeout: Duration::from_secs(600),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Terminal result of one wait call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ActionOutcome {
    /// The action finished with a status in the success set.
    Succeeded,
    /// No start event appeared within the warmup timeout.
    NoStartEvent,
    /// A start event appeared but no terminal event followed in time.
    NoEndEvent,
    /// The action finished with a terminal status outside the success set.
    Failed { status: String },
}

impl ActionOutcome {
    /// Process exit code for the CLI: 0 success, 2 no start, 3 no end,
    /// 1 failed terminal status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Succeeded => 0,
            Self::NoStartEvent => 2,
            Self::NoEndEvent => 3,
            Self::Failed { .. } => 1,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Errors during a wait. Timeouts are not errors; see [`ActionOutcome`].
#[derive(Debug, Error)]
pub enum WaitError {
    #[error(transparent)]
    Cloud(#[from] CloudError),
}

/// Block until the next action on `stack_name` runs to a terminal
/// state, or until one of the configured windows closes.
pub async fn wait_for_action_to_complete<P: StackProvider>(
    provider: &P,
    stack_name: &str,
    config: &WaitConfig,
) -> Result<ActionOutcome, WaitError> {
    let Some((stack, start)) = wait_for_start_event(provider, stack_name, config).await? else {
        info!(stack = %stack_name, "no start event encountered");
        return Ok(ActionOutcome::NoStartEvent);
    };
    info!(
        stack = %stack_name,
        status = %start.resource_status,
        timestamp_ms = start.timestamp_ms,
        "action started"
    );

    let Some(end) = wait_for_end_event(provider, &stack, start.timestamp_ms, config).await? else {
        info!(
            stack = %stack_name,
            timeout_secs = config.action_timeout.as_secs(),
            "no end event encountered"
        );
        return Ok(ActionOutcome::NoEndEvent);
    };
    info!(stack = %stack_name, status = %end.resource_status, "action finished");

    if end.is_successful_status() {
        Ok(ActionOutcome::Succeeded)
    } else {
        Ok(ActionOutcome::Failed {
            status: end.resource_status,
        })
    }
}

/// Poll until a progress event on the stack resource appears, resolving
/// the stack handle along the way (the stack may not exist yet when the
/// wait starts). Returns `None` when the warmup window closes first.
async fn wait_for_start_event<P: StackProvider>(
    provider: &P,
    stack_name: &str,
    config: &WaitConfig,
) -> Result<Option<(Stack, StackEvent)>, WaitError> {
    let call_start_ms = epoch_ms();
    let younger_than_ms =
        call_start_ms.saturating_sub(config.lenient_look_back.as_millis() as u64);
    let deadline = Instant::now() + config.warmup_timeout;

    info!(
        stack = %stack_name,
        warmup_secs = config.warmup_timeout.as_secs(),
        look_back_secs = config.lenient_look_back.as_secs(),
        "waiting for an action to start"
    );

    let mut stack: Option<Stack> = None;
    let mut watermark = call_start_ms;
    loop {
        if let Some(ref resolved) = stack {
            watermark = drain_new_events(provider, resolved, watermark).await?;
        } else {
            stack = provider.describe_stack(stack_name).await?;
            if stack.is_none() {
                debug!(stack = %stack_name, "stack does not exist yet");
            }
        }

        if let Some(ref resolved) = stack {
            if let Some(event) =
                find_event(provider, resolved, younger_than_ms, StackEvent::is_stack_progress)
                    .await?
            {
                return Ok(Some((resolved.clone(), event)));
            }
        }

        if Instant::now() >= deadline {
            return Ok(None);
        }
        tokio::time::sleep(config.poll_interval).await;
    }
}

/// Poll until a terminal event for the stack itself appears, newer than
/// the start event. Fresh events of any kind push the deadline to
/// `last event + action_timeout`. Returns `None` on deadline.
async fn wait_for_end_event<P: StackProvider>(
    provider: &P,
    stack: &Stack,
    younger_than_ms: u64,
    config: &WaitConfig,
) -> Result<Option<StackEvent>, WaitError> {
    let action_timeout_ms = config.action_timeout.as_millis() as u64;
    let mut watermark = epoch_ms();
    // Deadline lives on the event clock: it slides with event
    // timestamps, so it is computed in wall-clock epoch millis.
    let mut deadline_ms = watermark + action_timeout_ms;

    info!(
        stack = %stack.name,
        timeout_secs = config.action_timeout.as_secs(),
        "waiting for the action to finish"
    );

    loop {
        let advanced = drain_new_events(provider, stack, watermark).await?;
        if advanced != watermark {
            watermark = advanced;
            deadline_ms = advanced + action_timeout_ms;
            debug!(stack = %stack.name, deadline_ms, "progress observed, deadline extended");
        }

        let end = find_event(provider, stack, younger_than_ms, |event| {
            event.is_stack_terminal() && event.logical_resource_id == stack.name
        })
        .await?;
        if let Some(event) = end {
            return Ok(Some(event));
        }

        if epoch_ms() >= deadline_ms {
            return Ok(None);
        }
        tokio::time::sleep(config.poll_interval).await;
    }
}
