pub mod apply;
pub mod delete;
pub mod events;
pub mod update;
pub mod wait;

use greenline_events::ActionOutcome;
use tracing::{info, warn};

/// Log an action outcome and map it to the process exit code.
pub fn report_outcome(stack: &str, outcome: &ActionOutcome) -> i32 {
    match outcome {
        ActionOutcome::Succeeded => info!(stack = %stack, "action succeeded"),
        ActionOutcome::NoStartEvent => warn!(stack = %stack, "no start event encountered"),
        ActionOutcome::NoEndEvent => warn!(stack = %stack, "no end event encountered"),
        ActionOutcome::Failed { status } => {
            warn!(stack = %stack, status = %status, "action failed")
        }
    }
    outcome.exit_code()
}
