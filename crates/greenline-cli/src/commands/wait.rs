//! `greenline wait` — wait for the next action on a stack to complete.

use std::path::Path;

use greenline_events::{wait_for_action_to_complete, WaitConfig};

use crate::commands::report_outcome;
use crate::scenario::Scenario;

pub async fn run(scenario: &Path, stack: &str, wait_config: WaitConfig) -> anyhow::Result<i32> {
    let cloud = Scenario::load(scenario)?.build();
    let outcome = wait_for_action_to_complete(&cloud, stack, &wait_config).await?;
    Ok(report_outcome(stack, &outcome))
}
