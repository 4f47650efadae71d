//! `greenline delete` — delete a stack and wait for the action.

use std::path::Path;

use greenline_events::WaitConfig;
use greenline_stack::StackOrchestrator;

use crate::commands::report_outcome;
use crate::scenario::Scenario;

pub async fn run(scenario: &Path, stack: &str, wait_config: WaitConfig) -> anyhow::Result<i32> {
    let cloud = Scenario::load(scenario)?.build();
    let orchestrator = StackOrchestrator::new(cloud).with_wait_config(wait_config);

    let outcome = orchestrator.delete(stack).await?;
    Ok(report_outcome(stack, &outcome))
}
