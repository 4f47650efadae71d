//! `greenline apply` — push a template and wait for the action.

use std::path::Path;

use greenline_events::WaitConfig;
use greenline_stack::StackOrchestrator;

use crate::commands::report_outcome;
use crate::scenario::Scenario;

pub async fn run(
    scenario: &Path,
    stack: &str,
    template: &Path,
    parameters: Vec<(String, String)>,
    wait_config: WaitConfig,
) -> anyhow::Result<i32> {
    let template_body = std::fs::read_to_string(template)?;
    let cloud = Scenario::load(scenario)?.build();
    let orchestrator = StackOrchestrator::new(cloud).with_wait_config(wait_config);

    let outcome = orchestrator
        .apply_template(stack, &template_body, &parameters)
        .await?;
    Ok(report_outcome(stack, &outcome))
}
