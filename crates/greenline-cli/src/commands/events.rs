//! `greenline events` — print a stack's event history.

use std::path::Path;

use anyhow::bail;

use greenline_cloud::StackProvider;

use crate::scenario::Scenario;

pub async fn run(
    scenario: &Path,
    stack_name: &str,
    since_ms: u64,
    format: &str,
) -> anyhow::Result<i32> {
    let cloud = Scenario::load(scenario)?.build();
    let Some(stack) = cloud.describe_stack(stack_name).await? else {
        bail!("no stack named '{stack_name}' found");
    };

    let mut events = cloud.describe_events(&stack).await?;
    events.sort_by_key(|e| e.timestamp_ms);
    events.retain(|e| e.timestamp_ms > since_ms);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&events)?),
        "text" => {
            for event in &events {
                println!(
                    "{:>14}  {:<24} {:<24} {}",
                    event.timestamp_ms,
                    event.resource_status,
                    event.logical_resource_id,
                    event.status_reason.as_deref().unwrap_or("")
                );
            }
        }
        other => bail!("unknown format '{other}', expected text or json"),
    }
    Ok(0)
}
