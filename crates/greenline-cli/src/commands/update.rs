//! `greenline update` — roll a stack's autoscaling groups forward.

use std::path::Path;

use tokio::sync::watch;
use tracing::{info, warn};

use greenline_rollout::{RolloutError, UpdateConfig};
use greenline_stack::{StackError, StackOrchestrator};

use crate::scenario::Scenario;

pub async fn run(scenario: &Path, stack: &str, config: UpdateConfig) -> anyhow::Result<i32> {
    let cloud = Scenario::load(scenario)?.build();
    let orchestrator = StackOrchestrator::new(cloud).with_update_config(config);

    // Ctrl+C mid-update still rolls the in-flight group back before the
    // process exits.
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    match orchestrator.update_all_groups(stack, &mut shutdown_rx).await {
        Ok(()) => {
            info!(stack = %stack, "stack update complete");
            Ok(0)
        }
        Err(StackError::Rollout(RolloutError::Interrupted)) => {
            warn!(stack = %stack, "update interrupted, in-flight group rolled back");
            Ok(130)
        }
        Err(err) => Err(err.into()),
    }
}
