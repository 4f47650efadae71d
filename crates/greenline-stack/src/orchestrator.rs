//! The stack orchestrator.

use thiserror::Error;
use tokio::sync::watch;
use tracing::info;

use greenline_cloud::{
    AutoscalingGroup, AutoscalingProvider, CloudError, ComputeProvider, LoadBalancerProvider,
    Stack, StackProvider, TemplateParameters, AUTOSCALING_GROUP_RESOURCE_TYPE,
};
use greenline_events::{wait_for_action_to_complete, ActionOutcome, WaitConfig, WaitError};
use greenline_rollout::{GroupUpdater, RolloutError, UpdateConfig};

/// Errors of stack-level operations.
#[derive(Debug, Error)]
pub enum StackError {
    #[error("no stack named '{0}' found")]
    StackNotFound(String),

    #[error(transparent)]
    Rollout(#[from] RolloutError),

    #[error(transparent)]
    Wait(#[from] WaitError),

    #[error(transparent)]
    Cloud(#[from] CloudError),
}

pub type StackResult<T> = Result<T, StackError>;

/// Composes the rolling updater and the action waiter over one provider
/// bundle. Groups are updated strictly sequentially; only one group is
/// ever mid-flight.
pub struct StackOrchestrator<P>
where
    P: StackProvider + AutoscalingProvider + ComputeProvider + LoadBalancerProvider,
{
    provider: P,
    update_config: UpdateConfig,
    wait_config: WaitConfig,
}

impl<P> StackOrchestrator<P>
where
    P: StackProvider + AutoscalingProvider + ComputeProvider + LoadBalancerProvider,
{
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            update_config: UpdateConfig::default(),
            wait_config: WaitConfig::default(),
        }
    }

    pub fn with_update_config(mut self, config: UpdateConfig) -> Self {
        self.update_config = config;
        self
    }

    pub fn with_wait_config(mut self, config: WaitConfig) -> Self {
        self.wait_config = config;
        self
    }

    async fn resolve_stack(&self, stack_name: &str) -> StackResult<Stack> {
        self.provider
            .describe_stack(stack_name)
            .await?
            .ok_or_else(|| StackError::StackNotFound(stack_name.to_string()))
    }

    /// The live autoscaling groups managed by a stack, in resource
    /// order. Non-group resources are ignored.
    pub async fn groups_in_stack(&self, stack_name: &str) -> StackResult<Vec<AutoscalingGroup>> {
        let stack = self.resolve_stack(stack_name).await?;
        let resources = self.provider.describe_resources(&stack).await?;
        let names: Vec<String> = resources
            .iter()
            .filter(|r| r.resource_type == AUTOSCALING_GROUP_RESOURCE_TYPE)
            .map(|r| r.physical_resource_id.clone())
            .collect();
        Ok(self.provider.get_groups(&names).await?)
    }

    /// Roll every autoscaling group of the stack forward, one group at
    /// a time. The first failing group aborts the run; later groups are
    /// left untouched.
    pub async fn update_all_groups(
        &self,
        stack_name: &str,
        shutdown: &mut watch::Receiver<bool>,
    ) -> StackResult<()> {
        let groups = self.groups_in_stack(stack_name).await?;
        info!(stack = %stack_name, groups = groups.len(), "updating autoscaling groups");
        for group in groups {
            info!(group = %group.name, "updating autoscaling group");
            GroupUpdater::new(&self.provider, group)
                .with_config(self.update_config.clone())
                .run(shutdown)
                .await?;
        }
        Ok(())
    }

    /// Push a template: update when the stack exists, create otherwise.
    /// Blocks until the resulting action reaches a terminal outcome.
    pub async fn apply_template(
        &self,
        stack_name: &str,
        template_body: &str,
        parameters: &TemplateParameters,
    ) -> StackResult<ActionOutcome> {
        let exists = self.provider.describe_stack(stack_name).await?.is_some();
        if exists {
            info!(stack = %stack_name, "stack exists, updating");
            self.provider
                .update_stack(stack_name, template_body, parameters)
                .await?;
        } else {
            info!(stack = %stack_name, "stack does not exist, creating");
            self.provider
                .create_stack(stack_name, template_body, parameters)
                .await?;
        }
        Ok(wait_for_action_to_complete(&self.provider, stack_name, &self.wait_config).await?)
    }

    /// Delete the stack and block until the delete reaches a terminal
    /// outcome.
    pub async fn delete(&self, stack_name: &str) -> StackResult<ActionOutcome> {
        self.resolve_stack(stack_name).await?;
        info!(stack = %stack_name, "deleting stack");
        self.provider.delete_stack(stack_name).await?;
        Ok(wait_for_action_to_complete(&self.provider, stack_name, &self.wait_config).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use greenline_cloud::{MemoryCloud, StackResource};
    use std::time::Duration;

    fn fast_orchestrator(cloud: MemoryCloud) -> StackOrchestrator<MemoryCloud> {
        StackOrchestrator::new(cloud)
            .with_update_config(UpdateConfig {
                poll_interval: Duration::from_millis(20),
                healthy_timeout: Duration::from_millis(400),
            })
            .with_wait_config(WaitConfig {
                warmup_timeout: Duration::from_millis(400),
                lenient_look_back: Duration::from_secs(30),
                action_timeout: Duration::from_millis(400),
                poll_interval: Duration::from_millis(20),
            })
    }

    fn asg_resource(physical_id: &str) -> StackResource {
        StackResource {
            resource_type: AUTOSCALING_GROUP_RESOURCE_TYPE.to_string(),
            logical_resource_id: format!("{physical_id}-logical"),
            physical_resource_id: physical_id.to_string(),
        }
    }

    fn other_resource(physical_id: &str) -> StackResource {
        StackResource {
            resource_type: "AWS::S3::Bucket".to_string(),
            logical_resource_id: format!("{physical_id}-logical"),
            physical_resource_id: physical_id.to_string(),
        }
    }

    fn seeded_group(cloud: &MemoryCloud, name: &str) -> AutoscalingGroup {
        let group = AutoscalingGroup {
            name: name.to_string(),
            min_size: 1,
            max_size: 3,
            desired_capacity: 1,
            launch_configuration: "lc-1".to_string(),
            instances: vec![greenline_cloud::GroupInstance {
                id: format!("{name}-i-1"),
                lifecycle_state: greenline_cloud::LifecycleState::InService,
                launch_configuration: "lc-1".to_string(),
            }],
            load_balancers: vec![format!("{name}-elb")],
            suspended_processes: vec![],
        };
        cloud.add_group(group.clone());
        cloud.register_with_lb(
            &format!("{name}-elb"),
            &format!("{name}-i-1"),
            greenline_cloud::LbState::InService,
        );
        group
    }

    #[tokio::test]
    async fn missing_stack_is_a_stack_not_found_error() {
        let orchestrator = fast_orchestrator(MemoryCloud::new());
        let (_tx, mut shutdown) = watch::channel(false);

        let err = orchestrator
            .update_all_groups("ghost", &mut shutdown)
            .await
            .unwrap_err();
        assert!(matches!(err, StackError::StackNotFound(name) if name == "ghost"));
    }

    #[tokio::test]
    async fn only_autoscaling_group_resources_are_resolved() {
        let cloud = MemoryCloud::new();
        cloud.add_stack(
            Stack {
                name: "web".to_string(),
                status: "CREATE_COMPLETE".to_string(),
            },
            vec![
                asg_resource("asg-a"),
                other_resource("some-bucket"),
                asg_resource("asg-b"),
            ],
        );
        seeded_group(&cloud, "asg-a");
        seeded_group(&cloud, "asg-b");

        let orchestrator = fast_orchestrator(cloud);
        let groups = orchestrator.groups_in_stack("web").await.unwrap();
        let names: Vec<_> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["asg-a", "asg-b"]);
    }

    #[tokio::test]
    async fn converged_groups_produce_no_mutations() {
        let cloud = MemoryCloud::new();
        cloud.add_stack(
            Stack {
                name: "web".to_string(),
                status: "CREATE_COMPLETE".to_string(),
            },
            vec![asg_resource("asg-a")],
        );
        seeded_group(&cloud, "asg-a");

        let orchestrator = fast_orchestrator(cloud.clone());
        let (_tx, mut shutdown) = watch::channel(false);
        orchestrator
            .update_all_groups("web", &mut shutdown)
            .await
            .unwrap();

        assert!(cloud.mutation_log().is_empty());
    }

    #[tokio::test]
    async fn apply_template_creates_when_the_stack_is_absent() {
        let cloud = MemoryCloud::new();
        let orchestrator = fast_orchestrator(cloud.clone());

        let outcome = orchestrator
            .apply_template("fresh", "{}", &Vec::new())
            .await
            .unwrap();
        assert_eq!(outcome, ActionOutcome::Succeeded);
        assert!(cloud
            .mutation_log()
            .iter()
            .any(|m| m == "create_stack fresh"));
    }

    #[tokio::test]
    async fn apply_template_updates_when_the_stack_exists() {
        let cloud = MemoryCloud::new();
        cloud.add_stack(
            Stack {
                name: "web".to_string(),
                status: "CREATE_COMPLETE".to_string(),
            },
            vec![],
        );

        let orchestrator = fast_orchestrator(cloud.clone());
        let outcome = orchestrator
            .apply_template("web", "{}", &Vec::new())
            .await
            .unwrap();
        assert_eq!(outcome, ActionOutcome::Succeeded);
        assert!(cloud.mutation_log().iter().any(|m| m == "update_stack web"));
    }

    #[tokio::test]
    async fn failed_action_surfaces_as_a_failed_outcome() {
        let cloud = MemoryCloud::new();
        cloud.add_stack(
            Stack {
                name: "web".to_string(),
                status: "CREATE_COMPLETE".to_string(),
            },
            vec![],
        );
        cloud.fail_next_action();

        let orchestrator = fast_orchestrator(cloud);
        let outcome = orchestrator
            .apply_template("web", "{}", &Vec::new())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ActionOutcome::Failed {
                status: "ROLLBACK_COMPLETE".to_string()
            }
        );
    }

    #[tokio::test]
    async fn delete_requires_the_stack_to_exist() {
        let orchestrator = fast_orchestrator(MemoryCloud::new());
        let err = orchestrator.delete("ghost").await.unwrap_err();
        assert!(matches!(err, StackError::StackNotFound(_)));
    }

    #[tokio::test]
    async fn delete_waits_for_the_terminal_event() {
        let cloud = MemoryCloud::new();
        cloud.add_stack(
            Stack {
                name: "web".to_string(),
                status: "CREATE_COMPLETE".to_string(),
            },
            vec![],
        );

        let orchestrator = fast_orchestrator(cloud);
        let outcome = orchestrator.delete("web").await.unwrap();
        assert_eq!(outcome, ActionOutcome::Succeeded);
    }
}
