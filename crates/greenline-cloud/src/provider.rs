//! Provider traits for the four cloud collaborators.
//!
//! Each collaborator is injected at construction, so every control loop
//! can be driven against [`crate::MemoryCloud`] in tests and simulator
//! runs without patching global state. The traits mirror the thin call
//! contracts the control loops depend on and nothing more; pagination,
//! retries, and authentication belong to the implementations.

use crate::error::CloudResult;
use crate::types::*;

/// Stack API: describe stacks, mutate them, and read their event history.
#[allow(async_fn_in_trait)]
pub trait StackProvider {
    /// Resolve a stack by name. `None` means the stack does not exist,
    /// which is a normal condition while a create is still propagating.
    async fn describe_stack(&self, name: &str) -> CloudResult<Option<Stack>>;

    /// List the managed resources of a stack.
    async fn describe_resources(&self, stack: &Stack) -> CloudResult<Vec<StackResource>>;

    /// Full event history of a stack. Iteration order is provider-defined
    /// and not guaranteed chronological.
    async fn describe_events(&self, stack: &Stack) -> CloudResult<Vec<StackEvent>>;

    async fn create_stack(
        &self,
        name: &str,
        template_body: &str,
        parameters: &TemplateParameters,
    ) -> CloudResult<()>;

    async fn update_stack(
        &self,
        name: &str,
        template_body: &str,
        parameters: &TemplateParameters,
    ) -> CloudResult<()>;

    async fn delete_stack(&self, name: &str) -> CloudResult<()>;
}

/// Autoscaling API: group state, sizing, and automation processes.
#[allow(async_fn_in_trait)]
pub trait AutoscalingProvider {
    /// Fetch groups by name. Unknown names are silently absent from the
    /// result, matching the cloud API.
    async fn get_groups(&self, names: &[String]) -> CloudResult<Vec<AutoscalingGroup>>;

    /// Persist the sizing fields of a locally mutated group.
    async fn update_group(&self, group: &AutoscalingGroup) -> CloudResult<()>;

    /// Suspend all automation processes on a group.
    async fn suspend_processes(&self, group_name: &str) -> CloudResult<()>;

    /// Resume automation processes on a group. `None` resumes all of them.
    async fn resume_processes(
        &self,
        group_name: &str,
        subset: Option<&[ScalingProcess]>,
    ) -> CloudResult<()>;

    /// Autoscaling-side views of the given instances.
    async fn get_autoscaling_instances(
        &self,
        ids: &[InstanceId],
    ) -> CloudResult<Vec<AutoscalingInstanceView>>;
}

/// Raw compute API: instance descriptors and termination.
#[allow(async_fn_in_trait)]
pub trait ComputeProvider {
    async fn get_instances(&self, ids: &[InstanceId]) -> CloudResult<Vec<ComputeInstanceView>>;

    async fn terminate_instances(&self, ids: &[InstanceId]) -> CloudResult<()>;
}

/// Load balancer API: per-instance registration health.
#[allow(async_fn_in_trait)]
pub trait LoadBalancerProvider {
    async fn describe_instance_health(
        &self,
        lb_name: &str,
    ) -> CloudResult<Vec<InstanceHealth>>;
}
