//! MemoryCloud — an in-memory implementation of all four provider traits.
//!
//! Plays the role of the real control plane in tests and in `greenline`
//! simulator runs: cheap to seed, inspectable afterwards, with just
//! enough launch and registration dynamics to exercise the convergence
//! loops for real:
//!
//! - raising a group's desired capacity launches fresh instances with
//!   the group's current launch configuration,
//! - launched instances pass their load-balancer health check after a
//!   scriptable number of polls,
//! - stack create/update/delete calls emit a progress event immediately
//!   and schedule a terminal event after a scriptable delay.
//!
//! Every mutating call is appended to a log so tests can assert that a
//! converged group produces zero provider mutations. The cloud never
//! scales in on its own: lowering desired capacity leaves instances
//! alone, termination is always explicit.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::error::{CloudError, CloudResult};
use crate::provider::{
    AutoscalingProvider, ComputeProvider, LoadBalancerProvider, StackProvider,
};
use crate::types::*;

struct StackRecord {
    stack: Stack,
    resources: Vec<StackResource>,
    events: Vec<StackEvent>,
    /// Events that become visible once the wall clock passes their key.
    scheduled: Vec<(u64, StackEvent)>,
}

/// Per-instance load-balancer health script: the instance reports
/// `final_state` once `remaining_polls` health checks have elapsed,
/// `OutOfService` until then.
struct HealthScript {
    remaining_polls: u32,
    final_state: LbState,
}

#[derive(Default)]
struct CloudState {
    stacks: HashMap<String, StackRecord>,
    groups: HashMap<String, AutoscalingGroup>,
    compute: HashMap<InstanceId, ComputeInstanceView>,
    lb_members: HashMap<String, Vec<InstanceId>>,
    health: HashMap<InstanceId, HealthScript>,
    terminated: Vec<InstanceId>,
    mutations: Vec<String>,
    launch_seq: u64,
    new_instance_image: Option<String>,
    launch_delay_polls: u32,
    launch_final_state: Option<LbState>,
    action_duration_ms: u64,
    fail_next_action: bool,
}

/// Cloneable handle to a shared in-memory cloud.
#[derive(Clone, Default)]
pub struct MemoryCloud {
    inner: Arc<Mutex<CloudState>>,
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, CloudState> {
        // A poisoned lock only means a test panicked mid-call; the state
        // itself stays usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Seeding ────────────────────────────────────────────────────

    pub fn add_stack(&self, stack: Stack, resources: Vec<StackResource>) {
        let name = stack.name.clone();
        self.state().stacks.insert(
            name,
            StackRecord {
                stack,
                resources,
                events: Vec::new(),
                scheduled: Vec::new(),
            },
        );
    }

    pub fn add_group(&self, group: AutoscalingGroup) {
        self.state().groups.insert(group.name.clone(), group);
    }

    pub fn set_compute_image(&self, instance_id: &str, image_id: &str) {
        self.state().compute.insert(
            instance_id.to_string(),
            ComputeInstanceView {
                id: instance_id.to_string(),
                image_id: image_id.to_string(),
            },
        );
    }

    /// Register an instance behind a load balancer with a fixed state.
    pub fn register_with_lb(&self, lb_name: &str, instance_id: &str, state: LbState) {
        let mut s = self.state();
        s.lb_members
            .entry(lb_name.to_string())
            .or_default()
            .push(instance_id.to_string());
        s.health.insert(
            instance_id.to_string(),
            HealthScript {
                remaining_polls: 0,
                final_state: state,
            },
        );
    }

    /// Script an instance to report `final_state` on the nth health
    /// poll, `OutOfService` before that.
    pub fn set_health_after_polls(&self, instance_id: &str, polls: u32, final_state: LbState) {
        self.state().health.insert(
            instance_id.to_string(),
            HealthScript {
                remaining_polls: polls,
                final_state,
            },
        );
    }

    pub fn append_event(&self, stack_name: &str, event: StackEvent) {
        if let Some(record) = self.state().stacks.get_mut(stack_name) {
            record.events.push(event);
        }
    }

    /// Make an event visible `delay_ms` from now.
    pub fn schedule_event(&self, stack_name: &str, delay_ms: u64, event: StackEvent) {
        if let Some(record) = self.state().stacks.get_mut(stack_name) {
            record.scheduled.push((epoch_ms() + delay_ms, event));
        }
    }

    /// Image id given to instances the cloud launches on scale-out.
    pub fn set_new_instance_image(&self, image_id: &str) {
        self.state().new_instance_image = Some(image_id.to_string());
    }

    /// Health script applied to instances the cloud launches on
    /// scale-out: healthy (or `final_state`) after `polls` checks.
    pub fn set_launch_health(&self, polls: u32, final_state: LbState) {
        let mut s = self.state();
        s.launch_delay_polls = polls;
        s.launch_final_state = Some(final_state);
    }

    /// Delay between a stack action's progress event and its terminal event.
    pub fn set_action_duration_ms(&self, ms: u64) {
        self.state().action_duration_ms = ms;
    }

    /// Make the next stack action end in `ROLLBACK_COMPLETE` instead of
    /// its success status.
    pub fn fail_next_action(&self) {
        self.state().fail_next_action = true;
    }

    // ── Inspection ─────────────────────────────────────────────────

    pub fn mutation_log(&self) -> Vec<String> {
        self.state().mutations.clone()
    }

    pub fn terminated_instances(&self) -> Vec<InstanceId> {
        self.state().terminated.clone()
    }

    pub fn group(&self, name: &str) -> Option<AutoscalingGroup> {
        let s = self.state();
        s.groups.get(name).map(|g| effective_group(&s, g))
    }

    // ── Internals ──────────────────────────────────────────────────

    fn record_action(&self, stack_name: &str, verb: &str) -> CloudResult<()> {
        let mut s = self.state();
        let now = epoch_ms();
        let duration = s.action_duration_ms;
        let failed = std::mem::take(&mut s.fail_next_action);
        let record = s
            .stacks
            .get_mut(stack_name)
            .ok_or_else(|| CloudError::StackNotFound(stack_name.to_string()))?;
        record
            .events
            .push(StackEvent::on_stack(stack_name, &format!("{verb}_IN_PROGRESS"), now));
        let terminal = if failed {
            "ROLLBACK_COMPLETE".to_string()
        } else {
            format!("{verb}_COMPLETE")
        };
        record
            .scheduled
            .push((now + duration, StackEvent::on_stack(stack_name, &terminal, now + duration)));
        debug!(stack = %stack_name, action = %verb, duration_ms = duration, "stack action recorded");
        Ok(())
    }
}

/// Launched instances report `Pending` until their health script has
/// run out, `InService` afterwards; seeded instances keep whatever
/// lifecycle they were seeded with.
fn effective_lifecycle(state: &CloudState, instance: &GroupInstance) -> LifecycleState {
    if instance.lifecycle_state != LifecycleState::Pending {
        return instance.lifecycle_state;
    }
    match state.health.get(&instance.id) {
        Some(script) if script.remaining_polls == 0 && script.final_state == LbState::InService => {
            LifecycleState::InService
        }
        _ => LifecycleState::Pending,
    }
}

fn effective_group(state: &CloudState, group: &AutoscalingGroup) -> AutoscalingGroup {
    let mut group = group.clone();
    for instance in &mut group.instances {
        instance.lifecycle_state = effective_lifecycle(state, instance);
    }
    group
}

impl StackProvider for MemoryCloud {
    async fn describe_stack(&self, name: &str) -> CloudResult<Option<Stack>> {
        Ok(self.state().stacks.get(name).map(|r| r.stack.clone()))
    }

    async fn describe_resources(&self, stack: &Stack) -> CloudResult<Vec<StackResource>> {
        let s = self.state();
        let record = s
            .stacks
            .get(&stack.name)
            .ok_or_else(|| CloudError::StackNotFound(stack.name.clone()))?;
        Ok(record.resources.clone())
    }

    async fn describe_events(&self, stack: &Stack) -> CloudResult<Vec<StackEvent>> {
        let s = self.state();
        let record = s
            .stacks
            .get(&stack.name)
            .ok_or_else(|| CloudError::StackNotFound(stack.name.clone()))?;
        let now = epoch_ms();
        let mut events = record.events.clone();
        events.extend(
            record
                .scheduled
                .iter()
                .filter(|(visible_at, _)| *visible_at <= now)
                .map(|(_, event)| event.clone()),
        );
        Ok(events)
    }

    async fn create_stack(
        &self,
        name: &str,
        _template_body: &str,
        _parameters: &TemplateParameters,
    ) -> CloudResult<()> {
        {
            let mut s = self.state();
            s.mutations.push(format!("create_stack {name}"));
            s.stacks.entry(name.to_string()).or_insert_with(|| StackRecord {
                stack: Stack {
                    name: name.to_string(),
                    status: "CREATE_IN_PROGRESS".to_string(),
                },
                resources: Vec::new(),
                events: Vec::new(),
                scheduled: Vec::new(),
            });
        }
        self.record_action(name, "CREATE")
    }

    async fn update_stack(
        &self,
        name: &str,
        _template_body: &str,
        _parameters: &TemplateParameters,
    ) -> CloudResult<()> {
        self.state().mutations.push(format!("update_stack {name}"));
        self.record_action(name, "UPDATE")
    }

    async fn delete_stack(&self, name: &str) -> CloudResult<()> {
        self.state().mutations.push(format!("delete_stack {name}"));
        self.record_action(name, "DELETE")
    }
}

impl AutoscalingProvider for MemoryCloud {
    async fn get_groups(&self, names: &[String]) -> CloudResult<Vec<AutoscalingGroup>> {
        let s = self.state();
        Ok(names
            .iter()
            .filter_map(|name| s.groups.get(name))
            .map(|g| effective_group(&s, g))
            .collect())
    }

    async fn update_group(&self, group: &AutoscalingGroup) -> CloudResult<()> {
        let mut s = self.state();
        s.mutations.push(format!("update_group {}", group.name));
        let stored = s
            .groups
            .get_mut(&group.name)
            .ok_or_else(|| CloudError::GroupNotFound(group.name.clone()))?;
        stored.min_size = group.min_size;
        stored.max_size = group.max_size;
        stored.desired_capacity = group.desired_capacity;

        // Launch dynamics: bring the fleet up to desired capacity with
        // fresh instances on the group's current launch configuration.
        let missing = group
            .desired_capacity
            .saturating_sub(stored.instances.len() as u32);
        let launch_configuration = stored.launch_configuration.clone();
        let load_balancers = stored.load_balancers.clone();
        let group_name = stored.name.clone();
        let mut launched = Vec::new();
        for _ in 0..missing {
            s.launch_seq += 1;
            let id = format!("i-sim-{:04}", s.launch_seq);
            launched.push(GroupInstance {
                id: id.clone(),
                lifecycle_state: LifecycleState::Pending,
                launch_configuration: launch_configuration.clone(),
            });
            let image = s
                .new_instance_image
                .clone()
                .unwrap_or_else(|| "image-new".to_string());
            s.compute.insert(
                id.clone(),
                ComputeInstanceView {
                    id: id.clone(),
                    image_id: image,
                },
            );
            for lb in &load_balancers {
                s.lb_members.entry(lb.clone()).or_default().push(id.clone());
            }
            let script = HealthScript {
                remaining_polls: s.launch_delay_polls,
                final_state: s.launch_final_state.unwrap_or(LbState::InService),
            };
            s.health.insert(id.clone(), script);
            debug!(group = %group_name, instance = %id, "launched instance");
        }
        if let Some(stored) = s.groups.get_mut(&group.name) {
            stored.instances.extend(launched);
        }
        Ok(())
    }

    async fn suspend_processes(&self, group_name: &str) -> CloudResult<()> {
        let mut s = self.state();
        s.mutations.push(format!("suspend_processes {group_name}"));
        let group = s
            .groups
            .get_mut(group_name)
            .ok_or_else(|| CloudError::GroupNotFound(group_name.to_string()))?;
        group.suspended_processes = ScalingProcess::ALL.to_vec();
        Ok(())
    }

    async fn resume_processes(
        &self,
        group_name: &str,
        subset: Option<&[ScalingProcess]>,
    ) -> CloudResult<()> {
        let mut s = self.state();
        s.mutations.push(format!("resume_processes {group_name}"));
        let group = s
            .groups
            .get_mut(group_name)
            .ok_or_else(|| CloudError::GroupNotFound(group_name.to_string()))?;
        match subset {
            Some(processes) => {
                group
                    .suspended_processes
                    .retain(|p| !processes.contains(p));
            }
            None => group.suspended_processes.clear(),
        }
        Ok(())
    }

    async fn get_autoscaling_instances(
        &self,
        ids: &[InstanceId],
    ) -> CloudResult<Vec<AutoscalingInstanceView>> {
        let s = self.state();
        let mut views = Vec::new();
        for group in s.groups.values() {
            for instance in &group.instances {
                if ids.contains(&instance.id) {
                    views.push(AutoscalingInstanceView {
                        id: instance.id.clone(),
                        group_name: group.name.clone(),
                        lifecycle_state: effective_lifecycle(&s, instance),
                        launch_configuration: instance.launch_configuration.clone(),
                    });
                }
            }
        }
        Ok(views)
    }
}

impl ComputeProvider for MemoryCloud {
    async fn get_instances(&self, ids: &[InstanceId]) -> CloudResult<Vec<ComputeInstanceView>> {
        let s = self.state();
        Ok(ids.iter().filter_map(|id| s.compute.get(id)).cloned().collect())
    }

    async fn terminate_instances(&self, ids: &[InstanceId]) -> CloudResult<()> {
        let mut s = self.state();
        s.mutations
            .push(format!("terminate_instances {}", ids.join(" ")));
        for id in ids {
            for group in s.groups.values_mut() {
                group.instances.retain(|i| &i.id != id);
            }
            for members in s.lb_members.values_mut() {
                members.retain(|member| member != id);
            }
            s.compute.remove(id);
            s.health.remove(id);
            s.terminated.push(id.clone());
        }
        Ok(())
    }
}

impl LoadBalancerProvider for MemoryCloud {
    async fn describe_instance_health(
        &self,
        lb_name: &str,
    ) -> CloudResult<Vec<InstanceHealth>> {
        let mut s = self.state();
        let members = s.lb_members.get(lb_name).cloned().unwrap_or_default();
        let mut health = Vec::new();
        for id in members {
            let state = match s.health.get_mut(&id) {
                Some(script) => {
                    if script.remaining_polls > 0 {
                        script.remaining_polls -= 1;
                    }
                    if script.remaining_polls == 0 {
                        script.final_state
                    } else {
                        LbState::OutOfService
                    }
                }
                None => LbState::Unknown,
            };
            health.push(InstanceHealth {
                instance_id: id,
                state,
            });
        }
        Ok(health)
    }
}
