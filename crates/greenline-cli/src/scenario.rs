//! Scenario files — TOML seed data for the in-memory cloud.
//!
//! A scenario describes the stacks, autoscaling groups, and instance
//! observations the simulated cloud starts out with, plus the knobs
//! that shape its dynamics (launch health delay, action duration). The
//! CLI builds a [`MemoryCloud`] from it and runs the real control loops
//! against that.

use std::path::Path;

use serde::Deserialize;

use greenline_cloud::{
    AutoscalingGroup, GroupInstance, LbState, LifecycleState, MemoryCloud, Stack, StackResource,
};

#[derive(Debug, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub cloud: CloudSettings,
    #[serde(default)]
    pub stacks: Vec<StackSeed>,
    #[serde(default)]
    pub groups: Vec<GroupSeed>,
}

/// Knobs shaping the simulated cloud's dynamics.
#[derive(Debug, Default, Deserialize)]
pub struct CloudSettings {
    /// Image id reported for instances the cloud launches on scale-out.
    pub new_instance_image: Option<String>,
    /// Health polls a launched instance needs before reporting InService.
    #[serde(default)]
    pub launch_delay_polls: u32,
    /// Delay between a stack action's progress and terminal events.
    #[serde(default)]
    pub action_duration_ms: u64,
    /// Make the next stack action end in ROLLBACK_COMPLETE.
    #[serde(default)]
    pub fail_next_action: bool,
}

#[derive(Debug, Deserialize)]
pub struct StackSeed {
    pub name: String,
    #[serde(default = "default_stack_status")]
    pub status: String,
    #[serde(default)]
    pub resources: Vec<ResourceSeed>,
}

fn default_stack_status() -> String {
    "CREATE_COMPLETE".to_string()
}

#[derive(Debug, Deserialize)]
pub struct ResourceSeed {
    pub resource_type: String,
    pub physical_resource_id: String,
    pub logical_resource_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GroupSeed {
    pub name: String,
    pub min_size: u32,
    pub max_size: u32,
    pub desired_capacity: u32,
    pub launch_configuration: String,
    #[serde(default)]
    pub load_balancers: Vec<String>,
    #[serde(default)]
    pub instances: Vec<InstanceSeed>,
}

#[derive(Debug, Deserialize)]
pub struct InstanceSeed {
    pub id: String,
    pub launch_configuration: String,
    #[serde(default = "default_lifecycle")]
    pub lifecycle_state: LifecycleState,
    /// Image id reported by the compute API, when observed there.
    pub image_id: Option<String>,
    /// Registration state behind the group's load balancers. Absent
    /// means the load balancer has not reported the instance yet.
    pub lb_state: Option<LbState>,
    /// Health polls before the instance reports its `lb_state`.
    pub healthy_after_polls: Option<u32>,
}

fn default_lifecycle() -> LifecycleState {
    LifecycleState::InService
}

impl Scenario {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::load_from_str(&raw)
    }

    /// Parse and validate a scenario from a string.
    pub fn load_from_str(raw: &str) -> anyhow::Result<Self> {
        let scenario: Scenario = toml::from_str(raw)?;
        scenario.validate()?;
        Ok(scenario)
    }

    fn validate(&self) -> anyhow::Result<()> {
        for stack in &self.stacks {
            anyhow::ensure!(!stack.name.is_empty(), "stack name must be non-empty");
        }
        for group in &self.groups {
            anyhow::ensure!(!group.name.is_empty(), "group name must be non-empty");
            anyhow::ensure!(
                group.min_size <= group.max_size,
                "group {}: min_size {} exceeds max_size {}",
                group.name,
                group.min_size,
                group.max_size
            );
            anyhow::ensure!(
                (group.min_size..=group.max_size).contains(&group.desired_capacity),
                "group {}: desired_capacity {} outside [{}, {}]",
                group.name,
                group.desired_capacity,
                group.min_size,
                group.max_size
            );
            for instance in &group.instances {
                anyhow::ensure!(
                    !instance.id.is_empty(),
                    "group {}: instance id must be non-empty",
                    group.name
                );
            }
        }
        Ok(())
    }

    /// Seed a fresh in-memory cloud from this scenario.
    pub fn build(&self) -> MemoryCloud {
        let cloud = MemoryCloud::new();

        if let Some(ref image) = self.cloud.new_instance_image {
            cloud.set_new_instance_image(image);
        }
        cloud.set_launch_health(self.cloud.launch_delay_polls, LbState::InService);
        cloud.set_action_duration_ms(self.cloud.action_duration_ms);
        if self.cloud.fail_next_action {
            cloud.fail_next_action();
        }

        for stack in &self.stacks {
            let resources = stack
                .resources
                .iter()
                .map(|r| StackResource {
                    resource_type: r.resource_type.clone(),
                    logical_resource_id: r
                        .logical_resource_id
                        .clone()
                        .unwrap_or_else(|| r.physical_resource_id.clone()),
                    physical_resource_id: r.physical_resource_id.clone(),
                })
                .collect();
            cloud.add_stack(
                Stack {
                    name: stack.name.clone(),
                    status: stack.status.clone(),
                },
                resources,
            );
        }

        for group in &self.groups {
            for instance in &group.instances {
                if let Some(ref image) = instance.image_id {
                    cloud.set_compute_image(&instance.id, image);
                }
                if let Some(state) = instance.lb_state {
                    for lb in &group.load_balancers {
                        cloud.register_with_lb(lb, &instance.id, state);
                    }
                    if let Some(polls) = instance.healthy_after_polls {
                        cloud.set_health_after_polls(&instance.id, polls, state);
                    }
                }
            }
            cloud.add_group(AutoscalingGroup {
                name: group.name.clone(),
                min_size: group.min_size,
                max_size: group.max_size,
                desired_capacity: group.desired_capacity,
                launch_configuration: group.launch_configuration.clone(),
                instances: group
                    .instances
                    .iter()
                    .map(|i| GroupInstance {
                        id: i.id.clone(),
                        lifecycle_state: i.lifecycle_state,
                        launch_configuration: i.launch_configuration.clone(),
                    })
                    .collect(),
                load_balancers: group.load_balancers.clone(),
                suspended_processes: vec![],
            });
        }

        cloud
    }
}
