//! Domain types observed through the cloud provider APIs.
//!
//! These are read models: greenline recomputes them fresh on every poll
//! and never persists them. The only state the system owns is what the
//! cloud reports back.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Unique identifier of a compute instance.
pub type InstanceId = String;

/// Opaque version marker for the instance template an autoscaling group
/// launches from. Equality with the group's current marker is the only
/// operation greenline performs on it.
pub type LaunchConfigId = String;

// ── Autoscaling ────────────────────────────────────────────────────

/// A cloud autoscaling group as reported by the autoscaling API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutoscalingGroup {
    pub name: String,
    pub min_size: u32,
    pub max_size: u32,
    pub desired_capacity: u32,
    pub launch_configuration: LaunchConfigId,
    pub instances: Vec<GroupInstance>,
    /// Names of the load balancers the group registers instances with.
    pub load_balancers: Vec<String>,
    pub suspended_processes: Vec<ScalingProcess>,
}

/// Membership entry for one instance inside an autoscaling group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupInstance {
    pub id: InstanceId,
    pub lifecycle_state: LifecycleState,
    pub launch_configuration: LaunchConfigId,
}

/// Instance lifecycle as reported by the autoscaling API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    Pending,
    InService,
    Rebooting,
    Terminating,
    OutOfService,
    Unknown,
}

impl LifecycleState {
    /// States in which an instance serves traffic now or may soon.
    pub fn is_running(self) -> bool {
        matches!(self, Self::Pending | Self::InService | Self::Rebooting)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::InService => "InService",
            Self::Rebooting => "Rebooting",
            Self::Terminating => "Terminating",
            Self::OutOfService => "OutOfService",
            Self::Unknown => "Unknown",
        }
    }
}

/// Automation processes an autoscaling group runs on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalingProcess {
    Launch,
    Terminate,
    HealthCheck,
    AddToLoadBalancer,
    ReplaceUnhealthy,
    AlarmNotification,
    ScheduledActions,
    AzRebalance,
}

impl ScalingProcess {
    /// Every process type a group can suspend.
    pub const ALL: [ScalingProcess; 8] = [
        Self::Launch,
        Self::Terminate,
        Self::HealthCheck,
        Self::AddToLoadBalancer,
        Self::ReplaceUnhealthy,
        Self::AlarmNotification,
        Self::ScheduledActions,
        Self::AzRebalance,
    ];
}

/// Partial observation of one instance through the autoscaling API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutoscalingInstanceView {
    pub id: InstanceId,
    pub group_name: String,
    pub lifecycle_state: LifecycleState,
    pub launch_configuration: LaunchConfigId,
}

/// Partial observation of one instance through the raw compute API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComputeInstanceView {
    pub id: InstanceId,
    pub image_id: String,
}

/// Health of one instance as seen by a load balancer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceHealth {
    pub instance_id: InstanceId,
    pub state: LbState,
}

/// Registration state of an instance behind a load balancer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LbState {
    InService,
    OutOfService,
    Unknown,
}

impl LbState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InService => "InService",
            Self::OutOfService => "OutOfService",
            Self::Unknown => "Unknown",
        }
    }
}

// ── Stacks ─────────────────────────────────────────────────────────

/// Resource type denoting an autoscaling group in stack resource listings.
pub const AUTOSCALING_GROUP_RESOURCE_TYPE: &str = "AWS::AutoScaling::AutoScalingGroup";

/// Resource type of the stack itself in its own event history.
pub const STACK_RESOURCE_TYPE: &str = "AWS::CloudFormation::Stack";

/// Terminal statuses that count as success for a stack action.
pub const SUCCESSFUL_TERMINAL_STATUSES: [&str; 3] =
    ["CREATE_COMPLETE", "UPDATE_COMPLETE", "DELETE_COMPLETE"];

/// Handle to a deployed infrastructure stack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stack {
    pub name: String,
    pub status: String,
}

/// One managed resource inside a stack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackResource {
    pub resource_type: String,
    pub logical_resource_id: String,
    pub physical_resource_id: String,
}

/// One entry of a stack's append-only event history.
///
/// Events are replayable and unbounded; iteration order out of the
/// provider is not guaranteed chronological.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackEvent {
    /// Provider-issued wall-clock timestamp, epoch milliseconds.
    pub timestamp_ms: u64,
    pub resource_type: String,
    pub resource_status: String,
    pub logical_resource_id: String,
    pub physical_resource_id: String,
    pub status_reason: Option<String>,
}

impl StackEvent {
    /// Event on the stack resource itself, the shape both the waiter
    /// and the in-memory cloud deal in.
    pub fn on_stack(stack_name: &str, status: &str, timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms,
            resource_type: STACK_RESOURCE_TYPE.to_string(),
            resource_status: status.to_string(),
            logical_resource_id: stack_name.to_string(),
            physical_resource_id: format!("{stack_name}-phys"),
            status_reason: None,
        }
    }

    /// An in-progress event on the stack resource itself. Any such
    /// event marks the start of an asynchronous stack action.
    pub fn is_stack_progress(&self) -> bool {
        self.resource_type == STACK_RESOURCE_TYPE
            && self.resource_status.ends_with("_PROGRESS")
    }

    /// A terminal event on the stack resource itself. Success and
    /// failure statuses both count as terminal.
    pub fn is_stack_terminal(&self) -> bool {
        self.resource_type == STACK_RESOURCE_TYPE
            && self.resource_status.ends_with("_COMPLETE")
    }

    /// Whether a terminal status is in the success set.
    pub fn is_successful_status(&self) -> bool {
        SUCCESSFUL_TERMINAL_STATUSES.contains(&self.resource_status.as_str())
    }
}

/// Key/value template parameters passed on stack create and update.
pub type TemplateParameters = Vec<(String, String)>;

/// Current wall-clock time in epoch milliseconds. Event timestamps are
/// provider-issued wall time, so watermark arithmetic uses this clock;
/// loop deadlines elsewhere use the monotonic clock instead.
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
