//! Merged per-instance views across the three observation APIs.
//!
//! An instance only counts as rolled out once two independent sources
//! agree: the autoscaling API says it runs the group's current launch
//! configuration, and the load balancer reports it `InService`. A
//! missing load-balancer observation means the instance has not
//! qualified yet — it is never an error.

use std::collections::BTreeMap;

use tracing::info;

use greenline_cloud::{
    AutoscalingGroup, AutoscalingInstanceView, AutoscalingProvider, CloudResult,
    ComputeInstanceView, ComputeProvider, InstanceHealth, InstanceId, LaunchConfigId, LbState,
    LoadBalancerProvider,
};

/// One instance as observed through up to three APIs. Recomputed fresh
/// on every poll; never persisted.
#[derive(Debug, Clone, Default)]
pub struct InstanceView {
    pub autoscaling: Option<AutoscalingInstanceView>,
    pub compute: Option<ComputeInstanceView>,
    pub lb: Option<InstanceHealth>,
}

impl InstanceView {
    /// Up to date and healthy: on the current launch configuration and
    /// in service behind the load balancer.
    pub fn is_up_to_date(&self, current: &LaunchConfigId) -> bool {
        let on_current = self
            .autoscaling
            .as_ref()
            .is_some_and(|view| &view.launch_configuration == current);
        let in_service = self
            .lb
            .as_ref()
            .is_some_and(|health| health.state == LbState::InService);
        on_current && in_service
    }
}

/// Merge autoscaling, compute, and load-balancer observations for every
/// instance of the group, keyed by instance id.
pub async fn collect_views<P>(
    provider: &P,
    group: &AutoscalingGroup,
) -> CloudResult<BTreeMap<InstanceId, InstanceView>>
where
    P: AutoscalingProvider + ComputeProvider + LoadBalancerProvider,
{
    let ids: Vec<InstanceId> = group.instances.iter().map(|i| i.id.clone()).collect();

    let mut views: BTreeMap<InstanceId, InstanceView> = BTreeMap::new();
    for view in provider.get_autoscaling_instances(&ids).await? {
        let id = view.id.clone();
        views.entry(id).or_default().autoscaling = Some(view);
    }
    for view in provider.get_instances(&ids).await? {
        let id = view.id.clone();
        views.entry(id).or_default().compute = Some(view);
    }
    for lb_name in &group.load_balancers {
        for health in provider.describe_instance_health(lb_name).await? {
            let id = health.instance_id.clone();
            views
                .entry(id)
                .or_default()
                .lb = Some(health);
        }
    }
    Ok(views)
}

/// Instances that serve traffic now or may soon.
pub fn count_running(group: &AutoscalingGroup) -> usize {
    group
        .instances
        .iter()
        .filter(|instance| instance.lifecycle_state.is_running())
        .count()
}

/// Instances satisfying the up-to-date-and-healthy invariant.
pub fn count_up_to_date(
    views: &BTreeMap<InstanceId, InstanceView>,
    current: &LaunchConfigId,
) -> usize {
    views.values().filter(|view| view.is_up_to_date(current)).count()
}

/// One log line per instance with its three observations, `?` where an
/// API has not reported the instance.
pub fn log_views(views: &BTreeMap<InstanceId, InstanceView>) {
    for (id, view) in views {
        info!(
            instance = %id,
            image = view
                .compute
                .as_ref()
                .map_or("?", |c| c.image_id.as_str()),
            launch_configuration = view
                .autoscaling
                .as_ref()
                .map_or("?", |a| a.launch_configuration.as_str()),
            lb_state = view.lb.as_ref().map_or("?", |h| h.state.as_str()),
            "instance status"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use greenline_cloud::{GroupInstance, LifecycleState};

    fn group_with_states(states: &[LifecycleState]) -> AutoscalingGroup {
        AutoscalingGroup {
            name: "any-asg".to_string(),
            min_size: 0,
            max_size: 10,
            desired_capacity: 0,
            launch_configuration: "lc-current".to_string(),
            instances: states
                .iter()
                .enumerate()
                .map(|(i, state)| GroupInstance {
                    id: format!("i-{i}"),
                    lifecycle_state: *state,
                    launch_configuration: "lc-current".to_string(),
                })
                .collect(),
            load_balancers: vec![],
            suspended_processes: vec![],
        }
    }

    fn view(launch_configuration: Option<&str>, lb_state: Option<LbState>) -> InstanceView {
        InstanceView {
            autoscaling: launch_configuration.map(|lc| AutoscalingInstanceView {
                id: "i".to_string(),
                group_name: "any-asg".to_string(),
                lifecycle_state: LifecycleState::InService,
                launch_configuration: lc.to_string(),
            }),
            compute: None,
            lb: lb_state.map(|state| InstanceHealth {
                instance_id: "i".to_string(),
                state,
            }),
        }
    }

    #[test]
    fn running_count_spans_exactly_the_running_states() {
        let group = group_with_states(&[
            LifecycleState::Pending,
            LifecycleState::InService,
            LifecycleState::Rebooting,
            LifecycleState::Unknown,
            LifecycleState::Terminating,
            LifecycleState::OutOfService,
        ]);
        assert_eq!(count_running(&group), 3);
    }

    #[test]
    fn up_to_date_needs_current_launch_config_and_in_service() {
        let current = "lc-current".to_string();
        let cases: Vec<(InstanceView, bool)> = vec![
            (view(Some("lc-current"), Some(LbState::InService)), true),
            (view(Some("lc-current"), Some(LbState::InService)), true),
            (view(Some("lc-current"), Some(LbState::OutOfService)), false),
            // Current launch config but no load-balancer observation yet.
            (view(Some("lc-current"), None), false),
            (view(Some("lc-old"), Some(LbState::OutOfService)), false),
            (view(Some("lc-old"), Some(LbState::InService)), false),
        ];

        let views: BTreeMap<InstanceId, InstanceView> = cases
            .iter()
            .enumerate()
            .map(|(i, (view, _))| (format!("i-{i}"), view.clone()))
            .collect();
        assert_eq!(count_up_to_date(&views, &current), 2);

        for (view, expected) in cases {
            assert_eq!(view.is_up_to_date(&current), expected);
        }
    }

    #[test]
    fn instance_without_autoscaling_view_is_not_up_to_date() {
        let orphan = view(None, Some(LbState::InService));
        assert!(!orphan.is_up_to_date(&"lc-current".to_string()));
    }
}
