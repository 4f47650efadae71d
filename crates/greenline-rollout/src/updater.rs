//! The rolling-update state machine for one autoscaling group.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use greenline_cloud::{
    AutoscalingGroup, AutoscalingProvider, CloudError, ComputeProvider, InstanceId,
    LoadBalancerProvider, ScalingProcess,
};

use crate::view::{collect_views, count_running, count_up_to_date, log_views};

/// Automation processes left active during a rolling update: the group
/// must still launch, health-check, and register the replacement fleet,
/// while scheduled scaling and rebalancing must not interfere.
pub const KEEP_ACTIVE_PROCESSES: [ScalingProcess; 4] = [
    ScalingProcess::Launch,
    ScalingProcess::Terminate,
    ScalingProcess::HealthCheck,
    ScalingProcess::AddToLoadBalancer,
];

/// Pacing and deadline knobs for one update call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Sleep between convergence polls.
    pub poll_interval: Duration,
    /// Deadline for the replacement fleet to become healthy.
    pub healthy_timeout: Duration,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            healthy_timeout: Duration::from_secs(600),
        }
    }
}

/// Group sizing captured at scale-out entry and consumed once by commit
/// or rollback. One snapshot per update call; never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizingSnapshot {
    pub min_size: u32,
    pub max_size: u32,
    pub desired_capacity: u32,
}

impl SizingSnapshot {
    pub fn of(group: &AutoscalingGroup) -> Self {
        Self {
            min_size: group.min_size,
            max_size: group.max_size,
            desired_capacity: group.desired_capacity,
        }
    }
}

/// Checkpoint notifications emitted during an update.
///
/// Observers may return an error to abort the update; the abort routes
/// through the same rollback path as any other mid-flight failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    ScaleOutCompleted,
}

/// Callback sink for [`LifecycleEvent`]s.
pub type UpdateObserver = Box<dyn Fn(LifecycleEvent) -> anyhow::Result<()> + Send + Sync>;

/// Errors of one rolling-update run.
#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("autoscaling group not found: {0}")]
    GroupNotFound(String),

    #[error("timed out waiting for instances in group {group} to become healthy after {waited_secs}s")]
    HealthTimeout { group: String, waited_secs: u64 },

    #[error("update of group {group} rolled back: {cause}")]
    RolledBack {
        group: String,
        #[source]
        cause: Box<RolloutError>,
    },

    /// A shutdown signal arrived mid-update. Rollback has already run;
    /// the error propagates unwrapped so caller-side interruption
    /// handling still fires.
    #[error("update interrupted by shutdown signal")]
    Interrupted,

    #[error("observer aborted the update: {0}")]
    ObserverAbort(#[source] anyhow::Error),

    #[error(transparent)]
    Cloud(#[from] CloudError),
}

pub type RolloutResult<T> = Result<T, RolloutError>;

/// Drives one autoscaling group through a blue/green rolling update.
///
/// There is no guard against another operator mutating the same group
/// concurrently; running two updates against one group at the same time
/// is undefined. Use one updater per update call.
pub struct GroupUpdater<'a, P>
where
    P: AutoscalingProvider + ComputeProvider + LoadBalancerProvider,
{
    provider: &'a P,
    group: AutoscalingGroup,
    config: UpdateConfig,
    observer: Option<UpdateObserver>,
}

impl<'a, P> GroupUpdater<'a, P>
where
    P: AutoscalingProvider + ComputeProvider + LoadBalancerProvider,
{
    pub fn new(provider: &'a P, group: AutoscalingGroup) -> Self {
        Self {
            provider,
            group,
            config: UpdateConfig::default(),
            observer: None,
        }
    }

    pub fn with_config(mut self, config: UpdateConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_observer(mut self, observer: UpdateObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Run the update to completion.
    ///
    /// A converged group is a no-op. Any failure between scale-out and
    /// convergence triggers rollback and surfaces as
    /// [`RolloutError::RolledBack`], except a shutdown signal, which
    /// still rolls back but propagates as [`RolloutError::Interrupted`].
    pub async fn run(&mut self, shutdown: &mut watch::Receiver<bool>) -> RolloutResult<()> {
        if !self.needs_update().await? {
            info!(group = %self.group.name, "all instances up to date, nothing to do");
            return Ok(());
        }

        let snapshot = SizingSnapshot::of(&self.group);
        let target = count_running(&self.group);

        match self.scale_out_and_await_healthy(target, shutdown).await {
            Ok(()) => self.commit(&snapshot).await,
            Err(cause) => {
                warn!(
                    group = %self.group.name,
                    error = %cause,
                    "update failed, rolling back"
                );
                if let Err(rollback_error) = self.rollback(&snapshot).await {
                    warn!(
                        group = %self.group.name,
                        error = %rollback_error,
                        original = %cause,
                        "rollback failed"
                    );
                    return Err(rollback_error);
                }
                match cause {
                    RolloutError::Interrupted => Err(RolloutError::Interrupted),
                    cause => Err(RolloutError::RolledBack {
                        group: self.group.name.clone(),
                        cause: Box::new(cause),
                    }),
                }
            }
        }
    }

    /// Whether the group still runs instances that are not up to date.
    /// Recomputed from live observations on every call, so a partial
    /// earlier update is detected and resumed.
    pub async fn needs_update(&self) -> RolloutResult<bool> {
        let views = collect_views(self.provider, &self.group).await?;
        let up_to_date = count_up_to_date(&views, &self.group.launch_configuration);
        let running = count_running(&self.group);
        debug!(
            group = %self.group.name,
            up_to_date,
            running,
            "update need evaluated"
        );
        Ok(up_to_date < running)
    }

    async fn scale_out_and_await_healthy(
        &mut self,
        target: usize,
        shutdown: &mut watch::Receiver<bool>,
    ) -> RolloutResult<()> {
        self.scale_out().await?;
        self.await_healthy(target, shutdown).await
    }

    /// Suspend group automation (keeping the launch/registration
    /// processes), then raise min, max, and desired by the running
    /// count so a full replacement fleet comes up next to the old one
    /// without ever dropping below capacity.
    pub async fn scale_out(&mut self) -> RolloutResult<()> {
        let name = self.group.name.clone();
        self.provider.suspend_processes(&name).await?;
        self.provider
            .resume_processes(&name, Some(&KEEP_ACTIVE_PROCESSES))
            .await?;
        info!(
            group = %name,
            kept = ?KEEP_ACTIVE_PROCESSES,
            "suspended autoscaling processes"
        );

        let running = count_running(&self.group) as u32;
        info!(
            group = %name,
            min_from = self.group.min_size,
            min_to = self.group.min_size + running,
            max_from = self.group.max_size,
            max_to = self.group.max_size + running,
            desired_from = self.group.desired_capacity,
            desired_to = self.group.desired_capacity + running,
            "temporarily raising group sizing"
        );
        self.group.min_size += running;
        self.group.max_size += running;
        self.group.desired_capacity += running;
        self.provider.update_group(&self.group).await?;

        self.notify(LifecycleEvent::ScaleOutCompleted)
    }

    /// Poll until `needed` instances are up to date and in service, or
    /// the configured deadline passes. A shutdown signal aborts the
    /// wait with [`RolloutError::Interrupted`].
    pub async fn await_healthy(
        &mut self,
        needed: usize,
        shutdown: &mut watch::Receiver<bool>,
    ) -> RolloutResult<()> {
        info!(
            group = %self.group.name,
            needed,
            launch_configuration = %self.group.launch_configuration,
            timeout_secs = self.config.healthy_timeout.as_secs(),
            "waiting for the replacement fleet to become healthy"
        );
        let deadline = Instant::now() + self.config.healthy_timeout;

        loop {
            if *shutdown.borrow_and_update() {
                info!(group = %self.group.name, "shutdown requested during convergence wait");
                return Err(RolloutError::Interrupted);
            }

            self.refresh_group().await?;
            let views = collect_views(self.provider, &self.group).await?;
            log_views(&views);
            let up_to_date = count_up_to_date(&views, &self.group.launch_configuration);
            if up_to_date >= needed {
                info!(group = %self.group.name, up_to_date, "fleet converged");
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(RolloutError::HealthTimeout {
                    group: self.group.name.clone(),
                    waited_secs: self.config.healthy_timeout.as_secs(),
                });
            }
            debug!(
                group = %self.group.name,
                up_to_date,
                needed,
                "not converged yet"
            );
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = shutdown.changed() => {
                    info!(group = %self.group.name, "shutdown requested during convergence wait");
                    return Err(RolloutError::Interrupted);
                }
            }
        }
    }

    /// Success path: terminate the stale fleet, restore the original
    /// sizing, resume all automation processes.
    pub async fn commit(&mut self, snapshot: &SizingSnapshot) -> RolloutResult<()> {
        // Termination sets are computed from live membership, not from
        // whatever the updater last saw.
        self.refresh_group().await?;
        let stale: Vec<InstanceId> = self
            .group
            .instances
            .iter()
            .filter(|i| i.launch_configuration != self.group.launch_configuration)
            .map(|i| i.id.clone())
            .collect();
        self.terminate(&stale).await?;
        self.restore_sizing(snapshot).await?;
        self.provider.resume_processes(&self.group.name, None).await?;
        info!(group = %self.group.name, "resumed all autoscaling processes");
        Ok(())
    }

    /// Failure path: terminate the new fleet and restore the original
    /// sizing. Automation stays suspended so the degraded group is
    /// visible to operators.
    pub async fn rollback(&mut self, snapshot: &SizingSnapshot) -> RolloutResult<()> {
        self.refresh_group().await?;
        let fresh: Vec<InstanceId> = self
            .group
            .instances
            .iter()
            .filter(|i| i.launch_configuration == self.group.launch_configuration)
            .map(|i| i.id.clone())
            .collect();
        self.terminate(&fresh).await?;
        self.restore_sizing(snapshot).await
    }

    async fn refresh_group(&mut self) -> RolloutResult<()> {
        let name = self.group.name.clone();
        let groups = self
            .provider
            .get_groups(std::slice::from_ref(&name))
            .await?;
        self.group = groups
            .into_iter()
            .next()
            .ok_or(RolloutError::GroupNotFound(name))?;
        Ok(())
    }

    async fn terminate(&self, ids: &[InstanceId]) -> RolloutResult<()> {
        if ids.is_empty() {
            info!(group = %self.group.name, "no instances to terminate");
            return Ok(());
        }
        info!(group = %self.group.name, instances = ?ids, "terminating instances");
        self.provider.terminate_instances(ids).await?;
        Ok(())
    }

    async fn restore_sizing(&mut self, snapshot: &SizingSnapshot) -> RolloutResult<()> {
        info!(
            group = %self.group.name,
            min_from = self.group.min_size,
            min_to = snapshot.min_size,
            max_from = self.group.max_size,
            max_to = snapshot.max_size,
            desired_from = self.group.desired_capacity,
            desired_to = snapshot.desired_capacity,
            "restoring group sizing"
        );
        self.group.min_size = snapshot.min_size;
        self.group.max_size = snapshot.max_size;
        self.group.desired_capacity = snapshot.desired_capacity;
        self.provider.update_group(&self.group).await?;
        Ok(())
    }

    fn notify(&self, event: LifecycleEvent) -> RolloutResult<()> {
        if let Some(ref observer) = self.observer {
            observer(event).map_err(RolloutError::ObserverAbort)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use greenline_cloud::{GroupInstance, LbState, LifecycleState, MemoryCloud};
    use std::sync::{Arc, Mutex};

    fn instance(id: &str, launch_configuration: &str) -> GroupInstance {
        GroupInstance {
            id: id.to_string(),
            lifecycle_state: LifecycleState::InService,
            launch_configuration: launch_configuration.to_string(),
        }
    }

    fn group(instances: Vec<GroupInstance>) -> AutoscalingGroup {
        AutoscalingGroup {
            name: "any-asg".to_string(),
            min_size: 1,
            max_size: 3,
            desired_capacity: 2,
            launch_configuration: "lc-new".to_string(),
            instances,
            load_balancers: vec!["any-elb".to_string()],
            suspended_processes: vec![],
        }
    }

    /// Group whose whole fleet still runs the old launch configuration,
    /// in service behind the load balancer.
    fn stale_fleet(cloud: &MemoryCloud) -> AutoscalingGroup {
        let group = group(vec![instance("i-old-1", "lc-old"), instance("i-old-2", "lc-old")]);
        cloud.add_group(group.clone());
        for id in ["i-old-1", "i-old-2"] {
            cloud.set_compute_image(id, "image-old");
            cloud.register_with_lb("any-elb", id, LbState::InService);
        }
        group
    }

    /// Group already converged on the current launch configuration.
    fn converged_fleet(cloud: &MemoryCloud) -> AutoscalingGroup {
        let group = group(vec![instance("i-new-1", "lc-new"), instance("i-new-2", "lc-new")]);
        cloud.add_group(group.clone());
        for id in ["i-new-1", "i-new-2"] {
            cloud.set_compute_image(id, "image-new");
            cloud.register_with_lb("any-elb", id, LbState::InService);
        }
        group
    }

    fn fast_config() -> UpdateConfig {
        UpdateConfig {
            poll_interval: Duration::from_millis(20),
            healthy_timeout: Duration::from_millis(400),
        }
    }

    /// A shutdown channel that never fires. The sender must stay alive
    /// for the whole test, or `changed()` resolves immediately.
    fn no_shutdown() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[tokio::test]
    async fn converged_group_is_a_no_op() {
        let cloud = MemoryCloud::new();
        let group = converged_fleet(&cloud);

        let mut updater = GroupUpdater::new(&cloud, group).with_config(fast_config());
        let (_tx, mut shutdown) = no_shutdown();
        updater.run(&mut shutdown).await.unwrap();

        assert!(cloud.mutation_log().is_empty());
        assert!(cloud.terminated_instances().is_empty());
    }

    #[tokio::test]
    async fn scale_out_raises_sizing_by_the_running_count() {
        let cloud = MemoryCloud::new();
        let group = stale_fleet(&cloud);

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let mut updater = GroupUpdater::new(&cloud, group)
            .with_config(fast_config())
            .with_observer(Box::new(move |event| {
                sink.lock().unwrap().push(event);
                Ok(())
            }));
        updater.scale_out().await.unwrap();

        let group = cloud.group("any-asg").unwrap();
        assert_eq!(
            (group.min_size, group.max_size, group.desired_capacity),
            (3, 5, 4)
        );
        // Exactly the non-keep processes stay suspended.
        let mut suspended = group.suspended_processes.clone();
        suspended.sort_by_key(|p| format!("{p:?}"));
        let mut expected = vec![
            ScalingProcess::ReplaceUnhealthy,
            ScalingProcess::AlarmNotification,
            ScalingProcess::ScheduledActions,
            ScalingProcess::AzRebalance,
        ];
        expected.sort_by_key(|p| format!("{p:?}"));
        assert_eq!(suspended, expected);
        assert_eq!(*events.lock().unwrap(), vec![LifecycleEvent::ScaleOutCompleted]);
    }

    #[tokio::test]
    async fn commit_terminates_only_the_stale_fleet() {
        let cloud = MemoryCloud::new();
        let group = group(vec![
            instance("i-1", "lc-new"),
            instance("i-with-old-lc", "lc-old"),
            instance("i-3", "lc-new"),
        ]);
        cloud.add_group(group.clone());
        cloud.suspend_processes("any-asg").await.unwrap();

        let snapshot = SizingSnapshot {
            min_size: 1,
            max_size: 3,
            desired_capacity: 2,
        };
        let mut updater = GroupUpdater::new(&cloud, group);
        updater.commit(&snapshot).await.unwrap();

        assert_eq!(
            cloud.terminated_instances(),
            vec!["i-with-old-lc".to_string()]
        );
        let group = cloud.group("any-asg").unwrap();
        assert_eq!(
            (group.min_size, group.max_size, group.desired_capacity),
            (1, 3, 2)
        );
        // Commit resumes everything.
        assert!(group.suspended_processes.is_empty());
    }

    #[tokio::test]
    async fn rollback_terminates_only_the_new_fleet_and_stays_suspended() {
        let cloud = MemoryCloud::new();
        let group = group(vec![
            instance("i-with-new-lc-1", "lc-new"),
            instance("i-2", "lc-old"),
            instance("i-with-new-lc-2", "lc-new"),
        ]);
        cloud.add_group(group.clone());
        cloud.suspend_processes("any-asg").await.unwrap();

        let snapshot = SizingSnapshot {
            min_size: 1,
            max_size: 3,
            desired_capacity: 2,
        };
        let mut updater = GroupUpdater::new(&cloud, group);
        updater.rollback(&snapshot).await.unwrap();

        assert_eq!(
            cloud.terminated_instances(),
            vec![
                "i-with-new-lc-1".to_string(),
                "i-with-new-lc-2".to_string()
            ]
        );
        let group = cloud.group("any-asg").unwrap();
        assert_eq!(
            (group.min_size, group.max_size, group.desired_capacity),
            (1, 3, 2)
        );
        // Rollback leaves the suspension in place as a degradation marker.
        assert_eq!(group.suspended_processes.len(), ScalingProcess::ALL.len());
    }

    #[tokio::test]
    async fn committing_with_nothing_stale_terminates_nothing() {
        let cloud = MemoryCloud::new();
        let group = group(vec![instance("i-1", "lc-new"), instance("i-2", "lc-new")]);
        cloud.add_group(group.clone());

        let snapshot = SizingSnapshot::of(&group);
        let mut updater = GroupUpdater::new(&cloud, group);
        updater.commit(&snapshot).await.unwrap();

        assert!(cloud.terminated_instances().is_empty());
        assert!(!cloud
            .mutation_log()
            .iter()
            .any(|m| m.starts_with("terminate_instances")));
    }

    #[tokio::test]
    async fn await_healthy_converges_after_one_sleep_cycle() {
        let cloud = MemoryCloud::new();
        let group = group(vec![instance("i-1", "lc-new"), instance("i-2", "lc-new")]);
        cloud.add_group(group.clone());
        cloud.set_compute_image("i-1", "image-new");
        cloud.set_compute_image("i-2", "image-new");
        cloud.register_with_lb("any-elb", "i-1", LbState::InService);
        // Second instance qualifies on the second health poll.
        cloud.register_with_lb("any-elb", "i-2", LbState::InService);
        cloud.set_health_after_polls("i-2", 2, LbState::InService);

        let mut updater = GroupUpdater::new(&cloud, group).with_config(fast_config());
        let (_tx, mut shutdown) = no_shutdown();
        updater.await_healthy(2, &mut shutdown).await.unwrap();
    }

    #[tokio::test]
    async fn await_healthy_deadline_is_the_timeout_kind() {
        let cloud = MemoryCloud::new();
        let group = group(vec![instance("i-1", "lc-new")]);
        cloud.add_group(group.clone());
        cloud.register_with_lb("any-elb", "i-1", LbState::OutOfService);

        let mut updater = GroupUpdater::new(&cloud, group).with_config(fast_config());
        let (_tx, mut shutdown) = no_shutdown();
        let err = updater
            .await_healthy(1, &mut shutdown)
            .await
            .unwrap_err();
        assert!(matches!(err, RolloutError::HealthTimeout { .. }));
    }

    #[tokio::test]
    async fn observer_abort_rolls_back_and_wraps_the_cause() {
        let cloud = MemoryCloud::new();
        let group = stale_fleet(&cloud);
        cloud.set_launch_health(0, LbState::InService);

        let mut updater = GroupUpdater::new(&cloud, group)
            .with_config(fast_config())
            .with_observer(Box::new(|_| anyhow::bail!("mid-flight assertion failed")));
        let (_tx, mut shutdown) = no_shutdown();
        let err = updater.run(&mut shutdown).await.unwrap_err();

        match err {
            RolloutError::RolledBack { cause, .. } => {
                assert!(matches!(*cause, RolloutError::ObserverAbort(_)));
            }
            other => panic!("expected RolledBack, got {other:?}"),
        }
        // The launched (new-lc) instances are gone, the old fleet stays.
        let group = cloud.group("any-asg").unwrap();
        assert_eq!(group.instances.len(), 2);
        assert!(group
            .instances
            .iter()
            .all(|i| i.launch_configuration == "lc-old"));
        assert_eq!(
            (group.min_size, group.max_size, group.desired_capacity),
            (1, 3, 2)
        );
        // No resume after rollback.
        assert!(!group.suspended_processes.is_empty());
    }

    #[tokio::test]
    async fn health_timeout_rolls_back_and_wraps_the_cause() {
        let cloud = MemoryCloud::new();
        let group = stale_fleet(&cloud);
        // Launched instances never pass their health check.
        cloud.set_launch_health(u32::MAX, LbState::OutOfService);

        let mut updater = GroupUpdater::new(&cloud, group).with_config(fast_config());
        let (_tx, mut shutdown) = no_shutdown();
        let err = updater.run(&mut shutdown).await.unwrap_err();

        match err {
            RolloutError::RolledBack { cause, .. } => {
                assert!(matches!(*cause, RolloutError::HealthTimeout { .. }));
            }
            other => panic!("expected RolledBack, got {other:?}"),
        }
        let group = cloud.group("any-asg").unwrap();
        assert!(group
            .instances
            .iter()
            .all(|i| i.launch_configuration == "lc-old"));
    }

    #[tokio::test]
    async fn shutdown_rolls_back_but_propagates_unwrapped() {
        let cloud = MemoryCloud::new();
        let group = stale_fleet(&cloud);
        cloud.set_launch_health(0, LbState::InService);

        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();

        let mut updater = GroupUpdater::new(&cloud, group).with_config(fast_config());
        let err = updater.run(&mut rx).await.unwrap_err();

        assert!(matches!(err, RolloutError::Interrupted));
        // Rollback ran: new instances terminated, sizing restored, no resume.
        let group = cloud.group("any-asg").unwrap();
        assert!(group
            .instances
            .iter()
            .all(|i| i.launch_configuration == "lc-old"));
        assert_eq!(
            (group.min_size, group.max_size, group.desired_capacity),
            (1, 3, 2)
        );
        assert!(!group.suspended_processes.is_empty());
    }
}
