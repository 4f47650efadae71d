//! greenline-rollout — blue/green rolling updates of one autoscaling group.
//!
//! The updater runs a full parallel fleet next to the old one instead
//! of replacing instances in place: suspend group automation, raise
//! min/max/desired by the running count, wait until enough instances on
//! the new launch configuration are in service behind the load
//! balancer, then either commit (terminate the stale fleet, restore
//! sizing, resume automation) or roll back on any failure (terminate
//! the new fleet, restore sizing, leave automation suspended as a
//! degradation marker).
//!
//! All decisions are recomputed from live cloud state, never cached, so
//! a run interrupted mid-flight can simply be repeated.

pub mod updater;
pub mod view;

pub use updater::{
    GroupUpdater, LifecycleEvent, RolloutError, RolloutResult, SizingSnapshot, UpdateConfig,
    UpdateObserver, KEEP_ACTIVE_PROCESSES,
};
pub use view::{collect_views, count_running, count_up_to_date, InstanceView};
