//! greenline-stack — driving a whole stack's worth of updates.
//!
//! The orchestrator resolves the autoscaling groups a stack manages and
//! rolls them forward one at a time — never in parallel, so a failure
//! in one group leaves every later group untouched. It also pushes
//! template-level create/update/delete calls and hands completion
//! waiting to the action waiter.

pub mod orchestrator;

pub use orchestrator::{StackError, StackOrchestrator, StackResult};
