//! Error types for cloud provider calls.

use thiserror::Error;

/// Result type alias for provider operations.
pub type CloudResult<T> = Result<T, CloudError>;

/// Errors surfaced by the provider traits.
///
/// Provider call failures are not retried anywhere in greenline; they
/// propagate and fail the operation at that step. Callers that need to
/// re-enter recompute their decisions from live state first.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("stack not found: {0}")]
    StackNotFound(String),

    #[error("autoscaling group not found: {0}")]
    GroupNotFound(String),

    #[error("load balancer not found: {0}")]
    LoadBalancerNotFound(String),

    #[error("provider call failed: {0}")]
    Api(String),
}
