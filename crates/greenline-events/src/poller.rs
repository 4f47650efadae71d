//! Scanning and draining a stack's event history.

use greenline_cloud::{CloudResult, Stack, StackEvent, StackProvider};
use tracing::info;

/// Find the first event newer than `younger_than_ms` that satisfies the
/// predicate.
///
/// Events are scanned in provider order — the first match in that order
/// wins, and callers must not rely on it being the chronologically
/// first. An empty result is `None`, never an error.
pub async fn find_event<P, F>(
    provider: &P,
    stack: &Stack,
    younger_than_ms: u64,
    predicate: F,
) -> CloudResult<Option<StackEvent>>
where
    P: StackProvider,
    F: Fn(&StackEvent) -> bool,
{
    for event in provider.describe_events(stack).await? {
        if predicate(&event) && event.timestamp_ms > younger_than_ms {
            return Ok(Some(event));
        }
    }
    Ok(None)
}

/// Log every event strictly newer than `watermark_ms` and return the
/// maximum timestamp observed (the input watermark when nothing new).
///
/// Events are sorted by timestamp before display and watermark
/// computation, so out-of-order delivery from the provider cannot
/// regress either. The returned watermark is wait-loop bookkeeping
/// only; event *detection* always re-scans the full history via
/// [`find_event`].
pub async fn drain_new_events<P: StackProvider>(
    provider: &P,
    stack: &Stack,
    watermark_ms: u64,
) -> CloudResult<u64> {
    let mut events = provider.describe_events(stack).await?;
    events.sort_by_key(|e| e.timestamp_ms);

    let mut watermark = watermark_ms;
    for event in events.into_iter().filter(|e| e.timestamp_ms > watermark_ms) {
        info!(
            timestamp_ms = event.timestamp_ms,
            status = %event.resource_status,
            resource = %event.logical_resource_id,
            kind = short_resource_type(&event.resource_type),
            reason = event.status_reason.as_deref().unwrap_or(""),
            "stack event"
        );
        watermark = watermark.max(event.timestamp_ms);
    }
    Ok(watermark)
}

/// Trailing segment of a `Vendor::Service::Type` resource type.
fn short_resource_type(resource_type: &str) -> &str {
    resource_type.rsplit("::").next().unwrap_or(resource_type)
}
