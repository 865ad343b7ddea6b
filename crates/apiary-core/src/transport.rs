use crate::message::TaskRequest;
use crate::ApiaryResult;
use async_trait::async_trait;

/// Delivery seam between the orchestrator and the outside world.
///
/// Implementations may be WebSocket fan-out, an in-process channel, or a
/// test double; the orchestrator never assumes a wire protocol. A returned
/// error is treated as recoverable and drives retry scheduling.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Delivers `request` to the agent addressed by `target`.
    async fn send(&self, target: &str, request: &TaskRequest) -> ApiaryResult<()>;
}
