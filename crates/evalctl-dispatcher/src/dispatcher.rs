use async_trait::async_trait;
use evalctl_types::EvalId;

use crate::error::DispatchError;
use crate::types::{ExecuteAck, ExecuteRequest, WorkloadState};

/// Provisions isolated workloads and watches them to completion (C6, §4.6).
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Creates exactly one workload and returns immediately; the watch
    /// loop runs asynchronously, publishing `evaluation:running` and the
    /// terminal event itself.
    async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteAck, DispatchError>;

    /// Last-observed workload state, polled by C7 at a 10 s cadence
    /// (§4.7 step 3). `None` means the dispatcher has no record — either
    /// it was never submitted here, or this process restarted.
    async fn poll_state(&self, eval_id: &EvalId) -> Option<WorkloadState>;

    /// Deletes the workload; the terminal `cancelled` event follows from
    /// the watch loop, not from this call directly (§4.6 "Cancellation").
    async fn cancel(&self, eval_id: &EvalId) -> Result<(), DispatchError>;

    async fn is_ready(&self) -> bool;
}
