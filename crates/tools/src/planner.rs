//! Tool planner — run one turn's read-only calls concurrently.
//!
//! Calls are split by declared risk. Safe calls run on a bounded pool;
//! unsafe calls run one at a time afterwards, in emission order. Results
//! always come back in the order the model issued the calls.

use forgehand_core::error::ToolError;
use forgehand_core::tool::{Tool, ToolCall, ToolRegistry, ToolResult};
use futures::StreamExt;
use futures::stream::FuturesOrdered;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

pub const DEFAULT_MAX_PARALLEL: usize = 4;
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Execution order for one turn's calls, as indices into the call list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// Everything in emission order.
    Sequential(Vec<usize>),
    /// `concurrent` first, all at once; then `sequential` one by one.
    Phased {
        concurrent: Vec<usize>,
        sequential: Vec<usize>,
    },
}

#[derive(Debug, Clone)]
pub struct ToolPlanner {
    max_parallel: usize,
    timeout: Duration,
}

impl ToolPlanner {
    pub fn new(max_parallel: usize, timeout: Duration) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
            timeout,
        }
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Partition by declared risk. Unknown tools count as unsafe.
    pub fn plan(&self, registry: &ToolRegistry, calls: &[ToolCall]) -> Schedule {
        let (concurrent, sequential): (Vec<usize>, Vec<usize>) = (0..calls.len())
            .partition(|&i| registry.risk(&calls[i].name).is_some_and(|r| r.is_safe()));
        if concurrent.len() < 2 {
            return Schedule::Sequential((0..calls.len()).collect());
        }
        Schedule::Phased {
            concurrent,
            sequential,
        }
    }

    /// Run calls on the bounded pool. Output keeps input order.
    pub async fn run_concurrent(
        &self,
        registry: Arc<ToolRegistry>,
        calls: Vec<(usize, ToolCall)>,
    ) -> Vec<(usize, ToolResult)> {
        debug!(count = calls.len(), max_parallel = self.max_parallel, "Running tool calls concurrently");
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut ordered = FuturesOrdered::new();

        for (index, call) in calls {
            let registry = Arc::clone(&registry);
            let sem = Arc::clone(&semaphore);
            let timeout = self.timeout;
            let call_id = call.id.clone();
            let handle = tokio::spawn(async move {
                let _permit = sem.acquire().await.ok();
                execute_with_timeout(&registry, &call, timeout).await
            });

            ordered.push_back(async move {
                let result = match handle.await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(error = %e, "Tool task panicked");
                        ToolResult::failure(format!("Tool task panicked: {e}")).with_call_id(call_id)
                    }
                };
                (index, result)
            });
        }

        let mut results = Vec::with_capacity(ordered.len());
        while let Some(item) = ordered.next().await {
            results.push(item);
        }
        results
    }

    /// Execute a whole turn and return results in call order.
    pub async fn execute_batch(&self, registry: Arc<ToolRegistry>, calls: &[ToolCall]) -> Vec<ToolResult> {
        let mut slots: Vec<Option<ToolResult>> = vec![None; calls.len()];
        let sequential = match self.plan(&registry, calls) {
            Schedule::Sequential(order) => order,
            Schedule::Phased {
                concurrent,
                sequential,
            } => {
                let batch = concurrent.iter().map(|&i| (i, calls[i].clone())).collect();
                for (i, result) in self.run_concurrent(Arc::clone(&registry), batch).await {
                    slots[i] = Some(result);
                }
                sequential
            }
        };
        for i in sequential {
            slots[i] = Some(execute_with_timeout(&registry, &calls[i], self.timeout).await);
        }
        slots
            .into_iter()
            .zip(calls)
            .map(|(slot, call)| {
                slot.unwrap_or_else(|| ToolResult::failure("Tool call was not scheduled").with_call_id(&call.id))
            })
            .collect()
    }
}

impl Default for ToolPlanner {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PARALLEL, DEFAULT_TOOL_TIMEOUT)
    }
}

/// Execute one call, converting a timeout into a failed result.
/// A tool's own [`Tool::timeout`] takes precedence over `timeout`.
pub async fn execute_with_timeout(registry: &ToolRegistry, call: &ToolCall, timeout: Duration) -> ToolResult {
    let timeout = registry
        .get(&call.name)
        .and_then(|tool| tool.timeout())
        .unwrap_or(timeout);
    match tokio::time::timeout(timeout, registry.execute_call(call)).await {
        Ok(result) => result,
        Err(_) => {
            let err = ToolError::Timeout {
                tool_name: call.name.clone(),
                timeout_secs: timeout.as_secs(),
            };
            warn!(tool = %call.name, "Tool call timed out");
            ToolResult::failure(format!("Tool execution failed: {err}")).with_call_id(&call.id)
        }
    }
}
