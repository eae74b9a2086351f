use std::sync::Arc;

use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, warn};

use relay_core::elapsed_ms;

use super::{
    dispatch_rpc_request, RpcDispatchContext, RpcQueueStats, RpcResponse, RpcWorkItem,
    RPC_CODE_INTERNAL,
};

/// Fixed set of workers draining the shared work queue.
pub(super) struct RpcWorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl RpcWorkerPool {
    pub(super) fn spawn(
        context: Arc<RpcDispatchContext>,
        queue: mpsc::Receiver<RpcWorkItem>,
        results: mpsc::Sender<RpcResponse>,
    ) -> Self {
        let queue = Arc::new(Mutex::new(queue));
        let handles = (0..context.config.workers)
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    Arc::clone(&context),
                    Arc::clone(&queue),
                    results.clone(),
                ))
            })
            .collect();
        Self { handles }
    }

    /// Waits until every worker has observed the closed, drained queue.
    pub(super) async fn join(self) {
        for handle in self.handles {
            if let Err(join_error) = handle.await {
                error!(error = %join_error, "rpc worker terminated abnormally");
            }
        }
    }
}

async fn run_worker(
    worker: usize,
    context: Arc<RpcDispatchContext>,
    queue: Arc<Mutex<mpsc::Receiver<RpcWorkItem>>>,
    results: mpsc::Sender<RpcResponse>,
) {
    loop {
        let (item, queue_depth) = {
            let mut queue = queue.lock().await;
            let item = queue.recv().await;
            (item, queue.len())
        };
        let Some(item) = item else {
            break;
        };
        let stats = RpcQueueStats {
            queue_wait_ms: elapsed_ms(item.enqueued_at),
            queue_depth,
        };
        let response = dispatch_isolated(Arc::clone(&context), item, stats).await;
        if results.send(response).await.is_err() {
            warn!(worker, "rpc results channel closed; stopping worker");
            break;
        }
    }
    debug!(worker, "rpc worker exited");
}

/// Runs the handler in its own task so a panic costs one response, not a worker.
async fn dispatch_isolated(
    context: Arc<RpcDispatchContext>,
    item: RpcWorkItem,
    stats: RpcQueueStats,
) -> RpcResponse {
    let request_id = item.request.id.clone();
    let op = item.request.op.clone();
    let handler =
        tokio::spawn(async move { dispatch_rpc_request(&context, item.request, stats).await });
    match handler.await {
        Ok(response) => response,
        Err(join_error) => {
            error!(op = %op, request_id = ?request_id, error = %join_error, "rpc handler failed");
            RpcResponse::failure(
                request_id,
                RPC_CODE_INTERNAL,
                format!("rpc handler for '{op}' failed: {join_error}"),
            )
        }
    }
}
