mod warm_pool;

use crate::domains::sessions::entity::{SessionState, WorkerSession};
use crate::domains::sessions::service::SessionService;
use crate::shared::PlayerId;
use crate::test_support::{Harness, wait_until};
use std::sync::Arc;
use std::time::Duration;

const SCENARIO_TIMEOUT: Duration = Duration::from_secs(10);

fn service(h: &Harness) -> SessionService {
    SessionService::new(Arc::clone(&h.ctx))
}

async fn wait_for_state(
    h: &Harness,
    leader: PlayerId,
    state: SessionState,
) -> Option<Arc<WorkerSession>> {
    let registry = Arc::clone(&h.ctx.registry);
    let reached = wait_until(SCENARIO_TIMEOUT, || {
        registry
            .session_of(leader)
            .is_some_and(|s| s.state() == state)
    })
    .await;
    if reached { registry.session_of(leader) } else { None }
}

async fn wait_for_removal(h: &Harness, leader: PlayerId) -> bool {
    let registry = Arc::clone(&h.ctx.registry);
    wait_until(SCENARIO_TIMEOUT, || registry.session_of(leader).is_none()).await
}
