use super::manager::WarmPoolManager;
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Minimum pause between two passes.
const MIN_RECONCILE_GAP: Duration = Duration::from_secs(1);

/// Runs reconciliation on the configured period and whenever a top-up is
/// requested, until shutdown. The first pass runs immediately.
pub fn spawn_keeper(manager: Arc<WarmPoolManager>) -> JoinHandle<()> {
    tokio::spawn(async move { keeper_loop(manager).await })
}

async fn keeper_loop(manager: Arc<WarmPoolManager>) {
    let ctx = Arc::clone(manager.context());
    let period = ctx.config.pool.reconcile_interval().max(MIN_RECONCILE_GAP);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("[Warm] Keeper started (every {}s)", period.as_secs());

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = manager.pool().top_up_requested() => debug!("[Warm] Top-up requested"),
        }
        if ctx.is_shutting_down() {
            break;
        }
        let players = ctx.frontend.online_count();
        manager.reconcile(players).await;
        tokio::time::sleep(MIN_RECONCILE_GAP).await;
    }
    info!("[Warm] Keeper stopped");
}
