use super::*;
use crate::domains::pool::WarmPoolManager;
use crate::domains::sessions::service::SessionRequestOutcome;
use crate::events::WorldpoolEvent;
use crate::infrastructure::config::CommandTemplates;
use crate::infrastructure::frontend::FrontendRegistry;
use crate::test_support::FakeFrontend;

fn warm_ready_count(h: &Harness) -> usize {
    h.ctx
        .cleanup
        .collect_all()
        .iter()
        .filter(|s| s.state() == SessionState::WarmReady)
        .count()
}

#[tokio::test]
async fn pool_size_follows_player_count_within_bounds() {
    let h = Harness::new(FakeFrontend::new());
    let manager = WarmPoolManager::new(Arc::clone(&h.ctx));

    let report = manager.reconcile(5).await;
    assert_eq!(report.target, 7);
    assert_eq!(report.spawned, 7);
    assert_eq!(manager.pool().len(), 7);

    let report = manager.reconcile(20).await;
    assert_eq!(report.target, 8);
    assert_eq!(report.spawned, 1);
    assert_eq!(manager.pool().len(), 8);

    let report = manager.reconcile(0).await;
    assert_eq!(report.target, 2);
    assert_eq!(report.evicted, 6);
    assert_eq!(manager.pool().len(), 2);

    h.ctx.shutdown.trigger();
    h.ctx.cleanup.cleanup_all().await;
    assert!(manager.pool().is_empty());
}

#[tokio::test]
async fn reconcile_is_a_no_op_once_shutting_down() {
    let h = Harness::new(FakeFrontend::new());
    let manager = WarmPoolManager::new(Arc::clone(&h.ctx));
    h.ctx.shutdown.trigger();

    let report = manager.reconcile(3).await;
    assert_eq!(report.spawned, 0);
    assert!(manager.pool().is_empty());
}

#[tokio::test]
async fn warm_sessions_become_ready_after_platform_init() {
    let mut h = Harness::new(FakeFrontend::new());
    let manager = WarmPoolManager::new(Arc::clone(&h.ctx));

    manager.reconcile(0).await;
    assert!(wait_until(SCENARIO_TIMEOUT, || warm_ready_count(&h) == 2).await);

    let templates = CommandTemplates::default();
    assert_eq!(h.control.count_of(&templates.platform_build), 2);
    for session in h.ctx.cleanup.collect_all() {
        assert!(session.is_platform_initialized());
        assert!(session.leader().is_none());
        assert!(h.frontend.is_registered(&session.name()));
    }
    let events = h.drain_events();
    assert_eq!(
        events
            .iter()
            .filter(|e| **e == WorldpoolEvent::WarmReady)
            .count(),
        2
    );

    h.ctx.shutdown.trigger();
    h.ctx.cleanup.cleanup_all().await;
}

#[tokio::test]
async fn leader_adopts_a_ready_warm_session() {
    let mut h = Harness::new(FakeFrontend::new());
    let manager = WarmPoolManager::new(Arc::clone(&h.ctx));
    let service = service(&h);
    service.attach_warm_source(manager.clone());

    manager.reconcile(0).await;
    assert!(wait_until(SCENARIO_TIMEOUT, || warm_ready_count(&h) == 2).await);
    let warm_names: Vec<String> = h
        .ctx
        .cleanup
        .collect_all()
        .iter()
        .map(|s| s.name())
        .collect();

    let leader = PlayerId::random();
    let member = PlayerId::random();
    h.frontend.set_online(leader, "alice");

    let expected = format!("world-{}", leader.short());
    let outcome = service.request_session(leader, vec![member]).await.unwrap();
    assert_eq!(
        outcome,
        SessionRequestOutcome::Adopted {
            session: expected.clone()
        }
    );
    assert_eq!(manager.pool().len(), 1);

    let session = wait_for_state(&h, leader, SessionState::Active)
        .await
        .expect("adopted session should become active");
    assert_eq!(session.name(), expected);
    assert_eq!(session.leader(), Some(leader));
    assert!(session.has_member(member));
    assert!(h.frontend.is_registered(&expected));
    assert_eq!(
        warm_names
            .iter()
            .filter(|name| h.frontend.is_registered(name))
            .count(),
        1
    );
    assert_eq!(
        h.frontend.current_server(leader).as_deref(),
        Some(expected.as_str())
    );

    // Platform setup ran while warm and is not repeated.
    let templates = CommandTemplates::default();
    assert_eq!(h.control.count_of(&templates.platform_build), 2);

    assert!(!h.ctx.registry.can_admit(leader));
    let events = h.drain_events();
    assert!(events.contains(&WorldpoolEvent::SessionAdopted));
    assert!(events.contains(&WorldpoolEvent::SessionReady));
    assert!(!events.contains(&WorldpoolEvent::SessionSpawning));

    service.shutdown().await;
    assert!(manager.pool().is_empty());
    assert!(h.ctx.registry.is_empty());
}

#[tokio::test]
async fn empty_pool_falls_back_to_a_fresh_spawn() {
    let h = Harness::new(FakeFrontend::new());
    let manager = WarmPoolManager::new(Arc::clone(&h.ctx));
    let service = service(&h);
    service.attach_warm_source(manager.clone());

    let leader = PlayerId::random();
    h.frontend.set_online(leader, "alice");
    let outcome = service.request_session(leader, vec![]).await.unwrap();
    assert!(matches!(outcome, SessionRequestOutcome::Spawning { .. }));

    wait_for_state(&h, leader, SessionState::Active)
        .await
        .expect("active");
    service.shutdown().await;
}

#[tokio::test]
async fn dead_warm_entries_are_pruned_and_replaced() {
    let h = Harness::new(FakeFrontend::new());
    let manager = WarmPoolManager::new(Arc::clone(&h.ctx));

    manager.reconcile(0).await;
    assert!(wait_until(SCENARIO_TIMEOUT, || warm_ready_count(&h) == 2).await);

    h.inspector.set_running(Harness::WORKER_PID, false);
    let report = manager.reconcile(0).await;
    assert_eq!(report.pruned, 2);
    assert_eq!(report.spawned, 2);
    assert_eq!(manager.pool().len(), 2);

    h.ctx.shutdown.trigger();
    h.ctx.cleanup.cleanup_all().await;
}

#[tokio::test]
async fn leader_with_a_session_leaves_the_warm_entry_pooled() {
    let h = Harness::new(FakeFrontend::new());
    let manager = WarmPoolManager::new(Arc::clone(&h.ctx));

    manager.reconcile(0).await;
    assert!(wait_until(SCENARIO_TIMEOUT, || warm_ready_count(&h) == 2).await);
    let warm_names: Vec<String> = h
        .ctx
        .cleanup
        .collect_all()
        .iter()
        .map(|s| s.name())
        .collect();

    let leader = PlayerId::random();
    let name = h.ctx.session_name_for(leader);
    let (port, control) = h.ctx.allocate_ports();
    let existing = Arc::new(WorkerSession::fresh(
        name.clone(),
        leader,
        [],
        port,
        control,
        h.ctx.workdir_for(&name),
    ));
    h.ctx.registry.attach(&existing, leader, existing.members());

    assert!(manager.adopt(leader, &[]).await.is_none());

    assert_eq!(manager.pool().len(), 2);
    assert_eq!(warm_ready_count(&h), 2);
    for warm in &warm_names {
        assert!(h.frontend.is_registered(warm), "{warm} lost its entry");
    }
    assert!(!h.frontend.is_registered(&name));
    assert!(Arc::ptr_eq(
        &h.ctx.registry.session_of(leader).unwrap(),
        &existing
    ));
    assert!(!existing.is_cleaned());

    h.ctx.shutdown.trigger();
    h.ctx.cleanup.cleanup_all().await;
}
