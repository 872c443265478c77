//! Integration tests for the routing core.
//!
//! These drive the engine exactly the way the IVR callback collaborator
//! does: one engine operation per telephony callback, from first contact
//! through feedback collection, against in-memory agent registries.

use anyhow::Result;
use serial_test::serial;
use std::time::Duration;

use ivrflow_routing_core::prelude::*;

async fn create_test_engine(agents: &[(&str, &str, Language)]) -> Result<CallRoutingEngine> {
    let engine = CallRoutingEngine::new(RoutingConfig::default()).await?;
    for (agent_id, contact_number, language) in agents {
        engine
            .provision_agent(*agent_id, *contact_number, *language)
            .await?;
    }
    engine.rebuild().await?;
    Ok(engine)
}

#[tokio::test]
#[serial]
async fn full_call_flow_with_feedback() {
    let engine = create_test_engine(&[("agent-a", "15550000001", Language::English)])
        .await
        .expect("engine creation failed");

    let call = CallId::from("call-001");
    assert!(engine.begin_session(call.clone(), "15551234567").unwrap());
    engine.select_language(&call, Language::English).unwrap();

    let agent = engine
        .connect_to_agent(&call)
        .await
        .unwrap()
        .expect("an agent should be available");
    assert_eq!(agent.id, AgentId::from("agent-a"));
    assert_eq!(agent.contact_number, "15550000001");

    // While reserved, the agent is not selectable for anyone else.
    let other = CallId::from("call-002");
    engine.begin_session(other.clone(), "15559876543").unwrap();
    engine.select_language(&other, Language::English).unwrap();
    assert!(engine.connect_to_agent(&other).await.unwrap().is_none());

    engine
        .handle_dial_status(&call, DialStatus::Completed)
        .await
        .unwrap();

    let outcome = engine.complete_call(&call, Some("4")).await.unwrap();
    assert!(outcome.duration_seconds >= 0.0);
    assert_eq!(outcome.rating, Some(4));
    assert_eq!(outcome.session.agent_id, Some(AgentId::from("agent-a")));

    let snapshot = engine.snapshot().await.unwrap();
    let agent = &snapshot.languages[&Language::English][0];
    assert!(agent.available);
    assert_eq!(agent.total_calls, 1);
    assert_eq!(agent.recent_call_count, 1);
    assert_eq!(agent.avg_rating, 4.0);

    let stats = engine.stats();
    assert_eq!(stats.calls_routed, 1);
    assert_eq!(stats.calls_unserved, 1);
    assert_eq!(stats.calls_completed, 1);
    assert_eq!(stats.feedback_received, 1);
}

#[tokio::test]
#[serial]
async fn failed_dial_releases_agent_with_zero_duration_and_no_feedback() {
    let engine = create_test_engine(&[("agent-a", "15550000001", Language::Spanish)])
        .await
        .expect("engine creation failed");

    let call = CallId::from("call-010");
    engine.begin_session(call.clone(), "15551234567").unwrap();
    engine.select_language(&call, Language::Spanish).unwrap();
    engine
        .connect_to_agent(&call)
        .await
        .unwrap()
        .expect("an agent should be available");

    engine
        .handle_dial_status(&call, DialStatus::NoAnswer)
        .await
        .unwrap();

    // Agent is back in the pool immediately, with a zero-duration call folded in.
    let snapshot = engine.snapshot().await.unwrap();
    let agent = &snapshot.languages[&Language::Spanish][0];
    assert!(agent.available);
    assert_eq!(agent.total_calls, 1);
    assert_eq!(agent.avg_call_duration_seconds, 0.0);

    // A feedback digit on the eventual completion must be ignored: the
    // call never connected, so no rating may reach the agent.
    let outcome = engine.complete_call(&call, Some("3")).await.unwrap();
    assert_eq!(outcome.rating, None);
    assert_eq!(outcome.session.agent_id, None);

    let snapshot = engine.snapshot().await.unwrap();
    let agent = &snapshot.languages[&Language::Spanish][0];
    assert_eq!(agent.avg_rating, 0.0);
    assert_eq!(agent.total_calls, 1, "end after a failed dial must not release again");
}

#[tokio::test]
#[serial]
async fn all_agents_busy_is_a_normal_outcome() {
    let engine = create_test_engine(&[("agent-a", "15550000001", Language::English)])
        .await
        .expect("engine creation failed");

    let first = CallId::from("call-020");
    engine.begin_session(first.clone(), "15551230001").unwrap();
    engine.select_language(&first, Language::English).unwrap();
    assert!(engine.connect_to_agent(&first).await.unwrap().is_some());

    let second = CallId::from("call-021");
    engine.begin_session(second.clone(), "15551230002").unwrap();
    engine.select_language(&second, Language::English).unwrap();
    assert!(engine.connect_to_agent(&second).await.unwrap().is_none());

    assert_eq!(engine.stats().calls_unserved, 1);
}

#[tokio::test]
#[serial]
async fn duplicate_telephony_events_are_idempotent() {
    let engine = create_test_engine(&[("agent-a", "15550000001", Language::English)])
        .await
        .expect("engine creation failed");

    let call = CallId::from("call-030");
    assert!(engine.begin_session(call.clone(), "15551234567").unwrap());
    assert!(!engine.begin_session(call.clone(), "15551234567").unwrap());

    engine.select_language(&call, Language::English).unwrap();
    let outcome = engine.complete_call(&call, None).await.unwrap();
    assert_eq!(outcome.rating, None);

    // Retried completion callback: missing session, no second accounting.
    let err = engine.complete_call(&call, None).await.unwrap_err();
    assert!(matches!(err, RoutingError::UnknownSession { .. }));
    assert_eq!(engine.stats().calls_completed, 1);
    assert_eq!(engine.session_stats().total_ended, 1);
}

#[tokio::test]
#[serial]
async fn operations_on_unknown_sessions_are_surfaced() {
    let engine = create_test_engine(&[]).await.expect("engine creation failed");

    let ghost = CallId::from("ghost");
    assert!(matches!(
        engine.select_language(&ghost, Language::English),
        Err(RoutingError::UnknownSession { .. })
    ));
    assert!(matches!(
        engine.connect_to_agent(&ghost).await,
        Err(RoutingError::UnknownSession { .. })
    ));
    assert!(matches!(
        engine.handle_dial_status(&ghost, DialStatus::Failed).await,
        Err(RoutingError::UnknownSession { .. })
    ));
}

#[tokio::test]
#[serial]
async fn connecting_before_language_selection_errors() {
    let engine = create_test_engine(&[("agent-a", "15550000001", Language::English)])
        .await
        .expect("engine creation failed");

    let call = CallId::from("call-040");
    engine.begin_session(call.clone(), "15551234567").unwrap();

    let err = engine.connect_to_agent(&call).await.unwrap_err();
    assert!(matches!(err, RoutingError::LanguageNotSelected { .. }));
}

#[tokio::test]
#[serial]
async fn completed_calls_spread_load_across_the_pool() {
    let engine = create_test_engine(&[
        ("agent-a", "15550000001", Language::English),
        ("agent-b", "15550000002", Language::English),
    ])
    .await
    .expect("engine creation failed");

    let first = CallId::from("call-050");
    engine.begin_session(first.clone(), "15551230001").unwrap();
    engine.select_language(&first, Language::English).unwrap();
    let served_by = engine.connect_to_agent(&first).await.unwrap().unwrap();
    assert_eq!(served_by.id, AgentId::from("agent-a"));
    engine.complete_call(&first, None).await.unwrap();

    // agent-a now carries a rolling-window call (+10); agent-b is cheaper.
    let second = CallId::from("call-051");
    engine.begin_session(second.clone(), "15551230002").unwrap();
    engine.select_language(&second, Language::English).unwrap();
    let served_by = engine.connect_to_agent(&second).await.unwrap().unwrap();
    assert_eq!(served_by.id, AgentId::from("agent-b"));
}

#[tokio::test]
#[serial]
async fn snapshots_are_published_after_mutating_operations() {
    let engine = create_test_engine(&[("agent-a", "15550000001", Language::English)])
        .await
        .expect("engine creation failed");

    let mut snapshots = engine.subscribe();

    let call = CallId::from("call-060");
    engine.begin_session(call.clone(), "15551234567").unwrap();
    engine.select_language(&call, Language::English).unwrap();
    engine.connect_to_agent(&call).await.unwrap().unwrap();

    let snapshot = tokio::time::timeout(Duration::from_secs(1), snapshots.recv())
        .await
        .expect("snapshot should be published promptly")
        .expect("channel should stay open");

    let agent = &snapshot.languages[&Language::English][0];
    assert!(!agent.available);
    assert_eq!(agent.busy_with.as_deref(), Some("call-060"));
}

#[tokio::test]
#[serial]
async fn rolling_window_reset_levels_the_pool() {
    let engine = create_test_engine(&[
        ("agent-a", "15550000001", Language::English),
        ("agent-b", "15550000002", Language::English),
    ])
    .await
    .expect("engine creation failed");

    for n in 0..3 {
        let call = CallId::from(format!("call-07{}", n).as_str());
        engine.begin_session(call.clone(), "15551230001").unwrap();
        engine.select_language(&call, Language::English).unwrap();
        engine.connect_to_agent(&call).await.unwrap().unwrap();
        engine.complete_call(&call, None).await.unwrap();
    }

    engine.reset_rolling_window().await.unwrap();

    let snapshot = engine.snapshot().await.unwrap();
    for agent in &snapshot.languages[&Language::English] {
        assert_eq!(agent.recent_call_count, 0);
        assert!(agent.total_calls > 0, "lifetime counters survive the reset");
    }
}
