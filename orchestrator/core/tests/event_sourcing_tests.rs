// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Event log behaviour: replay round trip, restart from the persisted
//! cursor, pause/resume determinism and the ordered event stream.

mod common;

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

use common::{agent, config, plan, Harness, HarnessBuilder, ScriptedProvider};
use mission_core::application::{MissionLedger, MissionStores, SubmitRequest};
use mission_core::domain::events::MissionEventKind;
use mission_core::domain::mission::{MissionMode, MissionStatus};
use mission_core::domain::plan::StepStatus;
use mission_core::domain::projection::MissionProjection;
use mission_core::infrastructure::event_bus::MissionEventBus;
use serde_json::json;

fn research_providers() -> (Arc<ScriptedProvider>, Arc<ScriptedProvider>) {
    let planner = Arc::new(ScriptedProvider::new("planner").reply(
        "Break the objective",
        &plan(json!([
            {"description": "Collect pricing pages", "capabilities": ["research"]},
            {"description": "Compare plan limits", "capabilities": ["research"], "produces": "table"},
            {"description": "Draft the recommendation", "capabilities": ["write"]}
        ])),
    ));
    let worker = Arc::new(
        ScriptedProvider::new("worker")
            .reply("Current step: Collect", "Three vendors publish pricing.")
            .reply("Current step: Compare", "| vendor | seats |\n| A | 10 |")
            .reply("Current step: Draft", "Answer: choose vendor A"),
    );
    (planner, worker)
}

fn research_harness(stores: Option<MissionStores>) -> Harness {
    let (planner, worker) = research_providers();
    let builder = HarnessBuilder::new(config(vec![
        agent("researcher", "worker", &["research"]),
        agent("writer", "worker", &["write"]),
    ]))
    .provider("planner", planner)
    .provider("worker", worker);
    match stores {
        Some(stores) => builder.stores(stores).build(),
        None => builder.build(),
    }
}

fn request() -> SubmitRequest {
    SubmitRequest::new("Recommend a vendor", MissionMode::AutonomousAutomatic).with_budget(2.0)
}

#[tokio::test]
async fn test_replaying_the_log_reconstructs_state() {
    let harness = research_harness(None);
    let engine = &harness.engine;
    let id = engine.submit(request()).await.unwrap();
    assert_eq!(engine.drive(id).await.unwrap(), MissionStatus::Completed);

    let events = engine.events(id, 1).await.unwrap();
    let replayed = MissionProjection::replay(&events).unwrap();
    let current = engine.get_projection(id).await.unwrap();
    assert_eq!(replayed, current);
    assert_eq!(current.version(), events.len() as u64);

    let rebuilt = engine.rebuild(id).await.unwrap();
    assert_eq!(rebuilt, current);

    // step artifact plus synthesis
    assert_eq!(current.artifacts.len(), 2);
}

#[tokio::test]
async fn test_budget_spent_never_decreases() {
    let harness = research_harness(None);
    let engine = &harness.engine;
    let id = engine.submit(request()).await.unwrap();
    engine.drive(id).await.unwrap();

    let events = engine.events(id, 1).await.unwrap();
    let mut spent = 0.0;
    for prefix in 1..=events.len() {
        let projection = MissionProjection::replay(&events[..prefix]).unwrap();
        assert!(projection.mission.budget_spent >= spent);
        spent = projection.mission.budget_spent;
    }
    assert!((spent - 0.04).abs() < 1e-9);
}

#[tokio::test]
async fn test_restart_resumes_an_interrupted_step() {
    let stores = MissionStores::in_memory();
    let first = research_harness(Some(stores.clone()));
    let id = first.engine.submit(request()).await.unwrap();
    assert_eq!(first.engine.advance(id).await.unwrap(), MissionStatus::Ready);

    // The process dies right after recording that step 1 started.
    let bus = Arc::new(MissionEventBus::new(16, stores.events.clone()));
    let ledger = MissionLedger::new(stores.events.clone(), stores.cache.clone(), bus);
    let mut projection = ledger.load(id).await.unwrap();
    let step_id = projection.mission.steps[0].id;
    ledger
        .commit(
            &mut projection,
            vec![
                MissionEventKind::MissionStarted,
                MissionEventKind::StepStarted { step_id, attempt: 1 },
            ],
        )
        .await
        .unwrap();
    drop(first);

    let second = research_harness(Some(stores));
    let mission = second.engine.get_status(id).await.unwrap();
    assert_eq!(mission.cursor(), Some(0));
    assert_eq!(mission.steps[0].status, StepStatus::InProgress);

    assert_eq!(second.engine.drive(id).await.unwrap(), MissionStatus::Completed);
    let mission = second.engine.get_status(id).await.unwrap();
    assert_eq!(mission.steps[0].attempts, 2);
    assert_eq!(
        mission.steps[0].result.as_ref().map(|result| result.output.as_str()),
        Some("Three vendors publish pricing.")
    );
}

#[tokio::test]
async fn test_pause_and_resume_yield_the_same_artifacts() {
    let straight = research_harness(None);
    let straight_id = straight.engine.submit(request()).await.unwrap();
    straight.engine.drive(straight_id).await.unwrap();

    let paused = research_harness(None);
    let engine = &paused.engine;
    let id = engine.submit(request()).await.unwrap();
    assert_eq!(engine.advance(id).await.unwrap(), MissionStatus::Ready);
    assert!(engine.pause(id).await.is_err());
    assert_eq!(engine.advance(id).await.unwrap(), MissionStatus::Running);

    assert_eq!(engine.pause(id).await.unwrap(), MissionStatus::Paused);
    let version = engine.get_status(id).await.unwrap().version;
    assert_eq!(engine.advance(id).await.unwrap(), MissionStatus::Paused);
    assert_eq!(engine.get_status(id).await.unwrap().version, version);
    assert_eq!(engine.get_status(id).await.unwrap().cursor(), Some(1));

    assert_eq!(engine.resume(id).await.unwrap(), MissionStatus::Running);
    assert_eq!(engine.drive(id).await.unwrap(), MissionStatus::Completed);

    let summarize = |artifacts: Vec<mission_core::domain::artifact::MissionArtifact>| {
        artifacts
            .into_iter()
            .map(|artifact| (artifact.artifact_type, artifact.title, artifact.content))
            .collect::<Vec<_>>()
    };
    assert_eq!(
        summarize(engine.list_artifacts(id).await.unwrap()),
        summarize(straight.engine.list_artifacts(straight_id).await.unwrap())
    );

    let kinds = |events: Vec<mission_core::domain::events::MissionEvent>| {
        events
            .iter()
            .map(|event| event.event_type())
            .filter(|kind| !matches!(*kind, "mission_paused" | "mission_resumed"))
            .collect::<Vec<_>>()
    };
    assert_eq!(
        kinds(engine.events(id, 1).await.unwrap()),
        kinds(straight.engine.events(straight_id, 1).await.unwrap())
    );
}

#[tokio::test]
async fn test_subscriber_sees_every_event_in_order() {
    let harness = research_harness(None);
    let engine = &harness.engine;
    let id = engine.submit(request()).await.unwrap();

    let stream = engine.subscribe(id, 1);
    let collector = tokio::spawn(async move { stream.collect::<Vec<_>>().await });

    engine.drive(id).await.unwrap();
    let received = tokio::time::timeout(Duration::from_secs(5), collector)
        .await
        .expect("stream ends after the terminal event")
        .unwrap();

    let sequences: Vec<u64> = received
        .iter()
        .map(|event| event.as_ref().unwrap().sequence)
        .collect();
    let stored = engine.events(id, 1).await.unwrap();
    assert_eq!(sequences, (1..=stored.len() as u64).collect::<Vec<_>>());
    assert_eq!(
        received.last().unwrap().as_ref().unwrap().event_type(),
        "mission_completed"
    );
}

#[tokio::test]
async fn test_late_subscriber_replays_from_offset() {
    let harness = research_harness(None);
    let engine = &harness.engine;
    let id = engine.submit(request()).await.unwrap();
    engine.drive(id).await.unwrap();
    let total = engine.events(id, 1).await.unwrap().len() as u64;

    let replayed: Vec<u64> = engine
        .subscribe(id, 5)
        .map(|event| event.unwrap().sequence)
        .collect()
        .await;
    assert_eq!(replayed, (5..=total).collect::<Vec<_>>());
}
