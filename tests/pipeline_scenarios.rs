use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use oxkair_core::config::EngineConfig;
use oxkair_core::error::OxkairError;
use oxkair_core::state::WorkflowState;
use oxkair_core::traits::NoopProgress;
use oxkair_core::types::{AgentId, ErrorKind, FailurePolicy, Severity};
use oxkair_engine::{AgentDescriptor, AgentRegistry, Engine};
use oxkair_test_utils::{MockAgent, RecordingSink};

const CODING_PIPELINE: &[(&str, &[&str])] = &[
    ("cpt", &[]),
    ("icd", &["cpt"]),
    ("lcd", &["icd"]),
    ("cci", &["cpt"]),
    ("modifier", &["cpt", "cci"]),
    ("rvu", &["cpt"]),
];

/// Coding pipeline where every agent echoes its inputs after a short delay,
/// with `overrides` swapped in for selected agents.
fn coding_engine(overrides: Vec<(&str, MockAgent)>, policy: FailurePolicy) -> Engine {
    let mut overrides = overrides;
    let mut registry = AgentRegistry::new();
    for (id, requires) in CODING_PIPELINE {
        let agent = match overrides.iter().position(|(name, _)| name == id) {
            Some(i) => overrides.remove(i).1,
            None => MockAgent::echo_inputs(requires.iter().copied())
                .with_delay(Duration::from_millis(30)),
        };
        registry
            .register(AgentDescriptor::new(*id, *id, agent).requires(requires.iter().copied()))
            .unwrap();
    }
    let config = EngineConfig {
        failure_policy: policy,
        ..EngineConfig::default()
    };
    Engine::new(registry, config)
}

fn case_note() -> WorkflowState {
    let mut state = WorkflowState::new();
    state.set_step("case-note".into(), json!("Established patient, type 2 diabetes follow-up"));
    state
}

#[test]
fn coding_pipeline_plan() {
    let plan = coding_engine(vec![], FailurePolicy::ContinueOnError)
        .plan()
        .unwrap();

    let foundation: Vec<&str> = plan.foundation.iter().map(|a| a.id.as_str()).collect();
    let pathways: Vec<Vec<&str>> = plan
        .pathways
        .iter()
        .map(|p| p.iter().map(|a| a.id.as_str()).collect())
        .collect();
    assert_eq!(foundation, vec!["cpt"]);
    assert_eq!(
        pathways,
        vec![vec!["icd", "lcd"], vec!["cci", "modifier"], vec!["rvu"]]
    );
}

#[tokio::test]
async fn coding_pipeline_runs_pathways_concurrently() {
    let engine = coding_engine(vec![], FailurePolicy::ContinueOnError);
    let report = engine.run_with_defaults(case_note()).await.unwrap();

    assert!(report.succeeded);
    assert!(report.errors.is_empty());
    for step in ["cpt", "icd", "lcd", "cci", "modifier", "rvu"] {
        assert!(report.final_state.get_str(step).is_some(), "missing {step}");
    }
    let modifier = report.final_state.get_str("modifier").unwrap();
    assert_eq!(modifier["cci"], json!({ "cpt": {} }));
    assert_eq!(modifier["cpt"], json!({}));

    let spans = &report.pathway_spans;
    assert_eq!(spans.len(), 3);
    assert!(spans[0].overlaps(&spans[1]));
    assert!(spans[1].overlaps(&spans[2]));
    assert!(spans[0].overlaps(&spans[2]));
}

#[tokio::test]
async fn fatal_lcd_only_stops_its_own_pathway() {
    let engine = coding_engine(
        vec![("lcd", MockAgent::fatal("coverage policy not found"))],
        FailurePolicy::ContinueOnError,
    );
    let report = engine.run_with_defaults(case_note()).await.unwrap();

    let state = &report.final_state;
    assert!(state.get_str("icd").is_some());
    assert!(state.get_str("lcd").is_none());
    assert!(state.get_str("cci").is_some());
    assert!(state.get_str("modifier").is_some());
    assert!(state.get_str("rvu").is_some());
    assert!(!report.succeeded);

    let fatal: Vec<_> = report.fatal_errors().collect();
    assert_eq!(fatal.len(), 1);
    assert_eq!(fatal[0].agent_id, AgentId::from("lcd"));
    assert_eq!(fatal[0].message, "coverage policy not found");
}

#[tokio::test]
async fn fatal_pathway_head_leaves_sibling_pathway_intact() {
    let mut registry = AgentRegistry::new();
    registry
        .register(AgentDescriptor::new("f", "f", MockAgent::ok()))
        .unwrap();
    registry
        .register(AgentDescriptor::new("x", "x", MockAgent::fatal("boom")).requires(["f"]))
        .unwrap();
    registry
        .register(AgentDescriptor::new("y", "y", MockAgent::returning(json!(7))).requires(["f"]))
        .unwrap();
    let engine = Engine::new(registry, EngineConfig::default());

    let report = engine
        .run(WorkflowState::new(), FailurePolicy::ContinueOnError, Arc::new(NoopProgress))
        .await
        .unwrap();

    assert!(!report.succeeded);
    assert_eq!(report.final_state.get_str("y"), Some(&json!(7)));
    assert!(report.final_state.get_str("x").is_none());
}

#[tokio::test]
async fn recoverable_failure_degrades_and_continues() {
    let engine = coding_engine(
        vec![("cci", MockAgent::recoverable("edit table stale"))],
        FailurePolicy::ContinueOnError,
    );
    let report = engine.run_with_defaults(case_note()).await.unwrap();

    assert!(report.succeeded);
    assert_eq!(report.final_state.get_str("cci"), Some(&serde_json::Value::Null));
    assert!(report.final_state.get_str("modifier").is_some());
    let recoverable: Vec<_> = report.recoverable_errors().collect();
    assert_eq!(recoverable.len(), 1);
    assert_eq!(recoverable[0].severity, Severity::Recoverable);
    assert_eq!(recoverable[0].kind, ErrorKind::Agent);
}

#[tokio::test]
async fn fail_fast_foundation_failure_skips_every_pathway() {
    let icd = MockAgent::ok();
    let icd_calls = icd.call_counter();
    let engine = coding_engine(
        vec![("cpt", MockAgent::fatal("note unreadable")), ("icd", icd)],
        FailurePolicy::FailFast,
    );
    let report = engine.run_with_defaults(case_note()).await.unwrap();

    assert!(!report.succeeded);
    assert!(report.aborted);
    assert_eq!(icd_calls.load(Ordering::SeqCst), 0);
    assert_eq!(report.final_state, {
        let mut expected = case_note();
        expected.errors = report.errors.clone();
        expected
    });
}

#[tokio::test]
async fn continue_on_error_foundation_failure_skips_dependants() {
    let engine = coding_engine(
        vec![("cpt", MockAgent::fatal("note unreadable"))],
        FailurePolicy::ContinueOnError,
    );
    let report = engine.run_with_defaults(case_note()).await.unwrap();

    assert!(!report.succeeded);
    assert!(!report.aborted);
    for step in ["cpt", "icd", "lcd", "cci", "modifier", "rvu"] {
        assert!(report.final_state.get_str(step).is_none(), "{step} should be absent");
    }
    assert_eq!(report.fatal_errors().count(), 1);
    assert!(report
        .recoverable_errors()
        .all(|e| e.kind == ErrorKind::SkippedDueToDependencyFailure));
}

#[tokio::test]
async fn runs_are_idempotent() {
    let engine = coding_engine(
        vec![("rvu", MockAgent::recoverable("fee schedule missing"))],
        FailurePolicy::ContinueOnError,
    );

    let first = engine.run_with_defaults(case_note()).await.unwrap();
    let second = engine.run_with_defaults(case_note()).await.unwrap();

    assert_eq!(first.final_state, second.final_state);
    assert_eq!(first.errors, second.errors);
}

#[tokio::test]
async fn progress_is_ordered_and_completes() {
    let sink = RecordingSink::new();
    let engine = coding_engine(vec![], FailurePolicy::ContinueOnError);
    engine
        .run(case_note(), FailurePolicy::ContinueOnError, sink.clone())
        .await
        .unwrap();

    let events = sink.events();
    assert!(events.windows(2).all(|w| w[0].seq < w[1].seq));
    assert!(events.windows(2).all(|w| w[0].percent <= w[1].percent));
    assert_eq!(events.last().map(|e| e.percent), Some(100));
}

#[test]
fn duplicate_step_is_rejected_at_registration() {
    let mut registry = AgentRegistry::new();
    registry
        .register(AgentDescriptor::new("cpt", "cpt", MockAgent::ok()))
        .unwrap();
    let err = registry
        .register(AgentDescriptor::new("cpt-v2", "cpt", MockAgent::ok()))
        .unwrap_err();
    assert!(matches!(err, OxkairError::DuplicateStep { .. }));
}

#[tokio::test]
async fn cycle_is_reported_not_hung() {
    let mut registry = AgentRegistry::new();
    registry
        .register(AgentDescriptor::new("a", "a", MockAgent::ok()).requires(["b"]))
        .unwrap();
    registry
        .register(AgentDescriptor::new("b", "b", MockAgent::ok()).requires(["a"]))
        .unwrap();
    let engine = Engine::new(registry, EngineConfig::default());

    let err = tokio::time::timeout(
        Duration::from_secs(1),
        engine.run_with_defaults(WorkflowState::new()),
    )
    .await
    .expect("cycle detection must not hang")
    .unwrap_err();
    match err {
        OxkairError::CyclicDependency { cycle } => {
            assert_eq!(cycle.first(), cycle.last());
            assert!(cycle.len() >= 3);
        }
        other => panic!("unexpected error: {other}"),
    }
}
