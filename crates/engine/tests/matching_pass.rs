//! End-to-end matching passes against a scripted model backend.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use waypoint_core::{
    ActiveJourney, Event, EventSource, Guideline, GuidelineId, GuidelineMetadata, GuidelineTag,
    Journey, JourneyId, JourneyNodeId, JourneyNodeRef, JourneyPath, MatchingConfig,
};
use waypoint_engine::testing::{scripted_context, ScriptedModelClient};
use waypoint_engine::{
    BatchCategory, EngineError, GenericMatchingStrategy, MatchingContext, MatchingOrchestrator,
    ModelClient, StrategyResolver,
};

fn orchestrator(model: Arc<ScriptedModelClient>) -> MatchingOrchestrator {
    let _ = tracing_subscriber::fmt().with_env_filter("info").with_test_writer().try_init();
    let config = MatchingConfig::default();
    let client: Arc<dyn ModelClient> = model;
    let strategy = Arc::new(GenericMatchingStrategy::new(Arc::clone(&client), config.clone()));
    MatchingOrchestrator::new(client, StrategyResolver::new(strategy), config)
}

fn entry_guideline(id: &str, condition: &str, action: &str, journey: &str) -> Guideline {
    Guideline::actionable(id, condition, action)
        .with_tag(GuidelineTag::JourneyEntry(JourneyId::new(journey)))
}

fn step_guideline(id: &str, condition: &str, journey: &str, node: &str) -> Guideline {
    Guideline::actionable(id, condition, "advance the journey").with_metadata(GuidelineMetadata {
        journey_node: Some(JourneyNodeRef {
            journey_id: JourneyId::new(journey),
            node_id: JourneyNodeId::new(node),
        }),
        ..GuidelineMetadata::default()
    })
}

fn with_active_journey(context: &mut MatchingContext, id: &str, title: &str) {
    context.active_journeys.push(ActiveJourney {
        journey: Journey::new(id, title),
        path: JourneyPath::default(),
    });
}

const BOTH_AT_TEN: &str = r#"{"checks": [
    {"guideline_number": 1, "score": 10, "rationale": "clearly applies"},
    {"guideline_number": 2, "score": 10, "rationale": "also applies"}
]}"#;

#[tokio::test]
async fn retries_with_escalating_temperature() {
    let model = Arc::new(
        ScriptedModelClient::new().fail_times(2).respond_default(
            r#"{"checks": [{"guideline_number": 1, "score": 7, "rationale": "applies"}]}"#,
        ),
    );
    let orchestrator = orchestrator(Arc::clone(&model));
    let context = Arc::new(scripted_context());
    let guidelines = vec![Guideline::actionable("g-1", "a refund is requested", "offer the form")];

    let result = orchestrator
        .match_guidelines(context, &guidelines, &CancellationToken::new())
        .await
        .expect("third attempt succeeds");

    assert_eq!(result.matches.len(), 1);
    assert_eq!(result.matches[0].score, 7);

    let temperatures: Vec<f32> =
        model.calls().iter().map(|call| call.hints.temperature).collect();
    assert_eq!(temperatures, vec![0.1, 0.5, 0.9]);
}

#[tokio::test]
async fn exhausted_retries_fail_the_whole_pass() {
    let model = Arc::new(ScriptedModelClient::new().fail_times(3));
    let orchestrator = orchestrator(Arc::clone(&model));
    let context = Arc::new(scripted_context());
    let guidelines = vec![Guideline::actionable("g-1", "a refund is requested", "offer the form")];

    let error = orchestrator
        .match_guidelines(context, &guidelines, &CancellationToken::new())
        .await
        .expect_err("retry budget is exhausted");

    match error {
        EngineError::BatchFailed { strategy, category, attempts, .. } => {
            assert_eq!(strategy, "generic");
            assert_eq!(category, BatchCategory::Actionable);
            assert_eq!(attempts, 3);
        }
        other => panic!("expected BatchFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn cancellation_salvages_completed_batches() {
    // The actionable batch stalls; the observational one finishes first.
    let model = Arc::new(
        ScriptedModelClient::new()
            .delay_when("next action", Duration::from_secs(5))
            .respond_default(
                r#"{"checks": [{"guideline_number": 1, "score": 6, "rationale": "holds"}]}"#,
            ),
    );
    let orchestrator = orchestrator(Arc::clone(&model));
    let context = Arc::new(scripted_context());
    let guidelines = vec![
        Guideline::observational("g-obs", "the customer sounds upset"),
        Guideline::actionable("g-act", "a refund is requested", "offer the form"),
    ];

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let error = orchestrator
        .match_guidelines(Arc::clone(&context), &guidelines, &token)
        .await
        .expect_err("pass is cancelled");

    assert!(error.is_cancellation());
    match error {
        EngineError::Cancelled(receipt) => {
            assert_eq!(receipt.session_id, context.session.id);
            assert_eq!(receipt.completed_batches(), 1);
            assert_eq!(receipt.into_telemetry().len(), 1);
        }
        other => panic!("expected Cancelled, got {other:?}"),
    }
}

#[tokio::test]
async fn two_confident_journey_entries_collapse_into_one_clarification() {
    let model = Arc::new(
        ScriptedModelClient::new()
            .respond_when(
                "may conflict over",
                r#"{"clarification_needed": true,
                    "clarification": "Do you want to change the booking or cancel it?",
                    "target_numbers": [1, 2]}"#,
            )
            .respond_default(BOTH_AT_TEN),
    );
    let orchestrator = orchestrator(Arc::clone(&model));
    let context = Arc::new(scripted_context());
    let guidelines = vec![
        entry_guideline("g-change", "the customer wants to change a booking", "start the change flow", "j-change"),
        entry_guideline("g-cancel", "the customer wants to cancel a booking", "start the cancel flow", "j-cancel"),
    ];

    let result = orchestrator
        .match_guidelines(context, &guidelines, &CancellationToken::new())
        .await
        .expect("pass succeeds");

    assert_eq!(result.matches.len(), 1);
    let clarification = &result.matches[0];
    assert!(clarification.metadata.synthetic);
    assert_eq!(
        clarification.guideline.content.action.as_deref(),
        Some("Do you want to change the booking or cancel it?")
    );
    // One actionable batch plus one conflict clarification call.
    assert_eq!(result.telemetry.len(), 2);
}

#[tokio::test]
async fn score_gap_beyond_tolerance_is_not_a_conflict() {
    let model = Arc::new(
        ScriptedModelClient::new().respond_when(
            "next action",
            r#"{"checks": [
                {"guideline_number": 1, "score": 10, "rationale": "entry applies"},
                {"guideline_number": 2, "score": 6, "rationale": "weakly applies"}
            ]}"#,
        )
        .respond_when(
            "is in progress",
            r#"{"checks": [{"guideline_number": 1, "score": 8, "rationale": "next step"}]}"#,
        ),
    );
    let orchestrator = orchestrator(Arc::clone(&model));
    let mut context = scripted_context();
    with_active_journey(&mut context, "j-refund", "Refund flow");
    let context = Arc::new(context);
    let guidelines = vec![
        entry_guideline("g-entry", "the customer wants a refund", "start the refund flow", "j-refund"),
        Guideline::actionable("g-other", "the customer mentions shipping", "check the tracking"),
        step_guideline("g-step", "the order number is known", "j-refund", "n-1"),
    ];

    let result = orchestrator
        .match_guidelines(Arc::clone(&context), &guidelines, &CancellationToken::new())
        .await
        .expect("pass succeeds");

    // No clarification call was made.
    assert!(model.calls().iter().all(|call| !call.prompt.contains("may conflict over")));

    // Dominance keeps the journey's entry and steps and drops the weaker
    // unrelated actionable.
    let ids: Vec<&GuidelineId> =
        result.matches.iter().map(|m| &m.guideline.id).collect();
    assert!(ids.contains(&&GuidelineId::new("g-entry")));
    assert!(ids.contains(&&GuidelineId::new("g-step")));
    assert!(!ids.contains(&&GuidelineId::new("g-other")));

    let step = result
        .matches
        .iter()
        .find(|m| m.guideline.id == GuidelineId::new("g-step"))
        .expect("step match survives");
    assert_eq!(
        step.metadata.step_selection_journey_id,
        Some(JourneyId::new("j-refund"))
    );
}

#[tokio::test]
async fn disambiguation_group_replaces_source_and_targets() {
    let model = Arc::new(
        ScriptedModelClient::new()
            .respond_when(
                "genuinely ambiguous",
                r#"{"clarification_needed": true,
                    "clarification": "Is this about your current order or a past one?",
                    "target_numbers": [1, 2]}"#,
            )
            .respond_when(
                "next action",
                r#"{"checks": [
                    {"guideline_number": 1, "score": 5, "rationale": "maybe"},
                    {"guideline_number": 2, "score": 5, "rationale": "maybe"}
                ]}"#,
            ),
    );
    let orchestrator = orchestrator(Arc::clone(&model));
    let mut context = scripted_context();
    context
        .disambiguations
        .insert_group(
            GuidelineId::new("g-src"),
            vec![GuidelineId::new("g-current"), GuidelineId::new("g-past")],
        )
        .unwrap();
    let context = Arc::new(context);
    let guidelines = vec![
        Guideline::observational("g-src", "the customer mentions an order vaguely"),
        Guideline::actionable("g-current", "it is about the current order", "open it"),
        Guideline::actionable("g-past", "it is about a past order", "look it up"),
    ];

    let result = orchestrator
        .match_guidelines(context, &guidelines, &CancellationToken::new())
        .await
        .expect("pass succeeds");

    assert_eq!(result.matches.len(), 1);
    let clarification = &result.matches[0];
    assert!(clarification.metadata.synthetic);
    assert_eq!(
        clarification.guideline.content.action.as_deref(),
        Some("Is this about your current order or a past one?")
    );
    let proposal = clarification.metadata.disambiguation.as_ref().expect("proposal rides along");
    assert_eq!(proposal.targets.len(), 2);
}

#[tokio::test]
async fn inactive_journey_steps_are_never_evaluated() {
    let model = Arc::new(ScriptedModelClient::new());
    let orchestrator = orchestrator(Arc::clone(&model));
    let context = Arc::new(scripted_context());
    let guidelines =
        vec![step_guideline("g-step", "the order number is known", "j-dormant", "n-1")];

    let result = orchestrator
        .match_guidelines(context, &guidelines, &CancellationToken::new())
        .await
        .expect("pass succeeds");

    assert!(result.matches.is_empty());
    assert_eq!(model.call_count(), 0);
}

#[tokio::test]
async fn response_analysis_reports_adherence_per_guideline() {
    let model = Arc::new(ScriptedModelClient::new().respond_when(
        "adhered",
        r#"{"checks": [
            {"guideline_number": 1, "adhered": true, "rationale": "tone was polite"},
            {"guideline_number": 2, "adhered": false, "rationale": "no order number requested"}
        ]}"#,
    ));
    let orchestrator = orchestrator(Arc::clone(&model));
    let context = Arc::new(scripted_context());
    let guidelines = vec![
        Guideline::actionable("g-polite", "always", "stay polite"),
        Guideline::actionable("g-order", "a refund is requested", "ask for the order number"),
    ];
    let response = vec![Event::message(EventSource::Agent, "Happy to help with that refund!")];

    let result = orchestrator
        .analyze_response(context, &guidelines, &response, &CancellationToken::new())
        .await
        .expect("analysis succeeds");

    assert_eq!(result.adherence.len(), 2);
    assert!(result.adherence[0].adhered);
    assert!(!result.adherence[1].adhered);
    assert_eq!(result.telemetry.len(), 1);
}
