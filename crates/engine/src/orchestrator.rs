//! Concurrent execution of a matching pass: strategy grouping, batch
//! fan-out with bounded retry, cancellation salvage, ordered merge, and
//! per-strategy conflict resolution.

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use waypoint_core::{Event, Guideline, MatchingConfig};

use crate::batch::{
    BatchCategory, BatchOutcome, BatchSizePolicy, DefaultBatchSizePolicy, MatchingBatch,
};
use crate::batches::{AdherenceOutcome, ResponseAnalysisBatch};
use crate::context::{MatchingContext, MatchingResult, ResponseAnalysisResult};
use crate::errors::{BatchError, CancellationReceipt, EngineError};
use crate::generation::{GenerationHints, GenerationInfo, ModelClient};
use crate::generic_strategy::temperature_for_attempt;
use crate::strategy::{MatchingStrategy, StrategyResolver};

/// A batch that ran out of attempts. The orchestrator attaches the owning
/// strategy before surfacing it.
struct BatchFailure {
    category: BatchCategory,
    attempts: u32,
    source: BatchError,
}

async fn run_with_retry(
    batch: &dyn MatchingBatch,
    config: &MatchingConfig,
) -> Result<BatchOutcome, BatchFailure> {
    let mut last_error: Option<BatchError> = None;
    for attempt in 0..config.max_batch_attempts {
        let temperature = temperature_for_attempt(&config.temperature_schedule, attempt);
        match batch.process(GenerationHints { temperature }).await {
            Ok(outcome) => return Ok(outcome),
            Err(error) => {
                warn!(
                    event_name = "matching.batch.attempt_failed",
                    category = ?batch.category(),
                    attempt = attempt + 1,
                    max_attempts = config.max_batch_attempts,
                    error = %error,
                    "batch attempt failed"
                );
                last_error = Some(error);
            }
        }
    }
    Err(BatchFailure {
        category: batch.category(),
        attempts: config.max_batch_attempts,
        source: last_error.unwrap_or_else(|| {
            BatchError::Model(anyhow::anyhow!("no attempts were made"))
        }),
    })
}

/// Entry point for a matching pass. Holds no per-pass state; every call is
/// independent, so concurrent sessions share one orchestrator.
pub struct MatchingOrchestrator {
    model: Arc<dyn ModelClient>,
    resolver: StrategyResolver,
    config: MatchingConfig,
    size_policy: Arc<dyn BatchSizePolicy>,
}

impl MatchingOrchestrator {
    pub fn new(
        model: Arc<dyn ModelClient>,
        resolver: StrategyResolver,
        config: MatchingConfig,
    ) -> Self {
        Self { model, resolver, config, size_policy: Arc::new(DefaultBatchSizePolicy) }
    }

    pub fn with_size_policy(mut self, policy: Arc<dyn BatchSizePolicy>) -> Self {
        self.size_policy = policy;
        self
    }

    /// Stable grouping by resolved strategy, in first-seen order. Each
    /// strategy later sees only its own guidelines plus the full candidate
    /// set for cross-guideline lookups.
    fn group_by_strategy(
        &self,
        guidelines: &[Guideline],
    ) -> Vec<(Arc<dyn MatchingStrategy>, Vec<Guideline>)> {
        let mut groups: Vec<(Arc<dyn MatchingStrategy>, Vec<Guideline>)> = Vec::new();
        for guideline in guidelines {
            let strategy = self.resolver.resolve(guideline);
            match groups.iter_mut().find(|(existing, _)| existing.name() == strategy.name()) {
                Some((_, own)) => own.push(guideline.clone()),
                None => groups.push((strategy, vec![guideline.clone()])),
            }
        }
        groups
    }

    /// Run the full pass: classify, batch, execute concurrently, merge in
    /// creation order, then run each strategy's conflict resolution.
    ///
    /// Cancellation is reacted to, never originated: when `cancellation`
    /// fires mid-flight, remaining batches are aborted and the telemetry of
    /// the ones that finished rides out on the error.
    #[tracing::instrument(name = "matching_pass", skip_all, fields(session_id = %context.session.id))]
    pub async fn match_guidelines(
        &self,
        context: Arc<MatchingContext>,
        guidelines: &[Guideline],
        cancellation: &CancellationToken,
    ) -> Result<MatchingResult, EngineError> {
        let groups = self.group_by_strategy(guidelines);

        let mut batches: Vec<Box<dyn MatchingBatch>> = Vec::new();
        let mut batch_strategies: Vec<&'static str> = Vec::new();
        for (strategy, own) in &groups {
            let created = strategy.create_batches(&context, own, guidelines)?;
            for _ in 0..created.len() {
                batch_strategies.push(strategy.name());
            }
            batches.extend(created);
        }

        debug!(
            event_name = "matching.pass.started",
            session_id = %context.session.id,
            guideline_count = guidelines.len(),
            strategy_count = groups.len(),
            batch_count = batches.len(),
            "matching pass started"
        );

        let batch_count = batches.len();
        let mut join_set: JoinSet<(usize, Result<BatchOutcome, BatchFailure>)> = JoinSet::new();
        for (index, batch) in batches.into_iter().enumerate() {
            let config = self.config.clone();
            join_set.spawn(async move {
                let result = run_with_retry(batch.as_ref(), &config).await;
                (index, result)
            });
        }

        let mut outcomes: Vec<Option<BatchOutcome>> = (0..batch_count).map(|_| None).collect();
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    return Err(self.salvage(context.as_ref(), join_set, outcomes).await);
                }
                joined = join_set.join_next() => {
                    match joined {
                        None => break,
                        Some(Ok((index, Ok(outcome)))) => outcomes[index] = Some(outcome),
                        Some(Ok((index, Err(failure)))) => {
                            join_set.abort_all();
                            return Err(EngineError::BatchFailed {
                                strategy: batch_strategies[index],
                                category: failure.category,
                                attempts: failure.attempts,
                                source: failure.source,
                            });
                        }
                        Some(Err(join_error)) => {
                            join_set.abort_all();
                            return Err(EngineError::TaskPanicked(join_error.to_string()));
                        }
                    }
                }
            }
        }

        // Merge strictly in batch-creation order.
        let mut matches = Vec::new();
        let mut telemetry: Vec<GenerationInfo> = Vec::new();
        for outcome in outcomes.into_iter().flatten() {
            matches.extend(outcome.matches);
            telemetry.push(outcome.telemetry);
        }

        for (strategy, _) in &groups {
            let transform = strategy
                .transform_matches(&context, matches)
                .await
                .map_err(EngineError::Strategy)?;
            matches = transform.matches;
            telemetry.extend(transform.telemetry);
        }

        info!(
            event_name = "matching.pass.completed",
            session_id = %context.session.id,
            batch_count,
            match_count = matches.len(),
            "matching pass completed"
        );

        Ok(MatchingResult { matches, telemetry })
    }

    /// Abort what is still in flight, keep what already finished, and wrap
    /// the salvaged telemetry in the cancellation error.
    async fn salvage(
        &self,
        context: &MatchingContext,
        mut join_set: JoinSet<(usize, Result<BatchOutcome, BatchFailure>)>,
        mut outcomes: Vec<Option<BatchOutcome>>,
    ) -> EngineError {
        join_set.abort_all();
        while let Some(joined) = join_set.join_next().await {
            if let Ok((index, Ok(outcome))) = joined {
                outcomes[index] = Some(outcome);
            }
        }

        let telemetry: Vec<GenerationInfo> =
            outcomes.into_iter().flatten().map(|outcome| outcome.telemetry).collect();
        let receipt = CancellationReceipt::new(context.session.id.clone(), telemetry);

        info!(
            event_name = "matching.pass.cancelled",
            session_id = %context.session.id,
            completed_batches = receipt.completed_batches(),
            "matching pass cancelled; completed work salvaged"
        );

        EngineError::Cancelled(receipt)
    }

    /// Post-response mirror of the matching pass: classify which of the
    /// given guidelines the drafted response adhered to. Telemetry only;
    /// nothing here feeds back into the same turn's decision.
    #[tracing::instrument(name = "analysis_pass", skip_all, fields(session_id = %context.session.id))]
    pub async fn analyze_response(
        &self,
        context: Arc<MatchingContext>,
        guidelines: &[Guideline],
        response_events: &[Event],
        cancellation: &CancellationToken,
    ) -> Result<ResponseAnalysisResult, EngineError> {
        let size = self.size_policy.batch_size(guidelines.len()).max(1);
        let chunks: Vec<Vec<Guideline>> =
            guidelines.chunks(size).map(|chunk| chunk.to_vec()).collect();
        let batch_count = chunks.len();

        let mut join_set: JoinSet<(usize, Result<AdherenceOutcome, BatchFailure>)> =
            JoinSet::new();
        for (index, chunk) in chunks.into_iter().enumerate() {
            let batch = ResponseAnalysisBatch::new(
                Arc::clone(&context),
                Arc::clone(&self.model),
                response_events.to_vec(),
                chunk,
            );
            let config = self.config.clone();
            join_set.spawn(async move {
                let mut last_error: Option<BatchError> = None;
                for attempt in 0..config.max_batch_attempts {
                    let temperature =
                        temperature_for_attempt(&config.temperature_schedule, attempt);
                    match batch.process(GenerationHints { temperature }).await {
                        Ok(outcome) => return (index, Ok(outcome)),
                        Err(error) => last_error = Some(error),
                    }
                }
                let failure = BatchFailure {
                    category: batch.category(),
                    attempts: config.max_batch_attempts,
                    source: last_error.unwrap_or_else(|| {
                        BatchError::Model(anyhow::anyhow!("no attempts were made"))
                    }),
                };
                (index, Err(failure))
            });
        }

        let mut outcomes: Vec<Option<AdherenceOutcome>> =
            (0..batch_count).map(|_| None).collect();
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    join_set.abort_all();
                    while let Some(joined) = join_set.join_next().await {
                        if let Ok((index, Ok(outcome))) = joined {
                            outcomes[index] = Some(outcome);
                        }
                    }
                    let telemetry: Vec<GenerationInfo> = outcomes
                        .into_iter()
                        .flatten()
                        .map(|outcome| outcome.telemetry)
                        .collect();
                    return Err(EngineError::Cancelled(CancellationReceipt::new(
                        context.session.id.clone(),
                        telemetry,
                    )));
                }
                joined = join_set.join_next() => {
                    match joined {
                        None => break,
                        Some(Ok((index, Ok(outcome)))) => outcomes[index] = Some(outcome),
                        Some(Ok((_, Err(failure)))) => {
                            join_set.abort_all();
                            return Err(EngineError::BatchFailed {
                                strategy: "response-analysis",
                                category: failure.category,
                                attempts: failure.attempts,
                                source: failure.source,
                            });
                        }
                        Some(Err(join_error)) => {
                            join_set.abort_all();
                            return Err(EngineError::TaskPanicked(join_error.to_string()));
                        }
                    }
                }
            }
        }

        let mut adherence = Vec::new();
        let mut telemetry: Vec<GenerationInfo> = Vec::new();
        for outcome in outcomes.into_iter().flatten() {
            adherence.extend(outcome.adherence);
            telemetry.push(outcome.telemetry);
        }

        info!(
            event_name = "analysis.pass.completed",
            session_id = %context.session.id,
            batch_count,
            guideline_count = guidelines.len(),
            "response analysis completed"
        );

        Ok(ResponseAnalysisResult { adherence, telemetry })
    }
}
