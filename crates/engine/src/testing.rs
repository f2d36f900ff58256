//! Test doubles and fixtures shared by unit and integration tests.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use waypoint_core::{
    Agent, AgentId, Customer, CustomerId, DependencyIndex, DisambiguationIndex, Session,
};

use crate::context::MatchingContext;
use crate::generation::{GenerationHints, GenerationInfo, ModelClient, ModelResponse, TokenUsage};

/// One recorded model invocation.
#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub prompt: String,
    pub hints: GenerationHints,
}

/// Deterministic stand-in for the model backend. Replies are chosen by the
/// first registered substring rule that matches the prompt, falling back to
/// an empty checks reply. Optional initial failures and delays exercise the
/// retry and cancellation paths.
pub struct ScriptedModelClient {
    rules: Vec<(String, String)>,
    default_reply: String,
    failures_remaining: AtomicU32,
    delay: Option<(String, Duration)>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl Default for ScriptedModelClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedModelClient {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            default_reply: r#"{"checks": []}"#.to_string(),
            failures_remaining: AtomicU32::new(0),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Reply with `reply` whenever the prompt contains `needle`.
    pub fn respond_when(mut self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.rules.push((needle.into(), reply.into()));
        self
    }

    pub fn respond_default(mut self, reply: impl Into<String>) -> Self {
        self.default_reply = reply.into();
        self
    }

    /// Fail the first `count` calls before answering normally.
    pub fn fail_times(self, count: u32) -> Self {
        self.failures_remaining.store(count, Ordering::SeqCst);
        self
    }

    /// Sleep before answering any prompt containing `needle`.
    pub fn delay_when(mut self, needle: impl Into<String>, delay: Duration) -> Self {
        self.delay = Some((needle.into(), delay));
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    async fn generate(&self, prompt: &str, hints: GenerationHints) -> Result<ModelResponse> {
        self.calls
            .lock()
            .unwrap()
            .push(RecordedCall { prompt: prompt.to_string(), hints });

        if let Some((needle, delay)) = &self.delay {
            if prompt.contains(needle.as_str()) {
                tokio::time::sleep(*delay).await;
            }
        }

        if self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok()
        {
            bail!("scripted failure");
        }

        let text = self
            .rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| self.default_reply.clone());

        Ok(ModelResponse {
            text,
            info: GenerationInfo {
                model: "scripted".to_string(),
                duration_ms: 1,
                usage: TokenUsage { input_tokens: 10, output_tokens: 10 },
            },
        })
    }
}

/// Minimal context fixture: one agent, one customer, empty history and
/// relationship state.
pub fn scripted_context() -> MatchingContext {
    MatchingContext {
        agent: Agent {
            id: AgentId::new("agent-1"),
            name: "Support".to_string(),
            description: None,
        },
        session: Session::new("session-1", "agent-1", "customer-1"),
        customer: Customer { id: CustomerId::new("customer-1"), name: "Dana".to_string() },
        variables: Vec::new(),
        history: Vec::new(),
        terms: Vec::new(),
        capabilities: Vec::new(),
        staged_events: Vec::new(),
        active_journeys: Vec::new(),
        previously_applied: BTreeSet::new(),
        resolved_disambiguations: BTreeSet::new(),
        disambiguations: DisambiguationIndex::default(),
        dependencies: DependencyIndex::default(),
    }
}
