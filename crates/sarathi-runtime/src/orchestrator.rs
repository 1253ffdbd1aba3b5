//! Consultation orchestrator.
//!
//! One consultation walks a fixed state machine:
//!
//! ```text
//! QUEUED -> ACCEPTANCE -> REJECTED
//!                      -> DRAFT -> CRITIQUE -> REFINE -> STRUCTURE
//!                               -> [FALLBACK_RECONSTRUCT] -> REPAIR -> ESCALATE? -> COMPLETED
//!                      -> FAILED (draft failure or audit failure)
//! ```
//!
//! Stages within a run are strictly sequential. Every attempted stage is
//! appended to the audit sink before the next one starts, and the terminal
//! consultation status is committed last. Runs share nothing but the
//! per-provider circuit breakers, so any number can execute concurrently
//! on one orchestrator.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

use sarathi_core::schema::validate_result;
use sarathi_core::{
    generic_template, repair, AcceptanceCategory, EscalationEngine, EscalationReason,
    ReconstructionMethod, Reconstructor, RetrievedSource, StructuredResult,
};

use crate::acceptance::{AcceptanceGate, GateVerdict};
use crate::audit::{
    AuditError, AuditSink, Consultation, ConsultationStatus, EscalationEvent, InMemoryAuditStore,
    PassExecution, PassStatus, INPUT_EXCERPT_CHARS,
};
use crate::config::{PipelineMode, ProviderCapability, RuntimeConfig};
use crate::prompts::{
    critique_prompt, draft_prompt, refine_prompt, simplified_structure_prompt, structure_prompt,
    CRITIQUE_PLACEHOLDER,
};
use crate::providers::{LlmProvider, ProviderRegistry};
use crate::resilience::{CircuitBreaker, GuardedProvider};
use crate::stages::{excerpt, PassName, StageAttempt, StageRunner, StructureRunner};
use crate::RuntimeError;

/// A submitted dilemma plus the sources retrieved for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRequest {
    pub case_id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub sources: Vec<RetrievedSource>,
}

impl CaseRequest {
    pub fn new(
        case_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        sources: Vec<RetrievedSource>,
    ) -> Self {
        Self {
            case_id: case_id.into(),
            title: title.into(),
            description: description.into(),
            sources,
        }
    }

    /// Text the acceptance gate evaluates.
    pub fn text(&self) -> String {
        format!("{}\n\n{}", self.title, self.description)
            .trim()
            .to_string()
    }
}

/// Terminal result of one consultation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Accepted {
        result: StructuredResult,
        consultation_id: Uuid,
        passes_completed: u8,
        fallback_used: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reconstruction_method: Option<ReconstructionMethod>,
        escalated: bool,
    },
    Rejected {
        message: String,
        category: AcceptanceCategory,
        consultation_id: Uuid,
    },
    Failed {
        consultation_id: Uuid,
        failed_at_pass: u8,
        error: String,
    },
}

impl Outcome {
    pub fn consultation_id(&self) -> Uuid {
        match self {
            Outcome::Accepted {
                consultation_id, ..
            }
            | Outcome::Rejected {
                consultation_id, ..
            }
            | Outcome::Failed {
                consultation_id, ..
            } => *consultation_id,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Outcome::Accepted { .. })
    }
}

/// Builds a [`ConsultationOrchestrator`].
///
/// Providers given directly win over the ones built from config.
#[derive(Debug, Default)]
pub struct OrchestratorBuilder {
    config: RuntimeConfig,
    registry: Option<ProviderRegistry>,
    primary: Option<Arc<dyn LlmProvider>>,
    secondary: Option<(Arc<dyn LlmProvider>, ProviderCapability)>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn primary(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.primary = Some(provider);
        self
    }

    pub fn secondary(mut self, provider: Arc<dyn LlmProvider>, capability: ProviderCapability) -> Self {
        self.secondary = Some((provider, capability));
        self
    }

    pub fn audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn build(self) -> Result<ConsultationOrchestrator, RuntimeError> {
        self.config.validate()?;
        let registry = self.registry.unwrap_or_else(ProviderRegistry::with_defaults);

        let primary = match self.primary {
            Some(provider) => provider,
            None => registry.create_from_spec(&self.config.primary)?,
        };
        let secondary = match (self.secondary, &self.config.secondary) {
            (Some(pair), _) => Some(pair),
            (None, Some(spec)) => Some((registry.create_from_spec(spec)?, spec.capability)),
            (None, None) => None,
        };

        let guard = |provider: Arc<dyn LlmProvider>| {
            let breaker = CircuitBreaker::new(provider.name(), self.config.circuit_breaker.clone());
            GuardedProvider::new(provider, Arc::new(breaker), self.config.retry.clone())
        };
        let primary = guard(primary);
        let (secondary, secondary_capability) = match secondary {
            Some((provider, capability)) => (Some(guard(provider)), capability),
            None => (None, ProviderCapability::Full),
        };

        tracing::info!(
            primary = primary.name(),
            secondary = secondary.as_ref().map(GuardedProvider::name).unwrap_or("none"),
            mode = ?self.config.pipeline.mode,
            "Consultation orchestrator ready"
        );

        Ok(ConsultationOrchestrator {
            gate: AcceptanceGate::new(self.config.acceptance.clone()),
            escalation: EscalationEngine::new(self.config.escalation.clone()),
            reconstructor: Reconstructor::new(),
            audit: self
                .audit
                .unwrap_or_else(|| Arc::new(InMemoryAuditStore::new())),
            primary,
            secondary,
            secondary_capability,
            config: self.config,
        })
    }
}

/// Accumulated state of one run.
struct RunState {
    consultation: Consultation,
    /// Next attempt ordinal per pass number
    ordinals: [u32; 5],
    /// Pass numbers 1-4 that ended in success
    completed: BTreeSet<u8>,
    current_pass: u8,
}

impl RunState {
    fn new(consultation: Consultation) -> Self {
        Self {
            consultation,
            ordinals: [0; 5],
            completed: BTreeSet::new(),
            current_pass: 0,
        }
    }

    fn id(&self) -> Uuid {
        self.consultation.id
    }

    fn next_ordinal(&mut self, pass: PassName) -> u32 {
        let slot = &mut self.ordinals[usize::from(pass.number())];
        let ordinal = *slot;
        *slot += 1;
        ordinal
    }

    fn passes_completed(&self) -> u8 {
        u8::try_from(self.completed.len()).unwrap_or(u8::MAX)
    }
}

/// What pass 4 and repair produced.
struct Finalized {
    result: StructuredResult,
    fallback_reason: Option<String>,
    reconstruction_method: Option<ReconstructionMethod>,
    escalated: bool,
}

/// Runs consultations against a primary and optional secondary backend.
#[derive(Debug)]
pub struct ConsultationOrchestrator {
    config: RuntimeConfig,
    primary: GuardedProvider,
    secondary: Option<GuardedProvider>,
    secondary_capability: ProviderCapability,
    gate: AcceptanceGate,
    escalation: EscalationEngine,
    reconstructor: Reconstructor,
    audit: Arc<dyn AuditSink>,
}

impl ConsultationOrchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn primary(&self) -> &GuardedProvider {
        &self.primary
    }

    pub fn secondary(&self) -> Option<&GuardedProvider> {
        self.secondary.as_ref()
    }

    /// Run only the acceptance gate, without recording anything.
    pub async fn check_acceptance(&self, case: &CaseRequest) -> GateVerdict {
        self.gate.evaluate(&case.text(), Some(&self.primary)).await
    }

    /// Run one consultation to its terminal outcome.
    pub async fn run_consultation(&self, case: &CaseRequest) -> Outcome {
        let consultation = Consultation::new(
            case.case_id.clone(),
            self.config.pipeline.mode,
            self.primary.name(),
        );
        let mut run = RunState::new(consultation);
        let span = tracing::info_span!(
            "consultation",
            consultation_id = %run.id(),
            case_id = %case.case_id
        );

        let executed = self.execute(case, &mut run).instrument(span).await;
        match executed {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(
                    consultation_id = %run.id(),
                    pass = run.current_pass,
                    error = %err,
                    "Audit write failed, failing consultation"
                );
                run.consultation.passes_completed = run.passes_completed();
                run.consultation.finish(ConsultationStatus::Failed);
                if let Err(commit_err) = self.audit.upsert_consultation(&run.consultation).await {
                    tracing::error!(error = %commit_err, "Could not commit failed status");
                }
                Outcome::Failed {
                    consultation_id: run.id(),
                    failed_at_pass: run.current_pass,
                    error: format!("audit write failed: {err}"),
                }
            }
        }
    }

    async fn execute(&self, case: &CaseRequest, run: &mut RunState) -> Result<Outcome, AuditError> {
        run.consultation.status = ConsultationStatus::InProgress;
        self.audit.upsert_consultation(&run.consultation).await?;

        // Pass 0: acceptance
        let text = case.text();
        let verdict = self.gate.evaluate(&text, Some(&self.primary)).await;
        let mut row = PassExecution::new(
            run.id(),
            PassName::Acceptance,
            run.next_ordinal(PassName::Acceptance),
            PassStatus::Success,
        );
        row.input_excerpt = Some(excerpt(&text, INPUT_EXCERPT_CHARS));
        row.acceptance = Some(verdict.decision.clone());
        if let Some(response) = &verdict.response {
            run.consultation.usage.add(response);
            row.tokens_used = response.total_tokens();
            row.provider = Some(response.provider.clone());
            row.model = Some(response.model.clone());
            row.temperature = Some(self.config.acceptance.classifier_temperature);
        }
        self.audit.append_pass(&row).await?;

        if !verdict.decision.is_accepted() {
            return self.finish_rejected(run, verdict).await;
        }

        // Pass 1: draft
        run.current_pass = 1;
        let stages = &self.config.stages;
        let runner = StageRunner::new(&self.primary);
        let draft = runner
            .run(PassName::Draft, draft_prompt(case), &stages.draft)
            .await;
        self.record_attempt(run, &draft, &self.primary).await?;
        let Some(draft_text) = draft.outcome.text().map(str::to_string) else {
            let error = draft
                .outcome
                .error()
                .unwrap_or_else(|| "draft produced no text".to_string());
            return self.finish_failed(run, 1, format!("draft failed: {error}")).await;
        };
        self.checkpoint(run).await?;

        // Passes 2-3: critique and refine
        let refined = match self.config.pipeline.mode {
            PipelineMode::Direct => {
                for pass in [PassName::Critique, PassName::Refine] {
                    run.current_pass = pass.number();
                    let row = PassExecution::skipped(run.id(), pass);
                    self.audit.append_pass(&row).await?;
                }
                None
            }
            PipelineMode::MultiPass => {
                run.current_pass = 2;
                let critique = runner
                    .run(
                        PassName::Critique,
                        critique_prompt(case, &draft_text),
                        &stages.critique,
                    )
                    .await;
                self.record_attempt(run, &critique, &self.primary).await?;
                let critique_text = match critique.outcome.text() {
                    Some(text) => text.to_string(),
                    None => {
                        tracing::warn!("Critique failed, continuing with placeholder");
                        CRITIQUE_PLACEHOLDER.to_string()
                    }
                };
                self.checkpoint(run).await?;

                run.current_pass = 3;
                let refine = runner
                    .run(
                        PassName::Refine,
                        refine_prompt(case, &draft_text, &critique_text),
                        &stages.refine,
                    )
                    .await;
                self.record_attempt(run, &refine, &self.primary).await?;
                let refined = refine.outcome.text().map(str::to_string);
                if refined.is_none() {
                    tracing::warn!("Refine failed, substituting draft");
                }
                self.checkpoint(run).await?;
                refined
            }
        };

        // Pass 4: structure, then fallback or escalation
        run.current_pass = 4;
        let prose = refined.as_deref().unwrap_or(&draft_text);
        let candidate = self.structure(run, case, prose).await?;
        let finalized = match candidate {
            Some(candidate) => {
                run.completed.insert(4);
                self.finalize_native(run, case, prose, candidate).await?
            }
            None => {
                self.finalize_fallback(run, case, refined.as_deref(), &draft_text)
                    .await?
            }
        };

        self.finish_completed(run, finalized).await
    }

    /// Structure attempt plus the reduced-temperature retry.
    async fn structure(
        &self,
        run: &mut RunState,
        case: &CaseRequest,
        prose: &str,
    ) -> Result<Option<JsonValue>, AuditError> {
        let settings = &self.config.stages.structure;
        let runner = StructureRunner::new(&self.primary);
        let prompt = structure_prompt(case, prose);

        let first = runner
            .attempt(
                PassName::Structure,
                prompt.clone(),
                &settings.base,
                settings.base.temperature,
            )
            .await;
        self.record_attempt(run, &first, &self.primary).await?;
        if let Some(candidate) = first.outcome.structured() {
            return Ok(Some(candidate.clone()));
        }

        let Some(retry_temperature) = settings.retry_temperature else {
            return Ok(None);
        };
        tracing::warn!(
            temperature = retry_temperature,
            "Structure failed, retrying at reduced temperature"
        );
        let retry = runner
            .attempt(PassName::Structure, prompt, &settings.base, retry_temperature)
            .await;
        self.record_attempt(run, &retry, &self.primary).await?;
        Ok(retry.outcome.structured().cloned())
    }

    /// Repair a native candidate, escalating at most once.
    async fn finalize_native(
        &self,
        run: &mut RunState,
        case: &CaseRequest,
        prose: &str,
        mut candidate: JsonValue,
    ) -> Result<Finalized, AuditError> {
        let mut escalated = false;
        if let Some(reason) = self.escalation.should_escalate_pre_repair(&candidate) {
            escalated = self.secondary.is_some();
            if let Some(replacement) = self.escalate(run, case, prose, &reason).await? {
                candidate = replacement;
            }
        }

        let mut result = self.repair_and_penalize(&candidate, &case.sources);

        if !escalated && self.escalation.should_escalate_post_repair(result.confidence) {
            escalated = self.secondary.is_some();
            let reason = self.escalation.low_confidence(result.confidence);
            if let Some(replacement) = self.escalate(run, case, prose, &reason).await? {
                result = self.repair_and_penalize(&replacement, &case.sources);
            }
        }

        Ok(Finalized {
            result,
            fallback_reason: None,
            reconstruction_method: None,
            escalated,
        })
    }

    fn repair_and_penalize(
        &self,
        candidate: &JsonValue,
        sources: &[RetrievedSource],
    ) -> StructuredResult {
        let outcome = repair(candidate, sources, &self.config.repair);
        let repaired = outcome.repaired_fields();
        let mut result = outcome.result;
        if !repaired.is_empty() {
            let penalties = self
                .escalation
                .apply_tier_penalties(result.confidence, &repaired);
            tracing::debug!(
                repairs = outcome.repairs.len(),
                penalty = penalties.total_penalty,
                confidence = penalties.confidence,
                "Applied tier penalties"
            );
            result.confidence = penalties.confidence;
        }
        result
    }

    /// Fresh structure call to the secondary backend.
    ///
    /// Returns the secondary's candidate only when it parses and passes the
    /// pre-repair check.
    async fn escalate(
        &self,
        run: &mut RunState,
        case: &CaseRequest,
        prose: &str,
        reason: &EscalationReason,
    ) -> Result<Option<JsonValue>, AuditError> {
        let Some(secondary) = &self.secondary else {
            tracing::info!(
                reason = %reason,
                "Escalation warranted but no secondary provider configured"
            );
            return Ok(None);
        };

        tracing::info!(
            reason_code = reason.code(),
            reason = %reason,
            from = self.primary.name(),
            to = secondary.name(),
            "Escalating to secondary provider"
        );

        let prompt = match self.secondary_capability {
            ProviderCapability::Full => structure_prompt(case, prose),
            ProviderCapability::Constrained => simplified_structure_prompt(case, prose),
        };
        let settings = &self.config.stages.structure.base;
        let attempt = StructureRunner::new(secondary)
            .attempt(PassName::Escalation, prompt, settings, settings.temperature)
            .await;
        self.record_attempt(run, &attempt, secondary).await?;

        let replacement = attempt
            .outcome
            .structured()
            .filter(|c| self.escalation.should_escalate_pre_repair(c).is_none())
            .cloned();
        if replacement.is_none() {
            tracing::warn!(
                provider = secondary.name(),
                "Secondary output unusable, keeping primary candidate"
            );
        }

        let event = EscalationEvent {
            consultation_id: run.id(),
            reason_code: reason.code().to_string(),
            reason: reason.to_string(),
            from_provider: self.primary.name().to_string(),
            to_provider: secondary.name().to_string(),
            succeeded: replacement.is_some(),
            timestamp: chrono::Utc::now(),
        };
        self.audit.record_escalation(&event).await?;
        Ok(replacement)
    }

    /// Reconstruct from prose, else the generic template. No escalation.
    async fn finalize_fallback(
        &self,
        run: &mut RunState,
        case: &CaseRequest,
        refined: Option<&str>,
        draft: &str,
    ) -> Result<Finalized, AuditError> {
        let mut row = PassExecution::new(
            run.id(),
            PassName::FallbackReconstruct,
            run.next_ordinal(PassName::FallbackReconstruct),
            PassStatus::Success,
        );

        let started = tokio::time::Instant::now();
        let (reconstructed, method, reason) =
            match self
                .reconstructor
                .reconstruct(refined, Some(draft), &case.sources)
            {
                Ok(reconstruction) => {
                    if !reconstruction.skipped.is_empty() {
                        let skipped: Vec<String> = reconstruction
                            .skipped
                            .iter()
                            .map(|(origin, err)| format!("{origin:?}: {err}"))
                            .collect();
                        row.error = Some(skipped.join("; "));
                    }
                    (
                        reconstruction.result,
                        reconstruction.method,
                        "structure pass failed".to_string(),
                    )
                }
                Err(failure) => {
                    tracing::warn!(error = %failure, "Reconstruction failed, using generic template");
                    row.error = Some(failure.to_string());
                    (
                        generic_template(&case.sources),
                        ReconstructionMethod::GenericTemplate,
                        format!("structure pass failed; {failure}"),
                    )
                }
            };
        tracing::warn!(method = %method, "Fallback reconstruction used");

        let candidate = match serde_json::to_value(&reconstructed) {
            Ok(value) => value,
            Err(err) => {
                tracing::error!(error = %err, "Could not serialize reconstruction");
                JsonValue::Null
            }
        };
        let result = repair(&candidate, &case.sources, &self.config.repair).result;

        row.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        row.reconstruction_method = Some(method);
        row.output_json = Some(candidate);
        self.audit.append_pass(&row).await?;

        Ok(Finalized {
            result,
            fallback_reason: Some(reason),
            reconstruction_method: Some(method),
            escalated: false,
        })
    }

    async fn record_attempt(
        &self,
        run: &mut RunState,
        attempt: &StageAttempt,
        provider: &GuardedProvider,
    ) -> Result<(), AuditError> {
        if let Some(response) = &attempt.response {
            run.consultation.usage.add(response);
        }
        let ordinal = run.next_ordinal(attempt.pass);
        let row = PassExecution::from_attempt(
            run.id(),
            ordinal,
            attempt,
            provider.name(),
            provider.model(),
        );
        if attempt.outcome.is_success()
            && matches!(
                attempt.pass,
                PassName::Draft | PassName::Critique | PassName::Refine
            )
        {
            run.completed.insert(attempt.pass.number());
        }
        self.audit.append_pass(&row).await
    }

    /// Publish progress on the summary row at a stage boundary.
    async fn checkpoint(&self, run: &mut RunState) -> Result<(), AuditError> {
        run.consultation.passes_completed = run.passes_completed();
        self.audit.upsert_consultation(&run.consultation).await
    }

    async fn finish_rejected(
        &self,
        run: &mut RunState,
        verdict: GateVerdict,
    ) -> Result<Outcome, AuditError> {
        let decision = verdict.decision;
        tracing::info!(
            category = %decision.category,
            stage = ?decision.failed_stage,
            reason = %decision.reason,
            "Case rejected"
        );
        let explanation = self.gate.explain(&decision, Some(&self.primary)).await;
        if let Some(response) = &explanation.response {
            run.consultation.usage.add(response);
        }

        run.consultation.finish(ConsultationStatus::Rejected);
        self.audit.upsert_consultation(&run.consultation).await?;
        Ok(Outcome::Rejected {
            message: explanation.message,
            category: decision.category,
            consultation_id: run.id(),
        })
    }

    async fn finish_failed(
        &self,
        run: &mut RunState,
        pass: u8,
        error: String,
    ) -> Result<Outcome, AuditError> {
        tracing::warn!(pass, error = %error, "Consultation failed");
        run.consultation.passes_completed = run.passes_completed();
        run.consultation.finish(ConsultationStatus::Failed);
        self.audit.upsert_consultation(&run.consultation).await?;
        Ok(Outcome::Failed {
            consultation_id: run.id(),
            failed_at_pass: pass,
            error,
        })
    }

    async fn finish_completed(
        &self,
        run: &mut RunState,
        finalized: Finalized,
    ) -> Result<Outcome, AuditError> {
        let Finalized {
            mut result,
            fallback_reason,
            reconstruction_method,
            escalated,
        } = finalized;
        let fallback_used = reconstruction_method.is_some();

        if fallback_used || result.confidence < self.escalation.policy().threshold {
            result.scholar_flag = true;
        }

        match serde_json::to_value(&result) {
            Ok(value) => {
                if let Err(violations) = validate_result(&value) {
                    tracing::warn!(
                        violations = violations.len(),
                        "Final result failed schema check"
                    );
                }
            }
            Err(err) => tracing::warn!(error = %err, "Could not serialize final result"),
        }

        let passes_completed = run.passes_completed();
        run.consultation.passes_completed = passes_completed;
        run.consultation.fallback_used = fallback_used;
        run.consultation.fallback_reason = fallback_reason;
        run.consultation.final_confidence = Some(result.confidence);
        run.consultation.finish(ConsultationStatus::Completed);
        self.audit.upsert_consultation(&run.consultation).await?;

        tracing::info!(
            passes_completed,
            fallback_used,
            escalated,
            confidence = result.confidence,
            tokens = run.consultation.usage.total_tokens,
            "Consultation completed"
        );

        Ok(Outcome::Accepted {
            result,
            consultation_id: run.id(),
            passes_completed,
            fallback_used,
            reconstruction_method,
            escalated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::providers::ProviderError;
    use crate::test_support::{fixtures, ScriptedProvider};
    use async_trait::async_trait;
    use std::time::Duration;

    fn config() -> RuntimeConfig {
        RuntimeConfig {
            retry: RetryConfig {
                min_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
            ..Default::default()
        }
    }

    /// Primary scripted for a clean run, minus the `skip` label.
    fn primary_except(skip: &str) -> ScriptedProvider {
        let structured = fixtures::structured_json().to_string();
        let script = [
            ("acceptance", "accepted"),
            ("draft", fixtures::DRAFT_PROSE),
            ("critique", fixtures::CRITIQUE_TEXT),
            ("refine", fixtures::REFINED_PROSE),
            ("structure", structured.as_str()),
        ];
        script
            .into_iter()
            .filter(|(label, _)| *label != skip)
            .fold(ScriptedProvider::new(), |provider, (label, text)| {
                provider.text(label, text)
            })
    }

    fn happy_primary() -> ScriptedProvider {
        primary_except("")
    }

    fn orchestrator(
        primary: Arc<ScriptedProvider>,
        store: Arc<InMemoryAuditStore>,
    ) -> ConsultationOrchestrator {
        ConsultationOrchestrator::builder()
            .config(config())
            .primary(primary)
            .audit(store)
            .build()
            .unwrap()
    }

    fn pass_names(store: &InMemoryAuditStore, id: Uuid) -> Vec<(u8, PassName, PassStatus)> {
        store
            .passes_for(id)
            .iter()
            .map(|p| (p.pass_number, p.pass_name, p.status))
            .collect()
    }

    #[tokio::test]
    async fn test_workplace_case_completes_all_passes() {
        let provider = Arc::new(happy_primary());
        let store = Arc::new(InMemoryAuditStore::new());
        let orchestrator = orchestrator(provider.clone(), store.clone());

        let outcome = orchestrator
            .run_consultation(&fixtures::workplace_case())
            .await;
        let Outcome::Accepted {
            result,
            consultation_id,
            passes_completed,
            fallback_used,
            escalated,
            ..
        } = outcome
        else {
            panic!("expected accepted outcome, got {outcome:?}");
        };

        assert_eq!(result.options.len(), 3);
        assert!(result.confidence >= 0.65);
        assert!(!result.scholar_flag);
        assert!(result.citations_resolve());
        assert_eq!(passes_completed, 4);
        assert!(!fallback_used);
        assert!(!escalated);

        let passes: Vec<u8> = store
            .passes_for(consultation_id)
            .iter()
            .map(|p| p.pass_number)
            .collect();
        assert_eq!(passes, vec![0, 1, 2, 3, 4]);

        let consultation = store.consultation(consultation_id).unwrap();
        assert_eq!(consultation.status, ConsultationStatus::Completed);
        assert_eq!(consultation.passes_completed, 4);
        assert_eq!(consultation.usage.llm_calls, 5);
        assert!(consultation.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_factual_question_is_rejected_before_any_stage() {
        let provider = Arc::new(
            happy_primary().text("explanation", "This looks like a factual question."),
        );
        let store = Arc::new(InMemoryAuditStore::new());
        let orchestrator = orchestrator(provider.clone(), store.clone());

        let outcome = orchestrator
            .run_consultation(&fixtures::factual_case())
            .await;
        let Outcome::Rejected {
            category,
            consultation_id,
            message,
        } = outcome
        else {
            panic!("expected rejection, got {outcome:?}");
        };

        assert_eq!(category, AcceptanceCategory::NotDilemma);
        assert_eq!(message, "This looks like a factual question.");
        assert_eq!(provider.calls_for("acceptance"), 0);
        assert_eq!(provider.calls_for("draft"), 0);

        let rows = store.passes_for(consultation_id);
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].acceptance.as_ref().map(|d| d.category),
            Some(AcceptanceCategory::NotDilemma)
        );
        let consultation = store.consultation(consultation_id).unwrap();
        assert_eq!(consultation.status, ConsultationStatus::Rejected);
        assert_eq!(consultation.passes_completed, 0);
    }

    #[tokio::test]
    async fn test_structure_failure_falls_back_to_refined_prose() {
        let provider = Arc::new(primary_except("structure").text("structure", "I cannot format this."));
        let store = Arc::new(InMemoryAuditStore::new());
        let orchestrator = orchestrator(provider.clone(), store.clone());

        let outcome = orchestrator
            .run_consultation(&fixtures::workplace_case())
            .await;
        let Outcome::Accepted {
            result,
            consultation_id,
            passes_completed,
            fallback_used,
            reconstruction_method,
            escalated,
        } = outcome
        else {
            panic!("expected accepted outcome, got {outcome:?}");
        };

        assert!(fallback_used);
        assert!(!escalated);
        assert_eq!(reconstruction_method, Some(ReconstructionMethod::RefinedProse));
        assert!(result.scholar_flag);
        assert!((0.30..=0.65).contains(&result.confidence));
        assert_eq!(result.options.len(), 3);
        assert_eq!(passes_completed, 3);
        assert_eq!(provider.calls_for("structure"), 2);

        let temperatures: Vec<f32> = provider
            .calls()
            .iter()
            .filter(|c| c.label == "structure")
            .map(|c| c.temperature)
            .collect();
        assert_eq!(temperatures, vec![0.3, 0.1]);

        let rows = store.passes_for(consultation_id);
        let pass4: Vec<(PassName, u32)> = rows
            .iter()
            .filter(|p| p.pass_number == 4)
            .map(|p| (p.pass_name, p.attempt))
            .collect();
        assert_eq!(
            pass4,
            vec![
                (PassName::Structure, 0),
                (PassName::Structure, 1),
                (PassName::FallbackReconstruct, 2)
            ]
        );
        let consultation = store.consultation(consultation_id).unwrap();
        assert!(consultation.fallback_used);
        assert!(consultation.fallback_reason.is_some());
    }

    #[tokio::test]
    async fn test_unusable_prose_yields_generic_template() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .text("acceptance", "accepted")
                .text("draft", "Too short to use.")
                .text("critique", fixtures::CRITIQUE_TEXT)
                .text("refine", "Still too short.")
                .text("structure", "no json here"),
        );
        let store = Arc::new(InMemoryAuditStore::new());
        let orchestrator = orchestrator(provider, store.clone());

        let outcome = orchestrator
            .run_consultation(&fixtures::workplace_case())
            .await;
        let Outcome::Accepted {
            result,
            consultation_id,
            reconstruction_method,
            ..
        } = outcome
        else {
            panic!("expected accepted outcome, got {outcome:?}");
        };

        assert_eq!(reconstruction_method, Some(ReconstructionMethod::GenericTemplate));
        assert!(result.scholar_flag);
        assert!((result.confidence - 0.40).abs() < 1e-9);
        assert_eq!(result.options.len(), 3);

        let fallback = store
            .passes_for(consultation_id)
            .into_iter()
            .find(|p| p.pass_name == PassName::FallbackReconstruct)
            .unwrap();
        assert_eq!(
            fallback.reconstruction_method,
            Some(ReconstructionMethod::GenericTemplate)
        );
        assert!(fallback.error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_draft_failure_is_fatal() {
        let provider = Arc::new(primary_except("draft").fail("draft", ProviderError::AuthError));
        let store = Arc::new(InMemoryAuditStore::new());
        let orchestrator = orchestrator(provider.clone(), store.clone());

        let outcome = orchestrator
            .run_consultation(&fixtures::workplace_case())
            .await;
        let Outcome::Failed {
            consultation_id,
            failed_at_pass,
            ..
        } = outcome
        else {
            panic!("expected failure, got {outcome:?}");
        };

        assert_eq!(failed_at_pass, 1);
        assert_eq!(provider.calls_for("draft"), 1);
        assert_eq!(provider.calls_for("critique"), 0);
        assert_eq!(
            pass_names(&store, consultation_id),
            vec![
                (0, PassName::Acceptance, PassStatus::Success),
                (1, PassName::Draft, PassStatus::Error)
            ]
        );
        let consultation = store.consultation(consultation_id).unwrap();
        assert_eq!(consultation.status, ConsultationStatus::Failed);
        assert_eq!(consultation.passes_completed, 0);
    }

    #[tokio::test]
    async fn test_format_errors_are_rejected_without_classifier_or_stages() {
        let workplace = fixtures::workplace_case();
        let oversized = CaseRequest::new(
            "case-oversized",
            &workplace.title,
            &workplace.description.repeat(20),
            fixtures::sources(),
        );
        let spam = CaseRequest::new(
            "case-spam",
            "Should I tell my team",
            "CLICKHEREFORFREEMONEYNOW and my manager says I should decide whether to share it \
             with colleagues or keep quiet.",
            fixtures::sources(),
        );

        for case in [oversized, spam] {
            let provider = Arc::new(happy_primary());
            let store = Arc::new(InMemoryAuditStore::new());
            let orchestrator = orchestrator(provider.clone(), store.clone());

            let outcome = orchestrator.run_consultation(&case).await;
            let Outcome::Rejected {
                category,
                consultation_id,
                message,
            } = outcome
            else {
                panic!("expected rejection for {}, got {outcome:?}", case.case_id);
            };

            assert_eq!(category, AcceptanceCategory::FormatError);
            assert!(!message.is_empty());
            assert_eq!(provider.calls_for("acceptance"), 0);
            for label in ["draft", "critique", "refine", "structure"] {
                assert_eq!(provider.calls_for(label), 0, "{label} called");
            }

            let rows = store.passes_for(consultation_id);
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].pass_name, PassName::Acceptance);
            let consultation = store.consultation(consultation_id).unwrap();
            assert_eq!(consultation.status, ConsultationStatus::Rejected);
            assert_eq!(consultation.passes_completed, 0);
        }
    }

    #[tokio::test]
    async fn test_open_primary_circuit_fails_without_calling_backend() {
        let provider = Arc::new(happy_primary());
        let store = Arc::new(InMemoryAuditStore::new());
        let orchestrator = orchestrator(provider.clone(), store.clone());
        let breaker = orchestrator.primary().breaker();
        for _ in 0..config().circuit_breaker.failure_threshold {
            breaker.record_failure();
        }
        assert_eq!(breaker.state().label(), "open");

        let outcome = orchestrator
            .run_consultation(&fixtures::workplace_case())
            .await;
        let Outcome::Failed {
            consultation_id,
            failed_at_pass,
            error,
        } = outcome
        else {
            panic!("expected failure, got {outcome:?}");
        };

        assert_eq!(failed_at_pass, 1);
        assert!(error.contains("circuit open"), "{error}");
        assert!(provider.calls().is_empty());

        let rows = store.passes_for(consultation_id);
        let draft = rows.last().unwrap();
        assert_eq!(draft.pass_name, PassName::Draft);
        assert_eq!(draft.status, PassStatus::Error);
        assert!(draft
            .error
            .as_deref()
            .is_some_and(|e| e.contains("circuit open")));
        // Stage B could not reach the backend and failed open
        assert!(rows[0]
            .acceptance
            .as_ref()
            .is_some_and(|d| d.fail_open.is_some()));
        let consultation = store.consultation(consultation_id).unwrap();
        assert_eq!(consultation.status, ConsultationStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_critique_failure_uses_placeholder() {
        let provider = Arc::new(
            primary_except("critique").fail("critique", ProviderError::Timeout(Duration::from_secs(60))),
        );
        let store = Arc::new(InMemoryAuditStore::new());
        let orchestrator = orchestrator(provider.clone(), store);

        let outcome = orchestrator
            .run_consultation(&fixtures::workplace_case())
            .await;
        let Outcome::Accepted {
            passes_completed, ..
        } = outcome
        else {
            panic!("expected accepted outcome, got {outcome:?}");
        };
        assert_eq!(passes_completed, 3);

        let refine = provider
            .calls()
            .into_iter()
            .find(|c| c.label == "refine")
            .unwrap();
        assert!(refine.prompt.contains(CRITIQUE_PLACEHOLDER));
        // one retry for the transient timeout
        assert_eq!(provider.calls_for("critique"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refine_failure_substitutes_draft() {
        let provider = Arc::new(primary_except("refine").fail("refine", ProviderError::AuthError));
        let store = Arc::new(InMemoryAuditStore::new());
        let orchestrator = orchestrator(provider.clone(), store.clone());

        let outcome = orchestrator
            .run_consultation(&fixtures::workplace_case())
            .await;
        let consultation_id = outcome.consultation_id();
        let Outcome::Accepted {
            passes_completed, ..
        } = outcome
        else {
            panic!("expected accepted outcome, got {outcome:?}");
        };
        assert_eq!(passes_completed, 3);

        let structure = provider
            .calls()
            .into_iter()
            .find(|c| c.label == "structure")
            .unwrap();
        assert!(structure.prompt.contains("Duty and Loyalty at Work"));

        let refine_row = store
            .passes_for(consultation_id)
            .into_iter()
            .find(|p| p.pass_name == PassName::Refine)
            .unwrap();
        assert_eq!(refine_row.status, PassStatus::Error);
    }

    #[tokio::test]
    async fn test_direct_mode_skips_critique_and_refine() {
        let provider = Arc::new(happy_primary());
        let store = Arc::new(InMemoryAuditStore::new());
        let mut config = config();
        config.pipeline.mode = PipelineMode::Direct;
        let orchestrator = ConsultationOrchestrator::builder()
            .config(config)
            .primary(provider.clone())
            .audit(store.clone())
            .build()
            .unwrap();

        let outcome = orchestrator
            .run_consultation(&fixtures::workplace_case())
            .await;
        let consultation_id = outcome.consultation_id();
        let Outcome::Accepted {
            passes_completed, ..
        } = outcome
        else {
            panic!("expected accepted outcome, got {outcome:?}");
        };

        assert_eq!(passes_completed, 2);
        assert_eq!(provider.calls_for("critique"), 0);
        assert_eq!(provider.calls_for("refine"), 0);
        assert_eq!(
            pass_names(&store, consultation_id),
            vec![
                (0, PassName::Acceptance, PassStatus::Success),
                (1, PassName::Draft, PassStatus::Success),
                (2, PassName::Critique, PassStatus::Skipped),
                (3, PassName::Refine, PassStatus::Skipped),
                (4, PassName::Structure, PassStatus::Success)
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_critical_field_escalates_to_secondary() {
        let primary = Arc::new(primary_except("structure").json("structure", fixtures::missing_options_json()));
        let secondary = Arc::new(
            ScriptedProvider::named("secondary").json("escalation", fixtures::structured_json()),
        );
        let store = Arc::new(InMemoryAuditStore::new());
        let orchestrator = ConsultationOrchestrator::builder()
            .config(config())
            .primary(primary)
            .secondary(secondary.clone(), ProviderCapability::Full)
            .audit(store.clone())
            .build()
            .unwrap();

        let outcome = orchestrator
            .run_consultation(&fixtures::workplace_case())
            .await;
        let consultation_id = outcome.consultation_id();
        let Outcome::Accepted {
            result,
            escalated,
            passes_completed,
            ..
        } = outcome
        else {
            panic!("expected accepted outcome, got {outcome:?}");
        };

        assert!(escalated);
        assert_eq!(passes_completed, 4);
        assert!((result.confidence - 0.85).abs() < 1e-9);
        assert_eq!(secondary.calls_for("escalation"), 1);
        assert!(secondary.calls()[0].prompt.contains("## Counsel"));

        let events = store.escalations_for(consultation_id);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason_code, "missing_critical_field");
        assert_eq!(events[0].from_provider, "scripted");
        assert_eq!(events[0].to_provider, "secondary");
        assert!(events[0].succeeded);

        let escalation_row = store
            .passes_for(consultation_id)
            .into_iter()
            .find(|p| p.pass_name == PassName::Escalation)
            .unwrap();
        assert_eq!(escalation_row.pass_number, 4);
        assert_eq!(escalation_row.attempt, 1);
        assert_eq!(escalation_row.provider.as_deref(), Some("secondary"));
    }

    #[tokio::test]
    async fn test_constrained_secondary_gets_simplified_prompt() {
        let primary = Arc::new(primary_except("structure").json("structure", fixtures::missing_options_json()));
        let secondary = Arc::new(
            ScriptedProvider::named("local").json("escalation", fixtures::structured_json()),
        );
        let orchestrator = ConsultationOrchestrator::builder()
            .config(config())
            .primary(primary)
            .secondary(secondary.clone(), ProviderCapability::Constrained)
            .build()
            .unwrap();

        orchestrator
            .run_consultation(&fixtures::workplace_case())
            .await;
        let prompt = &secondary.calls()[0].prompt;
        assert!(prompt.contains("Allowed source ids: BG_2_47"));
        assert!(!prompt.contains("## Counsel"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_post_repair_escalation_keeps_repaired_result() {
        let primary = Arc::new(primary_except("structure").json("structure", fixtures::low_confidence_json()));
        let secondary = Arc::new(
            ScriptedProvider::named("secondary")
                .fail("escalation", ProviderError::ApiError {
                    status: 503,
                    message: "overloaded".into(),
                }),
        );
        let store = Arc::new(InMemoryAuditStore::new());
        let orchestrator = ConsultationOrchestrator::builder()
            .config(config())
            .primary(primary)
            .secondary(secondary.clone(), ProviderCapability::Full)
            .audit(store.clone())
            .build()
            .unwrap();

        let outcome = orchestrator
            .run_consultation(&fixtures::workplace_case())
            .await;
        let consultation_id = outcome.consultation_id();
        let Outcome::Accepted {
            result, escalated, ..
        } = outcome
        else {
            panic!("expected accepted outcome, got {outcome:?}");
        };

        assert!(escalated);
        assert!((result.confidence - 0.40).abs() < 1e-9);
        assert!(result.scholar_flag);
        assert_eq!(result.reflection_prompts.len(), 2);

        let events = store.escalations_for(consultation_id);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason_code, "low_confidence");
        assert!(!events[0].succeeded);
    }

    #[tokio::test]
    async fn test_no_escalation_without_secondary() {
        let primary = Arc::new(primary_except("structure").json("structure", fixtures::missing_options_json()));
        let store = Arc::new(InMemoryAuditStore::new());
        let orchestrator = orchestrator(primary, store.clone());

        let outcome = orchestrator
            .run_consultation(&fixtures::workplace_case())
            .await;
        let consultation_id = outcome.consultation_id();
        let Outcome::Accepted {
            result, escalated, ..
        } = outcome
        else {
            panic!("expected accepted outcome, got {outcome:?}");
        };
        assert_eq!(result.options.len(), 3);
        assert!(result.confidence >= 0.30);
        assert!(!escalated);
        assert!(store.escalations_for(consultation_id).is_empty());
    }

    /// Sink that refuses pass rows from a given pass number on.
    struct BrokenSink {
        inner: InMemoryAuditStore,
        fail_from: u8,
    }

    #[async_trait]
    impl AuditSink for BrokenSink {
        async fn upsert_consultation(&self, c: &Consultation) -> Result<(), AuditError> {
            self.inner.upsert_consultation(c).await
        }

        async fn append_pass(&self, pass: &PassExecution) -> Result<(), AuditError> {
            if pass.pass_number >= self.fail_from {
                return Err(AuditError::Io {
                    path: "audit.jsonl".into(),
                    source: std::io::Error::other("disk full"),
                });
            }
            self.inner.append_pass(pass).await
        }

        async fn record_escalation(&self, event: &EscalationEvent) -> Result<(), AuditError> {
            self.inner.record_escalation(event).await
        }
    }

    #[tokio::test]
    async fn test_audit_failure_becomes_failed_outcome() {
        let sink = Arc::new(BrokenSink {
            inner: InMemoryAuditStore::new(),
            fail_from: 2,
        });
        let orchestrator = ConsultationOrchestrator::builder()
            .config(config())
            .primary(Arc::new(happy_primary()))
            .audit(sink.clone())
            .build()
            .unwrap();

        let outcome = orchestrator
            .run_consultation(&fixtures::workplace_case())
            .await;
        let Outcome::Failed {
            consultation_id,
            failed_at_pass,
            error,
        } = outcome
        else {
            panic!("expected failure, got {outcome:?}");
        };
        assert_eq!(failed_at_pass, 2);
        assert!(error.contains("disk full"));
        let consultation = sink.inner.consultation(consultation_id).unwrap();
        assert_eq!(consultation.status, ConsultationStatus::Failed);
    }

    #[tokio::test]
    async fn test_concurrent_consultations_are_independent() {
        let provider = Arc::new(happy_primary());
        let store = Arc::new(InMemoryAuditStore::new());
        let orchestrator = orchestrator(provider.clone(), store.clone());
        let case = fixtures::workplace_case();

        let runs = (0..8).map(|_| orchestrator.run_consultation(&case));
        let outcomes = futures::future::join_all(runs).await;

        let ids: BTreeSet<Uuid> = outcomes.iter().map(Outcome::consultation_id).collect();
        assert_eq!(ids.len(), 8);
        assert!(outcomes.iter().all(Outcome::is_accepted));
        assert_eq!(store.consultation_count(), 8);
        for id in ids {
            assert_eq!(store.passes_for(id).len(), 5);
        }
        // Stage B verdicts are cached after the first clear answer
        assert!(provider.calls_for("acceptance") <= 8);
        assert_eq!(provider.calls_for("draft"), 8);
    }

    #[test]
    fn test_outcome_serializes_with_tag() {
        let outcome = Outcome::Failed {
            consultation_id: Uuid::nil(),
            failed_at_pass: 1,
            error: "draft failed".into(),
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["outcome"], "failed");
        assert_eq!(value["failed_at_pass"], 1);
    }

    #[test]
    fn test_case_text_joins_title_and_description() {
        let case = CaseRequest::new("c", " Title", "Body text ", Vec::new());
        assert_eq!(case.text(), "Title\n\nBody text");
    }
}
