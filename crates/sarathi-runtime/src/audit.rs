//! Audit trail: consultation summaries, pass executions, escalation events.
//!
//! Pass rows are append-only and keyed by
//! `(consultation_id, pass_number, attempt)`. The consultation summary is
//! the one mutable row, and it stops changing once its status is terminal.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use sarathi_core::{AcceptanceDecision, ReconstructionMethod, SCHEMA_VERSION};

use crate::config::PipelineMode;
use crate::prompts::PROMPT_VERSION;
use crate::resilience::LlmUsage;
use crate::stages::{excerpt, PassName, PassOutcome, PassPayload, StageAttempt};

/// Longest prompt excerpt stored on a pass row.
pub(crate) const INPUT_EXCERPT_CHARS: usize = 500;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("audit I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("audit record serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("pass {pass} recorded after pass {last} for consultation {consultation_id}")]
    OutOfOrder {
        consultation_id: Uuid,
        pass: u8,
        last: u8,
    },

    #[error("duplicate pass row ({pass}, attempt {attempt}) for consultation {consultation_id}")]
    Duplicate {
        consultation_id: Uuid,
        pass: u8,
        attempt: u32,
    },

    #[error("consultation {0} is already terminal")]
    AlreadyTerminal(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsultationStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
    Rejected,
}

impl ConsultationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConsultationStatus::Completed | ConsultationStatus::Failed | ConsultationStatus::Rejected
        )
    }
}

/// Summary row for one end-to-end run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consultation {
    pub id: Uuid,
    pub case_id: String,
    pub status: ConsultationStatus,
    pub pipeline_mode: PipelineMode,
    pub primary_provider: String,
    pub passes_completed: u8,
    pub fallback_used: bool,
    pub fallback_reason: Option<String>,
    pub final_confidence: Option<f64>,
    pub usage: LlmUsage,
    pub prompt_version: String,
    pub schema_version: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Consultation {
    pub fn new(
        case_id: impl Into<String>,
        pipeline_mode: PipelineMode,
        primary_provider: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            case_id: case_id.into(),
            status: ConsultationStatus::Queued,
            pipeline_mode,
            primary_provider: primary_provider.into(),
            passes_completed: 0,
            fallback_used: false,
            fallback_reason: None,
            final_confidence: None,
            usage: LlmUsage::default(),
            prompt_version: PROMPT_VERSION.to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Move to a terminal status and stamp the completion time.
    pub fn finish(&mut self, status: ConsultationStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassStatus {
    Pending,
    Running,
    Success,
    Error,
    Timeout,
    Skipped,
}

impl From<&PassOutcome> for PassStatus {
    fn from(outcome: &PassOutcome) -> Self {
        match outcome {
            PassOutcome::Pending => PassStatus::Pending,
            PassOutcome::Success(_) => PassStatus::Success,
            PassOutcome::Error(_) => PassStatus::Error,
            PassOutcome::Timeout => PassStatus::Timeout,
            PassOutcome::Skipped => PassStatus::Skipped,
        }
    }
}

/// One attempted stage. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassExecution {
    pub consultation_id: Uuid,
    pub pass_number: u8,
    pub pass_name: PassName,
    /// Ordinal of this row within its pass number, from 0
    pub attempt: u32,
    pub status: PassStatus,
    pub input_excerpt: Option<String>,
    pub output_text: Option<String>,
    pub output_json: Option<JsonValue>,
    pub acceptance: Option<AcceptanceDecision>,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub tokens_used: u32,
    pub retry_count: u32,
    pub temperature: Option<f32>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub schema_violations: Option<usize>,
    pub reconstruction_method: Option<ReconstructionMethod>,
    pub prompt_version: String,
    pub schema_version: String,
    pub recorded_at: DateTime<Utc>,
}

impl PassExecution {
    /// Bare row with version tags and nothing else filled in.
    pub fn new(consultation_id: Uuid, pass: PassName, attempt: u32, status: PassStatus) -> Self {
        Self {
            consultation_id,
            pass_number: pass.number(),
            pass_name: pass,
            attempt,
            status,
            input_excerpt: None,
            output_text: None,
            output_json: None,
            acceptance: None,
            error: None,
            duration_ms: 0,
            tokens_used: 0,
            retry_count: 0,
            temperature: None,
            provider: None,
            model: None,
            schema_violations: None,
            reconstruction_method: None,
            prompt_version: PROMPT_VERSION.to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            recorded_at: Utc::now(),
        }
    }

    /// Row for a backend-call stage attempt.
    pub fn from_attempt(
        consultation_id: Uuid,
        attempt_ordinal: u32,
        attempt: &StageAttempt,
        provider: &str,
        model: &str,
    ) -> Self {
        let mut row = Self::new(
            consultation_id,
            attempt.pass,
            attempt_ordinal,
            PassStatus::from(&attempt.outcome),
        );
        row.input_excerpt = Some(excerpt(&attempt.prompt, INPUT_EXCERPT_CHARS));
        match &attempt.outcome {
            PassOutcome::Success(PassPayload::Text(text)) => row.output_text = Some(text.clone()),
            PassOutcome::Success(PassPayload::Structured(value)) => {
                row.output_json = Some(value.clone())
            }
            other => row.error = other.error(),
        }
        row.duration_ms = u64::try_from(attempt.duration.as_millis()).unwrap_or(u64::MAX);
        row.tokens_used = attempt.tokens_used();
        row.retry_count = attempt.retries;
        row.temperature = Some(attempt.temperature);
        row.provider = Some(provider.to_string());
        row.model = Some(
            attempt
                .response
                .as_ref()
                .map(|r| r.model.clone())
                .unwrap_or_else(|| model.to_string()),
        );
        row.schema_violations = attempt.schema_violations;
        row
    }

    /// Placeholder row for a stage the pipeline mode does not run.
    pub fn skipped(consultation_id: Uuid, pass: PassName) -> Self {
        Self::new(consultation_id, pass, 0, PassStatus::Skipped)
    }
}

/// Recorded whenever a run is redirected to the secondary backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationEvent {
    pub consultation_id: Uuid,
    pub reason_code: String,
    pub reason: String,
    pub from_provider: String,
    pub to_provider: String,
    /// The secondary's output replaced the primary candidate
    pub succeeded: bool,
    pub timestamp: DateTime<Utc>,
}

/// Durable destination for audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn upsert_consultation(&self, consultation: &Consultation) -> Result<(), AuditError>;

    async fn append_pass(&self, pass: &PassExecution) -> Result<(), AuditError>;

    async fn record_escalation(&self, event: &EscalationEvent) -> Result<(), AuditError>;
}

impl std::fmt::Debug for dyn AuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuditSink")
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    consultations: HashMap<Uuid, Consultation>,
    passes: HashMap<Uuid, Vec<PassExecution>>,
    escalations: HashMap<Uuid, Vec<EscalationEvent>>,
}

/// Queryable in-process store.
#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    inner: Mutex<StoreInner>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consultation(&self, id: Uuid) -> Option<Consultation> {
        self.inner.lock().consultations.get(&id).cloned()
    }

    pub fn passes_for(&self, id: Uuid) -> Vec<PassExecution> {
        self.inner.lock().passes.get(&id).cloned().unwrap_or_default()
    }

    pub fn escalations_for(&self, id: Uuid) -> Vec<EscalationEvent> {
        self.inner
            .lock()
            .escalations
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn consultation_count(&self) -> usize {
        self.inner.lock().consultations.len()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditStore {
    async fn upsert_consultation(&self, consultation: &Consultation) -> Result<(), AuditError> {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.consultations.get(&consultation.id) {
            if existing.status.is_terminal() {
                return Err(AuditError::AlreadyTerminal(consultation.id));
            }
        }
        inner
            .consultations
            .insert(consultation.id, consultation.clone());
        Ok(())
    }

    async fn append_pass(&self, pass: &PassExecution) -> Result<(), AuditError> {
        let mut inner = self.inner.lock();
        let rows = inner.passes.entry(pass.consultation_id).or_default();
        if let Some(last) = rows.last() {
            if pass.pass_number < last.pass_number {
                return Err(AuditError::OutOfOrder {
                    consultation_id: pass.consultation_id,
                    pass: pass.pass_number,
                    last: last.pass_number,
                });
            }
        }
        if rows
            .iter()
            .any(|r| r.pass_number == pass.pass_number && r.attempt == pass.attempt)
        {
            return Err(AuditError::Duplicate {
                consultation_id: pass.consultation_id,
                pass: pass.pass_number,
                attempt: pass.attempt,
            });
        }
        rows.push(pass.clone());
        Ok(())
    }

    async fn record_escalation(&self, event: &EscalationEvent) -> Result<(), AuditError> {
        self.inner
            .lock()
            .escalations
            .entry(event.consultation_id)
            .or_default()
            .push(event.clone());
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum AuditLine<'a> {
    Consultation(&'a Consultation),
    Pass(&'a PassExecution),
    Escalation(&'a EscalationEvent),
}

/// Appends one JSON object per record to a file.
#[derive(Debug)]
pub struct JsonlAuditSink {
    path: PathBuf,
    file: tokio::sync::Mutex<tokio::fs::File>,
}

impl JsonlAuditSink {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        let io_err = |source| AuditError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_err)?;
        Ok(Self {
            path,
            file: tokio::sync::Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_line(&self, line: AuditLine<'_>) -> Result<(), AuditError> {
        let mut bytes = serde_json::to_vec(&line)?;
        bytes.push(b'\n');
        let io_err = |source| AuditError::Io {
            path: self.path.clone(),
            source,
        };

        let mut file = self.file.lock().await;
        file.write_all(&bytes).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)?;
        file.sync_data().await.map_err(io_err)?;
        Ok(())
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn upsert_consultation(&self, consultation: &Consultation) -> Result<(), AuditError> {
        self.write_line(AuditLine::Consultation(consultation)).await
    }

    async fn append_pass(&self, pass: &PassExecution) -> Result<(), AuditError> {
        self.write_line(AuditLine::Pass(pass)).await
    }

    async fn record_escalation(&self, event: &EscalationEvent) -> Result<(), AuditError> {
        self.write_line(AuditLine::Escalation(event)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: Uuid, pass: PassName, attempt: u32) -> PassExecution {
        PassExecution::new(id, pass, attempt, PassStatus::Success)
    }

    #[tokio::test]
    async fn test_pass_rows_must_not_go_backwards() {
        let store = InMemoryAuditStore::new();
        let id = Uuid::new_v4();
        store.append_pass(&row(id, PassName::Draft, 0)).await.unwrap();
        store.append_pass(&row(id, PassName::Refine, 0)).await.unwrap();
        let err = store
            .append_pass(&row(id, PassName::Critique, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::OutOfOrder { pass: 2, last: 3, .. }));
    }

    #[tokio::test]
    async fn test_duplicate_attempt_is_rejected() {
        let store = InMemoryAuditStore::new();
        let id = Uuid::new_v4();
        store.append_pass(&row(id, PassName::Structure, 0)).await.unwrap();
        store.append_pass(&row(id, PassName::Structure, 1)).await.unwrap();
        store.append_pass(&row(id, PassName::Escalation, 2)).await.unwrap();
        let err = store
            .append_pass(&row(id, PassName::FallbackReconstruct, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::Duplicate { pass: 4, attempt: 1, .. }));
        assert_eq!(store.passes_for(id).len(), 3);
    }

    #[tokio::test]
    async fn test_terminal_consultation_is_frozen() {
        let store = InMemoryAuditStore::new();
        let mut consultation = Consultation::new("case-1", PipelineMode::MultiPass, "replay");
        consultation.status = ConsultationStatus::InProgress;
        store.upsert_consultation(&consultation).await.unwrap();
        consultation.finish(ConsultationStatus::Completed);
        store.upsert_consultation(&consultation).await.unwrap();
        assert!(store.consultation(consultation.id).unwrap().completed_at.is_some());

        consultation.status = ConsultationStatus::InProgress;
        let err = store.upsert_consultation(&consultation).await.unwrap_err();
        assert!(matches!(err, AuditError::AlreadyTerminal(_)));
    }

    #[test]
    fn test_row_carries_version_tags() {
        let pass = row(Uuid::new_v4(), PassName::FallbackReconstruct, 0);
        assert_eq!(pass.pass_number, 4);
        assert_eq!(pass.prompt_version, PROMPT_VERSION);
        assert_eq!(pass.schema_version, SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_jsonl_sink_appends_tagged_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit").join("trail.jsonl");
        let sink = JsonlAuditSink::open(&path).await.unwrap();

        let consultation = Consultation::new("case-1", PipelineMode::Direct, "replay");
        sink.upsert_consultation(&consultation).await.unwrap();
        sink.append_pass(&PassExecution::skipped(consultation.id, PassName::Critique))
            .await
            .unwrap();
        sink.record_escalation(&EscalationEvent {
            consultation_id: consultation.id,
            reason_code: "post_repair_low_confidence".into(),
            reason: "confidence 0.40 below 0.45".into(),
            from_provider: "replay".into(),
            to_provider: "ollama".into(),
            succeeded: false,
            timestamp: Utc::now(),
        })
        .await
        .unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<JsonValue> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["record"], "consultation");
        assert_eq!(lines[0]["pipeline_mode"], "direct");
        assert_eq!(lines[1]["record"], "pass");
        assert_eq!(lines[1]["status"], "skipped");
        assert_eq!(lines[2]["record"], "escalation");
    }
}
