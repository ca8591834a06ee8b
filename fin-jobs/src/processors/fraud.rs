use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Instant;
use tracing::{info, warn};

use fin_queue::{ActiveJob, JobError, JobRecord, Processor};

use crate::payloads::{
    job_names, FlagSuspiciousData, JobResult, Keyed, ReviewAccountData, ScoreTransactionData,
};
use crate::processors::dead_letter_on_exhaustion;
use crate::queues::QueueName;
use crate::service::QueueService;

/// Amounts at or above this raise `high_amount`
pub const HIGH_AMOUNT_THRESHOLD: f64 = 10_000.0;

const HIGH_AMOUNT_WEIGHT: u32 = 60;
const MISSING_DEVICE_WEIGHT: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: u32) -> Self {
        match score {
            80..=u32::MAX => Self::Critical,
            50..=79 => Self::High,
            25..=49 => Self::Medium,
            _ => Self::Low,
        }
    }

    pub fn recommendation(&self) -> Recommendation {
        match self {
            Self::Low => Recommendation::Allow,
            Self::Medium | Self::High => Recommendation::Review,
            Self::Critical => Recommendation::Block,
        }
    }

    /// High and critical scores raise a flag-suspicious job
    pub fn requires_flag(&self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recommendation {
    Allow,
    Review,
    Block,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FraudAssessment {
    pub risk_level: RiskLevel,
    pub recommendation: Recommendation,
    pub signals: Vec<String>,
    pub score: u32,
}

impl FraudAssessment {
    /// Deterministic rule-based score for one transaction
    pub fn assess(data: &ScoreTransactionData) -> Self {
        let mut signals = Vec::new();
        let mut score = 0;

        if data.amount >= HIGH_AMOUNT_THRESHOLD {
            signals.push("high_amount".to_string());
            score += HIGH_AMOUNT_WEIGHT;
        }
        if data.device_fingerprint.as_deref().map_or(true, str::is_empty) {
            signals.push("missing_device".to_string());
            score += MISSING_DEVICE_WEIGHT;
        }

        let risk_level = RiskLevel::from_score(score);
        Self {
            risk_level,
            recommendation: risk_level.recommendation(),
            signals,
            score,
        }
    }
}

/// Transaction scoring, account reviews and suspicious-entity flags.
///
/// Scoring may emit a follow-up job: a high or critical score enqueues a
/// `flag-suspicious` job keyed on the scoring job's idempotency key, so a
/// retried scoring never flags twice.
pub struct FraudScoringProcessor {
    service: QueueService,
}

impl FraudScoringProcessor {
    pub fn new(service: QueueService) -> Self {
        Self { service }
    }

    async fn score_transaction(&self, data: &ScoreTransactionData, idempotency_key: &str) -> Result<Value, JobError> {
        let assessment = FraudAssessment::assess(data);

        info!(
            transaction_id = %data.transaction_id,
            risk_level = ?assessment.risk_level,
            score = assessment.score,
            "Transaction scored"
        );

        if assessment.risk_level.requires_flag() {
            let flag = FlagSuspiciousData {
                entity_type: "transaction".to_string(),
                entity_id: data.transaction_id.clone(),
                reasons: assessment.signals.clone(),
                score: assessment.score,
            };
            let handle = self
                .service
                .enqueue_flag_suspicious(flag, Some(idempotency_key.to_string()))
                .await?;
            warn!(
                transaction_id = %data.transaction_id,
                flag_job_id = %handle.job_id,
                "Transaction flagged as suspicious"
            );
        }

        Ok(serde_json::to_value(assessment)?)
    }
}

#[async_trait]
impl Processor for FraudScoringProcessor {
    async fn process(&self, job: &ActiveJob) -> Result<Value, JobError> {
        let started = Instant::now();

        match job.name() {
            job_names::SCORE_TRANSACTION => {
                let Keyed { data, idempotency_key } = job.payload::<Keyed<ScoreTransactionData>>()?;
                let outcome = self.score_transaction(&data, &idempotency_key).await?;
                JobResult::success(outcome, started, idempotency_key).into_value()
            }
            job_names::REVIEW_ACCOUNT => {
                let Keyed { data, idempotency_key } = job.payload::<Keyed<ReviewAccountData>>()?;
                info!(
                    account_id = %data.account_id,
                    trigger_reason = %data.trigger_reason,
                    priority = ?data.priority,
                    "Account queued for review"
                );
                JobResult::success(json!({ "reviewed": true, "accountId": data.account_id }), started, idempotency_key)
                    .into_value()
            }
            job_names::FLAG_SUSPICIOUS => {
                let Keyed { data, idempotency_key } = job.payload::<Keyed<FlagSuspiciousData>>()?;
                warn!(
                    entity_type = %data.entity_type,
                    entity_id = %data.entity_id,
                    reasons = ?data.reasons,
                    score = data.score,
                    "Entity flagged"
                );
                JobResult::success(json!({ "flagged": true, "entityId": data.entity_id }), started, idempotency_key)
                    .into_value()
            }
            _ => Err(JobError::new("Unknown fraud job")),
        }
    }

    async fn on_failed(&self, job: &JobRecord, error: &JobError) {
        dead_letter_on_exhaustion(&self.service, QueueName::FraudScoring, job, error).await;
    }
}
