use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use crate::types::{MigrationJob, MigrationStatus, UserFailure};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRequest {
    pub source_pool_id: String,
    pub target_pool_id: String,
    pub profile_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub valid: bool,
    pub users_count: u64,
    pub available_ips: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl ValidationResult {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            users_count: 0,
            available_ips: 0,
            message: Some(message.into()),
            warning: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMigrationResponse {
    pub migration_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedUserEntry {
    pub user_id: String,
    pub reason: String,
}

impl From<&UserFailure> for FailedUserEntry {
    fn from(failure: &UserFailure) -> Self {
        Self {
            user_id: failure.user_id.clone(),
            reason: failure.reason.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub migration_id: String,
    pub status: MigrationStatus,
    pub total: u64,
    pub processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub failed_users: Vec<FailedUserEntry>,
    pub percentage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&MigrationJob> for ProgressSnapshot {
    fn from(job: &MigrationJob) -> Self {
        Self {
            migration_id: job.id.clone(),
            status: job.status,
            total: job.total,
            processed: job.processed,
            successful: job.successful,
            failed: job.failed,
            failed_users: job.failed_users.iter().map(FailedUserEntry::from).collect(),
            percentage: job.percentage(),
            error: job.error.clone(),
            created_at: job.created_at,
            completed_at: job.completed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackResponse {
    pub success: bool,
    pub message: String,
    pub restored: u64,
    pub warnings: Vec<FailedUserEntry>,
}
