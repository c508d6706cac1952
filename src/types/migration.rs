use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    RolledBack,
}

impl MigrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStatus::Pending => "pending",
            MigrationStatus::Processing => "processing",
            MigrationStatus::Completed => "completed",
            MigrationStatus::Failed => "failed",
            MigrationStatus::RolledBack => "rolled_back",
        }
    }

    /// States from which no worker will touch the job again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MigrationStatus::Completed | MigrationStatus::Failed | MigrationStatus::RolledBack
        )
    }

    /// A rollback may only start from a terminal run state, and `rolled_back`
    /// itself is reachable exactly once.
    pub fn can_roll_back(&self) -> bool {
        matches!(self, MigrationStatus::Completed | MigrationStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserFailure {
    pub user_id: String,
    pub reason: String,
}

/// Ledger entry for one successfully migrated user. Holds everything the
/// rollback pass needs to restore the previous allocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigratedUser {
    pub user_id: String,
    pub old_subnet_id: String,
    pub old_address: String,
    pub new_subnet_id: String,
    pub new_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationJob {
    #[serde(rename = "_id")]
    pub id: String,
    pub source_pool_id: String,
    pub target_pool_id: String,
    pub profile_id: String,
    pub status: MigrationStatus,
    /// User set frozen at job creation; the worker never re-derives it.
    pub user_ids: Vec<String>,
    pub total: u64,
    pub processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub failed_users: Vec<UserFailure>,
    pub migrated_users: Vec<MigratedUser>,
    pub rollback_warnings: Vec<UserFailure>,
    pub error: Option<String>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub rolled_back_at: Option<DateTime<Utc>>,
}

impl MigrationJob {
    pub fn new(
        source_pool_id: &str,
        target_pool_id: &str,
        profile_id: &str,
        user_ids: Vec<String>,
    ) -> Self {
        let total = user_ids.len() as u64;
        Self {
            id: Uuid::new_v4().to_string(),
            source_pool_id: source_pool_id.to_string(),
            target_pool_id: target_pool_id.to_string(),
            profile_id: profile_id.to_string(),
            status: MigrationStatus::Pending,
            user_ids,
            total,
            processed: 0,
            successful: 0,
            failed: 0,
            failed_users: Vec::new(),
            migrated_users: Vec::new(),
            rollback_warnings: Vec::new(),
            error: None,
            created_at: Utc::now(),
            completed_at: None,
            rolled_back_at: None,
        }
    }

    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.processed as f64 / self.total as f64 * 100.0
    }
}
