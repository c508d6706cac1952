use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{bson::doc, Collection, Database};
use crate::types::{MigratedUser, MigrationJob, MigrationStatus, UserFailure};

/// Persistence for migration jobs. The worker that wins the pending→processing
/// claim is the only writer until the job is terminal; after that only the
/// rollback transition may touch it.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: &MigrationJob) -> Result<()>;

    async fn get(&self, migration_id: &str) -> Result<Option<MigrationJob>>;

    /// All jobs, newest first.
    async fn list_recent(&self) -> Result<Vec<MigrationJob>>;

    /// A pending or processing job whose source pool matches. Backs the
    /// orchestrator's mutual-exclusion check.
    async fn find_active_for_source(&self, source_pool_id: &str) -> Result<Option<MigrationJob>>;

    /// Atomic pending→processing transition. False when the job was already
    /// claimed or is past pending.
    async fn claim(&self, migration_id: &str) -> Result<bool>;

    /// Record one migrated user: bumps processed and successful together and
    /// appends to the rollback ledger in a single atomic step.
    async fn record_success(&self, migration_id: &str, migrated: &MigratedUser) -> Result<()>;

    /// Record one failed user: bumps processed and failed together and
    /// appends to failed_users in a single atomic step.
    async fn record_failure(&self, migration_id: &str, failure: &UserFailure) -> Result<()>;

    async fn finalize(
        &self,
        migration_id: &str,
        status: MigrationStatus,
        error: Option<&str>,
    ) -> Result<()>;

    /// Atomic {completed,failed}→rolled_back transition. False when the job
    /// was not in a rollback-eligible state.
    async fn mark_rolled_back(&self, migration_id: &str, warnings: &[UserFailure]) -> Result<bool>;

    /// Drop terminal jobs created before the cutoff. Returns how many were
    /// removed.
    async fn delete_terminal_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

pub struct MongoJobStore {
    db: Database,
}

impl MongoJobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn jobs(&self) -> Collection<MigrationJob> {
        self.db.collection("migration_jobs")
    }
}

#[async_trait]
impl JobStore for MongoJobStore {
    async fn insert(&self, job: &MigrationJob) -> Result<()> {
        self.jobs().insert_one(job).await?;
        Ok(())
    }

    async fn get(&self, migration_id: &str) -> Result<Option<MigrationJob>> {
        Ok(self.jobs().find_one(doc! { "_id": migration_id }).await?)
    }

    async fn list_recent(&self) -> Result<Vec<MigrationJob>> {
        let cursor = self
            .jobs()
            .find(doc! {})
            .sort(doc! { "created_at": -1 })
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn find_active_for_source(&self, source_pool_id: &str) -> Result<Option<MigrationJob>> {
        Ok(self
            .jobs()
            .find_one(doc! {
                "source_pool_id": source_pool_id,
                "status": { "$in": ["pending", "processing"] },
            })
            .await?)
    }

    async fn claim(&self, migration_id: &str) -> Result<bool> {
        let result = self
            .jobs()
            .update_one(
                doc! { "_id": migration_id, "status": "pending" },
                doc! { "$set": { "status": "processing" } },
            )
            .await?;
        Ok(result.modified_count == 1)
    }

    async fn record_success(&self, migration_id: &str, migrated: &MigratedUser) -> Result<()> {
        self.jobs()
            .update_one(
                doc! { "_id": migration_id },
                doc! {
                    "$inc": { "processed": 1, "successful": 1 },
                    "$push": { "migrated_users": mongodb::bson::to_bson(migrated)? },
                },
            )
            .await?;
        Ok(())
    }

    async fn record_failure(&self, migration_id: &str, failure: &UserFailure) -> Result<()> {
        self.jobs()
            .update_one(
                doc! { "_id": migration_id },
                doc! {
                    "$inc": { "processed": 1, "failed": 1 },
                    "$push": { "failed_users": mongodb::bson::to_bson(failure)? },
                },
            )
            .await?;
        Ok(())
    }

    async fn finalize(
        &self,
        migration_id: &str,
        status: MigrationStatus,
        error: Option<&str>,
    ) -> Result<()> {
        self.jobs()
            .update_one(
                doc! { "_id": migration_id, "status": "processing" },
                doc! {
                    "$set": {
                        "status": status.as_str(),
                        "error": error,
                        "completed_at": Utc::now().to_rfc3339(),
                    }
                },
            )
            .await?;
        Ok(())
    }

    async fn mark_rolled_back(&self, migration_id: &str, warnings: &[UserFailure]) -> Result<bool> {
        let result = self
            .jobs()
            .update_one(
                doc! { "_id": migration_id, "status": { "$in": ["completed", "failed"] } },
                doc! {
                    "$set": {
                        "status": "rolled_back",
                        "rollback_warnings": mongodb::bson::to_bson(warnings)?,
                        "rolled_back_at": Utc::now().to_rfc3339(),
                    }
                },
            )
            .await?;
        Ok(result.modified_count == 1)
    }

    async fn delete_terminal_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = self
            .jobs()
            .delete_many(doc! {
                "status": { "$in": ["completed", "failed", "rolled_back"] },
                "created_at": {
                    "$lt": mongodb::bson::DateTime::from_millis(cutoff.timestamp_millis())
                },
            })
            .await?;
        Ok(result.deleted_count)
    }
}
