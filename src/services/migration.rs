use std::sync::Arc;
use thiserror::Error;
use crate::models::{ProgressSnapshot, ValidationResult};
use crate::services::allocation_store::AllocationStore;
use crate::services::capacity::CapacityPlanner;
use crate::services::device_config::DeviceConfigPusher;
use crate::services::job_store::JobStore;
use crate::services::migration_worker::MigrationWorker;
use crate::services::directory::UserDirectory;
use crate::types::MigrationJob;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("migration {0} not found")]
    NotFound(String),
    #[error("migration {migration_id} cannot be rolled back while {status}")]
    InvalidState {
        migration_id: String,
        status: String,
    },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Creates migration jobs and serves their read path. Validation and the
/// mutual-exclusion check run synchronously on the request path; the run
/// itself is handed to a detached worker task.
pub struct MigrationService {
    planner: Arc<CapacityPlanner>,
    allocations: Arc<dyn AllocationStore>,
    jobs: Arc<dyn JobStore>,
    users: Arc<dyn UserDirectory>,
    pusher: Arc<dyn DeviceConfigPusher>,
}

impl MigrationService {
    pub fn new(
        planner: Arc<CapacityPlanner>,
        allocations: Arc<dyn AllocationStore>,
        jobs: Arc<dyn JobStore>,
        users: Arc<dyn UserDirectory>,
        pusher: Arc<dyn DeviceConfigPusher>,
    ) -> Self {
        Self {
            planner,
            allocations,
            jobs,
            users,
            pusher,
        }
    }

    pub async fn validate(
        &self,
        source_pool_id: &str,
        target_pool_id: &str,
        profile_id: &str,
    ) -> Result<ValidationResult, MigrationError> {
        Ok(self
            .planner
            .validate(source_pool_id, target_pool_id, profile_id)
            .await?)
    }

    pub async fn start(
        &self,
        source_pool_id: &str,
        target_pool_id: &str,
        profile_id: &str,
    ) -> Result<String, MigrationError> {
        let validation = self
            .planner
            .validate(source_pool_id, target_pool_id, profile_id)
            .await?;
        if !validation.valid {
            return Err(MigrationError::Validation(
                validation
                    .message
                    .unwrap_or_else(|| "invalid migration request".to_string()),
            ));
        }
        if let Some(warning) = &validation.warning {
            tracing::warn!("Starting migration despite capacity warning: {}", warning);
        }

        if let Some(active) = self.jobs.find_active_for_source(source_pool_id).await? {
            return Err(MigrationError::Conflict(format!(
                "migration {} is already {} for source pool {}",
                active.id,
                active.status.as_str(),
                source_pool_id
            )));
        }

        let user_ids = self
            .users
            .list_users_in_pool_with_profile(source_pool_id, profile_id)
            .await?;
        let job = MigrationJob::new(source_pool_id, target_pool_id, profile_id, user_ids);
        let migration_id = job.id.clone();
        self.jobs.insert(&job).await?;

        tracing::info!(
            "Created migration {}: {} user(s) from pool {} to pool {}",
            migration_id,
            job.total,
            source_pool_id,
            target_pool_id
        );

        self.dispatch(&migration_id);
        Ok(migration_id)
    }

    /// Hand the job to a detached worker task; the caller never waits on it.
    fn dispatch(&self, migration_id: &str) {
        let worker = MigrationWorker::new(
            self.allocations.clone(),
            self.jobs.clone(),
            self.pusher.clone(),
        );
        let migration_id = migration_id.to_string();
        tokio::spawn(async move {
            worker.run(&migration_id).await;
        });
    }

    pub async fn get_progress(&self, migration_id: &str) -> Result<ProgressSnapshot, MigrationError> {
        let job = self
            .jobs
            .get(migration_id)
            .await?
            .ok_or_else(|| MigrationError::NotFound(migration_id.to_string()))?;
        Ok(ProgressSnapshot::from(&job))
    }

    pub async fn history(&self) -> Result<Vec<ProgressSnapshot>, MigrationError> {
        let jobs = self.jobs.list_recent().await?;
        Ok(jobs.iter().map(ProgressSnapshot::from).collect())
    }
}
