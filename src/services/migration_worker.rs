use anyhow::Result;
use std::sync::Arc;
use crate::services::allocation_store::AllocationStore;
use crate::services::device_config::DeviceConfigPusher;
use crate::services::job_store::JobStore;
use crate::types::{IpAllocation, IpSubnet, MigratedUser, MigrationJob, MigrationStatus, UserFailure};

pub const REASON_POOL_EXHAUSTED: &str = "target pool exhausted";

/// Executes one migration job as a single pass over the frozen user set.
///
/// Per-user problems (no free address, device push failure) are recorded and
/// the pass continues; only a storage-level error aborts the run and marks
/// the job failed.
pub struct MigrationWorker {
    allocations: Arc<dyn AllocationStore>,
    jobs: Arc<dyn JobStore>,
    pusher: Arc<dyn DeviceConfigPusher>,
}

enum UserOutcome {
    Migrated(MigratedUser),
    Failed(String),
}

impl MigrationWorker {
    pub fn new(
        allocations: Arc<dyn AllocationStore>,
        jobs: Arc<dyn JobStore>,
        pusher: Arc<dyn DeviceConfigPusher>,
    ) -> Self {
        Self {
            allocations,
            jobs,
            pusher,
        }
    }

    /// Entry point for the detached worker task.
    pub async fn run(&self, migration_id: &str) {
        match self.jobs.claim(migration_id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(
                    "Migration {} is not pending (already claimed or terminal), skipping",
                    migration_id
                );
                return;
            }
            Err(e) => {
                tracing::error!("Failed to claim migration {}: {}", migration_id, e);
                return;
            }
        }

        match self.execute(migration_id).await {
            Ok(()) => {
                if let Err(e) = self
                    .jobs
                    .finalize(migration_id, MigrationStatus::Completed, None)
                    .await
                {
                    tracing::error!("Failed to finalize migration {}: {}", migration_id, e);
                    return;
                }
                tracing::info!("Migration {} completed", migration_id);
            }
            Err(e) => {
                tracing::error!("Migration {} aborted: {}", migration_id, e);
                if let Err(finalize_err) = self
                    .jobs
                    .finalize(migration_id, MigrationStatus::Failed, Some(&e.to_string()))
                    .await
                {
                    tracing::error!(
                        "Failed to mark migration {} as failed: {}",
                        migration_id,
                        finalize_err
                    );
                }
            }
        }
    }

    async fn execute(&self, migration_id: &str) -> Result<()> {
        let job = self
            .jobs
            .get(migration_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("migration job {} disappeared", migration_id))?;

        let target_pool = self
            .allocations
            .get_pool(&job.target_pool_id)
            .await?
            .ok_or_else(|| {
                anyhow::anyhow!("target pool {} no longer exists", job.target_pool_id)
            })?;
        let target_subnets = self.allocations.list_subnets(&job.target_pool_id).await?;

        tracing::info!(
            "Migration {}: moving {} user(s) from pool {} to pool {}",
            migration_id,
            job.user_ids.len(),
            job.source_pool_id,
            target_pool.name
        );

        for user_id in &job.user_ids {
            match self.migrate_user(&job, user_id, &target_subnets).await? {
                UserOutcome::Migrated(migrated) => {
                    tracing::debug!(
                        "Migration {}: user {} moved to {}",
                        migration_id,
                        user_id,
                        migrated.new_address
                    );
                    self.jobs.record_success(migration_id, &migrated).await?;
                }
                UserOutcome::Failed(reason) => {
                    tracing::warn!("Migration {}: user {} failed: {}", migration_id, user_id, reason);
                    self.jobs
                        .record_failure(
                            migration_id,
                            &UserFailure {
                                user_id: user_id.clone(),
                                reason,
                            },
                        )
                        .await?;
                }
            }
        }

        Ok(())
    }

    /// One user, one logical step: claim a target address, push it to the
    /// device, release the old allocation. A failed push rolls the claim back
    /// so the store never shows an address active without a pushed device.
    async fn migrate_user(
        &self,
        job: &MigrationJob,
        user_id: &str,
        target_subnets: &[IpSubnet],
    ) -> Result<UserOutcome> {
        let old = match self.allocations.find_active_for_user(user_id).await? {
            Some(allocation) => allocation,
            None => return Ok(UserOutcome::Failed("no active allocation".to_string())),
        };

        let new_allocation = match self.claim_first_fit(user_id, target_subnets).await? {
            Some(allocation) => allocation,
            None => return Ok(UserOutcome::Failed(REASON_POOL_EXHAUSTED.to_string())),
        };

        if let Err(push_err) = self
            .pusher
            .apply_address(user_id, &new_allocation.address, &job.profile_id)
            .await
        {
            self.allocations.release(&new_allocation.id).await?;
            return Ok(UserOutcome::Failed(format!("device push failed: {}", push_err)));
        }

        self.allocations.release(&old.id).await?;

        Ok(UserOutcome::Migrated(MigratedUser {
            user_id: user_id.to_string(),
            old_subnet_id: old.subnet_id,
            old_address: old.address,
            new_subnet_id: new_allocation.subnet_id.clone(),
            new_address: new_allocation.address.clone(),
        }))
    }

    /// First subnet with room, first free address within it. A lost claim
    /// race just moves the scan to the next address.
    async fn claim_first_fit(
        &self,
        user_id: &str,
        subnets: &[IpSubnet],
    ) -> Result<Option<IpAllocation>> {
        for subnet in subnets {
            let taken = self.allocations.active_addresses(&subnet.id).await?;
            for host in subnet.iter_hosts() {
                let address = host.to_string();
                if taken.contains(&address) {
                    continue;
                }
                if let Some(allocation) =
                    self.allocations.claim(&subnet.id, &address, user_id).await?
                {
                    return Ok(Some(allocation));
                }
            }
        }
        Ok(None)
    }
}
