use anyhow::Result;
use std::sync::Arc;
use crate::models::{FailedUserEntry, RollbackResponse};
use crate::services::allocation_store::AllocationStore;
use crate::services::device_config::DeviceConfigPusher;
use crate::services::job_store::JobStore;
use crate::services::migration::MigrationError;
use crate::types::{IpAllocation, IpSubnet, MigratedUser, MigrationJob, UserFailure};

/// Reverses a terminal migration run: every user in the job's migrated ledger
/// gets an active allocation back in their original subnet — the original
/// address when still free, any other free address otherwise. Individual
/// reversal problems become warnings; the job reaches rolled_back regardless.
pub struct RollbackService {
    allocations: Arc<dyn AllocationStore>,
    jobs: Arc<dyn JobStore>,
    pusher: Arc<dyn DeviceConfigPusher>,
}

struct RestoreOutcome {
    restored: bool,
    warning: Option<String>,
}

impl RollbackService {
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

    pub async fn rollback(&self, migration_id: &str) -> Result<RollbackResponse, MigrationError> {
        let job = self
            .jobs
            .get(migration_id)
            .await?
            .ok_or_else(|| MigrationError::NotFound(migration_id.to_string()))?;
        if !job.status.can_roll_back() {
            return Err(MigrationError::InvalidState {
                migration_id: migration_id.to_string(),
                status: job.status.as_str().to_string(),
            });
        }

        let mut restored = 0u64;
        let mut warnings: Vec<UserFailure> = Vec::new();
        for migrated in &job.migrated_users {
            let outcome = self.restore_user(&job, migrated).await?;
            if outcome.restored {
                restored += 1;
            }
            if let Some(warning) = outcome.warning {
                tracing::warn!(
                    "Rollback of migration {}: user {}: {}",
                    migration_id,
                    migrated.user_id,
                    warning
                );
                warnings.push(UserFailure {
                    user_id: migrated.user_id.clone(),
                    reason: warning,
                });
            }
        }

        if !self.jobs.mark_rolled_back(migration_id, &warnings).await? {
            // Lost a race against a concurrent rollback of the same job.
            return Err(MigrationError::InvalidState {
                migration_id: migration_id.to_string(),
                status: "rolled_back".to_string(),
            });
        }

        tracing::info!(
            "Migration {} rolled back: {} user(s) restored, {} warning(s)",
            migration_id,
            restored,
            warnings.len()
        );

        Ok(RollbackResponse {
            success: true,
            message: format!(
                "Migration {} rolled back: {} user(s) restored, {} warning(s)",
                migration_id,
                restored,
                warnings.len()
            ),
            restored,
            warnings: warnings.iter().map(FailedUserEntry::from).collect(),
        })
    }

    /// Claim in the original subnet, push, then release the allocation the
    /// run left the user with — the same sub-step order as the forward path.
    async fn restore_user(
        &self,
        job: &MigrationJob,
        migrated: &MigratedUser,
    ) -> Result<RestoreOutcome> {
        let subnet = match self.allocations.get_subnet(&migrated.old_subnet_id).await? {
            Some(subnet) => subnet,
            None => {
                return Ok(RestoreOutcome {
                    restored: false,
                    warning: Some(format!(
                        "original subnet {} no longer exists",
                        migrated.old_subnet_id
                    )),
                })
            }
        };

        let current = self.allocations.find_active_for_user(&migrated.user_id).await?;

        let (allocation, exact) = match self
            .allocations
            .claim(&migrated.old_subnet_id, &migrated.old_address, &migrated.user_id)
            .await?
        {
            Some(allocation) => (allocation, true),
            None => match self.claim_any_free(&subnet, &migrated.user_id).await? {
                Some(allocation) => (allocation, false),
                None => {
                    return Ok(RestoreOutcome {
                        restored: false,
                        warning: Some(format!(
                            "original address {} was reassigned and subnet {} has no free address",
                            migrated.old_address, migrated.old_subnet_id
                        )),
                    })
                }
            },
        };

        if let Err(push_err) = self
            .pusher
            .apply_address(&migrated.user_id, &allocation.address, &job.profile_id)
            .await
        {
            self.allocations.release(&allocation.id).await?;
            return Ok(RestoreOutcome {
                restored: false,
                warning: Some(format!("device push failed: {}", push_err)),
            });
        }

        if let Some(current) = current {
            self.allocations.release(&current.id).await?;
        }

        Ok(RestoreOutcome {
            restored: true,
            warning: (!exact).then(|| {
                format!(
                    "original address {} was reassigned; restored to {} instead",
                    migrated.old_address, allocation.address
                )
            }),
        })
    }

    async fn claim_any_free(
        &self,
        subnet: &IpSubnet,
        user_id: &str,
    ) -> Result<Option<IpAllocation>> {
        let taken = self.allocations.active_addresses(&subnet.id).await?;
        for host in subnet.iter_hosts() {
            let address = host.to_string();
            if taken.contains(&address) {
                continue;
            }
            if let Some(allocation) = self.allocations.claim(&subnet.id, &address, user_id).await? {
                return Ok(Some(allocation));
            }
        }
        Ok(None)
    }
}
