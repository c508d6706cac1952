use anyhow::Result;
use std::sync::Arc;
use crate::models::ValidationResult;
use crate::services::allocation_store::AllocationStore;
use crate::services::directory::{ProfileLookup, UserDirectory};

/// Pre-flight check for a (source pool, target pool, profile) migration.
///
/// Only structural problems make the result invalid: a missing pool or
/// profile, an inactive pool, or source == target. A target pool without
/// enough free addresses is a warning — the run is allowed and per-user
/// exhaustion is handled by the partial-failure contract.
pub struct CapacityPlanner {
    allocations: Arc<dyn AllocationStore>,
    users: Arc<dyn UserDirectory>,
    profiles: Arc<dyn ProfileLookup>,
}

impl CapacityPlanner {
    pub fn new(
        allocations: Arc<dyn AllocationStore>,
        users: Arc<dyn UserDirectory>,
        profiles: Arc<dyn ProfileLookup>,
    ) -> Self {
        Self {
            allocations,
            users,
            profiles,
        }
    }

    pub async fn validate(
        &self,
        source_pool_id: &str,
        target_pool_id: &str,
        profile_id: &str,
    ) -> Result<ValidationResult> {
        if source_pool_id == target_pool_id {
            return Ok(ValidationResult::invalid(
                "Source and target pool must be different",
            ));
        }

        let source_pool = match self.allocations.get_pool(source_pool_id).await? {
            Some(pool) => pool,
            None => {
                return Ok(ValidationResult::invalid(format!(
                    "Source pool {} not found",
                    source_pool_id
                )))
            }
        };
        if !source_pool.active {
            return Ok(ValidationResult::invalid(format!(
                "Source pool {} is not active",
                source_pool.name
            )));
        }

        let target_pool = match self.allocations.get_pool(target_pool_id).await? {
            Some(pool) => pool,
            None => {
                return Ok(ValidationResult::invalid(format!(
                    "Target pool {} not found",
                    target_pool_id
                )))
            }
        };
        if !target_pool.active {
            return Ok(ValidationResult::invalid(format!(
                "Target pool {} is not active",
                target_pool.name
            )));
        }

        if !self.profiles.profile_exists(profile_id).await? {
            return Ok(ValidationResult::invalid(format!(
                "Profile {} not found",
                profile_id
            )));
        }

        let users_count = self
            .users
            .list_users_in_pool_with_profile(source_pool_id, profile_id)
            .await?
            .len() as u64;
        let available_ips = self.available_in_pool(target_pool_id).await?;

        let warning = if users_count > available_ips {
            Some(format!(
                "Insufficient IP addresses: need {}, available {}. Users without a free address will fail individually.",
                users_count, available_ips
            ))
        } else {
            None
        };

        Ok(ValidationResult {
            valid: true,
            users_count,
            available_ips,
            message: None,
            warning,
        })
    }

    /// Free addresses across a pool's active subnets.
    pub async fn available_in_pool(&self, pool_id: &str) -> Result<u64> {
        let mut available = 0u64;
        for subnet in self.allocations.list_subnets(pool_id).await? {
            let in_use = self.allocations.count_active(&subnet.id).await?;
            available += subnet.capacity().saturating_sub(in_use);
        }
        Ok(available)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{seed_pool, seed_subnet, seed_user, MemoryIpam};

    fn planner(ipam: &MemoryIpam) -> CapacityPlanner {
        CapacityPlanner::new(ipam.store(), ipam.directory(), ipam.profiles())
    }

    #[tokio::test]
    async fn test_source_equals_target_is_rejected_even_for_missing_pools() {
        let ipam = MemoryIpam::new();
        let result = planner(&ipam)
            .validate("pool-x", "pool-x", "profile-1")
            .await
            .unwrap();
        assert!(!result.valid);
        assert!(result.message.unwrap().contains("different"));
    }

    #[tokio::test]
    async fn test_missing_pools_and_profile_are_structural_errors() {
        let ipam = MemoryIpam::new();
        seed_pool(&ipam, "pool-a", true);

        let result = planner(&ipam)
            .validate("pool-a", "pool-b", "profile-1")
            .await
            .unwrap();
        assert!(!result.valid);
        assert!(result.message.unwrap().contains("Target pool"));

        seed_pool(&ipam, "pool-b", true);
        let result = planner(&ipam)
            .validate("pool-a", "pool-b", "missing-profile")
            .await
            .unwrap();
        assert!(!result.valid);
        assert!(result.message.unwrap().contains("Profile"));
    }

    #[tokio::test]
    async fn test_inactive_pool_is_rejected() {
        let ipam = MemoryIpam::new();
        seed_pool(&ipam, "pool-a", true);
        seed_pool(&ipam, "pool-b", false);
        ipam.add_profile("profile-1");

        let result = planner(&ipam)
            .validate("pool-a", "pool-b", "profile-1")
            .await
            .unwrap();
        assert!(!result.valid);
        assert!(result.message.unwrap().contains("not active"));
    }

    #[tokio::test]
    async fn test_exhausted_target_is_a_warning_not_a_failure() {
        let ipam = MemoryIpam::new();
        seed_pool(&ipam, "pool-a", true);
        seed_pool(&ipam, "pool-b", true);
        ipam.add_profile("profile-1");
        // /30 with gateway: exactly one assignable address, already taken.
        seed_subnet(&ipam, "sub-a", "pool-a", "10.0.0.0", 24, Some("10.0.0.1"));
        seed_subnet(&ipam, "sub-b", "pool-b", "10.9.0.0", 30, Some("10.9.0.1"));
        seed_user(&ipam, "u1", "profile-1", "sub-a", "10.0.0.10");
        seed_user(&ipam, "blocker", "profile-2", "sub-b", "10.9.0.2");

        let result = planner(&ipam)
            .validate("pool-a", "pool-b", "profile-1")
            .await
            .unwrap();
        assert!(result.valid);
        assert_eq!(result.users_count, 1);
        assert_eq!(result.available_ips, 0);
        assert!(result.warning.unwrap().contains("Insufficient"));
        assert!(result.message.is_none());
    }

    #[tokio::test]
    async fn test_counts_users_and_free_addresses() {
        let ipam = MemoryIpam::new();
        seed_pool(&ipam, "pool-a", true);
        seed_pool(&ipam, "pool-b", true);
        ipam.add_profile("profile-1");
        seed_subnet(&ipam, "sub-a", "pool-a", "10.0.0.0", 24, Some("10.0.0.1"));
        seed_subnet(&ipam, "sub-b", "pool-b", "10.9.0.0", 29, Some("10.9.0.1"));
        seed_user(&ipam, "u1", "profile-1", "sub-a", "10.0.0.10");
        seed_user(&ipam, "u2", "profile-1", "sub-a", "10.0.0.11");
        seed_user(&ipam, "u3", "other-profile", "sub-a", "10.0.0.12");
        // One of the five /29 host addresses is already held.
        seed_user(&ipam, "tenant", "profile-9", "sub-b", "10.9.0.2");

        let result = planner(&ipam)
            .validate("pool-a", "pool-b", "profile-1")
            .await
            .unwrap();
        assert!(result.valid);
        assert_eq!(result.users_count, 2);
        assert_eq!(result.available_ips, 4);
        assert!(result.warning.is_none());
    }
}
