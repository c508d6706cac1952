//! In-memory implementations of the storage and collaborator seams, shared by
//! the unit tests. No test in this crate needs a running MongoDB or device
//! agent.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use crate::services::allocation_store::AllocationStore;
use crate::services::device_config::DeviceConfigPusher;
use crate::services::directory::{ProfileLookup, UserDirectory};
use crate::services::job_store::JobStore;
use crate::types::{
    AllocationStatus, IpAllocation, IpPool, IpSubnet, MigratedUser, MigrationJob, MigrationStatus,
    NetworkUser, PoolType, UserFailure,
};

#[derive(Default)]
struct IpamState {
    pools: HashMap<String, IpPool>,
    subnets: HashMap<String, IpSubnet>,
    allocations: Vec<IpAllocation>,
    users: HashMap<String, NetworkUser>,
    profiles: HashSet<String>,
}

/// One shared in-memory IPAM world. The `store()`, `directory()` and
/// `profiles()` handles all view the same state, like the Mongo-backed
/// implementations share one database.
#[derive(Clone, Default)]
pub struct MemoryIpam {
    state: Arc<Mutex<IpamState>>,
}

impl MemoryIpam {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self) -> Arc<dyn AllocationStore> {
        Arc::new(self.clone())
    }

    pub fn directory(&self) -> Arc<dyn UserDirectory> {
        Arc::new(self.clone())
    }

    pub fn profiles(&self) -> Arc<dyn ProfileLookup> {
        Arc::new(self.clone())
    }

    pub fn add_profile(&self, profile_id: &str) {
        self.state
            .lock()
            .unwrap()
            .profiles
            .insert(profile_id.to_string());
    }

    pub fn active_allocation(&self, user_id: &str) -> Option<IpAllocation> {
        self.state
            .lock()
            .unwrap()
            .allocations
            .iter()
            .find(|a| a.user_id == user_id && a.status == AllocationStatus::Active)
            .cloned()
    }

    pub fn active_count(&self, subnet_id: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .allocations
            .iter()
            .filter(|a| a.subnet_id == subnet_id && a.status == AllocationStatus::Active)
            .count()
    }
}

pub fn seed_pool(ipam: &MemoryIpam, pool_id: &str, active: bool) {
    let pool = IpPool {
        id: pool_id.to_string(),
        name: pool_id.to_string(),
        pool_type: PoolType::Private,
        active,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    ipam.state
        .lock()
        .unwrap()
        .pools
        .insert(pool_id.to_string(), pool);
}

pub fn seed_subnet(
    ipam: &MemoryIpam,
    subnet_id: &str,
    pool_id: &str,
    network: &str,
    prefix_length: u8,
    gateway: Option<&str>,
) {
    let subnet = IpSubnet {
        id: subnet_id.to_string(),
        pool_id: pool_id.to_string(),
        network: network.to_string(),
        prefix_length,
        gateway: gateway.map(str::to_string),
        active: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    ipam.state
        .lock()
        .unwrap()
        .subnets
        .insert(subnet_id.to_string(), subnet);
}

/// A subscriber with an active allocation, the way the production data looks
/// after normal provisioning.
pub fn seed_user(
    ipam: &MemoryIpam,
    user_id: &str,
    profile_id: &str,
    subnet_id: &str,
    address: &str,
) {
    let mut state = ipam.state.lock().unwrap();
    state.users.insert(
        user_id.to_string(),
        NetworkUser {
            id: user_id.to_string(),
            username: user_id.to_string(),
            profile_id: profile_id.to_string(),
            active: true,
            created_at: Utc::now(),
        },
    );
    state
        .allocations
        .push(IpAllocation::new(subnet_id, address, user_id));
}

#[async_trait]
impl AllocationStore for MemoryIpam {
    async fn get_pool(&self, pool_id: &str) -> Result<Option<IpPool>> {
        Ok(self.state.lock().unwrap().pools.get(pool_id).cloned())
    }

    async fn list_subnets(&self, pool_id: &str) -> Result<Vec<IpSubnet>> {
        let state = self.state.lock().unwrap();
        let mut subnets: Vec<IpSubnet> = state
            .subnets
            .values()
            .filter(|s| s.pool_id == pool_id && s.active)
            .cloned()
            .collect();
        subnets.sort_by_key(|s| {
            (
                s.network
                    .parse::<std::net::Ipv4Addr>()
                    .map(u32::from)
                    .unwrap_or(u32::MAX),
                s.id.clone(),
            )
        });
        Ok(subnets)
    }

    async fn get_subnet(&self, subnet_id: &str) -> Result<Option<IpSubnet>> {
        Ok(self.state.lock().unwrap().subnets.get(subnet_id).cloned())
    }

    async fn count_active(&self, subnet_id: &str) -> Result<u64> {
        Ok(self.active_count(subnet_id) as u64)
    }

    async fn active_addresses(&self, subnet_id: &str) -> Result<HashSet<String>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .allocations
            .iter()
            .filter(|a| a.subnet_id == subnet_id && a.status == AllocationStatus::Active)
            .map(|a| a.address.clone())
            .collect())
    }

    async fn find_active_for_user(&self, user_id: &str) -> Result<Option<IpAllocation>> {
        Ok(self.active_allocation(user_id))
    }

    async fn claim(
        &self,
        subnet_id: &str,
        address: &str,
        user_id: &str,
    ) -> Result<Option<IpAllocation>> {
        let mut state = self.state.lock().unwrap();
        let taken = state.allocations.iter().any(|a| {
            a.subnet_id == subnet_id
                && a.address == address
                && a.status == AllocationStatus::Active
        });
        if taken {
            return Ok(None);
        }
        let allocation = IpAllocation::new(subnet_id, address, user_id);
        state.allocations.push(allocation.clone());
        Ok(Some(allocation))
    }

    async fn release(&self, allocation_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(allocation) = state
            .allocations
            .iter_mut()
            .find(|a| a.id == allocation_id && a.status == AllocationStatus::Active)
        {
            allocation.status = AllocationStatus::Released;
            allocation.released_at = Some(Utc::now());
        }
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for MemoryIpam {
    async fn list_users_in_pool_with_profile(
        &self,
        pool_id: &str,
        profile_id: &str,
    ) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        let subnet_ids: HashSet<&str> = state
            .subnets
            .values()
            .filter(|s| s.pool_id == pool_id)
            .map(|s| s.id.as_str())
            .collect();
        let allocated: HashSet<&str> = state
            .allocations
            .iter()
            .filter(|a| {
                a.status == AllocationStatus::Active && subnet_ids.contains(a.subnet_id.as_str())
            })
            .map(|a| a.user_id.as_str())
            .collect();
        let mut user_ids: Vec<String> = state
            .users
            .values()
            .filter(|u| u.active && u.profile_id == profile_id && allocated.contains(u.id.as_str()))
            .map(|u| u.id.clone())
            .collect();
        user_ids.sort();
        Ok(user_ids)
    }
}

#[async_trait]
impl ProfileLookup for MemoryIpam {
    async fn profile_exists(&self, profile_id: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().profiles.contains(profile_id))
    }
}

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<String, MigrationJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &MigrationJob) -> Result<()> {
        self.jobs
            .lock()
            .unwrap()
            .insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get(&self, migration_id: &str) -> Result<Option<MigrationJob>> {
        Ok(self.jobs.lock().unwrap().get(migration_id).cloned())
    }

    async fn list_recent(&self) -> Result<Vec<MigrationJob>> {
        let mut jobs: Vec<MigrationJob> = self.jobs.lock().unwrap().values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(jobs)
    }

    async fn find_active_for_source(&self, source_pool_id: &str) -> Result<Option<MigrationJob>> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .values()
            .find(|j| {
                j.source_pool_id == source_pool_id
                    && matches!(
                        j.status,
                        MigrationStatus::Pending | MigrationStatus::Processing
                    )
            })
            .cloned())
    }

    async fn claim(&self, migration_id: &str) -> Result<bool> {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(migration_id) {
            Some(job) if job.status == MigrationStatus::Pending => {
                job.status = MigrationStatus::Processing;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_success(&self, migration_id: &str, migrated: &MigratedUser) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(migration_id)
            .ok_or_else(|| anyhow::anyhow!("job {} not found", migration_id))?;
        job.processed += 1;
        job.successful += 1;
        job.migrated_users.push(migrated.clone());
        assert_eq!(job.processed, job.successful + job.failed);
        assert!(job.processed <= job.total);
        Ok(())
    }

    async fn record_failure(&self, migration_id: &str, failure: &UserFailure) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(migration_id)
            .ok_or_else(|| anyhow::anyhow!("job {} not found", migration_id))?;
        job.processed += 1;
        job.failed += 1;
        job.failed_users.push(failure.clone());
        assert_eq!(job.processed, job.successful + job.failed);
        assert!(job.processed <= job.total);
        Ok(())
    }

    async fn finalize(
        &self,
        migration_id: &str,
        status: MigrationStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(migration_id) {
            if job.status == MigrationStatus::Processing {
                job.status = status;
                job.error = error.map(str::to_string);
                job.completed_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn mark_rolled_back(&self, migration_id: &str, warnings: &[UserFailure]) -> Result<bool> {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(migration_id) {
            Some(job) if job.status.can_roll_back() => {
                job.status = MigrationStatus::RolledBack;
                job.rollback_warnings = warnings.to_vec();
                job.rolled_back_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_terminal_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut jobs = self.jobs.lock().unwrap();
        let before = jobs.len();
        jobs.retain(|_, job| !(job.status.is_terminal() && job.created_at < cutoff));
        Ok((before - jobs.len()) as u64)
    }
}

#[derive(Default)]
pub struct MockDevicePusher {
    fail_users: Mutex<HashSet<String>>,
    pushed: Mutex<Vec<(String, String)>>,
}

impl MockDevicePusher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, user_id: &str) {
        self.fail_users.lock().unwrap().insert(user_id.to_string());
    }

    pub fn pushed_count(&self) -> usize {
        self.pushed.lock().unwrap().len()
    }
}

#[async_trait]
impl DeviceConfigPusher for MockDevicePusher {
    async fn apply_address(&self, user_id: &str, address: &str, _profile_id: &str) -> Result<()> {
        if self.fail_users.lock().unwrap().contains(user_id) {
            return Err(anyhow::anyhow!("device unreachable"));
        }
        self.pushed
            .lock()
            .unwrap()
            .push((user_id.to_string(), address.to_string()));
        Ok(())
    }
}
